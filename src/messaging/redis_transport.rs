//! # Redis Transport
//!
//! Redis lists used as queues. Requests are consumed from the configured list
//! with `BRPOP` on one delivery thread per receiver; replies are `LPUSH`ed onto
//! the list named by each message's reply address.
//!
//! List items are JSON envelopes:
//!
//! ```json
//! {"reply_to": "reply.client-7", "message_type": "analysis_request", "body": { ... }}
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

use super::errors::{TransportError, TransportResult};
use super::message::{InboundMessage, OutboundMessage, ReplyAddress};
use super::transport::{
    ConnectionFactory, ExceptionListener, MessageHandler, MessageSender, QueueName, TransportConnection,
};
use crate::config::TransportConfig;

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

impl WireEnvelope {
    fn into_inbound(raw: Vec<u8>) -> InboundMessage {
        match serde_json::from_slice::<WireEnvelope>(&raw) {
            Ok(envelope) => InboundMessage {
                body: envelope
                    .body
                    .filter(|b| !b.is_null())
                    .and_then(|b| serde_json::to_vec(&b).ok()),
                reply_to: envelope.reply_to.map(ReplyAddress::new),
                message_type: envelope.message_type,
            },
            // Let the listener decide what to do with an unreadable payload.
            Err(_) => InboundMessage {
                body: Some(raw),
                reply_to: None,
                message_type: None,
            },
        }
    }
}

pub struct RedisConnectionFactory {
    client: redis::Client,
    provider_url: String,
    poll_timeout: Duration,
}

impl RedisConnectionFactory {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        let client = redis::Client::open(config.provider_url.as_str())
            .map_err(|e| TransportError::connection_failed(&config.provider_url, e.to_string()))?;

        Ok(Self {
            client,
            provider_url: config.provider_url.clone(),
            poll_timeout: config.poll_timeout(),
        })
    }
}

impl ConnectionFactory for RedisConnectionFactory {
    fn lookup_queue(&self, name: &str) -> TransportResult<QueueName> {
        if name.trim().is_empty() {
            return Err(TransportError::queue_not_found(name));
        }
        Ok(QueueName::new(name))
    }

    fn create_connection(&self) -> TransportResult<Arc<dyn TransportConnection>> {
        let mut probe = self
            .client
            .get_connection()
            .map_err(|e| TransportError::connection_failed(&self.provider_url, e.to_string()))?;
        redis::cmd("PING")
            .query::<String>(&mut probe)
            .map_err(|e| TransportError::connection_failed(&self.provider_url, e.to_string()))?;

        Ok(Arc::new(RedisConnection {
            client: self.client.clone(),
            poll_timeout: self.poll_timeout,
            receivers: Mutex::new(Vec::new()),
            listener: Arc::new(RwLock::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            loss_reported: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        }))
    }

    fn provider(&self) -> String {
        self.provider_url.clone()
    }
}

type SharedListener = Arc<RwLock<Option<Arc<dyn ExceptionListener>>>>;

pub struct RedisConnection {
    client: redis::Client,
    poll_timeout: Duration,
    receivers: Mutex<Vec<(QueueName, Arc<dyn MessageHandler>)>>,
    listener: SharedListener,
    closed: Arc<AtomicBool>,
    loss_reported: Arc<AtomicBool>,
    started: AtomicBool,
}

impl RedisConnection {
    fn spawn_delivery(&self, queue: QueueName, handler: Arc<dyn MessageHandler>) -> TransportResult<()> {
        let mut connection = self
            .client
            .get_connection()
            .map_err(|e| TransportError::connection_failed(queue.as_str(), e.to_string()))?;
        let block_secs = self.poll_timeout.as_secs().max(1);
        connection
            .set_read_timeout(Some(Duration::from_secs(block_secs + 5)))
            .map_err(TransportError::from)?;

        let closed = Arc::clone(&self.closed);
        let loss_reported = Arc::clone(&self.loss_reported);
        let listener = Arc::clone(&self.listener);

        thread::Builder::new()
            .name(format!("redis-delivery-{queue}"))
            .spawn(move || {
                while !closed.load(Ordering::SeqCst) {
                    let popped = redis::cmd("BRPOP")
                        .arg(queue.as_str())
                        .arg(block_secs)
                        .query::<Option<(String, Vec<u8>)>>(&mut connection);

                    match popped {
                        Ok(Some((_, raw))) => handler.on_message(WireEnvelope::into_inbound(raw)),
                        Ok(None) => continue,
                        Err(e) => {
                            if closed.load(Ordering::SeqCst) {
                                break;
                            }
                            error!(queue = %queue, error = %e, "📡 REDIS: Delivery failed");
                            closed.store(true, Ordering::SeqCst);
                            if !loss_reported.swap(true, Ordering::SeqCst) {
                                let current = listener.read().clone();
                                if let Some(current) = current {
                                    current.on_exception(TransportError::connection_lost(e.to_string()));
                                }
                            }
                            break;
                        }
                    }
                }
                debug!(queue = %queue, "📡 REDIS: Delivery thread exiting");
            })
            .map(|_| ())
            .map_err(|e| TransportError::internal(format!("failed to spawn delivery thread: {e}")))
    }
}

impl TransportConnection for RedisConnection {
    fn create_receiver(&self, queue: &QueueName, handler: Arc<dyn MessageHandler>) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.receivers.lock().push((queue.clone(), handler));
        Ok(())
    }

    fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>) {
        *self.listener.write() = listener;
    }

    fn start(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let receivers = self.receivers.lock().clone();
        for (queue, handler) in receivers {
            info!(queue = %queue, "📡 REDIS: Starting delivery");
            self.spawn_delivery(queue, handler)?;
        }
        Ok(())
    }

    fn create_sender(&self) -> TransportResult<Box<dyn MessageSender>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(Box::new(RedisSender {
            client: self.client.clone(),
            connection: None,
        }))
    }

    fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens its Redis connection on first send and drops it on close
struct RedisSender {
    client: redis::Client,
    connection: Option<redis::Connection>,
}

impl MessageSender for RedisSender {
    fn send(&mut self, destination: &ReplyAddress, message: OutboundMessage) -> TransportResult<()> {
        let body: serde_json::Value = serde_json::from_slice(&message.body)
            .map_err(|e| TransportError::serialization(e.to_string()))?;
        let envelope = WireEnvelope {
            reply_to: None,
            message_type: Some(message.message_type),
            body: Some(body),
        };
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| TransportError::serialization(e.to_string()))?;

        if self.connection.is_none() {
            let connection = self
                .client
                .get_connection()
                .map_err(|e| TransportError::send_failed(destination.as_str(), e.to_string()))?;
            self.connection = Some(connection);
        }
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| TransportError::send_failed(destination.as_str(), "no connection"))?;

        redis::cmd("LPUSH")
            .arg(destination.as_str())
            .arg(payload)
            .query::<i64>(connection)
            .map(|_| ())
            .map_err(|e| TransportError::send_failed(destination.as_str(), e.to_string()))
    }

    fn close(&mut self) -> TransportResult<()> {
        self.connection = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_extracts_body_and_reply_address() {
        let raw = br#"{"reply_to":"reply.7","message_type":"analysis_request","body":{"kind":"compound"}}"#;
        let inbound = WireEnvelope::into_inbound(raw.to_vec());
        assert_eq!(inbound.reply_to, Some(ReplyAddress::new("reply.7")));
        assert_eq!(inbound.message_type.as_deref(), Some("analysis_request"));
        let body: serde_json::Value = serde_json::from_slice(&inbound.body.unwrap()).unwrap();
        assert_eq!(body["kind"], "compound");
    }

    #[test]
    fn test_envelope_with_null_body_has_no_payload() {
        let inbound = WireEnvelope::into_inbound(br#"{"reply_to":"r","body":null}"#.to_vec());
        assert!(inbound.body.is_none());
    }

    #[test]
    fn test_unreadable_envelope_is_passed_through() {
        let inbound = WireEnvelope::into_inbound(b"not json".to_vec());
        assert_eq!(inbound.body.as_deref(), Some(&b"not json"[..]));
        assert!(inbound.reply_to.is_none());
    }

    #[test]
    fn test_factory_rejects_invalid_url() {
        let config = TransportConfig {
            provider_url: "not a url".to_string(),
            ..TransportConfig::default()
        };
        assert!(RedisConnectionFactory::new(&config).is_err());
    }

    #[test]
    fn test_lookup_rejects_blank_queue() {
        let config = TransportConfig {
            provider_url: "redis://127.0.0.1:6379".to_string(),
            ..TransportConfig::default()
        };
        let factory = RedisConnectionFactory::new(&config).unwrap();
        assert!(factory.lookup_queue("  ").is_err());
        assert_eq!(factory.lookup_queue("analysis_request").unwrap().as_str(), "analysis_request");
    }
}
