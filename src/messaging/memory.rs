//! # In-Process Broker
//!
//! A [`ConnectionFactory`] backed by crossbeam channels. Used by the test suite
//! and for running the server without an external broker. Supports fault
//! injection: refusing connection attempts, severing live connections, and
//! failing sends.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::{TransportError, TransportResult};
use super::message::{InboundMessage, OutboundMessage, Reply, ReplyAddress, Request};
use super::transport::{
    ConnectionFactory, ExceptionListener, MessageHandler, MessageSender, QueueName, TransportConnection,
};

const DELIVERY_POLL: Duration = Duration::from_millis(25);

type Queue = (Sender<InboundMessage>, Receiver<InboundMessage>);

#[derive(Default)]
struct BrokerState {
    queues: DashMap<String, Queue>,
    connections: Mutex<Vec<Weak<MemoryConnection>>>,
    refuse_connections: AtomicUsize,
    fail_sends: AtomicUsize,
    connection_attempts: AtomicU64,
}

impl BrokerState {
    fn queue(&self, name: &str) -> Queue {
        self.queues
            .entry(name.to_string())
            .or_insert_with(channel::unbounded)
            .clone()
    }
}

/// In-process message broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connections(&self, count: usize) {
        self.state.refuse_connections.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` sends on any sender
    pub fn fail_next_sends(&self, count: usize) {
        self.state.fail_sends.store(count, Ordering::SeqCst);
    }

    pub fn connection_attempts(&self) -> u64 {
        self.state.connection_attempts.load(Ordering::SeqCst)
    }

    /// Connections that have been started and not closed or severed
    pub fn live_connections(&self) -> usize {
        self.state
            .connections
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.is_live())
            .count()
    }

    /// Break every live connection, notifying exception listeners from a
    /// separate thread the way a broker client library would
    pub fn sever_connections(&self) {
        let connections: Vec<Arc<MemoryConnection>> = self
            .state
            .connections
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.is_live())
            .collect();

        for connection in connections {
            connection.severed.store(true, Ordering::SeqCst);
            connection.closed.store(true, Ordering::SeqCst);
            let listener = connection.listener.read().clone();
            if let Some(listener) = listener {
                thread::spawn(move || {
                    listener.on_exception(TransportError::connection_lost("broker connection severed"));
                });
            }
        }
    }

    /// Enqueue a raw message on `queue`
    pub fn publish(&self, queue: &str, message: InboundMessage) {
        let (tx, _) = self.state.queue(queue);
        // The broker holds a receiver, so the channel cannot be disconnected.
        let _ = tx.send(message);
    }

    pub fn publish_request(&self, queue: &str, request: &Request, reply_to: Option<ReplyAddress>) {
        let body = request.to_bytes().unwrap_or_default();
        self.publish(queue, InboundMessage::new(body, reply_to));
    }

    /// Wait for the next message on a reply destination
    pub fn receive(&self, destination: &ReplyAddress, timeout: Duration) -> Option<InboundMessage> {
        let (_, rx) = self.state.queue(destination.as_str());
        rx.recv_timeout(timeout).ok()
    }

    /// Wait for and decode the next reply on `destination`
    pub fn receive_reply(&self, destination: &ReplyAddress, timeout: Duration) -> Option<Reply> {
        self.receive(destination, timeout)
            .and_then(|message| message.body)
            .and_then(|body| Reply::from_bytes(&body).ok())
    }

    pub fn pending(&self, queue: &str) -> usize {
        self.state.queue(queue).1.len()
    }
}

impl ConnectionFactory for MemoryBroker {
    fn lookup_queue(&self, name: &str) -> TransportResult<QueueName> {
        if name.is_empty() {
            return Err(TransportError::queue_not_found(name));
        }
        self.state.queue(name);
        Ok(QueueName::new(name))
    }

    fn create_connection(&self) -> TransportResult<Arc<dyn TransportConnection>> {
        self.state.connection_attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .state
            .refuse_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::connection_failed(self.provider(), "connection refused"));
        }

        let connection = Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            receivers: Mutex::new(Vec::new()),
            listener: RwLock::new(None),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            severed: AtomicBool::new(false),
            delivery_threads: Mutex::new(Vec::new()),
        });

        let mut connections = self.state.connections.lock();
        connections.retain(|c| c.strong_count() > 0);
        connections.push(Arc::downgrade(&connection));

        Ok(connection)
    }

    fn provider(&self) -> String {
        "memory://local".to_string()
    }
}

pub struct MemoryConnection {
    state: Arc<BrokerState>,
    receivers: Mutex<Vec<(QueueName, Arc<dyn MessageHandler>)>>,
    listener: RwLock<Option<Arc<dyn ExceptionListener>>>,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
    severed: AtomicBool,
    delivery_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryConnection {
    fn is_live(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

impl TransportConnection for MemoryConnection {
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

        let mut threads = self.delivery_threads.lock();
        for (queue, handler) in self.receivers.lock().iter() {
            let (tx, rx) = self.state.queue(queue.as_str());
            let closed = Arc::clone(&self.closed);
            let handler = Arc::clone(handler);
            let queue_name = queue.to_string();

            let spawned = thread::Builder::new()
                .name(format!("memory-delivery-{queue_name}"))
                .spawn(move || loop {
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    match rx.recv_timeout(DELIVERY_POLL) {
                        Ok(message) => {
                            if closed.load(Ordering::SeqCst) {
                                // Hand the message back for the next connection.
                                let _ = tx.send(message);
                                break;
                            }
                            handler.on_message(message);
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                });

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Err(TransportError::internal(format!(
                        "failed to spawn delivery thread for {queue_name}: {e}"
                    )));
                }
            }
        }

        debug!(receivers = threads.len(), "📡 MEMORY: Connection started");
        Ok(())
    }

    fn create_sender(&self) -> TransportResult<Box<dyn MessageSender>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(Box::new(MemorySender {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        // Delivery threads observe the flag within one poll interval.
        self.delivery_threads.lock().clear();

        if self.severed.load(Ordering::SeqCst) {
            warn!("📡 MEMORY: Closing a severed connection");
            return Err(TransportError::connection_lost("connection was severed before close"));
        }
        Ok(())
    }
}

struct MemorySender {
    state: Arc<BrokerState>,
    closed: bool,
}

impl MessageSender for MemorySender {
    fn send(&mut self, destination: &ReplyAddress, message: OutboundMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let failed = self
            .state
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::send_failed(destination.as_str(), "injected send failure"));
        }

        let (tx, _) = self.state.queue(destination.as_str());
        tx.send(InboundMessage {
            body: Some(message.body),
            reply_to: None,
            message_type: Some(message.message_type),
        })
        .map_err(|e| TransportError::send_failed(destination.as_str(), e.to_string()))
    }

    fn close(&mut self) -> TransportResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelHandler(Mutex<mpsc::Sender<InboundMessage>>);

    impl MessageHandler for ChannelHandler {
        fn on_message(&self, message: InboundMessage) {
            let _ = self.0.lock().send(message);
        }
    }

    struct FlagListener(Mutex<mpsc::Sender<TransportError>>);

    impl ExceptionListener for FlagListener {
        fn on_exception(&self, error: TransportError) {
            let _ = self.0.lock().send(error);
        }
    }

    #[test]
    fn test_started_connection_delivers_to_receiver() {
        let broker = MemoryBroker::new();
        let queue = broker.lookup_queue("requests").unwrap();
        let connection = broker.create_connection().unwrap();
        let (tx, rx) = mpsc::channel();
        connection
            .create_receiver(&queue, Arc::new(ChannelHandler(Mutex::new(tx))))
            .unwrap();
        connection.start().unwrap();

        broker.publish("requests", InboundMessage::new(b"hello".to_vec(), None));
        let message = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(message.body.as_deref(), Some(&b"hello"[..]));
        assert_eq!(broker.live_connections(), 1);
        connection.close().unwrap();
        assert_eq!(broker.live_connections(), 0);
    }

    #[test]
    fn test_refused_connections_count_attempts() {
        let broker = MemoryBroker::new();
        broker.fail_next_connections(2);
        assert!(broker.create_connection().is_err());
        assert!(broker.create_connection().is_err());
        assert!(broker.create_connection().is_ok());
        assert_eq!(broker.connection_attempts(), 3);
    }

    #[test]
    fn test_sever_notifies_listener_and_close_reports_loss() {
        let broker = MemoryBroker::new();
        let connection = broker.create_connection().unwrap();
        let (tx, rx) = mpsc::channel();
        connection.set_exception_listener(Some(Arc::new(FlagListener(Mutex::new(tx)))));
        connection.start().unwrap();

        broker.sever_connections();
        let error = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(error.is_connection_error());
        assert!(connection.close().is_err());
        assert!(connection.create_sender().is_err());
    }

    #[test]
    fn test_sender_routes_to_destination_and_honours_injected_failures() {
        let broker = MemoryBroker::new();
        let connection = broker.create_connection().unwrap();
        let reply_to = ReplyAddress::new("reply.client-1");
        broker.fail_next_sends(1);

        let mut sender = connection.create_sender().unwrap();
        let message = OutboundMessage {
            body: b"{}".to_vec(),
            message_type: "analysis_reply".to_string(),
        };
        assert!(sender.send(&reply_to, message.clone()).is_err());
        sender.send(&reply_to, message).unwrap();

        let received = broker.receive(&reply_to, Duration::from_secs(1)).unwrap();
        assert_eq!(received.message_type.as_deref(), Some("analysis_reply"));
        assert_eq!(broker.pending(reply_to.as_str()), 0);
    }
}
