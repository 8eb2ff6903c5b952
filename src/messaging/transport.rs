//! # Transport Abstraction
//!
//! Connection/receiver/sender seams between the server and a message broker.
//! The listener depends only on these traits; concrete brokers live in
//! [`memory`](super::memory) and [`redis_transport`](super::redis_transport).
//!
//! ## Lifecycle
//!
//! ```text
//! ConnectionFactory ──create_connection──► TransportConnection
//!                                            │ create_receiver(queue, handler)
//!                                            │ set_exception_listener(listener)
//!                                            │ start()
//!                                            │ create_sender() ──► MessageSender (one per reply)
//!                                            └ close()
//! ```

use parking_lot::RwLock;
use std::sync::Arc;

use super::errors::{TransportError, TransportResult};
use super::message::{InboundMessage, OutboundMessage, ReplyAddress};

/// Resolved name of a queue on the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Called on a transport delivery thread for every inbound message
///
/// Implementations must not panic or block on task completion.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: InboundMessage);
}

/// Receives asynchronous connection failures
pub trait ExceptionListener: Send + Sync {
    fn on_exception(&self, error: TransportError);
}

/// Short-lived channel used to deliver one reply
pub trait MessageSender: Send {
    fn send(&mut self, destination: &ReplyAddress, message: OutboundMessage) -> TransportResult<()>;

    fn close(&mut self) -> TransportResult<()>;
}

pub trait TransportConnection: Send + Sync {
    /// Register a handler for messages arriving on `queue`
    fn create_receiver(&self, queue: &QueueName, handler: Arc<dyn MessageHandler>) -> TransportResult<()>;

    /// Replaces any previously registered listener; `None` clears it
    fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>);

    /// Begin delivering messages to registered receivers
    fn start(&self) -> TransportResult<()>;

    fn create_sender(&self) -> TransportResult<Box<dyn MessageSender>>;

    /// Stop delivery and release broker resources; idempotent
    fn close(&self) -> TransportResult<()>;
}

pub trait ConnectionFactory: Send + Sync {
    /// Resolve a configured queue name against the broker
    fn lookup_queue(&self, name: &str) -> TransportResult<QueueName>;

    fn create_connection(&self) -> TransportResult<Arc<dyn TransportConnection>>;

    /// Broker location, for logging
    fn provider(&self) -> String;
}

/// Shared slot holding the connection currently owned by the listener
///
/// The result router reads it to open senders; the supervisor swaps it on
/// reconnect.
#[derive(Clone, Default)]
pub struct ActiveConnection {
    slot: Arc<RwLock<Option<Arc<dyn TransportConnection>>>>,
}

impl ActiveConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn TransportConnection>> {
        self.slot.read().clone()
    }

    pub fn replace(&self, connection: Option<Arc<dyn TransportConnection>>) -> Option<Arc<dyn TransportConnection>> {
        std::mem::replace(&mut *self.slot.write(), connection)
    }

    pub fn take(&self) -> Option<Arc<dyn TransportConnection>> {
        self.slot.write().take()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Open a sender on the current connection
    pub fn create_sender(&self) -> TransportResult<Box<dyn MessageSender>> {
        match self.get() {
            Some(connection) => connection.create_sender(),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

impl std::fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("connected", &self.is_connected())
            .finish()
    }
}
