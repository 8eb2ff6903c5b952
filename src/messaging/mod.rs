//! # Messaging Module
//!
//! Request/result wire model and the broker transports the listener consumes
//! from and the result router replies through.

pub mod errors;
pub mod memory;
pub mod message;
pub mod redis_transport;
pub mod transport;

pub use errors::{TransportError, TransportResult};
pub use memory::MemoryBroker;
pub use message::*;
pub use redis_transport::RedisConnectionFactory;
pub use transport::{
    ActiveConnection, ConnectionFactory, ExceptionListener, MessageHandler, MessageSender, QueueName,
    TransportConnection,
};
