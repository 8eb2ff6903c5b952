//! # Messaging Error Types
//!
//! Structured error types for the message transport boundary.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {provider}: {message}")]
    ConnectionFailed { provider: String, message: String },

    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Unknown connection factory: {name}")]
    UnknownConnectionFactory { name: String },

    #[error("Send failed to {destination}: {message}")]
    SendFailed { destination: String, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl TransportError {
    pub fn connection_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn send_failed(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendFailed {
            destination: destination.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors that mean the connection must be re-established
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectionLost { .. } | Self::ConnectionClosed
        )
    }
}

impl From<redis::RedisError> for TransportError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_connection_dropped() || error.is_io_error() || error.is_connection_refusal() {
            Self::connection_lost(error.to_string())
        } else {
            Self::internal(error.to_string())
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
