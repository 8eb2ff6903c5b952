//! # Compute Engine
//!
//! Boundary to the external numeric-compute engine. The engine speaks a
//! synchronous command/response protocol: `eval_void` and `eval` run
//! commands, the file primitives retrieve artifacts rendered as side effects,
//! and `login` is used only when the engine demands it.
//!
//! [`ComputeSession`] wraps one engine connection and tracks the dataset
//! currently loaded into it.

use thiserror::Error;

pub mod rserve;
pub mod session;
pub mod value;

pub use rserve::{RserveConnection, RserveConnector};
pub use session::{ComputeSession, SessionSettings};
pub use value::EngineValue;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Engine connection failed: {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Engine authentication failed: {message}")]
    Authentication { message: String },

    #[error("Engine protocol error: {message}")]
    Protocol { message: String },

    #[error("Engine rejected command with status {status}")]
    Command { status: u32 },

    #[error("Engine file operation {operation} failed for {file}: {message}")]
    File {
        operation: String,
        file: String,
        message: String,
    },

    #[error("Unexpected engine value: expected {expected}, got {actual}")]
    UnexpectedValue { expected: String, actual: String },

    #[error("Engine I/O error: {message}")]
    Io { message: String },

    #[error("Engine connection is closed")]
    Closed,
}

impl EngineError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn file(operation: impl Into<String>, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::File {
            operation: operation.into(),
            file: file.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// One open connection to the compute engine
///
/// Commands on a connection execute strictly in the order issued.
pub trait EngineConnection: Send {
    /// Whether the engine requires `login` before accepting commands
    fn needs_login(&self) -> bool;

    fn login(&mut self, username: &str, password: &str) -> EngineResult<()>;

    fn eval_void(&mut self, command: &str) -> EngineResult<()>;

    fn eval(&mut self, command: &str) -> EngineResult<EngineValue>;

    /// Open, stream and close a file held by the engine
    fn read_file(&mut self, name: &str) -> EngineResult<Vec<u8>>;

    fn remove_file(&mut self, name: &str) -> EngineResult<()>;

    fn close(&mut self) -> EngineResult<()>;
}

/// Opens engine connections; one per worker
pub trait EngineConnector: Send + Sync {
    fn connect(&self) -> EngineResult<Box<dyn EngineConnection>>;

    /// Engine location, for logging
    fn endpoint(&self) -> String;
}
