use thiserror::Error;

use crate::config::ConfigurationError;
use crate::engine::EngineError;
use crate::execution::PoolError;
use crate::messaging::TransportError;
use crate::registry::DispatchError;

/// Top-level error for server assembly and lifecycle operations
///
/// Request-level problems never surface here; they travel as
/// [`AnalysisFailure`](crate::messaging::AnalysisFailure) data to the caller.
#[derive(Debug, Error)]
pub enum AnalysisServerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl AnalysisServerError {
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AnalysisServerError>;
