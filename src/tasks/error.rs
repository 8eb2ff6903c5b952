use thiserror::Error;

use crate::engine::EngineError;
use crate::messaging::{AnalysisFailure, Request};

/// Domain error raised inside a task
///
/// Never crosses the worker/router boundary as an error; it is converted into
/// an [`AnalysisFailure`] carried on the task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Structural problem with the request, detected before any engine command
    #[error("{0}")]
    Validation(String),

    /// The computation ran but its output cannot produce a result
    #[error("{0}")]
    Computation(String),

    #[error("Internal Error. {0}")]
    Internal(String),

    #[error("Error setting the dataset to {dataset}")]
    DatasetLoad { dataset: String },

    #[error("No compute session is available to this worker.")]
    NoSession,
}

impl AnalysisError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Generic failure for an engine command; details stay in the server log
    pub fn engine_command() -> Self {
        Self::Internal("Compute engine command failed.".to_string())
    }

    pub fn into_failure(self, request: Request) -> AnalysisFailure {
        AnalysisFailure::new(self.to_string(), request)
    }
}

impl From<EngineError> for AnalysisError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::UnexpectedValue { expected, actual } => Self::Internal(format!(
                "Unexpected compute engine response (expected {expected}, got {actual})."
            )),
            _ => Self::engine_command(),
        }
    }
}
