//! # Registry
//!
//! Request-kind dispatch. The listener and the compound task both build their
//! tasks through [`TaskRegistry`].

use thiserror::Error;

use crate::messaging::RequestKind;

pub mod task_registry;

pub use task_registry::{builtin_factory, TaskFactory, TaskRegistry};

/// Why a request could not be turned into a task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Unsupported request kind: {kind}")]
    UnknownKind { kind: RequestKind },

    #[error("Unable to construct {kind} task: {message}")]
    Construction { kind: RequestKind, message: String },
}
