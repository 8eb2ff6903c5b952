//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingValue { field: String, context: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration from {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },
}

impl ConfigurationError {
    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingValue {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn file_read_error(path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::Parse {
            message: error.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
