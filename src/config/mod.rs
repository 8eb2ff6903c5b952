//! # Configuration
//!
//! Immutable configuration tree for the analysis server. Each component takes
//! the section it needs by reference at construction; nothing is read from
//! global state after start-up.
//!
//! ```toml
//! [pool]
//! worker_count = 4
//!
//! [engine]
//! host = "localhost"
//! port = 6311
//! init_script = "/opt/analysis/init.R"
//! dataset_root = "/opt/analysis/data/"
//!
//! [transport]
//! provider_url = "redis://127.0.0.1:6379"
//! request_queue = "analysis_request"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{engine, reconnect, transport};
use crate::messaging::RequestKind;

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub pool: PoolConfig,
    pub engine: EngineConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Fixed number of worker threads, one compute session each
    pub worker_count: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { worker_count: 1 }
    }
}

/// Compute-engine session parameters shared by every worker
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    /// Script evaluated once when a session opens
    pub init_script: String,
    /// Prefix joined with a dataset name to form the load path
    pub dataset_root: String,
    pub username: String,
    pub password: String,
    /// Log every command sent to the engine at debug level
    pub trace_commands: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: engine::DEFAULT_HOST.to_string(),
            port: engine::DEFAULT_PORT,
            init_script: String::new(),
            dataset_root: String::new(),
            username: engine::DEFAULT_USERNAME.to_string(),
            password: engine::DEFAULT_PASSWORD.to_string(),
            trace_commands: false,
        }
    }
}

impl EngineConfig {
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_init_script(mut self, path: impl Into<String>) -> Self {
        self.init_script = path.into();
        self
    }

    pub fn with_dataset_root(mut self, root: impl Into<String>) -> Self {
        self.dataset_root = root.into();
        self
    }

    pub fn with_trace_commands(mut self, enabled: bool) -> Self {
        self.trace_commands = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Broker location, e.g. `redis://host:6379`
    pub provider_url: String,
    pub connection_factory: String,
    pub request_queue: String,
    /// Upper bound on how long a delivery thread blocks per receive call
    pub poll_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            provider_url: String::new(),
            connection_factory: transport::DEFAULT_CONNECTION_FACTORY.to_string(),
            request_queue: String::new(),
            poll_timeout_ms: transport::DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub interval_ms: u64,
    pub verbose_attempts: u64,
    pub summary_interval: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: reconnect::DEFAULT_INTERVAL_MS,
            verbose_attempts: reconnect::DEFAULT_VERBOSE_ATTEMPTS,
            summary_interval: reconnect::DEFAULT_SUMMARY_INTERVAL,
        }
    }
}

impl ReconnectConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Request kinds the task registry accepts
    pub enabled_kinds: Vec<RequestKind>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled_kinds: RequestKind::ALL.to_vec(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.pool.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.worker_count",
                "0",
                "worker count must be greater than 0",
            ));
        }

        if self.engine.host.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "engine.host",
                "engine configuration",
            ));
        }

        if self.engine.init_script.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "engine.init_script",
                "engine configuration",
            ));
        }

        if self.engine.dataset_root.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "engine.dataset_root",
                "engine configuration",
            ));
        }

        if self.transport.provider_url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "transport.provider_url",
                "transport configuration",
            ));
        }

        if self.transport.request_queue.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "transport.request_queue",
                "transport configuration",
            ));
        }

        if self.transport.connection_factory.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "transport.connection_factory",
                "transport configuration",
            ));
        }

        if self.reconnect.summary_interval == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconnect.summary_interval",
                "0",
                "summary interval must be greater than 0",
            ));
        }

        if self.registry.enabled_kinds.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "registry.enabled_kinds",
                "[]",
                "at least one request kind must be enabled",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.engine = config
            .engine
            .with_init_script("/opt/init.R")
            .with_dataset_root("/data/");
        config.transport.provider_url = "redis://localhost:6379".to_string();
        config.transport.request_queue = "analysis_request".to_string();
        config
    }

    #[test]
    fn test_defaults_match_engine_protocol() {
        let config = ServerConfig::default();
        assert_eq!(config.pool.worker_count, 1);
        assert_eq!(config.engine.host, "localhost");
        assert_eq!(config.engine.port, 6311);
        assert_eq!(config.transport.connection_factory, "ConnectionFactory");
        assert_eq!(config.reconnect.interval(), Duration::from_secs(10));
        assert_eq!(config.reconnect.verbose_attempts, 10);
        assert_eq!(config.reconnect.summary_interval, 600);
        assert_eq!(config.registry.enabled_kinds.len(), RequestKind::ALL.len());
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = valid_config();
        config.pool.worker_count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool.worker_count"));
    }

    #[test]
    fn test_validate_requires_request_queue() {
        let mut config = valid_config();
        config.transport.request_queue.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingValue { field, .. }) if field == "transport.request_queue"
        ));
    }

    #[test]
    fn test_validate_requires_init_script() {
        let mut config = valid_config();
        config.engine.init_script.clear();
        assert!(config.validate().is_err());
    }
}
