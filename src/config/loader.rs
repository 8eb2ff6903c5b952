//! Configuration Loader
//!
//! Layers a configuration file under `ANALYSIS_SERVER__SECTION__KEY`
//! environment overrides and validates the merged result.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::ServerConfig;
use crate::constants::system::ENV_PREFIX;

const MASKED: &str = "********";

pub struct ConfigManager {
    config: ServerConfig,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from a file plus environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::file_read_error(
                path.display().to_string(),
                "file does not exist",
            ));
        }

        debug!("Loading configuration from {}", path.display());

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Self::environment_source())
            .build()?
            .try_deserialize::<ServerConfig>()?;

        Self::from_config(config, Some(path.to_path_buf()))
    }

    /// Load configuration from environment variables only
    pub fn load_from_env() -> ConfigResult<Arc<ConfigManager>> {
        let config = Config::builder()
            .add_source(Self::environment_source())
            .build()?
            .try_deserialize::<ServerConfig>()?;

        Self::from_config(config, None)
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: ServerConfig, source: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;

        let manager = ConfigManager { config, source };
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&manager.debug_config())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            workers = manager.config.pool.worker_count,
            engine = %format!("{}:{}", manager.config.engine.host, manager.config.engine.port),
            request_queue = %manager.config.transport.request_queue,
            "⚙️ CONFIG: Configuration loaded"
        );

        Ok(Arc::new(manager))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// JSON dump of the configuration with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(engine) = value.get_mut("engine").and_then(|e| e.as_object_mut()) {
            if engine.contains_key("password") {
                engine.insert(
                    "password".to_string(),
                    serde_json::Value::String(MASKED.to_string()),
                );
            }
        }
        value
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("registry.enabled_kinds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::RequestKind;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write temp config");
        file
    }

    const COMPLETE: &str = r#"
[pool]
worker_count = 3

[engine]
host = "compute-1"
port = 6400
init_script = "/opt/analysis/init.R"
dataset_root = "/opt/analysis/data/"
password = "s3cret"
trace_commands = true

[transport]
provider_url = "redis://127.0.0.1:6379"
request_queue = "analysis_request"

[reconnect]
interval_ms = 250

[registry]
enabled_kinds = ["class_comparison", "compound"]
"#;

    #[test]
    fn test_load_from_file_merges_defaults() {
        let file = write_config(COMPLETE);
        let manager = ConfigManager::load_from_file(file.path()).expect("config loads");
        let config = manager.config();

        assert_eq!(config.pool.worker_count, 3);
        assert_eq!(config.engine.host, "compute-1");
        assert_eq!(config.engine.port, 6400);
        assert!(config.engine.trace_commands);
        assert_eq!(config.engine.username, "guest");
        assert_eq!(config.transport.connection_factory, "ConnectionFactory");
        assert_eq!(config.reconnect.interval_ms, 250);
        assert_eq!(config.reconnect.verbose_attempts, 10);
        assert_eq!(
            config.registry.enabled_kinds,
            vec![RequestKind::ClassComparison, RequestKind::Compound]
        );
        assert_eq!(manager.source(), Some(file.path()));
    }

    #[test]
    fn test_missing_required_value_is_reported() {
        let file = write_config(
            r#"
[engine]
init_script = "/opt/analysis/init.R"
dataset_root = "/opt/analysis/data/"

[transport]
provider_url = "redis://127.0.0.1:6379"
"#,
        );
        let result = ConfigManager::load_from_file(file.path());
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingValue { ref field, .. }) if field == "transport.request_queue"
        ));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = ConfigManager::load_from_file("/nonexistent/analysisServer.toml");
        assert!(matches!(result, Err(ConfigurationError::FileRead { .. })));
    }

    #[test]
    fn test_debug_config_masks_password() {
        let file = write_config(COMPLETE);
        let manager = ConfigManager::load_from_file(file.path()).expect("config loads");
        let dump = manager.debug_config();
        assert_eq!(dump["engine"]["password"], "********");
        assert_eq!(dump["engine"]["host"], "compute-1");
    }
}
