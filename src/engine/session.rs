//! # Compute Session
//!
//! One engine connection plus the name of the dataset currently loaded into
//! it. Owned by exactly one worker for the worker's lifetime and lent to one
//! task at a time.
//!
//! Dataset switches are cached: asking for the dataset that is already loaded
//! issues no engine command.

use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::value::EngineValue;
use super::{EngineConnection, EngineConnector, EngineResult};
use crate::config::EngineConfig;
use crate::tasks::commands::quoted;
use crate::tasks::AnalysisError;

/// Fixed parameters applied when a session is opened
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub init_script: String,
    pub dataset_root: String,
    pub username: String,
    pub password: String,
    pub trace_commands: bool,
}

impl From<&EngineConfig> for SessionSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            init_script: config.init_script.clone(),
            dataset_root: config.dataset_root.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            trace_commands: config.trace_commands,
        }
    }
}

impl SessionSettings {
    /// Engine-side path of a dataset
    pub fn dataset_path(&self, name: &str) -> String {
        if self.dataset_root.is_empty() || self.dataset_root.ends_with('/') {
            format!("{}{}", self.dataset_root, name)
        } else {
            format!("{}/{}", self.dataset_root, name)
        }
    }
}

pub struct ComputeSession {
    connection: Box<dyn EngineConnection>,
    settings: SessionSettings,
    owner: String,
    loaded_dataset: Option<String>,
    dataset_loads: u64,
}

impl ComputeSession {
    /// Connect, authenticate if demanded, and evaluate the init script once
    pub fn open(connector: &dyn EngineConnector, settings: SessionSettings, owner: &str) -> EngineResult<Self> {
        let started = Instant::now();
        let mut connection = connector.connect()?;

        if connection.needs_login() {
            debug!(worker = %owner, "🧮 SESSION: Engine requires login");
            connection.login(&settings.username, &settings.password)?;
        }

        let init_command = format!("source(\"{}\")", settings.init_script);
        if settings.trace_commands {
            debug!(worker = %owner, command = %init_command, "🧮 SESSION: eval_void");
        }
        connection.eval_void(&init_command)?;

        info!(
            worker = %owner,
            endpoint = %connector.endpoint(),
            init_script = %settings.init_script,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✅ SESSION: Compute session established"
        );

        Ok(Self {
            connection,
            settings,
            owner: owner.to_string(),
            loaded_dataset: None,
            dataset_loads: 0,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn loaded_dataset(&self) -> Option<&str> {
        self.loaded_dataset.as_deref()
    }

    /// Number of dataset load commands this session has issued
    pub fn dataset_loads(&self) -> u64 {
        self.dataset_loads
    }

    /// Load `name` unless it is already the loaded dataset
    pub fn set_dataset(&mut self, name: &str) -> Result<(), AnalysisError> {
        if name.trim().is_empty() {
            return Err(AnalysisError::validation("Dataset name is null or empty."));
        }

        if self.loaded_dataset.as_deref() == Some(name) {
            debug!(worker = %self.owner, dataset = %name, "🧮 SESSION: Dataset already loaded");
            return Ok(());
        }

        let started = Instant::now();
        let command = format!("load({})", quoted(&self.settings.dataset_path(name)));
        if self.settings.trace_commands {
            debug!(worker = %self.owner, command = %command, "🧮 SESSION: eval_void");
        }

        match self.connection.eval_void(&command) {
            Ok(()) => {
                self.loaded_dataset = Some(name.to_string());
                self.dataset_loads += 1;
                info!(
                    worker = %self.owner,
                    dataset = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "📂 SESSION: Dataset loaded"
                );
                Ok(())
            }
            Err(e) => {
                // Engine state is unknown after a failed load.
                self.loaded_dataset = None;
                error!(worker = %self.owner, dataset = %name, error = %e, "❌ SESSION: Dataset load failed");
                Err(AnalysisError::DatasetLoad {
                    dataset: name.to_string(),
                })
            }
        }
    }

    pub fn eval_void(&mut self, command: &str) -> Result<(), AnalysisError> {
        if self.settings.trace_commands {
            debug!(worker = %self.owner, command = %command, "🧮 SESSION: eval_void");
        }
        self.connection.eval_void(command).map_err(|e| {
            error!(worker = %self.owner, command = %command, error = %e, "❌ SESSION: Engine command failed");
            AnalysisError::engine_command()
        })
    }

    pub fn eval(&mut self, command: &str) -> Result<EngineValue, AnalysisError> {
        if self.settings.trace_commands {
            debug!(worker = %self.owner, command = %command, "🧮 SESSION: eval");
        }
        self.connection.eval(command).map_err(|e| {
            error!(worker = %self.owner, command = %command, error = %e, "❌ SESSION: Engine command failed");
            AnalysisError::engine_command()
        })
    }

    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>, AnalysisError> {
        self.connection.read_file(name).map_err(|e| {
            error!(worker = %self.owner, file = %name, error = %e, "❌ SESSION: File retrieval failed");
            AnalysisError::internal("Unable to retrieve a rendered file from the compute engine.")
        })
    }

    pub fn remove_file(&mut self, name: &str) -> Result<(), AnalysisError> {
        self.connection.remove_file(name).map_err(|e| {
            error!(worker = %self.owner, file = %name, error = %e, "❌ SESSION: File removal failed");
            AnalysisError::internal("Unable to remove a rendered file from the compute engine.")
        })
    }

    /// Close the engine connection; errors are logged
    pub fn close(mut self) {
        if let Err(e) = self.connection.close() {
            warn!(worker = %self.owner, error = %e, "⚠️ SESSION: Error closing compute session");
        } else {
            debug!(worker = %self.owner, "🧮 SESSION: Compute session closed");
        }
    }
}

impl std::fmt::Debug for ComputeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSession")
            .field("owner", &self.owner)
            .field("loaded_dataset", &self.loaded_dataset)
            .field("dataset_loads", &self.dataset_loads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedEngine;

    fn settings() -> SessionSettings {
        SessionSettings {
            init_script: "/opt/init.R".to_string(),
            dataset_root: "/data".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            trace_commands: true,
        }
    }

    #[test]
    fn test_open_sources_init_script_once() {
        let engine = ScriptedEngine::new();
        let session = ComputeSession::open(&engine, settings(), "analysis-worker-0").unwrap();
        assert_eq!(session.owner(), "analysis-worker-0");
        assert_eq!(engine.commands(), vec!["source(\"/opt/init.R\")".to_string()]);
        assert_eq!(engine.logins(), 0);
    }

    #[test]
    fn test_open_logs_in_when_engine_requires_it() {
        let engine = ScriptedEngine::new().requiring_login();
        ComputeSession::open(&engine, settings(), "w").unwrap();
        assert_eq!(engine.logins(), 1);
    }

    #[test]
    fn test_set_dataset_twice_loads_once() {
        let engine = ScriptedEngine::new();
        let mut session = ComputeSession::open(&engine, settings(), "w").unwrap();

        session.set_dataset("brain.Rda").unwrap();
        session.set_dataset("brain.Rda").unwrap();

        assert_eq!(engine.dataset_loads(), 1);
        assert_eq!(session.dataset_loads(), 1);
        assert_eq!(session.loaded_dataset(), Some("brain.Rda"));
        assert!(engine
            .commands()
            .contains(&"load(\"/data/brain.Rda\")".to_string()));
    }

    #[test]
    fn test_switching_datasets_reloads() {
        let engine = ScriptedEngine::new();
        let mut session = ComputeSession::open(&engine, settings(), "w").unwrap();

        session.set_dataset("a.Rda").unwrap();
        session.set_dataset("b.Rda").unwrap();
        session.set_dataset("a.Rda").unwrap();

        assert_eq!(engine.dataset_loads(), 3);
        assert_eq!(session.loaded_dataset(), Some("a.Rda"));
    }

    #[test]
    fn test_failed_load_is_domain_error_and_clears_cache() {
        let engine = ScriptedEngine::new().failing_on("load(\"/data/missing.Rda\")");
        let mut session = ComputeSession::open(&engine, settings(), "w").unwrap();
        session.set_dataset("a.Rda").unwrap();

        let err = session.set_dataset("missing.Rda").unwrap_err();
        assert_eq!(
            err,
            AnalysisError::DatasetLoad {
                dataset: "missing.Rda".to_string()
            }
        );
        assert_eq!(session.loaded_dataset(), None);
    }

    #[test]
    fn test_dataset_name_is_escaped_in_load_command() {
        let engine = ScriptedEngine::new();
        let mut session = ComputeSession::open(&engine, settings(), "w").unwrap();

        session
            .set_dataset("x.Rda\"); system(\"touch /tmp/owned\"); #")
            .unwrap();

        let load = engine
            .commands()
            .into_iter()
            .find(|c| c.starts_with("load("))
            .unwrap();
        assert_eq!(
            load,
            r#"load("/data/x.Rda\"); system(\"touch /tmp/owned\"); #")"#
        );
    }

    #[test]
    fn test_engine_failure_is_wrapped_generically() {
        let engine = ScriptedEngine::new().failing_on("bad <-");
        let mut session = ComputeSession::open(&engine, settings(), "w").unwrap();
        let err = session.eval_void("bad <- stop('secret detail')").unwrap_err();
        assert!(err.to_string().starts_with("Internal Error."));
        assert!(!err.to_string().contains("secret detail"));
    }

    #[test]
    fn test_dataset_path_joins_root() {
        let mut s = settings();
        assert_eq!(s.dataset_path("x.Rda"), "/data/x.Rda");
        s.dataset_root = "/data/".to_string();
        assert_eq!(s.dataset_path("x.Rda"), "/data/x.Rda");
    }
}
