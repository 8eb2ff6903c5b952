//! # Structured Logging Module
//!
//! Environment-aware structured logging for the analysis server. Console output
//! is always enabled; a JSON file layer is added when a log directory is
//! configured through `ANALYSIS_SERVER_LOG_DIR`.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::messaging::RequestId;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let pid = process::id();

        let log_dir = std::env::var("ANALYSIS_SERVER_LOG_DIR").ok().map(PathBuf::from);
        let file_target = log_dir.and_then(|dir| match fs::create_dir_all(&dir) {
            Ok(()) => {
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
                Some((dir, format!("{environment}.{pid}.{timestamp}.log")))
            }
            Err(e) => {
                eprintln!("Unable to create log directory {}: {e}", dir.display());
                None
            }
        });

        let (file_layer, guard, log_path) = match &file_target {
            Some((dir, file_name)) => {
                let appender = tracing_appender::rolling::never(dir, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(build_filter(&log_level));
                (Some(layer), Some(guard), Some(dir.join(file_name)))
            }
            None => (None, None, None),
        };

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_level(true)
                    .with_ansi(true)
                    .with_filter(build_filter(&log_level)),
            )
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
            "🔧 STRUCTURED LOGGING: Initialized"
        );

        // The non-blocking writer stops flushing once its guard drops.
        if let Some(guard) = guard {
            std::mem::forget(guard);
        }
    });
}

/// `RUST_LOG` wins over the environment-derived level
fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("ANALYSIS_SERVER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for a task lifecycle step
pub fn log_task_operation(
    operation: &str,
    request_id: &RequestId,
    kind: &str,
    worker: Option<&str>,
    status: &str,
    elapsed_ms: Option<u64>,
) {
    tracing::info!(
        operation = %operation,
        session_id = %request_id.session_id,
        task_id = %request_id.task_id,
        kind = %kind,
        worker = worker,
        status = %status,
        elapsed_ms = elapsed_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log structured data for transport operations
pub fn log_transport_operation(
    operation: &str,
    destination: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        destination = destination,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📡 TRANSPORT_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection() {
        std::env::set_var("ANALYSIS_SERVER_ENV", "test_override");
        let env = get_environment();
        assert_eq!(env, "test_override");
        std::env::remove_var("ANALYSIS_SERVER_ENV");
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }
}
