#![allow(clippy::doc_markdown)] // Allow technical terms like Rserve, QAP1 in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Analysis Server
//!
//! Compute-job server for statistical analyses. Requests arrive on a message
//! transport, run on a fixed pool of workers that each own a long-lived
//! compute-engine session, and a single Result or Failure goes back to the
//! reply address carried by each request message.
//!
//! ## Architecture
//!
//! ```text
//!  transport ──► RequestListener ──► TaskRegistry ──► WorkerPool ──► ResultRouter ──► reply address
//!                 (supervisor +        (kind →         (N threads,
//!                  reconnect policy)    factory)         N sessions)
//! ```
//!
//! ## Module Organization
//!
//! - [`listener`] - Inbound request handling and the reconnect supervisor
//! - [`registry`] - Request-kind to task factory dispatch
//! - [`execution`] - Worker pool and per-worker session binding
//! - [`engine`] - Compute-engine sessions and the Rserve client
//! - [`tasks`] - Analysis tasks and the compound task
//! - [`router`] - Reply delivery
//! - [`messaging`] - Wire model and broker transports
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use analysis_server::config::ConfigManager;
//! use analysis_server::engine::RserveConnector;
//! use analysis_server::messaging::RedisConnectionFactory;
//! use analysis_server::server::AnalysisServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("analysisServer.toml")?;
//! let config = manager.config();
//!
//! let server = AnalysisServer::start(
//!     config,
//!     Arc::new(RedisConnectionFactory::new(&config.transport)?),
//!     Arc::new(RserveConnector::new(&config.engine)),
//! )?;
//! println!("workers: {}", server.pool_stats().worker_count);
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod execution;
pub mod listener;
pub mod logging;
pub mod messaging;
pub mod registry;
pub mod router;
pub mod server;
pub mod tasks;
pub mod test_utils;
pub mod utils;

pub use config::{ConfigManager, ServerConfig};
pub use error::{AnalysisServerError, Result};
pub use execution::{PoolStats, WorkerPool};
pub use listener::{ListenerState, RequestListener};
pub use messaging::{AnalysisFailure, AnalysisResult, ReplyAddress, Request, RequestId, RequestKind};
pub use registry::TaskRegistry;
pub use server::AnalysisServer;
