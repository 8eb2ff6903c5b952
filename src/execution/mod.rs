//! # Execution
//!
//! Fixed-size worker pool. Every worker thread opens its own compute session
//! when the pool starts and keeps it for its whole life; tasks borrow the
//! session only while they run.
//!
//! ## Architecture
//!
//! ```text
//!  submit(task) ──► crossbeam channel (unbounded, MPMC) ──► analysis-worker-0 ─┐
//!                                                    ├──► analysis-worker-1 ─┼─► ReplyRouter
//!                                                    └──► analysis-worker-N ─┘
//!
//!  worker table: [ WorkerRecord { name, session, current request } ; N ]
//! ```
//!
//! Per task, the worker runs a *before* hook (take the session out of its
//! record, bind it to the task, stamp worker and start time), `run()`, and an
//! *after* hook (stop the clock, route exactly one Result or Failure, return
//! the session to the record).

use thiserror::Error;

pub mod worker;
pub mod worker_pool;

pub use worker::WorkerRecord;
pub use worker_pool::{PoolStats, WorkerPool};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Invalid worker count {count}: at least one worker is required")]
    InvalidWorkerCount { count: usize },

    #[error("Failed to spawn worker {worker}: {message}")]
    WorkerSpawn { worker: String, message: String },

    #[error("Worker pool is shut down")]
    ShutDown,
}
