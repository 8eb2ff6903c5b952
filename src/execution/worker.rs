//! Worker thread body and the per-worker resource record.

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::engine::{ComputeSession, EngineConnector, SessionSettings};
use crate::logging::log_task_operation;
use crate::messaging::RequestId;
use crate::router::ReplyRouter;
use crate::tasks::{AnalysisError, AnalysisTask};
use crate::utils::panic_message;

/// Resources held by one worker, indexed by worker id in the pool's table
#[derive(Debug)]
pub struct WorkerRecord {
    pub id: usize,
    pub name: String,
    session: Option<ComputeSession>,
    current: Option<RequestId>,
    executed: u64,
}

impl WorkerRecord {
    pub(crate) fn new(id: usize, name: String) -> Self {
        Self {
            id,
            name,
            session: None,
            current: None,
            executed: 0,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Request currently executing on this worker
    pub fn current_request(&self) -> Option<&RequestId> {
        self.current.as_ref()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub(crate) fn take_session(&mut self) -> Option<ComputeSession> {
        self.session.take()
    }
}

pub(crate) type WorkerTable = Vec<Mutex<WorkerRecord>>;

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active: AtomicUsize,
    pub queued: AtomicUsize,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

pub(crate) type Job = Box<dyn AnalysisTask>;

pub(crate) struct Worker {
    pub id: usize,
    pub name: String,
    pub table: Arc<WorkerTable>,
    pub queue: Receiver<Job>,
    pub router: Arc<dyn ReplyRouter>,
    pub counters: Arc<PoolCounters>,
}

impl Worker {
    fn record(&self) -> &Mutex<WorkerRecord> {
        &self.table[self.id]
    }

    /// Thread body: open the session, signal readiness, then drain the queue
    /// until the pool drops its sender
    pub fn run(self, connector: Arc<dyn EngineConnector>, settings: SessionSettings, ready: Sender<bool>) {
        let session = match ComputeSession::open(connector.as_ref(), settings, &self.name) {
            Ok(session) => Some(session),
            Err(e) => {
                error!(
                    worker = %self.name,
                    endpoint = %connector.endpoint(),
                    error = %e,
                    "❌ WORKER: Unable to establish compute session; tasks on this worker will fail"
                );
                None
            }
        };
        let has_session = session.is_some();
        self.record().lock().session = session;
        let _ = ready.send(has_session);
        drop(ready);

        for task in self.queue.iter() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.execute(task);
        }

        debug!(worker = %self.name, "WORKER: Task queue closed; exiting");
    }

    fn execute(&self, mut task: Job) {
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        let request_id = task.request_id().clone();
        let kind = task.kind();

        log_task_operation("start", &request_id, kind.as_str(), Some(&self.name), "running", None);

        self.before_execute(task.as_mut());

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            let message = panic_message(payload.as_ref());
            error!(worker = %self.name, request = %request_id, panic = %message, "❌ WORKER: Task panicked");
            task.fail(AnalysisError::internal("Unexpected error while executing the analysis."));
        }

        self.after_execute(task);
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Bind this worker's session to the task and stamp worker and start time
    fn before_execute(&self, task: &mut dyn AnalysisTask) {
        let bound = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut record = self.record().lock();
            record.current = Some(task.request_id().clone());
            task.context_mut().assign_worker(&self.name);
            match record.session.take() {
                Some(session) => {
                    task.context_mut().attach_session(session);
                    true
                }
                None => false,
            }
        }));

        match bound {
            Ok(true) => {}
            Ok(false) => {
                warn!(worker = %self.name, request = %task.request_id(), "⚠️ WORKER: No compute session to bind");
                task.fail(AnalysisError::NoSession);
            }
            Err(payload) => {
                error!(
                    worker = %self.name,
                    request = %task.request_id(),
                    panic = %panic_message(payload.as_ref()),
                    "❌ WORKER: Binding session to task failed"
                );
                task.fail(AnalysisError::internal("Unable to bind a compute session to the task."));
            }
        }
    }

    /// Give the session back to the record, then route the single reply
    fn after_execute(&self, mut task: Job) {
        let elapsed = task.context_mut().finish();
        let request_id = task.request_id().clone();
        let reply_to = task.context().reply_to().cloned();

        let session = match panic::catch_unwind(AssertUnwindSafe(|| task.cleanup())) {
            Ok(session) => session,
            Err(payload) => {
                error!(worker = %self.name, request = %request_id, panic = %panic_message(payload.as_ref()), "❌ WORKER: Task cleanup panicked");
                None
            }
        };

        {
            let mut record = self.record().lock();
            record.current = None;
            record.executed += 1;
            match session {
                Some(session) => record.session = Some(session),
                None if record.session.is_none() => {
                    warn!(worker = %self.name, request = %request_id, "⚠️ WORKER: Compute session was not returned; worker has no session");
                }
                None => {}
            }
        }

        let reply = match task.context_mut().take_failure() {
            Some(failure) => Err(failure),
            None => task.take_result().ok_or_else(|| {
                AnalysisError::internal("The analysis produced no result.").into_failure(task.request())
            }),
        };

        let status = match reply {
            Ok(result) => {
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                self.router.send_result(result, reply_to.as_ref());
                "completed"
            }
            Err(failure) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                self.router.send_failure(failure, reply_to.as_ref());
                "failed"
            }
        };

        let elapsed_ms = elapsed.as_millis() as u64;
        log_task_operation("finish", &request_id, task.kind().as_str(), Some(&self.name), status, Some(elapsed_ms));
        info!(worker = %self.name, request = %request_id, status, elapsed_ms, "WORKER: Task finished");
    }
}
