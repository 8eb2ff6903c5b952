//! Fixed-size pool of analysis workers sharing one task queue.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::worker::{Job, PoolCounters, Worker, WorkerRecord, WorkerTable};
use super::PoolError;
use crate::config::PoolConfig;
use crate::constants::system::WORKER_THREAD_PREFIX;
use crate::engine::{EngineConnector, SessionSettings};
use crate::router::ReplyRouter;
use crate::tasks::{AnalysisError, AnalysisTask};

/// Point-in-time pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub worker_count: usize,
    /// Workers currently holding an open compute session
    pub sessions_ready: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Fixed pool of worker threads, each bound to its own compute session
///
/// Submission never blocks; tasks beyond the number of idle workers wait in
/// FIFO order on an unbounded queue.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    table: Arc<WorkerTable>,
    counters: Arc<PoolCounters>,
    router: Arc<dyn ReplyRouter>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `config.worker_count` workers and wait until each has attempted
    /// to open its session
    ///
    /// A worker whose session cannot be opened stays in the pool; every task
    /// it picks up fails with a no-session failure.
    pub fn start(
        config: &PoolConfig,
        connector: Arc<dyn EngineConnector>,
        settings: SessionSettings,
        router: Arc<dyn ReplyRouter>,
    ) -> Result<Self, PoolError> {
        let worker_count = config.worker_count;
        if worker_count == 0 {
            return Err(PoolError::InvalidWorkerCount { count: worker_count });
        }

        let table: Arc<WorkerTable> = Arc::new(
            (0..worker_count)
                .map(|id| Mutex::new(WorkerRecord::new(id, format!("{WORKER_THREAD_PREFIX}-{id}"))))
                .collect(),
        );
        let counters = Arc::new(PoolCounters::default());
        let (sender, receiver) = channel::unbounded::<Job>();
        let (ready_tx, ready_rx) = channel::bounded::<bool>(worker_count);

        let pool = Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::with_capacity(worker_count)),
            table: Arc::clone(&table),
            counters: Arc::clone(&counters),
            router: Arc::clone(&router),
            worker_count,
        };

        for id in 0..worker_count {
            let name = format!("{WORKER_THREAD_PREFIX}-{id}");
            let worker = Worker {
                id,
                name: name.clone(),
                table: Arc::clone(&table),
                queue: receiver.clone(),
                router: Arc::clone(&router),
                counters: Arc::clone(&counters),
            };
            let connector = Arc::clone(&connector);
            let settings = settings.clone();
            let ready = ready_tx.clone();

            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run(connector, settings, ready));

            match spawned {
                Ok(handle) => pool.handles.lock().push(handle),
                Err(e) => {
                    error!(worker = %name, error = %e, "❌ POOL: Failed to spawn worker thread");
                    pool.shutdown();
                    return Err(PoolError::WorkerSpawn {
                        worker: name,
                        message: e.to_string(),
                    });
                }
            }
        }
        drop(ready_tx);
        drop(receiver);

        let mut sessions_ready = 0;
        for _ in 0..worker_count {
            match ready_rx.recv() {
                Ok(true) => sessions_ready += 1,
                Ok(false) => {}
                Err(_) => break,
            }
        }

        if sessions_ready < worker_count {
            warn!(
                workers = worker_count,
                sessions_ready,
                "⚠️ POOL: Some workers have no compute session"
            );
        }
        info!(workers = worker_count, sessions_ready, "✅ POOL: Worker pool started");

        Ok(pool)
    }

    /// Queue a task for the next free worker
    ///
    /// After shutdown the task is failed immediately and its failure routed,
    /// so the requester still receives exactly one reply.
    pub fn submit(&self, task: Box<dyn AnalysisTask>) -> Result<(), PoolError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            drop(guard);
            self.reject(task);
            return Err(PoolError::ShutDown);
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        match sender.send(task) {
            Ok(()) => Ok(()),
            Err(returned) => {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
                self.reject(returned.into_inner());
                Err(PoolError::ShutDown)
            }
        }
    }

    fn reject(&self, mut task: Box<dyn AnalysisTask>) {
        warn!(request = %task.request_id(), "⚠️ POOL: Rejecting task submitted after shutdown");
        task.fail(AnalysisError::internal("Server is shutting down."));
        let reply_to = task.context().reply_to().cloned();
        if let Some(failure) = task.context_mut().take_failure() {
            self.router.send_failure(failure, reply_to.as_ref());
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.worker_count,
            sessions_ready: self.table.iter().filter(|r| r.lock().has_session()).count(),
            active: self.counters.active.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work, let workers drain the queue, then close every
    /// session. Idempotent.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "❌ POOL: Worker thread terminated abnormally");
            }
        }

        let mut closed = 0;
        for record in self.table.iter() {
            if let Some(session) = record.lock().take_session() {
                session.close();
                closed += 1;
            }
        }
        debug!(sessions_closed = closed, "POOL: Sessions closed");
        info!(
            completed = self.counters.completed.load(Ordering::SeqCst),
            failed = self.counters.failed.load(Ordering::SeqCst),
            "✅ POOL: Worker pool shut down"
        );
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{AnalysisResult, CompoundRequest, Request, RequestId, RequestKind};
    use crate::registry::{DispatchError, TaskRegistry};
    use crate::tasks::TaskContext;
    use crate::test_utils::{clustering_request, session_settings, RecordingRouter, ScriptedEngine};
    use std::time::Duration;

    struct PanickingTask {
        request: Request,
        context: TaskContext,
    }

    impl PanickingTask {
        fn new(task_id: &str) -> Self {
            Self {
                request: Request::HierarchicalClustering(clustering_request("s", task_id, &["a", "b"])),
                context: TaskContext::default(),
            }
        }
    }

    impl AnalysisTask for PanickingTask {
        fn kind(&self) -> RequestKind {
            self.request.kind()
        }

        fn request_id(&self) -> &RequestId {
            self.request.id()
        }

        fn request(&self) -> Request {
            self.request.clone()
        }

        fn context(&self) -> &TaskContext {
            &self.context
        }

        fn context_mut(&mut self) -> &mut TaskContext {
            &mut self.context
        }

        fn run(&mut self) {
            panic!("engine bindings exploded");
        }

        fn take_result(&mut self) -> Option<AnalysisResult> {
            None
        }
    }

    fn panicking_factory(request: Request, _: &TaskRegistry) -> Result<Box<dyn AnalysisTask>, DispatchError> {
        Ok(Box::new(PanickingTask::new(&request.id().task_id)))
    }

    fn clustering_task(registry: &TaskRegistry, task_id: &str) -> Box<dyn AnalysisTask> {
        let request = Request::HierarchicalClustering(clustering_request("s", task_id, &["a", "b", "c"]));
        registry.create(request).unwrap()
    }

    fn start_pool(workers: usize, engine: &ScriptedEngine, router: Arc<RecordingRouter>) -> WorkerPool {
        WorkerPool::start(
            &PoolConfig { worker_count: workers },
            Arc::new(engine.clone()),
            session_settings(),
            router,
        )
        .unwrap()
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let router = RecordingRouter::new();
        let err = WorkerPool::start(
            &PoolConfig { worker_count: 0 },
            Arc::new(ScriptedEngine::new()),
            session_settings(),
            router,
        )
        .unwrap_err();
        assert_eq!(err, PoolError::InvalidWorkerCount { count: 0 });
    }

    #[test]
    fn test_workers_open_sessions_eagerly() {
        let engine = ScriptedEngine::new();
        let pool = start_pool(3, &engine, RecordingRouter::new());
        assert_eq!(engine.connections(), 3);
        assert_eq!(pool.stats().sessions_ready, 3);
        assert_eq!(pool.worker_count(), 3);
    }

    #[test]
    fn test_concurrency_is_bounded_by_worker_count() {
        let engine = ScriptedEngine::new().with_latency(Duration::from_millis(20));
        let router = RecordingRouter::new();
        let registry = TaskRegistry::with_builtin_kinds();
        let pool = start_pool(2, &engine, Arc::clone(&router));

        for i in 0..3 {
            pool.submit(clustering_task(&registry, &format!("t{i}"))).unwrap();
        }
        assert!(pool.stats().queued >= 1);

        assert!(router.wait_for(3, Duration::from_secs(10)));
        assert!(engine.max_in_flight() <= 2);
        assert_eq!(router.len(), 3);
        let stats = pool.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.completed + stats.failed, 3);
    }

    #[test]
    fn test_worker_without_session_fails_tasks() {
        let engine = ScriptedEngine::new().refusing_connections(1);
        let router = RecordingRouter::new();
        let registry = TaskRegistry::with_builtin_kinds();
        let pool = start_pool(1, &engine, Arc::clone(&router));
        assert_eq!(pool.stats().sessions_ready, 0);

        pool.submit(clustering_task(&registry, "t1")).unwrap();
        assert!(router.wait_for(1, Duration::from_secs(5)));

        let failures = router.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, AnalysisError::NoSession.to_string());
        assert_eq!(engine.command_count(), 0);
    }

    #[test]
    fn test_panicking_task_becomes_failure_and_worker_survives() {
        let engine = ScriptedEngine::new();
        let router = RecordingRouter::new();
        let registry = TaskRegistry::with_builtin_kinds();
        let pool = start_pool(1, &engine, Arc::clone(&router));

        pool.submit(Box::new(PanickingTask::new("boom"))).unwrap();
        pool.submit(clustering_task(&registry, "after")).unwrap();
        assert!(router.wait_for(2, Duration::from_secs(5)));

        let replies = router.replies();
        assert!(replies[0].is_failure());
        assert_eq!(replies[0].request_id(), &RequestId::new("s", "boom"));
        assert_eq!(replies[1].request_id(), &RequestId::new("s", "after"));
        assert_eq!(pool.stats().sessions_ready, 1);
    }

    #[test]
    fn test_panicking_compound_child_keeps_worker_session() {
        let engine = ScriptedEngine::new();
        let router = RecordingRouter::new();
        let registry = TaskRegistry::with_builtin_kinds();
        let panicking = TaskRegistry::with_builtin_kinds();
        panicking.register(RequestKind::HierarchicalClustering, Arc::new(panicking_factory));
        let pool = start_pool(1, &engine, Arc::clone(&router));

        let compound = panicking
            .create(Request::Compound(CompoundRequest {
                id: RequestId::new("s", "compound"),
                requests: vec![Request::HierarchicalClustering(clustering_request("s", "child", &["a", "b", "c"]))],
            }))
            .unwrap();
        pool.submit(compound).unwrap();
        pool.submit(clustering_task(&registry, "after")).unwrap();
        assert!(router.wait_for(2, Duration::from_secs(5)));

        let replies = router.replies();
        assert!(replies[0].is_failure());
        assert_eq!(replies[0].request_id(), &RequestId::new("s", "compound"));
        assert_eq!(replies[1].request_id(), &RequestId::new("s", "after"));
        let no_session = AnalysisError::NoSession.to_string();
        assert!(router.failures().iter().all(|f| f.message != no_session));
        assert_eq!(pool.stats().sessions_ready, 1);
        assert_eq!(engine.closed_connections(), 0);
    }

    #[test]
    fn test_shutdown_closes_sessions_and_rejects_new_work() {
        let engine = ScriptedEngine::new();
        let router = RecordingRouter::new();
        let registry = TaskRegistry::with_builtin_kinds();
        let pool = start_pool(2, &engine, Arc::clone(&router));

        pool.shutdown();
        pool.shutdown();
        assert_eq!(engine.closed_connections(), 2);

        let err = pool.submit(clustering_task(&registry, "late")).unwrap_err();
        assert_eq!(err, PoolError::ShutDown);
        let failures = router.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "Internal Error. Server is shutting down.");
    }
}
