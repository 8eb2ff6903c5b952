//! Worker pool behaviour observed through the public API.

use std::sync::Arc;
use std::time::Duration;

use analysis_server::config::PoolConfig;
use analysis_server::execution::WorkerPool;
use analysis_server::messaging::{Request, RequestId};
use analysis_server::registry::TaskRegistry;
use analysis_server::router::ReplyRouter;
use analysis_server::tasks::AnalysisTask;
use analysis_server::test_utils::{class_comparison_request, session_settings, RecordingRouter, ScriptedEngine};

fn task(registry: &TaskRegistry, task_id: &str) -> Box<dyn AnalysisTask> {
    let request = Request::ClassComparison(class_comparison_request("pool", task_id, &["a", "b", "c"], &["d", "e", "f"]));
    registry.create(request).unwrap()
}

fn start(workers: usize, engine: &ScriptedEngine, router: &Arc<RecordingRouter>) -> WorkerPool {
    WorkerPool::start(
        &PoolConfig { worker_count: workers },
        Arc::new(engine.clone()),
        session_settings(),
        Arc::clone(router) as Arc<dyn ReplyRouter>,
    )
    .unwrap()
}

#[test]
fn test_extra_task_waits_for_a_free_worker() {
    let engine = ScriptedEngine::new()
        .with_class_comparison_results()
        .with_latency(Duration::from_millis(15));
    let router = RecordingRouter::new();
    let registry = TaskRegistry::with_builtin_kinds();
    let pool = start(2, &engine, &router);

    for i in 0..3 {
        pool.submit(task(&registry, &format!("t{i}"))).unwrap();
    }

    let stats = pool.stats();
    assert!(stats.active <= 2);
    assert!(stats.queued >= 1, "third task should be queued: {stats:?}");

    assert!(router.wait_for(3, Duration::from_secs(20)));
    assert!(engine.max_in_flight() <= 2);
    assert_eq!(router.results().len(), 3);
}

#[test]
fn test_every_task_gets_exactly_one_reply() {
    let engine = ScriptedEngine::new().with_class_comparison_results();
    let router = RecordingRouter::new();
    let registry = TaskRegistry::with_builtin_kinds();
    let pool = start(4, &engine, &router);

    let ids: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
    for id in &ids {
        pool.submit(task(&registry, id)).unwrap();
    }
    assert!(router.wait_for(20, Duration::from_secs(20)));
    std::thread::sleep(Duration::from_millis(50));

    let mut seen: Vec<RequestId> = router.replies().iter().map(|r| r.request_id().clone()).collect();
    seen.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    seen.dedup();
    assert_eq!(seen.len(), 20);
    assert_eq!(router.len(), 20);
}

#[test]
fn test_sessions_are_reused_across_tasks() {
    let engine = ScriptedEngine::new().with_class_comparison_results();
    let router = RecordingRouter::new();
    let registry = TaskRegistry::with_builtin_kinds();
    let pool = start(2, &engine, &router);

    for i in 0..6 {
        pool.submit(task(&registry, &format!("t{i}"))).unwrap();
    }
    assert!(router.wait_for(6, Duration::from_secs(20)));

    assert_eq!(engine.connections(), 2);
    assert!(engine.dataset_loads() <= 2);
    pool.shutdown();
    assert_eq!(engine.closed_connections(), 2);
}
