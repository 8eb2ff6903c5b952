//! Listener reconnect supervision against the in-process broker.

mod common;

use std::time::Duration;

use analysis_server::config::ReconnectConfig;
use analysis_server::listener::{ListenerState, LogDecision, ReconnectLogPolicy};
use analysis_server::messaging::{MemoryBroker, Reply, Request};
use analysis_server::test_utils::{class_comparison_request, ScriptedEngine};

use common::{server_config, wait_until, TestServer};

#[test]
fn test_twelve_failures_log_ten_details() {
    let broker = MemoryBroker::new();
    broker.fail_next_connections(12);
    let harness = TestServer::start_with(server_config(1), broker, ScriptedEngine::new());

    assert!(wait_until(Duration::from_secs(10), || {
        harness.server.listener_state() == ListenerState::Listening
    }));

    let stats = harness.server.connection_stats();
    assert_eq!(stats.attempts, 12);
    assert_eq!(stats.detailed_logs, 10);
    assert_eq!(stats.summary_logs, 0);
    assert_eq!(stats.connections, 1);
    assert_eq!(harness.broker.connection_attempts(), 13);
}

#[test]
fn test_default_policy_resumes_at_attempt_600() {
    let policy = ReconnectLogPolicy::from(&ReconnectConfig::default());
    let detailed = (1..=1200u64).filter(|a| policy.classify(*a) == LogDecision::Detailed).count();
    let summaries: Vec<u64> = (1..=1200u64)
        .filter(|a| policy.classify(*a) == LogDecision::Summary)
        .collect();
    assert_eq!(detailed, 10);
    assert_eq!(summaries, vec![600, 1200]);
    assert!((11..600).all(|a| policy.classify(a) == LogDecision::Suppressed));
}

#[test]
fn test_requests_flow_again_after_connection_loss() {
    let harness = TestServer::start(1, ScriptedEngine::new().with_class_comparison_results());
    assert!(wait_until(Duration::from_secs(5), || {
        harness.server.listener_state() == ListenerState::Listening
    }));

    harness.broker.sever_connections();
    assert!(wait_until(Duration::from_secs(5), || harness.server.connection_stats().connections == 2));

    let request = Request::ClassComparison(class_comparison_request("s", "after-loss", &["a", "b", "c"], &["d", "e", "f"]));
    harness.send(&request, "reply.after-loss");
    assert!(matches!(harness.reply("reply.after-loss"), Some(Reply::Result(_))));
}

#[test]
fn test_requests_queued_during_outage_are_served_after_connect() {
    let broker = MemoryBroker::new();
    broker.fail_next_connections(3);
    let harness = TestServer::start_with(
        server_config(1),
        broker,
        ScriptedEngine::new().with_class_comparison_results(),
    );

    let request = Request::ClassComparison(class_comparison_request("s", "early", &["a", "b", "c"], &["d", "e", "f"]));
    harness.send(&request, "reply.early");

    assert!(matches!(harness.reply("reply.early"), Some(Reply::Result(_))));
    assert_eq!(harness.server.connection_stats().attempts, 3);
}
