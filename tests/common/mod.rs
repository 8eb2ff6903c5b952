//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use analysis_server::config::ServerConfig;
use analysis_server::messaging::{MemoryBroker, Reply, ReplyAddress, Request};
use analysis_server::server::AnalysisServer;
use analysis_server::test_utils::ScriptedEngine;

pub const REQUEST_QUEUE: &str = "analysis_request";

pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Valid configuration for a memory broker and a scripted engine
pub fn server_config(workers: usize) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.pool.worker_count = workers;
    config.engine = config
        .engine
        .with_init_script("/opt/analysis/init.R")
        .with_dataset_root("/data/");
    config.transport.provider_url = "memory://local".to_string();
    config.transport.request_queue = REQUEST_QUEUE.to_string();
    config.reconnect.interval_ms = 5;
    config
}

pub struct TestServer {
    pub broker: MemoryBroker,
    pub engine: ScriptedEngine,
    pub server: AnalysisServer,
}

impl TestServer {
    pub fn start(workers: usize, engine: ScriptedEngine) -> Self {
        Self::start_with(server_config(workers), MemoryBroker::new(), engine)
    }

    pub fn start_with(config: ServerConfig, broker: MemoryBroker, engine: ScriptedEngine) -> Self {
        let server = AnalysisServer::start(&config, Arc::new(broker.clone()), Arc::new(engine.clone()))
            .expect("server should start");
        Self { broker, engine, server }
    }

    pub fn send(&self, request: &Request, reply_to: &str) {
        self.broker
            .publish_request(REQUEST_QUEUE, request, Some(ReplyAddress::new(reply_to)));
    }

    pub fn reply(&self, reply_to: &str) -> Option<Reply> {
        self.broker.receive_reply(&ReplyAddress::new(reply_to), REPLY_TIMEOUT)
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
