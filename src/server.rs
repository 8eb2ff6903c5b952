//! # Analysis Server
//!
//! Wires the components together in start-up order:
//!
//! ```text
//! ServerConfig ─validate─► ResultRouter(ActiveConnection)
//!                          WorkerPool::start        (every session opened eagerly)
//!                          TaskRegistry::from_config
//!                          RequestListener::start   (supervisor connects in background)
//! ```
//!
//! Shutdown runs in reverse: the pool drains and closes its sessions while the
//! connection is still available for replies, then the listener stops.

use std::sync::Arc;
use tracing::info;

use crate::config::ServerConfig;
use crate::constants::system::{SERVER_NAME, SERVER_VERSION};
use crate::engine::{EngineConnector, SessionSettings};
use crate::error::Result;
use crate::execution::{PoolStats, WorkerPool};
use crate::listener::{ConnectionStats, ListenerState, RequestHandler, RequestListener};
use crate::messaging::{ActiveConnection, ConnectionFactory};
use crate::registry::TaskRegistry;
use crate::router::{ReplyRouter, ResultRouter};

pub struct AnalysisServer {
    pool: Arc<WorkerPool>,
    listener: RequestListener,
    registry: TaskRegistry,
}

impl AnalysisServer {
    pub fn start(
        config: &ServerConfig,
        connection_factory: Arc<dyn ConnectionFactory>,
        engine_connector: Arc<dyn EngineConnector>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            name = SERVER_NAME,
            version = SERVER_VERSION,
            workers = config.pool.worker_count,
            engine = %engine_connector.endpoint(),
            provider = %connection_factory.provider(),
            "🚀 SERVER: Starting analysis server"
        );

        let connection = ActiveConnection::new();
        let router: Arc<dyn ReplyRouter> = Arc::new(ResultRouter::new(connection.clone()));

        let pool = Arc::new(WorkerPool::start(
            &config.pool,
            engine_connector,
            SessionSettings::from(&config.engine),
            Arc::clone(&router),
        )?);

        let registry = TaskRegistry::from_config(&config.registry);
        let handler = Arc::new(RequestHandler::new(registry.clone(), Arc::clone(&pool), router));

        let listener = RequestListener::start(
            &config.transport,
            &config.reconnect,
            connection_factory,
            handler,
            connection,
        )?;

        info!("✅ SERVER: Analysis server started");
        Ok(Self {
            pool,
            listener,
            registry,
        })
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.listener.connection_stats()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Drain the pool, then stop the listener. Idempotent.
    pub fn shutdown(&self) {
        info!("🛑 SERVER: Shutting down");
        self.pool.shutdown();
        self.listener.shutdown();
        info!(stats = ?self.pool.stats(), "✅ SERVER: Shutdown complete");
    }
}

impl Drop for AnalysisServer {
    fn drop(&mut self) {
        self.pool.shutdown();
        self.listener.shutdown();
    }
}

impl std::fmt::Debug for AnalysisServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisServer")
            .field("pool", &self.pool.stats())
            .field("listener", &self.listener)
            .finish()
    }
}
