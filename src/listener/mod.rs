//! # Request Listener
//!
//! Consumes analysis requests from the message transport and keeps the
//! transport connected. Connection management runs on a dedicated supervisor
//! thread; message handling runs on the transport's delivery threads.
//!
//! ## State Machine
//!
//! ```text
//!                  ┌────────── connect failed (sleep interval) ──────────┐
//!                  ▼                                                     │
//!  Disconnected ──► Connecting ──── connected ────► Listening ───────────┤
//!       ▲                                              │                 │
//!       └────────────── transport exception ───────────┘                 │
//!                                                                        │
//!  any state ──── shutdown() ────► Stopped ◄─────────────────────────────┘
//! ```
//!
//! Failed attempts are logged according to [`ReconnectLogPolicy`] so a long
//! outage does not flood the log.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

use crate::config::{ReconnectConfig, TransportConfig};
use crate::constants::system::SUPERVISOR_THREAD_NAME;
use crate::error::{AnalysisServerError, Result};
use crate::messaging::{ActiveConnection, ConnectionFactory, MessageHandler};

pub mod handler;
pub mod supervisor;

pub use handler::RequestHandler;
pub use supervisor::{LogDecision, ReconnectLogPolicy};

use supervisor::{Supervisor, SupervisorShared, SupervisorSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    #[default]
    Disconnected,
    Connecting,
    Listening,
    Stopped,
}

/// Reconnect bookkeeping since the listener started
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Failed connection attempts, across all outages
    pub attempts: u64,
    pub detailed_logs: u64,
    pub summary_logs: u64,
    /// Successful connections, including the first one
    pub connections: u64,
}

/// Handle to the running supervisor thread
pub struct RequestListener {
    shared: Arc<SupervisorShared>,
    control: Sender<SupervisorSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RequestListener {
    /// Spawn the supervisor; it connects in the background and retries until
    /// the transport is reachable
    pub fn start(
        transport: &TransportConfig,
        reconnect: &ReconnectConfig,
        factory: Arc<dyn ConnectionFactory>,
        handler: Arc<dyn MessageHandler>,
        connection: ActiveConnection,
    ) -> Result<Self> {
        let shared = Arc::new(SupervisorShared::default());
        let (control_tx, control_rx) = channel::unbounded();

        let supervisor = Supervisor {
            transport: transport.clone(),
            policy: ReconnectLogPolicy::from(reconnect),
            interval: reconnect.interval(),
            factory,
            handler,
            connection,
            shared: Arc::clone(&shared),
            control_tx: control_tx.clone(),
            control_rx,
        };

        let handle = thread::Builder::new()
            .name(SUPERVISOR_THREAD_NAME.to_string())
            .spawn(move || supervisor.run())
            .map_err(|e| AnalysisServerError::lifecycle(format!("failed to spawn listener supervisor: {e}")))?;

        Ok(Self {
            shared,
            control: control_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.read()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            attempts: self.shared.failed_attempts.load(Ordering::SeqCst),
            detailed_logs: self.shared.detailed_logs.load(Ordering::SeqCst),
            summary_logs: self.shared.summary_logs.load(Ordering::SeqCst),
            connections: self.shared.connections.load(Ordering::SeqCst),
        }
    }

    /// Stop the supervisor and close the current connection. Idempotent.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.control.send(SupervisorSignal::Shutdown);
        if handle.join().is_err() {
            error!("❌ LISTENER: Supervisor thread terminated abnormally");
        }
        info!(stats = ?self.connection_stats(), "✅ LISTENER: Request listener shut down");
    }
}

impl Drop for RequestListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RequestListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestListener")
            .field("state", &self.state())
            .field("stats", &self.connection_stats())
            .finish()
    }
}
