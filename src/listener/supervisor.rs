//! Reconnect supervisor thread and its log-volume policy.

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::ListenerState;
use crate::config::{ReconnectConfig, TransportConfig};
use crate::messaging::{
    ActiveConnection, ConnectionFactory, ExceptionListener, MessageHandler, TransportConnection, TransportError,
    TransportResult,
};

/// How a failed connection attempt is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    /// Full error detail
    Detailed,
    /// One-line "still failing" summary
    Summary,
    Suppressed,
}

/// Bounds log volume during a prolonged outage
///
/// Attempts `1..=verbose_attempts` are logged in full; after that only every
/// `summary_interval`-th attempt is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectLogPolicy {
    pub verbose_attempts: u64,
    pub summary_interval: u64,
}

impl ReconnectLogPolicy {
    pub fn new(verbose_attempts: u64, summary_interval: u64) -> Self {
        Self {
            verbose_attempts,
            summary_interval,
        }
    }

    /// Classify the 1-based consecutive failed attempt number
    pub fn classify(&self, attempt: u64) -> LogDecision {
        if attempt <= self.verbose_attempts {
            LogDecision::Detailed
        } else if self.summary_interval > 0 && attempt % self.summary_interval == 0 {
            LogDecision::Summary
        } else {
            LogDecision::Suppressed
        }
    }
}

impl From<&ReconnectConfig> for ReconnectLogPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.verbose_attempts, config.summary_interval)
    }
}

#[derive(Debug)]
pub(crate) enum SupervisorSignal {
    /// The connection of the given generation reported a transport error
    Reconnect(u64),
    Shutdown,
}

/// Counters shared between the supervisor thread and the listener handle
#[derive(Debug, Default)]
pub(crate) struct SupervisorShared {
    pub state: RwLock<ListenerState>,
    pub failed_attempts: AtomicU64,
    pub detailed_logs: AtomicU64,
    pub summary_logs: AtomicU64,
    pub connections: AtomicU64,
    pub generation: AtomicU64,
}

impl SupervisorShared {
    fn set_state(&self, state: ListenerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "LISTENER: State transition");
        }
    }
}

/// Exception listener installed on each connection; tagged with the
/// connection generation so late reports about a replaced connection are ignored
struct GenerationListener {
    generation: u64,
    control: Sender<SupervisorSignal>,
}

impl ExceptionListener for GenerationListener {
    fn on_exception(&self, error: TransportError) {
        warn!(
            generation = self.generation,
            error = %error,
            "⚠️ LISTENER: Transport reported a connection failure"
        );
        let _ = self.control.send(SupervisorSignal::Reconnect(self.generation));
    }
}

pub(crate) struct Supervisor {
    pub transport: TransportConfig,
    pub policy: ReconnectLogPolicy,
    pub interval: Duration,
    pub factory: Arc<dyn ConnectionFactory>,
    pub handler: Arc<dyn MessageHandler>,
    pub connection: ActiveConnection,
    pub shared: Arc<SupervisorShared>,
    pub control_tx: Sender<SupervisorSignal>,
    pub control_rx: Receiver<SupervisorSignal>,
}

impl Supervisor {
    /// Thread body: connect, listen until a failure is reported, repeat
    pub fn run(self) {
        info!(
            provider = %self.factory.provider(),
            queue = %self.transport.request_queue,
            "✅ LISTENER: Supervisor started"
        );

        loop {
            if !self.connect_until_listening() {
                break;
            }
            if !self.listen() {
                break;
            }
            self.disconnect();
        }

        self.disconnect();
        self.shared.set_state(ListenerState::Stopped);
        info!("✅ LISTENER: Supervisor stopped");
    }

    /// Retry until a connection is listening; `false` on shutdown
    fn connect_until_listening(&self) -> bool {
        self.shared.set_state(ListenerState::Connecting);
        let outage_started = Instant::now();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

            match self.open_connection(generation) {
                Ok(connection) => {
                    self.connection.replace(Some(connection));
                    self.shared.connections.fetch_add(1, Ordering::SeqCst);
                    self.shared.set_state(ListenerState::Listening);
                    info!(
                        provider = %self.factory.provider(),
                        queue = %self.transport.request_queue,
                        attempt,
                        generation,
                        "✅ LISTENER: Listening for requests"
                    );
                    return true;
                }
                Err(e) => self.record_failure(attempt, outage_started.elapsed(), &e),
            }

            if !self.backoff() {
                return false;
            }
        }
    }

    /// Wait out the reconnect interval; `false` on shutdown
    ///
    /// No connection is listening while this runs, so every failure report
    /// received here is about a replaced connection and must not shorten the
    /// wait.
    fn backoff(&self) -> bool {
        let deadline = Instant::now() + self.interval;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.control_rx.recv_timeout(remaining) {
                Ok(SupervisorSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => return true,
                Ok(SupervisorSignal::Reconnect(generation)) => {
                    debug!(generation, "LISTENER: Ignoring failure report while reconnecting");
                }
            }
        }
    }

    /// Block until the current connection fails; `false` on shutdown
    fn listen(&self) -> bool {
        loop {
            match self.control_rx.recv() {
                Ok(SupervisorSignal::Reconnect(generation)) => {
                    if generation == self.shared.generation.load(Ordering::SeqCst) {
                        warn!(generation, "⚠️ LISTENER: Connection lost; reconnecting");
                        self.shared.set_state(ListenerState::Disconnected);
                        return true;
                    }
                    debug!(generation, "LISTENER: Ignoring failure report for a replaced connection");
                }
                Ok(SupervisorSignal::Shutdown) | Err(_) => return false,
            }
        }
    }

    fn open_connection(&self, generation: u64) -> TransportResult<Arc<dyn TransportConnection>> {
        let queue = self.factory.lookup_queue(&self.transport.request_queue)?;
        let connection = self.factory.create_connection()?;

        let listener = Arc::new(GenerationListener {
            generation,
            control: self.control_tx.clone(),
        });

        let started = connection
            .create_receiver(&queue, Arc::clone(&self.handler))
            .and_then(|()| {
                connection.set_exception_listener(Some(listener));
                connection.start()
            });

        match started {
            Ok(()) => Ok(connection),
            Err(e) => {
                close_quietly(connection.as_ref());
                Err(e)
            }
        }
    }

    fn record_failure(&self, attempt: u64, outage: Duration, error: &TransportError) {
        self.shared.failed_attempts.fetch_add(1, Ordering::SeqCst);

        match self.policy.classify(attempt) {
            LogDecision::Detailed => {
                self.shared.detailed_logs.fetch_add(1, Ordering::SeqCst);
                warn!(
                    attempt,
                    provider = %self.factory.provider(),
                    queue = %self.transport.request_queue,
                    error = %error,
                    retry_in_ms = self.interval.as_millis() as u64,
                    "⚠️ LISTENER: Connection attempt failed"
                );
            }
            LogDecision::Summary => {
                self.shared.summary_logs.fetch_add(1, Ordering::SeqCst);
                warn!(
                    attempt,
                    outage_secs = outage.as_secs(),
                    "⚠️ LISTENER: Still unable to connect to message transport"
                );
            }
            LogDecision::Suppressed => {}
        }
    }

    fn disconnect(&self) {
        if let Some(connection) = self.connection.take() {
            connection.set_exception_listener(None);
            close_quietly(connection.as_ref());
        }
    }
}

/// Close a connection, logging and swallowing close-time errors
fn close_quietly(connection: &dyn TransportConnection) {
    if let Err(e) = connection.close() {
        debug!(error = %e, "LISTENER: Error while closing connection (ignored)");
    }
}
