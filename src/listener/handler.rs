//! Inbound message handler: decode, dispatch, submit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::execution::WorkerPool;
use crate::messaging::{AnalysisFailure, InboundMessage, MessageHandler, Request};
use crate::registry::TaskRegistry;
use crate::router::ReplyRouter;

/// Turns each inbound message into a queued task
///
/// Runs on the transport's delivery thread. It never blocks on task
/// completion and never lets an error or panic escape to the transport.
pub struct RequestHandler {
    registry: TaskRegistry,
    pool: Arc<WorkerPool>,
    router: Arc<dyn ReplyRouter>,
}

impl RequestHandler {
    pub fn new(registry: TaskRegistry, pool: Arc<WorkerPool>, router: Arc<dyn ReplyRouter>) -> Self {
        Self { registry, pool, router }
    }

    fn handle(&self, message: InboundMessage) {
        let InboundMessage { body, reply_to, .. } = message;

        let Some(body) = body else {
            warn!(reply_to = ?reply_to, "⚠️ LISTENER: Received message without payload; discarded");
            return;
        };

        let request = match Request::from_bytes(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    reply_to = ?reply_to,
                    bytes = body.len(),
                    error = %e,
                    "⚠️ LISTENER: Undecodable request payload; discarded"
                );
                return;
            }
        };

        let request_id = request.id().clone();
        debug!(
            session_id = %request_id.session_id,
            task_id = %request_id.task_id,
            kind = %request.kind(),
            "LISTENER: Request received"
        );

        match self.registry.dispatch(request.clone(), reply_to.clone()) {
            Ok(task) => {
                if self.pool.submit(task).is_err() {
                    debug!(request = %request_id, "LISTENER: Pool rejected task during shutdown");
                }
            }
            Err(e) => {
                let failure = AnalysisFailure::new(e.to_string(), request);
                self.router.send_failure(failure, reply_to.as_ref());
            }
        }
    }
}

impl MessageHandler for RequestHandler {
    fn on_message(&self, message: InboundMessage) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.handle(message))).is_err() {
            error!("❌ LISTENER: Message handler panicked; message discarded");
        }
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish()
    }
}
