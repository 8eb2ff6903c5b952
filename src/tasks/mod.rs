//! # Analysis Tasks
//!
//! A task wraps exactly one inbound request together with its execution
//! record. Workers drive every task through the same capability set:
//!
//! ```text
//!   bind session ─► run() ─► take failure / take_result() ─► cleanup() ─► session back to worker
//! ```
//!
//! Most analyses are thin command generators over the compute engine and
//! implement [`CommandAnalysis`]; [`CommandTask`] adapts them to
//! [`AnalysisTask`] and guarantees validation happens before any engine
//! traffic. The compound task implements [`AnalysisTask`] directly because it
//! lends its session to sub-tasks.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::engine::ComputeSession;
use crate::messaging::{AnalysisFailure, AnalysisResult, ReplyAddress, Request, RequestId, RequestKind};

pub mod class_comparison;
pub mod class_comparison_lookup;
pub mod clustering;
pub mod commands;
pub mod compound;
pub mod correlation;
pub mod error;
pub mod ftest;
pub mod glm;
pub mod pca;

pub use class_comparison::ClassComparison;
pub use class_comparison_lookup::ClassComparisonLookup;
pub use clustering::HierarchicalClustering;
pub use compound::CompoundTask;
pub use correlation::Correlation;
pub use error::AnalysisError;
pub use ftest::FTest;
pub use glm::GeneralizedLinearModel;
pub use pca::PrincipalComponentAnalysis;

/// Mutable execution record of one task
#[derive(Debug, Default)]
pub struct TaskContext {
    reply_to: Option<ReplyAddress>,
    worker: Option<String>,
    started_at: Option<Instant>,
    compute_time: Option<Duration>,
    failure: Option<AnalysisFailure>,
    session: Option<ComputeSession>,
}

impl TaskContext {
    pub fn new(reply_to: Option<ReplyAddress>) -> Self {
        Self {
            reply_to,
            ..Self::default()
        }
    }

    pub fn reply_to(&self) -> Option<&ReplyAddress> {
        self.reply_to.as_ref()
    }

    pub fn set_reply_to(&mut self, reply_to: Option<ReplyAddress>) {
        self.reply_to = reply_to;
    }

    /// Record the executing worker and the start time
    pub fn assign_worker(&mut self, worker: &str) {
        self.worker = Some(worker.to_string());
        self.started_at = Some(Instant::now());
    }

    pub fn worker(&self) -> Option<&str> {
        self.worker.as_deref()
    }

    pub fn attach_session(&mut self, session: ComputeSession) {
        if self.session.is_some() {
            warn!(worker = ?self.worker, "⚠️ TASK: Replacing an already attached session");
        }
        self.session = Some(session);
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_mut(&mut self) -> Result<&mut ComputeSession, AnalysisError> {
        self.session.as_mut().ok_or(AnalysisError::NoSession)
    }

    pub fn take_session(&mut self) -> Option<ComputeSession> {
        self.session.take()
    }

    pub fn set_failure(&mut self, failure: AnalysisFailure) {
        self.failure = Some(failure);
    }

    pub fn failure(&self) -> Option<&AnalysisFailure> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<AnalysisFailure> {
        self.failure.take()
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Stop the clock; returns the elapsed compute time
    pub fn finish(&mut self) -> Duration {
        let elapsed = self.started_at.map(|s| s.elapsed()).unwrap_or_default();
        self.compute_time = Some(elapsed);
        elapsed
    }

    pub fn compute_time(&self) -> Option<Duration> {
        self.compute_time
    }
}

/// Unit of dispatched work
pub trait AnalysisTask: Send {
    fn kind(&self) -> RequestKind;

    fn request_id(&self) -> &RequestId;

    /// Owned copy of the wrapped request, used as the failure back-reference
    fn request(&self) -> Request;

    fn context(&self) -> &TaskContext;

    fn context_mut(&mut self) -> &mut TaskContext;

    /// Execute against the attached session
    ///
    /// Never panics on bad input and never returns an error; problems are
    /// recorded as a failure on the context.
    fn run(&mut self);

    fn take_result(&mut self) -> Option<AnalysisResult>;

    /// Release the task's hold on its session. Idempotent.
    fn cleanup(&mut self) -> Option<ComputeSession> {
        self.context_mut().take_session()
    }

    fn fail(&mut self, error: AnalysisError) {
        let failure = error.into_failure(self.request());
        self.context_mut().set_failure(failure);
    }
}

/// Analysis expressed as validation plus a command sequence
pub trait CommandAnalysis: Send {
    const KIND: RequestKind;

    fn request_id(&self) -> &RequestId;

    fn to_request(&self) -> Request;

    /// Structural checks; must not touch the engine
    fn validate(&self) -> Result<(), AnalysisError>;

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError>;
}

/// [`AnalysisTask`] adapter for command analyses
pub struct CommandTask<A> {
    analysis: A,
    context: TaskContext,
    result: Option<AnalysisResult>,
}

impl<A: CommandAnalysis> CommandTask<A> {
    pub fn new(analysis: A) -> Self {
        Self {
            analysis,
            context: TaskContext::default(),
            result: None,
        }
    }

    pub fn analysis(&self) -> &A {
        &self.analysis
    }
}

impl<A: CommandAnalysis> AnalysisTask for CommandTask<A> {
    fn kind(&self) -> RequestKind {
        A::KIND
    }

    fn request_id(&self) -> &RequestId {
        self.analysis.request_id()
    }

    fn request(&self) -> Request {
        self.analysis.to_request()
    }

    fn context(&self) -> &TaskContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut TaskContext {
        &mut self.context
    }

    fn run(&mut self) {
        if self.context.has_failed() {
            debug!(request = %self.analysis.request_id(), "TASK: Skipping run of already failed task");
            return;
        }

        if let Err(e) = self.analysis.validate() {
            warn!(
                request = %self.analysis.request_id(),
                kind = %A::KIND,
                reason = %e,
                "⚠️ TASK: Request failed validation"
            );
            self.fail(e);
            return;
        }

        let outcome = match self.context.session_mut() {
            Ok(session) => self.analysis.execute(session),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => self.result = Some(result),
            Err(e) => self.fail(e),
        }
    }

    fn take_result(&mut self) -> Option<AnalysisResult> {
        self.result.take()
    }
}
