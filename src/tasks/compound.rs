//! # Compound Task
//!
//! Runs an ordered list of sub-requests on the worker's single session and
//! aggregates their results. Sub-tasks are built through the same
//! [`TaskRegistry`] as top-level requests.
//!
//! The session is lent to each sub-task in turn and taken back through
//! [`AnalysisTask::cleanup`]. The first failing sub-task stops the loop; the
//! failure is recorded against the compound request and the results gathered
//! so far stay in the aggregate.

use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

use super::{AnalysisError, AnalysisTask, TaskContext};
use crate::messaging::{AnalysisResult, CompoundRequest, CompoundResult, Request, RequestId, RequestKind};
use crate::registry::TaskRegistry;
use crate::utils::panic_message;

pub struct CompoundTask {
    request: CompoundRequest,
    registry: TaskRegistry,
    context: TaskContext,
    result: Option<AnalysisResult>,
}

impl CompoundTask {
    pub fn new(request: CompoundRequest, registry: TaskRegistry) -> Self {
        Self {
            request,
            registry,
            context: TaskContext::default(),
            result: None,
        }
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        if self.request.requests.is_empty() {
            return Err(AnalysisError::validation("Compound request contains no sub-requests."));
        }
        if self
            .request
            .requests
            .iter()
            .any(|r| r.kind() == RequestKind::Compound)
        {
            return Err(AnalysisError::validation("Nested compound requests are not supported."));
        }
        Ok(())
    }

    /// Run the sub-requests in order; stops at the first failure
    fn run_children(&mut self, results: &mut Vec<AnalysisResult>) -> Result<(), AnalysisError> {
        let worker = self.context.worker().unwrap_or_default().to_string();

        for (index, sub_request) in self.request.requests.iter().enumerate() {
            let sub_id = sub_request.id().clone();
            let mut child = self
                .registry
                .create(sub_request.clone())
                .map_err(|e| AnalysisError::validation(e.to_string()))?;

            let session = self.context.take_session().ok_or(AnalysisError::NoSession)?;
            child.context_mut().assign_worker(&worker);
            child.context_mut().attach_session(session);
            let panicked = panic::catch_unwind(AssertUnwindSafe(|| child.run())).err();

            // The session comes back even from a panicking child.
            let Some(session) = child.cleanup() else {
                return Err(AnalysisError::internal("Compute session was not returned by a sub-task."));
            };
            self.context.attach_session(session);

            if let Some(payload) = panicked {
                error!(
                    request = %self.request.id,
                    sub_request = %sub_id,
                    index,
                    panic = %panic_message(payload.as_ref()),
                    "❌ TASK: Compound sub-request panicked; aborting remaining sub-requests"
                );
                return Err(AnalysisError::internal("Unexpected error while executing the analysis."));
            }

            if let Some(failure) = child.context_mut().take_failure() {
                warn!(
                    request = %self.request.id,
                    sub_request = %sub_id,
                    index,
                    reason = %failure.message,
                    "⚠️ TASK: Compound sub-request failed; aborting remaining sub-requests"
                );
                return Err(AnalysisError::computation(failure.message));
            }

            match child.take_result() {
                Some(result) => results.push(result),
                None => {
                    return Err(AnalysisError::internal(format!(
                        "Sub-request {sub_id} produced neither a result nor a failure."
                    )))
                }
            }
            debug!(request = %self.request.id, sub_request = %sub_id, index, "TASK: Compound sub-request completed");
        }
        Ok(())
    }
}

impl AnalysisTask for CompoundTask {
    fn kind(&self) -> RequestKind {
        RequestKind::Compound
    }

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn request(&self) -> Request {
        Request::Compound(self.request.clone())
    }

    fn context(&self) -> &TaskContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut TaskContext {
        &mut self.context
    }

    fn run(&mut self) {
        if self.context.has_failed() {
            return;
        }
        if let Err(e) = self.validate() {
            warn!(request = %self.request.id, reason = %e, "⚠️ TASK: Compound request failed validation");
            self.fail(e);
            return;
        }

        let mut results = Vec::with_capacity(self.request.requests.len());
        let outcome = self.run_children(&mut results);

        info!(
            request = %self.request.id,
            completed = results.len(),
            total = self.request.requests.len(),
            "TASK: Compound request finished"
        );

        self.result = Some(AnalysisResult::Compound(CompoundResult {
            id: self.request.id.clone(),
            results,
        }));
        if let Err(e) = outcome {
            self.fail(e);
        }
    }

    fn take_result(&mut self) -> Option<AnalysisResult> {
        self.result.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineValue;
    use crate::messaging::CompoundRequest;
    use crate::test_utils::{class_comparison_request, open_session, pca_request, ScriptedEngine};

    fn compound(requests: Vec<Request>) -> CompoundTask {
        let request = CompoundRequest {
            id: RequestId::new("s", "compound"),
            requests,
        };
        CompoundTask::new(request, TaskRegistry::with_builtin_kinds())
    }

    #[test]
    fn test_sub_requests_share_one_session_and_dataset_load() {
        let engine = ScriptedEngine::new()
            .responding("dim(ccInputMatrix)[2]", EngineValue::Int(vec![6]))
            .responding("length(pcaResult$x[1,])", EngineValue::Int(vec![3]));
        let mut pca = pca_request("s", "t2", &["a", "b"]);
        pca.variance_filter = 0.5;
        let mut task = compound(vec![
            Request::ClassComparison(class_comparison_request("s", "t1", &["a", "b", "c"], &["d", "e", "f"])),
            Request::PrincipalComponentAnalysis(pca),
        ]);
        task.context_mut().attach_session(open_session(&engine));
        task.run();

        assert!(!task.context().has_failed(), "{:?}", task.context().failure());
        let Some(AnalysisResult::Compound(result)) = task.take_result() else {
            panic!("expected compound result");
        };
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].id(), &RequestId::new("s", "t1"));
        assert_eq!(engine.dataset_loads(), 1);
        assert!(task.cleanup().is_some());
    }

    #[test]
    fn test_first_failure_aborts_and_references_compound() {
        let engine = ScriptedEngine::new();
        let bad = class_comparison_request("s", "t1", &["a"], &["d", "e", "f"]);
        let good = class_comparison_request("s", "t2", &["a", "b", "c"], &["d", "e", "f"]);
        let mut task = compound(vec![Request::ClassComparison(bad), Request::ClassComparison(good)]);
        task.context_mut().attach_session(open_session(&engine));
        task.run();

        let failure = task.context().failure().unwrap();
        assert_eq!(failure.message, "Group1 is null or has less than 3 entries.");
        assert_eq!(failure.request_id(), &RequestId::new("s", "compound"));
        assert_eq!(engine.dataset_loads(), 0);
        assert!(task.context().has_session());
    }

    #[test]
    fn test_nested_compound_is_rejected() {
        let nested = Request::Compound(CompoundRequest {
            id: RequestId::new("s", "inner"),
            requests: Vec::new(),
        });
        let mut task = compound(vec![nested]);
        task.context_mut().attach_session(open_session(&ScriptedEngine::new()));
        task.run();
        assert_eq!(
            task.context().failure().unwrap().message,
            "Nested compound requests are not supported."
        );
    }

    #[test]
    fn test_empty_compound_is_rejected() {
        let mut task = compound(Vec::new());
        task.run();
        assert!(task.context().has_failed());
        assert!(task.take_result().is_none());
    }
}
