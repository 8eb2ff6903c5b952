//! # Task Registry
//!
//! Maps a [`RequestKind`] tag to a factory that builds the matching
//! [`AnalysisTask`]. Populated once at start-up from
//! `registry.enabled_kinds`; request kinds outside that list are dispatch
//! errors, not silent drops.
//!
//! ```text
//! Request ──kind()──► DashMap<RequestKind, TaskFactory> ──factory(request)──► Box<dyn AnalysisTask>
//! ```

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::DispatchError;
use crate::config::RegistryConfig;
use crate::messaging::{ReplyAddress, Request, RequestKind};
use crate::tasks::{
    AnalysisTask, ClassComparison, ClassComparisonLookup, CommandTask, CompoundTask, Correlation, FTest, GeneralizedLinearModel,
    HierarchicalClustering, PrincipalComponentAnalysis,
};

/// Builds a task from a request; receives the registry so composite tasks can
/// dispatch their children
pub type TaskFactory =
    Arc<dyn Fn(Request, &TaskRegistry) -> Result<Box<dyn AnalysisTask>, DispatchError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: Arc<DashMap<RequestKind, TaskFactory>>,
}

impl TaskRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in analysis registered
    pub fn with_builtin_kinds() -> Self {
        Self::from_config(&RegistryConfig::default())
    }

    /// Registry with the built-in factories for the configured kinds
    pub fn from_config(config: &RegistryConfig) -> Self {
        let registry = Self::new();
        for kind in &config.enabled_kinds {
            registry.register(*kind, builtin_factory(*kind));
        }
        info!(
            kinds = ?registry.registered_kinds(),
            "✅ REGISTRY: Task registry initialized"
        );
        registry
    }

    /// Register or replace the factory for `kind`
    pub fn register(&self, kind: RequestKind, factory: TaskFactory) {
        if self.factories.insert(kind, factory).is_some() {
            warn!(kind = %kind, "⚠️ REGISTRY: Replaced existing task factory");
        } else {
            debug!(kind = %kind, "REGISTRY: Registered task factory");
        }
    }

    pub fn is_registered(&self, kind: RequestKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds in declaration order
    pub fn registered_kinds(&self) -> Vec<RequestKind> {
        RequestKind::ALL
            .into_iter()
            .filter(|kind| self.factories.contains_key(kind))
            .collect()
    }

    /// Build the task for `request`
    pub fn create(&self, request: Request) -> Result<Box<dyn AnalysisTask>, DispatchError> {
        let kind = request.kind();
        // Clone the factory out so the map shard is not held during construction.
        let factory = match self.factories.get(&kind) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Err(DispatchError::UnknownKind { kind }),
        };
        factory(request, self)
    }

    /// Build the task for an inbound request and bind its reply address
    pub fn dispatch(
        &self,
        request: Request,
        reply_to: Option<ReplyAddress>,
    ) -> Result<Box<dyn AnalysisTask>, DispatchError> {
        let request_id = request.id().clone();
        match self.create(request) {
            Ok(mut task) => {
                task.context_mut().set_reply_to(reply_to);
                debug!(request = %request_id, kind = %task.kind(), "REGISTRY: Dispatched request");
                Ok(task)
            }
            Err(e @ DispatchError::UnknownKind { .. }) => {
                warn!(request = %request_id, error = %e, "⚠️ REGISTRY: Unknown request kind");
                Err(e)
            }
            Err(e @ DispatchError::Construction { .. }) => {
                error!(request = %request_id, error = %e, "❌ REGISTRY: Task construction failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.registered_kinds())
            .finish()
    }
}

type FactoryResult = Result<Box<dyn AnalysisTask>, DispatchError>;

fn mismatch(kind: RequestKind, request: &Request) -> DispatchError {
    DispatchError::Construction {
        kind,
        message: format!("factory received a {} request", request.kind()),
    }
}

fn class_comparison(request: Request, _: &TaskRegistry) -> FactoryResult {
    match request {
        Request::ClassComparison(r) => Ok(Box::new(CommandTask::new(ClassComparison::new(r)))),
        other => Err(mismatch(RequestKind::ClassComparison, &other)),
    }
}

fn class_comparison_lookup(request: Request, _: &TaskRegistry) -> FactoryResult {
    match request {
        Request::ClassComparisonLookup(r) => Ok(Box::new(CommandTask::new(ClassComparisonLookup::new(r)))),
        other => Err(mismatch(RequestKind::ClassComparisonLookup, &other)),
    }
}

fn hierarchical_clustering(request: Request, _: &TaskRegistry) -> FactoryResult {
    match request {
        Request::HierarchicalClustering(r) => Ok(Box::new(CommandTask::new(HierarchicalClustering::new(r)))),
        other => Err(mismatch(RequestKind::HierarchicalClustering, &other)),
    }
}

fn principal_component_analysis(request: Request, _: &TaskRegistry) -> FactoryResult {
    match request {
        Request::PrincipalComponentAnalysis(r) => Ok(Box::new(CommandTask::new(PrincipalComponentAnalysis::new(r)))),
        other => Err(mismatch(RequestKind::PrincipalComponentAnalysis, &other)),
    }
}

fn correlation(request: Request, _: &TaskRegistry) -> FactoryResult {
    match request {
        Request::Correlation(r) => Ok(Box::new(CommandTask::new(Correlation::new(r)))),
        other => Err(mismatch(RequestKind::Correlation, &other)),
    }
}

fn f_test(request: Request, _: &TaskRegistry) -> FactoryResult {
    match request {
        Request::FTest(r) => Ok(Box::new(CommandTask::new(FTest::new(r)))),
        other => Err(mismatch(RequestKind::FTest, &other)),
    }
}

fn generalized_linear_model(request: Request, _: &TaskRegistry) -> FactoryResult {
    match request {
        Request::GeneralizedLinearModel(r) => Ok(Box::new(CommandTask::new(GeneralizedLinearModel::new(r)))),
        other => Err(mismatch(RequestKind::GeneralizedLinearModel, &other)),
    }
}

fn compound(request: Request, registry: &TaskRegistry) -> FactoryResult {
    match request {
        Request::Compound(r) => Ok(Box::new(CompoundTask::new(r, registry.clone()))),
        other => Err(mismatch(RequestKind::Compound, &other)),
    }
}

/// Factory for one of the built-in analyses
pub fn builtin_factory(kind: RequestKind) -> TaskFactory {
    match kind {
        RequestKind::ClassComparison => Arc::new(class_comparison),
        RequestKind::ClassComparisonLookup => Arc::new(class_comparison_lookup),
        RequestKind::HierarchicalClustering => Arc::new(hierarchical_clustering),
        RequestKind::PrincipalComponentAnalysis => Arc::new(principal_component_analysis),
        RequestKind::Correlation => Arc::new(correlation),
        RequestKind::FTest => Arc::new(f_test),
        RequestKind::GeneralizedLinearModel => Arc::new(generalized_linear_model),
        RequestKind::Compound => Arc::new(compound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{CompoundRequest, RequestId};
    use crate::test_utils::{class_comparison_lookup_request, class_comparison_request};

    fn cc() -> Request {
        Request::ClassComparison(class_comparison_request("s", "t", &["a", "b", "c"], &["d", "e", "f"]))
    }

    #[test]
    fn test_builtin_registry_covers_every_kind() {
        let registry = TaskRegistry::with_builtin_kinds();
        assert_eq!(registry.registered_kinds(), RequestKind::ALL.to_vec());
    }

    #[test]
    fn test_dispatch_binds_reply_address() {
        let registry = TaskRegistry::with_builtin_kinds();
        let task = registry.dispatch(cc(), Some(ReplyAddress::new("client-7"))).unwrap();
        assert_eq!(task.kind(), RequestKind::ClassComparison);
        assert_eq!(task.context().reply_to().map(|r| r.as_str()), Some("client-7"));
    }

    #[test]
    fn test_disabled_kind_is_unknown() {
        let registry = TaskRegistry::from_config(&RegistryConfig {
            enabled_kinds: vec![RequestKind::Correlation],
        });
        let err = registry.dispatch(cc(), None).err().unwrap();
        assert_eq!(
            err,
            DispatchError::UnknownKind {
                kind: RequestKind::ClassComparison
            }
        );
    }

    #[test]
    fn test_factory_rejection_is_construction_error() {
        let registry = TaskRegistry::new();
        registry.register(RequestKind::ClassComparison, builtin_factory(RequestKind::Correlation));
        let err = registry.create(cc()).err().unwrap();
        assert!(matches!(err, DispatchError::Construction { kind: RequestKind::Correlation, .. }));
    }

    #[test]
    fn test_lookup_request_builds_lookup_task() {
        let registry = TaskRegistry::with_builtin_kinds();
        let request = Request::ClassComparisonLookup(class_comparison_lookup_request(
            "s",
            "t",
            &["a", "b", "c"],
            &["d", "e", "f"],
            &["r1"],
        ));
        let task = registry.create(request).unwrap();
        assert_eq!(task.kind(), RequestKind::ClassComparisonLookup);
    }

    #[test]
    fn test_compound_factory_receives_registry() {
        let registry = TaskRegistry::with_builtin_kinds();
        let request = Request::Compound(CompoundRequest {
            id: RequestId::new("s", "c"),
            requests: vec![cc()],
        });
        let task = registry.create(request).unwrap();
        assert_eq!(task.kind(), RequestKind::Compound);
    }
}
