//! # Test Utilities
//!
//! Fakes and builders shared by unit tests and the integration suite:
//!
//! - [`ScriptedEngine`]: an in-process compute engine with a programmable
//!   response table, a full command log and injectable latency or failures
//! - [`RecordingRouter`]: a [`ReplyRouter`] that captures every routed reply
//! - request builders with valid defaults for each analysis kind
//!
//! The in-process message broker lives in [`crate::messaging::MemoryBroker`].

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::{
    ComputeSession, EngineConnection, EngineConnector, EngineError, EngineResult, EngineValue, SessionSettings,
};
use crate::messaging::{
    AnalysisFailure, AnalysisResult, ClassComparisonLookupRequest, ClassComparisonRequest, CorrelationMethod, CorrelationRequest,
    FTestRequest, GeneralizedLinearModelRequest, HierarchicalClusteringRequest, MultipleComparisonAdjustment,
    PrincipalComponentAnalysisRequest, ReplyAddress, ReporterSpec, RequestId, SampleGroup, StatisticalMethod,
};
use crate::router::ReplyRouter;

pub const TEST_DATASET: &str = "brain.Rda";

/// Status code reported for scripted command failures
const SCRIPTED_FAILURE_STATUS: u32 = 127;

#[derive(Debug, Default)]
struct Script {
    responses: Vec<(String, EngineValue)>,
    failures: Vec<String>,
    requires_login: bool,
    file_contents: Vec<u8>,
    latency: Option<Duration>,
    refuse_connections: usize,
}

#[derive(Debug, Default)]
struct Journal {
    commands: Vec<String>,
    logins: usize,
    connections: usize,
    closed: usize,
    removed_files: Vec<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    script: Mutex<Script>,
    journal: Mutex<Journal>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Fake compute engine
///
/// Clones share state, so a clone handed to a worker pool can be inspected
/// from the test afterwards. Unscripted `eval` commands return
/// [`EngineValue::Null`]; when several scripted prefixes match, the longest
/// wins.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<EngineState>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requiring_login(self) -> Self {
        self.state.script.lock().requires_login = true;
        self
    }

    /// Commands starting with `prefix` fail with an engine error
    pub fn failing_on(self, prefix: &str) -> Self {
        self.state.script.lock().failures.push(prefix.to_string());
        self
    }

    /// `eval` of commands starting with `prefix` returns `value`
    pub fn responding(self, prefix: &str, value: EngineValue) -> Self {
        self.state.script.lock().responses.push((prefix.to_string(), value));
        self
    }

    /// Contents returned by every `read_file`
    pub fn with_file_contents(self, contents: Vec<u8>) -> Self {
        self.state.script.lock().file_contents = contents;
        self
    }

    /// Every command takes at least `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.script.lock().latency = Some(latency);
        self
    }

    /// The next `count` connection attempts are refused
    pub fn refusing_connections(self, count: usize) -> Self {
        self.state.script.lock().refuse_connections = count;
        self
    }

    /// Responses for a three-reporter class comparison over six samples
    ///
    /// Reporters `r1`, `r2`, `r3` come back with p-values 0.04, 0.01, 0.01 and
    /// fold changes 1.2, 3.0, -4.0.
    pub fn with_class_comparison_results(self) -> Self {
        self.responding("dim(ccInputMatrix)[2]", EngineValue::Int(vec![6]))
            .responding("mean1 <-", EngineValue::Double(vec![1.0, 2.0, 3.0]))
            .responding("meanBaseline <-", EngineValue::Double(vec![0.5, 0.5, 0.5]))
            .responding("meanDif <-", EngineValue::Double(vec![0.5, 1.5, 2.5]))
            .responding("fc <-", EngineValue::Double(vec![1.2, 3.0, -4.0]))
            .responding("pva <-", EngineValue::Double(vec![0.04, 0.01, 0.01]))
            .responding("stdG1 <-", EngineValue::Double(vec![0.1, 0.2, 0.3]))
            .responding("stdBL <-", EngineValue::Double(vec![0.1, 0.1, 0.1]))
            .responding(
                "ccLabels <-",
                EngineValue::Str(vec!["r1".into(), "r2".into(), "r3".into()]),
            )
    }

    /// Every command issued, in order, across all connections (login excluded)
    pub fn commands(&self) -> Vec<String> {
        self.state.journal.lock().commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.state.journal.lock().commands.len()
    }

    pub fn logins(&self) -> usize {
        self.state.journal.lock().logins
    }

    /// Number of dataset load commands issued
    pub fn dataset_loads(&self) -> usize {
        self.state
            .journal
            .lock()
            .commands
            .iter()
            .filter(|c| c.starts_with("load("))
            .count()
    }

    pub fn connections(&self) -> usize {
        self.state.journal.lock().connections
    }

    pub fn closed_connections(&self) -> usize {
        self.state.journal.lock().closed
    }

    pub fn removed_files(&self) -> Vec<String> {
        self.state.journal.lock().removed_files.clone()
    }

    /// Highest number of commands observed executing at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl EngineConnector for ScriptedEngine {
    fn connect(&self) -> EngineResult<Box<dyn EngineConnection>> {
        let requires_login = {
            let mut script = self.state.script.lock();
            if script.refuse_connections > 0 {
                script.refuse_connections -= 1;
                return Err(EngineError::connection(self.endpoint(), "connection refused"));
            }
            script.requires_login
        };
        self.state.journal.lock().connections += 1;
        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
            requires_login,
            closed: false,
        }))
    }

    fn endpoint(&self) -> String {
        "scripted://engine".to_string()
    }
}

struct ScriptedConnection {
    state: Arc<EngineState>,
    requires_login: bool,
    closed: bool,
}

impl ScriptedConnection {
    fn execute(&mut self, command: &str) -> EngineResult<EngineValue> {
        if self.closed {
            return Err(EngineError::Closed);
        }

        let in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.state.journal.lock().commands.push(command.to_string());

        let (latency, failed, response) = {
            let script = self.state.script.lock();
            let failed = script.failures.iter().any(|prefix| command.starts_with(prefix.as_str()));
            let response = script
                .responses
                .iter()
                .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, value)| value.clone());
            (script.latency, failed, response)
        };

        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if failed {
            return Err(EngineError::Command {
                status: SCRIPTED_FAILURE_STATUS,
            });
        }
        Ok(response.unwrap_or(EngineValue::Null))
    }
}

impl EngineConnection for ScriptedConnection {
    fn needs_login(&self) -> bool {
        self.requires_login
    }

    fn login(&mut self, _username: &str, _password: &str) -> EngineResult<()> {
        self.state.journal.lock().logins += 1;
        Ok(())
    }

    fn eval_void(&mut self, command: &str) -> EngineResult<()> {
        self.execute(command).map(|_| ())
    }

    fn eval(&mut self, command: &str) -> EngineResult<EngineValue> {
        self.execute(command)
    }

    fn read_file(&mut self, _name: &str) -> EngineResult<Vec<u8>> {
        Ok(self.state.script.lock().file_contents.clone())
    }

    fn remove_file(&mut self, name: &str) -> EngineResult<()> {
        self.state.journal.lock().removed_files.push(name.to_string());
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.journal.lock().closed += 1;
        }
        Ok(())
    }
}

pub fn session_settings() -> SessionSettings {
    SessionSettings {
        init_script: "/opt/analysis/init.R".to_string(),
        dataset_root: "/data".to_string(),
        username: "guest".to_string(),
        password: "guest".to_string(),
        trace_commands: true,
    }
}

/// Open a session on `engine` with [`session_settings`]
///
/// # Panics
///
/// Panics if the engine refuses the connection.
pub fn open_session(engine: &ScriptedEngine) -> ComputeSession {
    match ComputeSession::open(engine, session_settings(), "test-worker") {
        Ok(session) => session,
        Err(e) => panic!("scripted engine refused a session: {e}"),
    }
}

/// One routed reply
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedReply {
    Result(AnalysisResult, Option<ReplyAddress>),
    Failure(AnalysisFailure, Option<ReplyAddress>),
}

impl RoutedReply {
    pub fn request_id(&self) -> &RequestId {
        match self {
            RoutedReply::Result(result, _) => result.id(),
            RoutedReply::Failure(failure, _) => failure.request_id(),
        }
    }

    pub fn reply_to(&self) -> Option<&ReplyAddress> {
        match self {
            RoutedReply::Result(_, reply_to) | RoutedReply::Failure(_, reply_to) => reply_to.as_ref(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RoutedReply::Failure(..))
    }
}

/// Router that records replies instead of sending them
#[derive(Debug, Default)]
pub struct RecordingRouter {
    replies: Mutex<Vec<RoutedReply>>,
    arrived: Condvar,
}

impl RecordingRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replies(&self) -> Vec<RoutedReply> {
        self.replies.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.replies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn failures(&self) -> Vec<AnalysisFailure> {
        self.replies
            .lock()
            .iter()
            .filter_map(|r| match r {
                RoutedReply::Failure(failure, _) => Some(failure.clone()),
                RoutedReply::Result(..) => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<AnalysisResult> {
        self.replies
            .lock()
            .iter()
            .filter_map(|r| match r {
                RoutedReply::Result(result, _) => Some(result.clone()),
                RoutedReply::Failure(..) => None,
            })
            .collect()
    }

    /// Block until at least `count` replies arrived; false on timeout
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut replies = self.replies.lock();
        while replies.len() < count {
            if self.arrived.wait_until(&mut replies, deadline).timed_out() {
                return replies.len() >= count;
            }
        }
        true
    }

    fn record(&self, reply: RoutedReply) {
        self.replies.lock().push(reply);
        self.arrived.notify_all();
    }
}

impl ReplyRouter for RecordingRouter {
    fn send_result(&self, result: AnalysisResult, reply_to: Option<&ReplyAddress>) {
        self.record(RoutedReply::Result(result, reply_to.cloned()));
    }

    fn send_failure(&self, failure: AnalysisFailure, reply_to: Option<&ReplyAddress>) {
        self.record(RoutedReply::Failure(failure, reply_to.cloned()));
    }
}

fn group(name: &str, ids: &[&str]) -> SampleGroup {
    SampleGroup::new(name, ids.iter().copied())
}

pub fn class_comparison_request(
    session_id: &str,
    task_id: &str,
    group1: &[&str],
    baseline: &[&str],
) -> ClassComparisonRequest {
    ClassComparisonRequest {
        id: RequestId::new(session_id, task_id),
        data_file: Some(TEST_DATASET.to_string()),
        group1: Some(group("group1", group1)),
        baseline: Some(group("baseline", baseline)),
        method: StatisticalMethod::TTest,
        adjustment: MultipleComparisonAdjustment::None,
        fold_change_threshold: 2.0,
        p_value_threshold: 0.05,
    }
}

pub fn class_comparison_lookup_request(
    session_id: &str,
    task_id: &str,
    group1: &[&str],
    baseline: &[&str],
    reporters: &[&str],
) -> ClassComparisonLookupRequest {
    let comparison = class_comparison_request(session_id, task_id, group1, baseline);
    ClassComparisonLookupRequest {
        id: comparison.id,
        data_file: comparison.data_file,
        group1: comparison.group1,
        baseline: comparison.baseline,
        reporter_group: Some(group("reporters", reporters)),
        method: comparison.method,
        adjustment: comparison.adjustment,
        fold_change_threshold: comparison.fold_change_threshold,
        p_value_threshold: comparison.p_value_threshold,
    }
}

pub fn clustering_request(session_id: &str, task_id: &str, samples: &[&str]) -> HierarchicalClusteringRequest {
    HierarchicalClusteringRequest {
        id: RequestId::new(session_id, task_id),
        data_file: Some(TEST_DATASET.to_string()),
        sample_group: Some(group("samples", samples)),
        reporter_group: None,
        variance_filter: 0.0,
        cluster_by: Default::default(),
        distance: Default::default(),
        linkage: Default::default(),
    }
}

/// PCA request with both filters inactive
pub fn pca_request(session_id: &str, task_id: &str, samples: &[&str]) -> PrincipalComponentAnalysisRequest {
    PrincipalComponentAnalysisRequest {
        id: RequestId::new(session_id, task_id),
        data_file: Some(TEST_DATASET.to_string()),
        sample_group: Some(group("samples", samples)),
        reporter_group: None,
        variance_filter: -1.0,
        fold_change_filter: None,
    }
}

/// Correlation of reporters `r1` (EGFR) and `r2` (KRAS), both in the test dataset
pub fn correlation_request(session_id: &str, task_id: &str, samples: &[&str]) -> CorrelationRequest {
    CorrelationRequest {
        id: RequestId::new(session_id, task_id),
        sample_ids: samples.iter().map(|s| s.to_string()).collect(),
        reporter1: Some(ReporterSpec {
            reporter: "r1".to_string(),
            gene_symbol: Some("EGFR".to_string()),
            data_file: TEST_DATASET.to_string(),
        }),
        reporter2: Some(ReporterSpec {
            reporter: "r2".to_string(),
            gene_symbol: Some("KRAS".to_string()),
            data_file: TEST_DATASET.to_string(),
        }),
        method: CorrelationMethod::Pearson,
    }
}

/// F-test request; groups are named `group0`, `group1`, ...
pub fn ftest_request(session_id: &str, task_id: &str, groups: &[&[&str]]) -> FTestRequest {
    FTestRequest {
        id: RequestId::new(session_id, task_id),
        data_file: Some(TEST_DATASET.to_string()),
        groups: groups
            .iter()
            .enumerate()
            .map(|(i, ids)| group(&format!("group{i}"), ids))
            .collect(),
        adjustment: MultipleComparisonAdjustment::None,
        fold_change_threshold: 2.0,
        p_value_threshold: 0.05,
    }
}

/// GLM request with a `baseline` group and one `treated` comparison group
pub fn glm_request(
    session_id: &str,
    task_id: &str,
    baseline: &[&str],
    treated: &[&str],
) -> GeneralizedLinearModelRequest {
    GeneralizedLinearModelRequest {
        id: RequestId::new(session_id, task_id),
        data_file: Some(TEST_DATASET.to_string()),
        baseline: Some(group("baseline", baseline)),
        comparison_groups: vec![group("treated", treated)],
        covariates: Vec::new(),
        annotations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let engine = ScriptedEngine::new()
            .responding("x", EngineValue::Int(vec![1]))
            .responding("x <- 2", EngineValue::Int(vec![2]));
        let mut connection = engine.connect().unwrap();
        assert_eq!(connection.eval("x <- 2").unwrap(), EngineValue::Int(vec![2]));
        assert_eq!(connection.eval("x <- 3").unwrap(), EngineValue::Int(vec![1]));
        assert_eq!(connection.eval("y").unwrap(), EngineValue::Null);
    }

    #[test]
    fn test_refused_connections_then_success() {
        let engine = ScriptedEngine::new().refusing_connections(1);
        assert!(engine.connect().is_err());
        assert!(engine.connect().is_ok());
        assert_eq!(engine.connections(), 1);
    }

    #[test]
    fn test_recording_router_wait_times_out() {
        let router = RecordingRouter::new();
        assert!(!router.wait_for(1, Duration::from_millis(10)));
        router.send_failure(
            AnalysisFailure::new(
                "boom",
                crate::messaging::Request::FTest(ftest_request("s", "t", &[])),
            ),
            None,
        );
        assert!(router.wait_for(1, Duration::from_millis(10)));
        assert!(router.replies()[0].is_failure());
    }
}
