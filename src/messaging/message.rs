//! # Analysis Message Types
//!
//! Wire model for analysis requests, results and failures. Every request and
//! result carries the `(session_id, task_id)` pair that lets a caller correlate
//! a reply with the job it submitted.
//!
//! Payloads are JSON. Requests and results are tagged by `kind`; the single
//! outbound envelope [`Reply`] is tagged by `status`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{TransportError, TransportResult};
use crate::utils::serde::base64_bytes;

/// Correlation identity of one in-flight job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId {
    pub session_id: String,
    pub task_id: String,
}

impl RequestId {
    pub fn new(session_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.task_id)
    }
}

/// Destination a reply must be sent to, taken from the inbound message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyAddress(String);

impl ReplyAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request kind tag, used as the task registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    ClassComparison,
    ClassComparisonLookup,
    HierarchicalClustering,
    PrincipalComponentAnalysis,
    Correlation,
    FTest,
    GeneralizedLinearModel,
    Compound,
}

impl RequestKind {
    pub const ALL: [RequestKind; 8] = [
        RequestKind::ClassComparison,
        RequestKind::ClassComparisonLookup,
        RequestKind::HierarchicalClustering,
        RequestKind::PrincipalComponentAnalysis,
        RequestKind::Correlation,
        RequestKind::FTest,
        RequestKind::GeneralizedLinearModel,
        RequestKind::Compound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::ClassComparison => "class_comparison",
            RequestKind::ClassComparisonLookup => "class_comparison_lookup",
            RequestKind::HierarchicalClustering => "hierarchical_clustering",
            RequestKind::PrincipalComponentAnalysis => "principal_component_analysis",
            RequestKind::Correlation => "correlation",
            RequestKind::FTest => "f_test",
            RequestKind::GeneralizedLinearModel => "generalized_linear_model",
            RequestKind::Compound => "compound",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named list of sample identifiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleGroup {
    pub name: String,
    #[serde(default)]
    pub ids: Vec<String>,
}

impl SampleGroup {
    pub fn new<I, S>(name: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Named list of reporter (probe) identifiers
pub type ReporterGroup = SampleGroup;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticalMethod {
    #[default]
    TTest,
    Wilcoxon,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipleComparisonAdjustment {
    #[default]
    None,
    /// Benjamini-Hochberg false discovery rate
    Fdr,
    /// Bonferroni family-wise error rate
    Fwer,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBy {
    #[default]
    Samples,
    Genes,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMatrix {
    #[default]
    Correlation,
    Euclidean,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    #[default]
    Average,
    Complete,
    Single,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassComparisonRequest {
    pub id: RequestId,
    pub data_file: Option<String>,
    pub group1: Option<SampleGroup>,
    pub baseline: Option<SampleGroup>,
    #[serde(default)]
    pub method: StatisticalMethod,
    #[serde(default)]
    pub adjustment: MultipleComparisonAdjustment,
    pub fold_change_threshold: f64,
    pub p_value_threshold: f64,
}

/// Class comparison restricted to the reporters of one reporter group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassComparisonLookupRequest {
    pub id: RequestId,
    pub data_file: Option<String>,
    pub group1: Option<SampleGroup>,
    pub baseline: Option<SampleGroup>,
    #[serde(default)]
    pub reporter_group: Option<ReporterGroup>,
    #[serde(default)]
    pub method: StatisticalMethod,
    #[serde(default)]
    pub adjustment: MultipleComparisonAdjustment,
    pub fold_change_threshold: f64,
    pub p_value_threshold: f64,
}

impl ClassComparisonLookupRequest {
    /// The two-group comparison part of the request
    pub fn comparison(&self) -> ClassComparisonRequest {
        ClassComparisonRequest {
            id: self.id.clone(),
            data_file: self.data_file.clone(),
            group1: self.group1.clone(),
            baseline: self.baseline.clone(),
            method: self.method,
            adjustment: self.adjustment,
            fold_change_threshold: self.fold_change_threshold,
            p_value_threshold: self.p_value_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalClusteringRequest {
    pub id: RequestId,
    pub data_file: Option<String>,
    pub sample_group: Option<SampleGroup>,
    #[serde(default)]
    pub reporter_group: Option<ReporterGroup>,
    pub variance_filter: f64,
    #[serde(default)]
    pub cluster_by: ClusterBy,
    #[serde(default)]
    pub distance: DistanceMatrix,
    #[serde(default)]
    pub linkage: Linkage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalComponentAnalysisRequest {
    pub id: RequestId,
    pub data_file: Option<String>,
    pub sample_group: Option<SampleGroup>,
    #[serde(default)]
    pub reporter_group: Option<ReporterGroup>,
    /// Active when zero or greater
    #[serde(default = "inactive_filter")]
    pub variance_filter: f64,
    #[serde(default)]
    pub fold_change_filter: Option<f64>,
}

fn inactive_filter() -> f64 {
    -1.0
}

/// Reporter whose expression values form one correlation axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterSpec {
    pub reporter: String,
    #[serde(default)]
    pub gene_symbol: Option<String>,
    pub data_file: String,
}

impl ReporterSpec {
    /// Axis label as `symbol_reporter`
    pub fn axis_name(&self) -> String {
        format!(
            "{}_{}",
            self.gene_symbol.as_deref().unwrap_or("null"),
            self.reporter
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRequest {
    pub id: RequestId,
    #[serde(default)]
    pub sample_ids: Vec<String>,
    #[serde(default)]
    pub reporter1: Option<ReporterSpec>,
    #[serde(default)]
    pub reporter2: Option<ReporterSpec>,
    #[serde(default)]
    pub method: CorrelationMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FTestRequest {
    pub id: RequestId,
    pub data_file: Option<String>,
    #[serde(default)]
    pub groups: Vec<SampleGroup>,
    #[serde(default)]
    pub adjustment: MultipleComparisonAdjustment,
    pub fold_change_threshold: f64,
    pub p_value_threshold: f64,
}

/// Covariate values recorded for one patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientAnnotation {
    pub patient_id: String,
    #[serde(default)]
    pub covariates: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralizedLinearModelRequest {
    pub id: RequestId,
    pub data_file: Option<String>,
    pub baseline: Option<SampleGroup>,
    #[serde(default)]
    pub comparison_groups: Vec<SampleGroup>,
    #[serde(default)]
    pub covariates: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<PatientAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundRequest {
    pub id: RequestId,
    #[serde(default)]
    pub requests: Vec<Request>,
}

/// Inbound analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    ClassComparison(ClassComparisonRequest),
    ClassComparisonLookup(ClassComparisonLookupRequest),
    HierarchicalClustering(HierarchicalClusteringRequest),
    PrincipalComponentAnalysis(PrincipalComponentAnalysisRequest),
    Correlation(CorrelationRequest),
    FTest(FTestRequest),
    GeneralizedLinearModel(GeneralizedLinearModelRequest),
    Compound(CompoundRequest),
}

impl Request {
    pub fn id(&self) -> &RequestId {
        match self {
            Request::ClassComparison(r) => &r.id,
            Request::ClassComparisonLookup(r) => &r.id,
            Request::HierarchicalClustering(r) => &r.id,
            Request::PrincipalComponentAnalysis(r) => &r.id,
            Request::Correlation(r) => &r.id,
            Request::FTest(r) => &r.id,
            Request::GeneralizedLinearModel(r) => &r.id,
            Request::Compound(r) => &r.id,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::ClassComparison(_) => RequestKind::ClassComparison,
            Request::ClassComparisonLookup(_) => RequestKind::ClassComparisonLookup,
            Request::HierarchicalClustering(_) => RequestKind::HierarchicalClustering,
            Request::PrincipalComponentAnalysis(_) => RequestKind::PrincipalComponentAnalysis,
            Request::Correlation(_) => RequestKind::Correlation,
            Request::FTest(_) => RequestKind::FTest,
            Request::GeneralizedLinearModel(_) => RequestKind::GeneralizedLinearModel,
            Request::Compound(_) => RequestKind::Compound,
        }
    }

    pub fn from_bytes(payload: &[u8]) -> TransportResult<Self> {
        serde_json::from_slice(payload).map_err(|e| TransportError::deserialization(e.to_string()))
    }

    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TransportError::serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassComparisonEntry {
    pub reporter_id: String,
    pub mean_group1: f64,
    pub mean_baseline: f64,
    pub mean_difference: f64,
    pub absolute_fold_change: f64,
    pub p_value: f64,
    pub std_group1: f64,
    pub std_baseline: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassComparisonResult {
    pub id: RequestId,
    pub p_values_adjusted: bool,
    pub entries: Vec<ClassComparisonEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalClusteringResult {
    pub id: RequestId,
    pub clustered_sample_ids: Vec<String>,
    pub clustered_reporter_ids: Vec<String>,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaPoint {
    pub sample_id: String,
    pub pc1: f64,
    pub pc2: f64,
    pub pc3: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalComponentAnalysisResult {
    pub id: RequestId,
    pub points: Vec<PcaPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub id: RequestId,
    pub group1_name: Option<String>,
    pub group2_name: Option<String>,
    /// Present only when both axes were supplied
    pub correlation: Option<f64>,
    pub data_points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FTestEntry {
    pub reporter_id: String,
    pub group_means: Vec<f64>,
    pub max_fold_change: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FTestResult {
    pub id: RequestId,
    pub group_names: Vec<String>,
    pub p_values_adjusted: bool,
    pub entries: Vec<FTestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlmEntry {
    pub reporter_id: String,
    pub group_p_values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralizedLinearModelResult {
    pub id: RequestId,
    pub group_names: Vec<String>,
    pub entries: Vec<GlmEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundResult {
    pub id: RequestId,
    pub results: Vec<AnalysisResult>,
}

/// Completed analysis output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisResult {
    ClassComparison(ClassComparisonResult),
    HierarchicalClustering(HierarchicalClusteringResult),
    PrincipalComponentAnalysis(PrincipalComponentAnalysisResult),
    Correlation(CorrelationResult),
    FTest(FTestResult),
    GeneralizedLinearModel(GeneralizedLinearModelResult),
    Compound(CompoundResult),
}

impl AnalysisResult {
    pub fn id(&self) -> &RequestId {
        match self {
            AnalysisResult::ClassComparison(r) => &r.id,
            AnalysisResult::HierarchicalClustering(r) => &r.id,
            AnalysisResult::PrincipalComponentAnalysis(r) => &r.id,
            AnalysisResult::Correlation(r) => &r.id,
            AnalysisResult::FTest(r) => &r.id,
            AnalysisResult::GeneralizedLinearModel(r) => &r.id,
            AnalysisResult::Compound(r) => &r.id,
        }
    }
}

/// Structured failure carried back to the caller as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub message: String,
    pub failed_request: Request,
}

impl AnalysisFailure {
    pub fn new(message: impl Into<String>, failed_request: Request) -> Self {
        Self {
            message: message.into(),
            failed_request,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        self.failed_request.id()
    }
}

impl fmt::Display for AnalysisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (request {})", self.message, self.failed_request.id())
    }
}

/// Outbound envelope: exactly one per dispatched task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Reply {
    Result(AnalysisResult),
    Failure(AnalysisFailure),
}

impl Reply {
    pub fn request_id(&self) -> &RequestId {
        match self {
            Reply::Result(result) => result.id(),
            Reply::Failure(failure) => failure.request_id(),
        }
    }

    pub fn to_bytes(&self) -> TransportResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TransportError::serialization(e.to_string()))
    }

    pub fn from_bytes(payload: &[u8]) -> TransportResult<Self> {
        serde_json::from_slice(payload).map_err(|e| TransportError::deserialization(e.to_string()))
    }
}

/// Message as handed to a receiver by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// `None` when the transport delivered an empty payload
    pub body: Option<Vec<u8>>,
    pub reply_to: Option<ReplyAddress>,
    pub message_type: Option<String>,
}

impl InboundMessage {
    pub fn new(body: Vec<u8>, reply_to: Option<ReplyAddress>) -> Self {
        Self {
            body: Some(body),
            reply_to,
            message_type: None,
        }
    }
}

/// Message handed to a sender
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub message_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_decodes_from_tagged_json() {
        let json = br#"{
            "kind": "class_comparison",
            "id": {"session_id": "s1", "task_id": "t1"},
            "data_file": "brain.Rda",
            "group1": {"name": "tumor", "ids": ["a", "b", "c"]},
            "baseline": {"name": "normal", "ids": ["d", "e", "f"]},
            "method": "wilcoxon",
            "adjustment": "fdr",
            "fold_change_threshold": 2.0,
            "p_value_threshold": 0.05
        }"#;
        let request = Request::from_bytes(json).unwrap();
        assert_eq!(request.kind(), RequestKind::ClassComparison);
        assert_eq!(request.id(), &RequestId::new("s1", "t1"));
        match request {
            Request::ClassComparison(cc) => {
                assert_eq!(cc.method, StatisticalMethod::Wilcoxon);
                assert_eq!(cc.adjustment, MultipleComparisonAdjustment::Fdr);
                assert_eq!(cc.group1.map(|g| g.len()), Some(3));
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_unrecognized_enum_value_decodes_as_unknown() {
        let json = br#"{
            "kind": "hierarchical_clustering",
            "id": {"session_id": "s1", "task_id": "t2"},
            "data_file": "brain.Rda",
            "sample_group": {"name": "all", "ids": ["a", "b"]},
            "variance_filter": 0.5,
            "linkage": "ward"
        }"#;
        match Request::from_bytes(json).unwrap() {
            Request::HierarchicalClustering(hc) => {
                assert_eq!(hc.linkage, Linkage::Unknown);
                assert_eq!(hc.cluster_by, ClusterBy::Samples);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_fails_to_decode() {
        let json = br#"{"kind": "survival", "id": {"session_id": "s", "task_id": "t"}}"#;
        assert!(matches!(
            Request::from_bytes(json),
            Err(TransportError::MessageDeserialization { .. })
        ));
    }

    #[test]
    fn test_kind_tags_match_serde_names() {
        for kind in RequestKind::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, serde_json::Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn test_failure_reply_envelope_shape() {
        let request = Request::Compound(CompoundRequest {
            id: RequestId::new("s9", "t9"),
            requests: vec![],
        });
        let reply = Reply::Failure(AnalysisFailure::new("boom", request));
        let value: serde_json::Value = serde_json::from_slice(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["body"]["message"], "boom");
        assert_eq!(value["body"]["failed_request"]["kind"], "compound");
        assert_eq!(reply.request_id(), &RequestId::new("s9", "t9"));
    }

    #[test]
    fn test_pca_filter_defaults_to_inactive() {
        let json = br#"{
            "kind": "principal_component_analysis",
            "id": {"session_id": "s", "task_id": "t"},
            "data_file": "d.Rda",
            "sample_group": {"name": "g", "ids": ["a", "b", "c"]}
        }"#;
        match Request::from_bytes(json).unwrap() {
            Request::PrincipalComponentAnalysis(pca) => {
                assert!(pca.variance_filter < 0.0);
                assert_eq!(pca.fold_change_filter, None);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }
}
