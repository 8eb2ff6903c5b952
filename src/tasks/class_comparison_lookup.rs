//! Class comparison restricted to the reporters of one reporter group.
//!
//! The data matrix is first cut down to the requested reporters; the
//! two-group comparison, filtering and ordering are the same as for a plain
//! class comparison.

use super::class_comparison::{compare, validate_design, validate_groups};
use super::commands::group_command;
use super::{AnalysisError, CommandAnalysis};
use crate::engine::ComputeSession;
use crate::messaging::{
    AnalysisResult, ClassComparisonLookupRequest, ClassComparisonRequest, Request, RequestId, RequestKind,
};

const REPORTERS_VAR: &str = "reporterIds";

pub struct ClassComparisonLookup {
    request: ClassComparisonLookupRequest,
    comparison: ClassComparisonRequest,
}

impl ClassComparisonLookup {
    pub fn new(request: ClassComparisonLookupRequest) -> Self {
        let comparison = request.comparison();
        Self { request, comparison }
    }
}

impl CommandAnalysis for ClassComparisonLookup {
    const KIND: RequestKind = RequestKind::ClassComparisonLookup;

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn to_request(&self) -> Request {
        Request::ClassComparisonLookup(self.request.clone())
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let (group1, baseline) = validate_groups(&self.comparison)?;

        if self.request.reporter_group.as_ref().map_or(true, |g| g.is_empty()) {
            return Err(AnalysisError::validation("ReporterGroup is null or empty."));
        }

        validate_design(&self.comparison, group1, baseline)
    }

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError> {
        let (Some(data_file), Some(reporters)) =
            (self.request.data_file.as_deref(), &self.request.reporter_group)
        else {
            return Err(AnalysisError::internal("Class comparison lookup request is incomplete."));
        };

        session.set_dataset(data_file)?;
        session.eval_void(&group_command(REPORTERS_VAR, &reporters.ids))?;
        session.eval_void(&format!(
            "ccInputMatrix <- getSubmatrix.repNew(dataMatrix, {REPORTERS_VAR})"
        ))?;

        let single_reporter = match reporters.ids.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };
        compare(session, &self.comparison, "ccInputMatrix", single_reporter)
    }
}
