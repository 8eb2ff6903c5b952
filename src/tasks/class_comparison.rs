//! Two-group class comparison (t-test or Wilcoxon) with optional
//! multiple-comparison adjustment.

use std::cmp::Ordering;

use super::commands::{group_command, overlapping_ids};
use super::{AnalysisError, CommandAnalysis};
use crate::constants::analysis::MIN_GROUP_SIZE;
use crate::engine::ComputeSession;
use crate::messaging::{
    AnalysisResult, ClassComparisonEntry, ClassComparisonRequest, ClassComparisonResult,
    MultipleComparisonAdjustment, Request, RequestId, RequestKind, SampleGroup, StatisticalMethod,
};

const GROUP1_VAR: &str = "GRP1IDS";
const BASELINE_VAR: &str = "BLGRPIDS";

pub struct ClassComparison {
    request: ClassComparisonRequest,
}

impl ClassComparison {
    pub fn new(request: ClassComparisonRequest) -> Self {
        Self { request }
    }
}

impl CommandAnalysis for ClassComparison {
    const KIND: RequestKind = RequestKind::ClassComparison;

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn to_request(&self) -> Request {
        Request::ClassComparison(self.request.clone())
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let (group1, baseline) = validate_groups(&self.request)?;
        validate_design(&self.request, group1, baseline)
    }

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError> {
        let Some(data_file) = self.request.data_file.as_deref() else {
            return Err(AnalysisError::internal("Class comparison request is incomplete."));
        };
        session.set_dataset(data_file)?;
        compare(session, &self.request, "dataMatrix", None)
    }
}

/// Data file and group size checks
pub(super) fn validate_groups(
    request: &ClassComparisonRequest,
) -> Result<(&SampleGroup, &SampleGroup), AnalysisError> {
    if request.data_file.as_deref().map_or(true, str::is_empty) {
        return Err(AnalysisError::validation("Data file name is null or empty."));
    }

    let group1 = match &request.group1 {
        Some(group) if group.len() >= MIN_GROUP_SIZE => group,
        _ => {
            return Err(AnalysisError::validation(format!(
                "Group1 is null or has less than {MIN_GROUP_SIZE} entries."
            )))
        }
    };

    let baseline = match &request.baseline {
        Some(group) if group.len() >= MIN_GROUP_SIZE => group,
        _ => {
            return Err(AnalysisError::validation(format!(
                "BaselineGroup is null or has less than {MIN_GROUP_SIZE} entries."
            )))
        }
    };

    Ok((group1, baseline))
}

/// Group overlap, method and adjustment checks
pub(super) fn validate_design(
    request: &ClassComparisonRequest,
    group1: &SampleGroup,
    baseline: &SampleGroup,
) -> Result<(), AnalysisError> {
    let overlap = overlapping_ids(&group1.ids, &baseline.ids);
    if !overlap.is_empty() {
        return Err(AnalysisError::validation(format!(
            "Can not perform class comparison with overlapping groups. Overlapping ids={}",
            overlap.join(",")
        )));
    }

    if request.method == StatisticalMethod::Unknown {
        return Err(AnalysisError::validation("Unrecognized statistical method."));
    }

    if request.adjustment == MultipleComparisonAdjustment::Unknown {
        return Err(AnalysisError::validation("Unrecognized multiple comparison adjustment type."));
    }

    Ok(())
}

/// Two-group comparison over the engine matrix named `source`
///
/// The dataset must already be loaded. With `single_reporter` set the result
/// has one row whose label the engine drops, so that id is used instead.
pub(super) fn compare(
    session: &mut ComputeSession,
    request: &ClassComparisonRequest,
    source: &str,
    single_reporter: Option<&str>,
) -> Result<AnalysisResult, AnalysisError> {
    let (Some(group1), Some(baseline)) = (&request.group1, &request.baseline) else {
        return Err(AnalysisError::internal("Class comparison request is incomplete."));
    };

    session.eval_void(&group_command(GROUP1_VAR, &group1.ids))?;
    session.eval_void(&group_command(BASELINE_VAR, &baseline.ids))?;
    session.eval_void(&format!(
        "ccInputMatrix <- getSubmatrix.twogrps({source},{GROUP1_VAR},{BASELINE_VAR})"
    ))?;

    let matched = session.eval("dim(ccInputMatrix)[2]")?.as_int()?;
    let expected = group1.len() + baseline.len();
    if usize::try_from(matched).ok() != Some(expected) {
        return Err(AnalysisError::validation(
            "Some sample ids did not match R data file for class comparison request.",
        ));
    }

    let test = match request.method {
        StatisticalMethod::Wilcoxon => "mywilcox",
        _ => "myttest",
    };
    session.eval_void(&format!(
        "ccResult <- {test}(ccInputMatrix, {},{})",
        group1.len(),
        baseline.len()
    ))?;

    let fc = request.fold_change_threshold;
    let p = request.p_value_threshold;
    let p_values_adjusted = match request.adjustment {
        MultipleComparisonAdjustment::Fdr | MultipleComparisonAdjustment::Fwer => {
            let adjust = if request.adjustment == MultipleComparisonAdjustment::Fdr {
                "adjustP.Benjamini.Hochberg"
            } else {
                "adjustP.Bonferroni"
            };
            session.eval_void(&format!("adjust.result <- {adjust}(ccResult)"))?;
            session.eval_void(&format!(
                "ccResult  <- mydiferentiallygenes.adjustP(adjust.result,{fc},{p})"
            ))?;
            true
        }
        _ => {
            session.eval_void(&format!("ccResult  <- mydiferentiallygenes(ccResult,{fc},{p})"))?;
            false
        }
    };

    let mean_group1 = session.eval("mean1 <- ccResult[,1]")?.as_doubles()?;
    let mean_baseline = session.eval("meanBaseline <- ccResult[,2]")?.as_doubles()?;
    let mean_difference = session.eval("meanDif <- ccResult[,3]")?.as_doubles()?;
    let fold_change = session.eval("fc <- ccResult[,4]")?.as_doubles()?;
    let p_values = session.eval("pva <- ccResult[,5]")?.as_doubles()?;
    let std_group1 = session.eval("stdG1 <- ccResult$std1")?.as_doubles()?;
    let std_baseline = session.eval("stdBL <- ccResult$std2")?.as_doubles()?;
    let reporters = match single_reporter {
        Some(reporter) => vec![reporter.to_string(); mean_group1.len()],
        None => session.eval("ccLabels <- dimnames(ccResult)[[1]]")?.as_strings()?,
    };

    let rows = mean_group1.len();
    let columns = [
        &mean_baseline,
        &mean_difference,
        &fold_change,
        &p_values,
        &std_group1,
        &std_baseline,
    ];
    if reporters.len() != rows || columns.iter().any(|c| c.len() != rows) {
        return Err(AnalysisError::internal(
            "Class comparison result columns have inconsistent lengths.",
        ));
    }

    let mut entries: Vec<ClassComparisonEntry> = (0..rows)
        .map(|i| ClassComparisonEntry {
            reporter_id: reporters[i].clone(),
            mean_group1: mean_group1[i],
            mean_baseline: mean_baseline[i],
            mean_difference: mean_difference[i],
            absolute_fold_change: fold_change[i],
            p_value: p_values[i],
            std_group1: std_group1[i],
            std_baseline: std_baseline[i],
        })
        .collect();
    entries.sort_by(compare_entries);

    Ok(AnalysisResult::ClassComparison(ClassComparisonResult {
        id: request.id.clone(),
        p_values_adjusted,
        entries,
    }))
}

/// Ascending p-value, then descending absolute fold change
pub fn compare_entries(a: &ClassComparisonEntry, b: &ClassComparisonEntry) -> Ordering {
    a.p_value
        .total_cmp(&b.p_value)
        .then_with(|| b.absolute_fold_change.abs().total_cmp(&a.absolute_fold_change.abs()))
}
