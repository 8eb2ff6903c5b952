//! Multi-group F-test with optional multiple-comparison adjustment.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::commands::group_command;
use super::{AnalysisError, CommandAnalysis};
use crate::constants::analysis::MIN_GROUP_SIZE;
use crate::engine::ComputeSession;
use crate::messaging::{
    AnalysisResult, FTestEntry, FTestRequest, FTestResult, MultipleComparisonAdjustment, Request,
    RequestId, RequestKind, SampleGroup,
};

pub struct FTest {
    request: FTestRequest,
}

impl FTest {
    pub fn new(request: FTestRequest) -> Self {
        Self { request }
    }
}

/// Ids that appear in more than one group, sorted
pub(crate) fn ids_shared_between_groups<'a>(groups: impl IntoIterator<Item = &'a SampleGroup>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut shared = BTreeSet::new();
    for group in groups {
        let unique: BTreeSet<&str> = group.ids.iter().map(String::as_str).collect();
        for id in unique {
            if !seen.insert(id) {
                shared.insert(id.to_string());
            }
        }
    }
    shared.into_iter().collect()
}

impl CommandAnalysis for FTest {
    const KIND: RequestKind = RequestKind::FTest;

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn to_request(&self) -> Request {
        Request::FTest(self.request.clone())
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let request = &self.request;

        if request.data_file.as_deref().map_or(true, str::is_empty) {
            return Err(AnalysisError::validation("Data file name is null or empty."));
        }
        if request.groups.len() < 2 {
            return Err(AnalysisError::validation("FTest requires at least 2 sample groups."));
        }
        if let Some(small) = request.groups.iter().find(|g| g.len() < MIN_GROUP_SIZE) {
            return Err(AnalysisError::validation(format!(
                "Group {} has less than {MIN_GROUP_SIZE} entries.",
                small.name
            )));
        }

        let shared = ids_shared_between_groups(&request.groups);
        if !shared.is_empty() {
            return Err(AnalysisError::validation(format!(
                "Can not perform FTest with overlapping groups. Overlapping ids={}",
                shared.join(",")
            )));
        }

        if request.adjustment == MultipleComparisonAdjustment::Unknown {
            return Err(AnalysisError::validation("Unrecognized multiple comparison adjustment type."));
        }
        Ok(())
    }

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError> {
        let request = &self.request;
        let Some(data_file) = request.data_file.as_deref() else {
            return Err(AnalysisError::internal("FTest request is incomplete."));
        };

        session.set_dataset(data_file)?;

        let mut matrices = Vec::with_capacity(request.groups.len());
        let mut pheno = Vec::with_capacity(request.groups.len());
        for (i, group) in request.groups.iter().enumerate() {
            let group_var = format!("GRP{i}");
            let matrix_var = format!("M{group_var}");
            session.eval_void(&group_command(&group_var, &group.ids))?;
            session.eval_void(&format!("{matrix_var} <- getSubmatrix.onegrp(dataMatrix,{group_var})"))?;
            matrices.push(matrix_var);
            pheno.push(format!("rep({i},{})", group.len()));
        }

        session.eval_void(&format!("compMat <- cbind({})", matrices.join(",")))?;
        session.eval_void(&format!("pheno <- as.factor(c({}))", pheno.join(",")))?;
        session.eval_void("ftResult <- Ftests(compMat,pheno)")?;

        let fc = request.fold_change_threshold;
        let p = request.p_value_threshold;
        let p_values_adjusted = match request.adjustment {
            MultipleComparisonAdjustment::Fdr | MultipleComparisonAdjustment::Fwer => {
                let adjust = if request.adjustment == MultipleComparisonAdjustment::Fdr {
                    "adjustP.Benjamini.Hochberg"
                } else {
                    "adjustP.Bonferroni"
                };
                session.eval_void(&format!("adjust.result <- {adjust}(ftResult)"))?;
                session.eval_void(&format!(
                    "ftResult  <- filterDiffExpressedGenes.FTest.adjustP(adjust.result,{fc},{p})"
                ))?;
                true
            }
            _ => {
                session.eval_void(&format!("ftResult  <- filterDiffExpressedGenes.FTest(ftResult,{fc},{p})"))?;
                false
            }
        };

        let mut group_means = Vec::with_capacity(request.groups.len());
        for column in 1..=request.groups.len() {
            group_means.push(session.eval(&format!("mean <- ftResult[,{column}]"))?.as_doubles()?);
        }
        let max_fold_change = session.eval("maxFC <- ftResult$mfc")?.as_doubles()?;
        let p_values = session.eval("pval <- ftResult$pval")?.as_doubles()?;
        let reporters = session.eval("ftLabels <- dimnames(ftResult)[[1]]")?.as_strings()?;

        let rows = max_fold_change.len();
        if p_values.len() != rows || reporters.len() != rows || group_means.iter().any(|m| m.len() != rows) {
            return Err(AnalysisError::internal("FTest result columns have inconsistent lengths."));
        }

        let mut entries: Vec<FTestEntry> = reporters
            .into_iter()
            .enumerate()
            .map(|(i, reporter_id)| FTestEntry {
                reporter_id,
                group_means: group_means.iter().map(|means| means[i]).collect(),
                max_fold_change: max_fold_change[i],
                p_value: p_values[i],
            })
            .collect();
        entries.sort_by(compare_entries);

        Ok(AnalysisResult::FTest(FTestResult {
            id: request.id.clone(),
            group_names: request.groups.iter().map(|g| g.name.clone()).collect(),
            p_values_adjusted,
            entries,
        }))
    }
}

/// Ascending p-value, then descending maximum fold change
pub fn compare_entries(a: &FTestEntry, b: &FTestEntry) -> Ordering {
    a.p_value
        .total_cmp(&b.p_value)
        .then_with(|| b.max_fold_change.total_cmp(&a.max_fold_change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineValue;
    use crate::tasks::{AnalysisTask, CommandTask};
    use crate::test_utils::{ftest_request, open_session, ScriptedEngine};

    fn run(engine: &ScriptedEngine, request: FTestRequest) -> CommandTask<FTest> {
        let mut task = CommandTask::new(FTest::new(request));
        task.context_mut().attach_session(open_session(engine));
        task.run();
        task
    }

    #[test]
    fn test_one_group_is_rejected() {
        let engine = ScriptedEngine::new();
        let task = run(&engine, ftest_request("s", "t", &[&["a", "b", "c"]]));
        assert_eq!(
            task.context().failure().unwrap().message,
            "FTest requires at least 2 sample groups."
        );
    }

    #[test]
    fn test_overlap_across_any_groups() {
        let engine = ScriptedEngine::new();
        let request = ftest_request("s", "t", &[&["a", "b", "c"], &["d", "e", "f"], &["g", "h", "a"]]);
        let task = run(&engine, request);
        assert_eq!(
            task.context().failure().unwrap().message,
            "Can not perform FTest with overlapping groups. Overlapping ids=a"
        );
        assert_eq!(engine.dataset_loads(), 0);
    }

    #[test]
    fn test_builds_comparison_matrix_and_sorts() {
        let engine = ScriptedEngine::new()
            .responding("mean <- ftResult[,1]", EngineValue::Double(vec![1.0, 2.0]))
            .responding("mean <- ftResult[,2]", EngineValue::Double(vec![3.0, 4.0]))
            .responding("maxFC <-", EngineValue::Double(vec![2.0, 5.0]))
            .responding("pval <-", EngineValue::Double(vec![0.02, 0.02]))
            .responding("ftLabels <-", EngineValue::Str(vec!["r1".into(), "r2".into()]));
        let request = ftest_request("s", "t", &[&["a", "b", "c"], &["d", "e", "f", "g"]]);
        let mut task = run(&engine, request);

        let Some(AnalysisResult::FTest(result)) = task.take_result() else {
            panic!("expected FTest result: {:?}", task.context().failure());
        };
        assert_eq!(result.entries[0].reporter_id, "r2");
        assert_eq!(result.entries[0].group_means, vec![2.0, 4.0]);
        assert_eq!(result.group_names, vec!["group0", "group1"]);

        let commands = engine.commands();
        assert!(commands.contains(&"compMat <- cbind(MGRP0,MGRP1)".to_string()));
        assert!(commands.contains(&"pheno <- as.factor(c(rep(0,3),rep(1,4)))".to_string()));
        assert!(commands.contains(&"ftResult  <- filterDiffExpressedGenes.FTest(ftResult,2,0.05)".to_string()));
    }

    #[test]
    fn test_shared_ids_helper() {
        let groups = vec![
            SampleGroup::new("a", ["x", "y"]),
            SampleGroup::new("b", ["y", "z"]),
            SampleGroup::new("c", ["z", "x"]),
        ];
        assert_eq!(ids_shared_between_groups(&groups), vec!["x", "y", "z"]);
    }
}
