//! Principal component analysis over a filtered submatrix.

use super::commands::group_command;
use super::{AnalysisError, CommandAnalysis};
use crate::constants::analysis::{MIN_PCA_COMPONENTS, MIN_SAMPLES};
use crate::engine::ComputeSession;
use crate::messaging::{
    AnalysisResult, PcaPoint, PrincipalComponentAnalysisRequest, PrincipalComponentAnalysisResult,
    Request, RequestId, RequestKind,
};

pub struct PrincipalComponentAnalysis {
    request: PrincipalComponentAnalysisRequest,
}

impl PrincipalComponentAnalysis {
    pub fn new(request: PrincipalComponentAnalysisRequest) -> Self {
        Self { request }
    }
}

impl CommandAnalysis for PrincipalComponentAnalysis {
    const KIND: RequestKind = RequestKind::PrincipalComponentAnalysis;

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn to_request(&self) -> Request {
        Request::PrincipalComponentAnalysis(self.request.clone())
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let request = &self.request;

        if request.data_file.as_deref().map_or(true, str::is_empty) {
            return Err(AnalysisError::validation("Data file name is null or empty."));
        }
        if request.sample_group.as_ref().map_or(true, |g| g.len() < MIN_SAMPLES) {
            return Err(AnalysisError::validation("Not enough samples for PCA computation."));
        }
        if request.variance_filter < 0.0 && request.fold_change_filter.is_none() {
            return Err(AnalysisError::validation(
                "Both variance filter and fold change filter are not active",
            ));
        }
        Ok(())
    }

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError> {
        let request = &self.request;
        let (Some(data_file), Some(samples)) = (request.data_file.as_deref(), &request.sample_group) else {
            return Err(AnalysisError::internal("PCA request is incomplete."));
        };

        session.set_dataset(data_file)?;

        session.eval_void("pcaInputMatrix <- dataMatrix")?;
        session.eval_void(&group_command("sampleIds", &samples.ids))?;
        session.eval_void("pcaInputMatrix <- getSubmatrix.onegrp(pcaInputMatrix,sampleIds)")?;

        if let Some(reporters) = request.reporter_group.as_ref().filter(|g| !g.is_empty()) {
            session.eval_void(&group_command("reporterIds", &reporters.ids))?;
            session.eval_void("pcaInputMatrix <- getSubmatrix.rep(pcaInputMatrix,reporterIds)")?;
        }

        // A non-negative variance filter takes precedence over fold change.
        let compute = if request.variance_filter >= 0.0 {
            format!(
                "pcaResult <- computePCAwithVariance(pcaInputMatrix,{})",
                request.variance_filter
            )
        } else if let Some(fold_change) = request.fold_change_filter {
            format!("pcaResult <- computePCAwithFC(pcaInputMatrix,{fold_change})")
        } else {
            return Err(AnalysisError::validation(
                "Both variance filter and fold change filter are not active",
            ));
        };
        session.eval_void(&compute)?;

        let components = session.eval("length(pcaResult$x[1,])")?.as_int()?;
        if usize::try_from(components).map_or(true, |n| n < MIN_PCA_COMPONENTS) {
            return Err(AnalysisError::computation("PCA result has less than 3 components."));
        }

        let pc1 = session.eval("pcaMatrixX <- pcaResult$x[,1]")?.as_doubles()?;
        let pc2 = session.eval("pcaMatrixY <- pcaResult$x[,2]")?.as_doubles()?;
        let pc3 = session.eval("pcaMatrixZ <- pcaResult$x[,3]")?.as_doubles()?;
        let labels = session.eval("pcaLabels <- dimnames(pcaResult$x)[[1]]")?.as_strings()?;

        if pc1.len() != labels.len() || pc2.len() != labels.len() || pc3.len() != labels.len() {
            return Err(AnalysisError::internal("PCA component vectors have inconsistent lengths."));
        }

        let points = labels
            .into_iter()
            .enumerate()
            .map(|(i, sample_id)| PcaPoint {
                sample_id,
                pc1: pc1[i],
                pc2: pc2[i],
                pc3: pc3[i],
            })
            .collect();

        Ok(AnalysisResult::PrincipalComponentAnalysis(PrincipalComponentAnalysisResult {
            id: request.id.clone(),
            points,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineValue;
    use crate::tasks::{AnalysisTask, CommandTask};
    use crate::test_utils::{open_session, pca_request, ScriptedEngine};

    fn run(engine: &ScriptedEngine, request: PrincipalComponentAnalysisRequest) -> CommandTask<PrincipalComponentAnalysis> {
        let mut task = CommandTask::new(PrincipalComponentAnalysis::new(request));
        task.context_mut().attach_session(open_session(engine));
        task.run();
        task
    }

    fn three_components(engine: ScriptedEngine) -> ScriptedEngine {
        engine
            .responding("length(pcaResult$x[1,])", EngineValue::Int(vec![3]))
            .responding("pcaMatrixX <-", EngineValue::Double(vec![1.0, 2.0]))
            .responding("pcaMatrixY <-", EngineValue::Double(vec![3.0, 4.0]))
            .responding("pcaMatrixZ <-", EngineValue::Double(vec![5.0, 6.0]))
            .responding("pcaLabels <-", EngineValue::Str(vec!["a".into(), "b".into()]))
    }

    #[test]
    fn test_variance_filter_drives_computation() {
        let engine = three_components(ScriptedEngine::new());
        let mut request = pca_request("s", "t", &["a", "b"]);
        request.variance_filter = 0.7;
        let mut task = run(&engine, request);

        let Some(AnalysisResult::PrincipalComponentAnalysis(result)) = task.take_result() else {
            panic!("expected PCA result: {:?}", task.context().failure());
        };
        assert_eq!(result.points.len(), 2);
        assert_eq!(result.points[1].sample_id, "b");
        assert_eq!(result.points[1].pc3, 6.0);
        assert!(engine
            .commands()
            .contains(&"pcaResult <- computePCAwithVariance(pcaInputMatrix,0.7)".to_string()));
    }

    #[test]
    fn test_fold_change_used_when_variance_inactive() {
        let engine = three_components(ScriptedEngine::new());
        let mut request = pca_request("s", "t", &["a", "b"]);
        request.fold_change_filter = Some(2.0);
        run(&engine, request);
        assert!(engine
            .commands()
            .contains(&"pcaResult <- computePCAwithFC(pcaInputMatrix,2)".to_string()));
    }

    #[test]
    fn test_no_active_filter_fails_validation() {
        let engine = ScriptedEngine::new();
        let task = run(&engine, pca_request("s", "t", &["a", "b"]));
        assert_eq!(
            task.context().failure().unwrap().message,
            "Both variance filter and fold change filter are not active"
        );
    }

    #[test]
    fn test_two_components_fail() {
        let engine = ScriptedEngine::new().responding("length(pcaResult$x[1,])", EngineValue::Int(vec![2]));
        let mut request = pca_request("s", "t", &["a", "b"]);
        request.variance_filter = 0.0;
        let task = run(&engine, request);
        assert_eq!(
            task.context().failure().unwrap().message,
            "PCA result has less than 3 components."
        );
    }
}
