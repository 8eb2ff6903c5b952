//! Hierarchical clustering of samples or genes, with a rendered dendrogram.

use super::commands::{dendrogram_width_inches, group_command, quoted, render_plot};
use super::{AnalysisError, CommandAnalysis};
use crate::constants::analysis::{MAX_REPORTERS_FOR_GENE_CLUSTERING, MIN_SAMPLES};
use crate::constants::image::DENDROGRAM_HEIGHT_INCHES;
use crate::engine::ComputeSession;
use crate::messaging::{
    AnalysisResult, ClusterBy, DistanceMatrix, HierarchicalClusteringRequest,
    HierarchicalClusteringResult, Linkage, Request, RequestId, RequestKind,
};

pub struct HierarchicalClustering {
    request: HierarchicalClusteringRequest,
}

impl HierarchicalClustering {
    pub fn new(request: HierarchicalClusteringRequest) -> Self {
        Self { request }
    }

    fn distance_name(&self) -> &'static str {
        match self.request.distance {
            DistanceMatrix::Euclidean => "Euclidean",
            _ => "Correlation",
        }
    }

    fn linkage_name(&self) -> &'static str {
        match self.request.linkage {
            Linkage::Complete => "complete",
            Linkage::Single => "single",
            _ => "average",
        }
    }
}

impl CommandAnalysis for HierarchicalClustering {
    const KIND: RequestKind = RequestKind::HierarchicalClustering;

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn to_request(&self) -> Request {
        Request::HierarchicalClustering(self.request.clone())
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let request = &self.request;

        if request.data_file.as_deref().map_or(true, str::is_empty) {
            return Err(AnalysisError::validation("Data file name is null or empty."));
        }

        if request.sample_group.as_ref().map_or(true, |g| g.len() < MIN_SAMPLES) {
            return Err(AnalysisError::validation("Not enough samples to cluster."));
        }

        if request.cluster_by == ClusterBy::Unknown {
            return Err(AnalysisError::validation("Unrecognized cluster type."));
        }
        if request.distance == DistanceMatrix::Unknown {
            return Err(AnalysisError::validation("Unrecognized distance matrix type."));
        }
        if request.linkage == Linkage::Unknown {
            return Err(AnalysisError::validation("Unrecognized linkage method."));
        }

        Ok(())
    }

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError> {
        let request = &self.request;
        let (Some(data_file), Some(samples)) = (request.data_file.as_deref(), &request.sample_group) else {
            return Err(AnalysisError::internal("Hierarchical clustering request is incomplete."));
        };

        session.set_dataset(data_file)?;

        session.eval_void("hcInputMatrix <- dataMatrix")?;
        if request.variance_filter > 0.0 {
            session.eval_void(&format!(
                "hcInputMatrix <- GeneFilterWithVariance(hcInputMatrix,{})",
                request.variance_filter
            ))?;
        }

        session.eval_void(&group_command("sampleIds", &samples.ids))?;
        session.eval_void("hcInputMatrix <- getSubmatrix.onegrp(hcInputMatrix,sampleIds)")?;

        if let Some(reporters) = request.reporter_group.as_ref().filter(|g| !g.is_empty()) {
            session.eval_void(&group_command("reporterIds", &reporters.ids))?;
            session.eval_void("hcInputMatrix <- getSubmatrix.rep(hcInputMatrix,reporterIds)")?;
        }

        let distance = quoted(self.distance_name());
        let linkage = quoted(self.linkage_name());

        let label_index = match request.cluster_by {
            ClusterBy::Genes => {
                let reporter_count = session.eval("dim(hcInputMatrix)[1]")?.as_int()?;
                if usize::try_from(reporter_count).map_or(true, |n| n > MAX_REPORTERS_FOR_GENE_CLUSTERING) {
                    return Err(AnalysisError::computation(format!(
                        "Too many reporters to cluster , try increasing the variance filter value, attempted to use numReporters={reporter_count}"
                    )));
                }
                session.eval_void(&format!(
                    "hcResult <- mygenecluster(hcInputMatrix, {distance}, {linkage})"
                ))?;
                1
            }
            _ => {
                session.eval_void(&format!(
                    "hcResult <- mysamplecluster(hcInputMatrix, {distance}, {linkage})"
                ))?;
                2
            }
        };

        let labels = session
            .eval(&format!("clusterLabels <- dimnames(hcInputMatrix)[[{label_index}]][hcResult$order]"))?
            .as_strings()?;

        let width = dendrogram_width_inches(labels.len());
        let image = render_plot(
            session,
            &request.id,
            "plot(hcResult, labels = clusterLabels, hang = -1)",
            DENDROGRAM_HEIGHT_INCHES,
            width,
        )?;

        let (clustered_sample_ids, clustered_reporter_ids) = match request.cluster_by {
            ClusterBy::Genes => (Vec::new(), labels),
            _ => (labels, Vec::new()),
        };

        Ok(AnalysisResult::HierarchicalClustering(HierarchicalClusteringResult {
            id: request.id.clone(),
            clustered_sample_ids,
            clustered_reporter_ids,
            image,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineValue;
    use crate::tasks::{AnalysisTask, CommandTask};
    use crate::test_utils::{clustering_request, open_session, ScriptedEngine};

    fn run(engine: &ScriptedEngine, request: HierarchicalClusteringRequest) -> CommandTask<HierarchicalClustering> {
        let mut task = CommandTask::new(HierarchicalClustering::new(request));
        task.context_mut().attach_session(open_session(engine));
        task.run();
        task
    }

    #[test]
    fn test_single_sample_is_rejected() {
        let engine = ScriptedEngine::new();
        let task = run(&engine, clustering_request("s", "t", &["only"]));
        assert_eq!(
            task.context().failure().unwrap().message,
            "Not enough samples to cluster."
        );
        assert_eq!(engine.dataset_loads(), 0);
    }

    #[test]
    fn test_sample_clustering_returns_labels_and_image() {
        let engine = ScriptedEngine::new()
            .responding(
                "clusterLabels <-",
                EngineValue::Str(vec!["b".into(), "a".into(), "c".into()]),
            )
            .with_file_contents(vec![0x89, b'P', b'N', b'G']);
        let mut task = run(&engine, clustering_request("s", "t", &["a", "b", "c"]));

        let Some(AnalysisResult::HierarchicalClustering(result)) = task.take_result() else {
            panic!("expected clustering result: {:?}", task.context().failure());
        };
        assert_eq!(result.clustered_sample_ids, vec!["b", "a", "c"]);
        assert!(result.clustered_reporter_ids.is_empty());
        assert_eq!(result.image, vec![0x89, b'P', b'N', b'G']);

        let commands = engine.commands();
        assert!(commands
            .iter()
            .any(|c| c == "hcResult <- mysamplecluster(hcInputMatrix, \"Correlation\", \"average\")"));
        assert!(commands
            .iter()
            .any(|c| c.contains("height = 10, width = 3, res = 72")));
    }

    #[test]
    fn test_gene_clustering_rejects_large_reporter_sets() {
        let engine = ScriptedEngine::new().responding("dim(hcInputMatrix)[1]", EngineValue::Int(vec![3001]));
        let mut request = clustering_request("s", "t", &["a", "b", "c"]);
        request.cluster_by = ClusterBy::Genes;
        let task = run(&engine, request);

        assert_eq!(
            task.context().failure().unwrap().message,
            "Too many reporters to cluster , try increasing the variance filter value, attempted to use numReporters=3001"
        );
        assert!(!engine.commands().iter().any(|c| c.contains("mygenecluster")));
    }

    #[test]
    fn test_gene_clustering_fills_reporter_ids() {
        let engine = ScriptedEngine::new()
            .responding("dim(hcInputMatrix)[1]", EngineValue::Int(vec![2]))
            .responding("clusterLabels <-", EngineValue::Str(vec!["r2".into(), "r1".into()]));
        let mut request = clustering_request("s", "t", &["a", "b", "c"]);
        request.cluster_by = ClusterBy::Genes;
        request.linkage = Linkage::Complete;
        request.distance = DistanceMatrix::Euclidean;
        request.variance_filter = 0.7;
        let mut task = run(&engine, request);

        let Some(AnalysisResult::HierarchicalClustering(result)) = task.take_result() else {
            panic!("expected clustering result");
        };
        assert_eq!(result.clustered_reporter_ids, vec!["r2", "r1"]);
        let commands = engine.commands();
        assert!(commands.contains(&"hcInputMatrix <- GeneFilterWithVariance(hcInputMatrix,0.7)".to_string()));
        assert!(commands.contains(&"hcResult <- mygenecluster(hcInputMatrix, \"Euclidean\", \"complete\")".to_string()));
    }
}
