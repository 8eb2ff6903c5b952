//! Correlation between the expression values of two reporters, each of which
//! may live in its own dataset.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::commands::{group_command, numeric_command, quoted};
use super::{AnalysisError, CommandAnalysis};
use crate::engine::ComputeSession;
use crate::messaging::{
    AnalysisResult, CorrelationMethod, CorrelationRequest, CorrelationResult, DataPoint, ReporterSpec,
    Request, RequestId, RequestKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

pub struct Correlation {
    request: CorrelationRequest,
}

impl Correlation {
    pub fn new(request: CorrelationRequest) -> Self {
        Self { request }
    }

    /// Fill one axis of `points` with the reporter's values across the samples
    ///
    /// The X axis creates points; the Y axis only fills points the X axis
    /// already created.
    fn collect_axis(
        &self,
        session: &mut ComputeSession,
        reporter: &ReporterSpec,
        axis: Axis,
        points: &mut BTreeMap<String, DataPoint>,
    ) -> Result<(), AnalysisError> {
        session.set_dataset(&reporter.data_file)?;
        session.eval_void(&group_command("sampleIds", &self.request.sample_ids))?;
        session.eval_void("SM <- getSubmatrix.onegrp(dataMatrix, sampleIds)")?;

        let values = session
            .eval(&format!("RM <- getSubmatrix.rep(SM,{})", quoted(&reporter.reporter)))?
            .as_doubles()?;
        let labels = session.eval("RMlabels <- dimnames(RM)[[1]]")?.as_strings()?;

        if labels.is_empty() {
            return Err(AnalysisError::computation(format!(
                "Reporter {} not found in data file={}.",
                reporter.reporter, reporter.data_file
            )));
        }
        if labels.len() != values.len() {
            return Err(AnalysisError::internal("Reporter values and labels have inconsistent lengths."));
        }

        for (id, value) in labels.into_iter().zip(values) {
            match axis {
                Axis::X => {
                    points
                        .entry(id.clone())
                        .or_insert_with(|| DataPoint {
                            id,
                            x: None,
                            y: None,
                        })
                        .x = Some(value);
                }
                Axis::Y => match points.get_mut(&id) {
                    Some(point) => point.y = Some(value),
                    None => warn!(
                        request = %self.request.id,
                        sample = %id,
                        reporter = %reporter.reporter,
                        "⚠️ TASK: Sample missing from first reporter; point skipped"
                    ),
                },
            }
        }

        debug!(request = %self.request.id, reporter = %reporter.reporter, points = points.len(), "TASK: Collected reporter values");
        Ok(())
    }
}

impl CommandAnalysis for Correlation {
    const KIND: RequestKind = RequestKind::Correlation;

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn to_request(&self) -> Request {
        Request::Correlation(self.request.clone())
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let request = &self.request;

        if request.sample_ids.is_empty() {
            return Err(AnalysisError::validation("Sample ids are null or empty."));
        }
        if request.reporter1.is_none() && request.reporter2.is_none() {
            return Err(AnalysisError::validation("No reporter specified for correlation."));
        }
        for reporter in [&request.reporter1, &request.reporter2].into_iter().flatten() {
            if reporter.reporter.is_empty() || reporter.data_file.is_empty() {
                return Err(AnalysisError::validation(
                    "Reporter name and data file must both be specified.",
                ));
            }
        }
        if request.method == CorrelationMethod::Unknown {
            return Err(AnalysisError::validation("Unrecognized correlation type."));
        }
        Ok(())
    }

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError> {
        let request = &self.request;
        let mut points = BTreeMap::new();
        let mut result = CorrelationResult {
            id: request.id.clone(),
            group1_name: None,
            group2_name: None,
            correlation: None,
            data_points: Vec::new(),
        };

        match (&request.reporter1, &request.reporter2) {
            (Some(first), Some(second)) => {
                result.group1_name = Some(first.axis_name());
                result.group2_name = Some(second.axis_name());
                self.collect_axis(session, first, Axis::X, &mut points)?;
                self.collect_axis(session, second, Axis::Y, &mut points)?;

                let (v1, v2): (Vec<f64>, Vec<f64>) = points
                    .values()
                    .filter_map(|p| Some((p.x?, p.y?)))
                    .unzip();
                session.eval_void(&numeric_command("v1", &v1))?;
                session.eval_void(&numeric_command("v2", &v2))?;

                let command = match request.method {
                    CorrelationMethod::Spearman => "r <- correlation(v1,v2, \"spearman\")",
                    _ => "r <- correlation(v1,v2,\"pearson\")",
                };
                result.correlation = Some(session.eval(command)?.as_double()?);
            }
            (Some(only), None) | (None, Some(only)) => {
                result.group1_name = Some(only.axis_name());
                self.collect_axis(session, only, Axis::X, &mut points)?;
            }
            (None, None) => {
                return Err(AnalysisError::validation("No reporter specified for correlation."));
            }
        }

        result.data_points = points.into_values().collect();
        Ok(AnalysisResult::Correlation(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineValue;
    use crate::tasks::{AnalysisTask, CommandTask};
    use crate::test_utils::{correlation_request, open_session, ScriptedEngine};

    fn run(engine: &ScriptedEngine, request: CorrelationRequest) -> CommandTask<Correlation> {
        let mut task = CommandTask::new(Correlation::new(request));
        task.context_mut().attach_session(open_session(engine));
        task.run();
        task
    }

    fn scripted(engine: ScriptedEngine) -> ScriptedEngine {
        engine
            .responding("RM <- getSubmatrix.rep(SM,\"r1\")", EngineValue::Double(vec![1.0, 2.0, 3.0]))
            .responding("RM <- getSubmatrix.rep(SM,\"r2\")", EngineValue::Double(vec![6.0, 4.0, 5.0]))
            .responding(
                "RMlabels <-",
                EngineValue::Str(vec!["s3".into(), "s1".into(), "s2".into()]),
            )
            .responding("r <- correlation", EngineValue::Double(vec![0.87]))
    }

    #[test]
    fn test_two_reporters_in_different_datasets() {
        let engine = scripted(ScriptedEngine::new());
        let mut request = correlation_request("s", "t", &["s1", "s2", "s3"]);
        if let Some(second) = request.reporter2.as_mut() {
            second.data_file = "other.Rda".to_string();
        }
        let mut task = run(&engine, request);

        let Some(AnalysisResult::Correlation(result)) = task.take_result() else {
            panic!("expected correlation result: {:?}", task.context().failure());
        };
        assert_eq!(result.correlation, Some(0.87));
        assert_eq!(result.group1_name.as_deref(), Some("EGFR_r1"));
        let ids: Vec<&str> = result.data_points.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(result.data_points[0].x, Some(2.0));
        assert_eq!(engine.dataset_loads(), 2);
        assert!(engine
            .commands()
            .contains(&"r <- correlation(v1,v2,\"pearson\")".to_string()));
    }

    #[test]
    fn test_single_reporter_fills_x_only() {
        let engine = scripted(ScriptedEngine::new());
        let mut request = correlation_request("s", "t", &["s1", "s2", "s3"]);
        request.reporter2 = None;
        let mut task = run(&engine, request);

        let Some(AnalysisResult::Correlation(result)) = task.take_result() else {
            panic!("expected correlation result");
        };
        assert_eq!(result.correlation, None);
        assert!(result.data_points.iter().all(|p| p.x.is_some() && p.y.is_none()));
        assert!(!engine.commands().iter().any(|c| c.starts_with("r <-")));
    }

    #[test]
    fn test_missing_reporter_is_named() {
        let engine = ScriptedEngine::new();
        let task = run(&engine, correlation_request("s", "t", &["s1"]));
        assert_eq!(
            task.context().failure().unwrap().message,
            "Reporter r1 not found in data file=brain.Rda."
        );
    }

    #[test]
    fn test_no_reporters_fails_validation() {
        let engine = ScriptedEngine::new();
        let mut request = correlation_request("s", "t", &["s1"]);
        request.reporter1 = None;
        request.reporter2 = None;
        let task = run(&engine, request);
        assert_eq!(
            task.context().failure().unwrap().message,
            "No reporter specified for correlation."
        );
        assert_eq!(engine.dataset_loads(), 0);
    }
}
