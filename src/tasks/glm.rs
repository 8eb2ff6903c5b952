//! Generalized linear model across a baseline and comparison groups, with
//! optional per-patient covariates.

use std::collections::HashMap;

use super::commands::quoted;
use super::ftest::ids_shared_between_groups;
use super::{AnalysisError, CommandAnalysis};
use crate::constants::analysis::MIN_GLM_GROUP_SIZE;
use crate::engine::ComputeSession;
use crate::messaging::{
    AnalysisResult, GeneralizedLinearModelRequest, GeneralizedLinearModelResult, GlmEntry, Request,
    RequestId, RequestKind, SampleGroup,
};

const PATIENTS_VAR: &str = "GLMPATIENTS";
const GROUPS_VAR: &str = "GLMGROUPS";
const MATRIX_VAR: &str = "GLMMATRIX";

pub struct GeneralizedLinearModel {
    request: GeneralizedLinearModelRequest,
}

impl GeneralizedLinearModel {
    pub fn new(request: GeneralizedLinearModelRequest) -> Self {
        Self { request }
    }

    /// Baseline first, then the comparison groups in request order
    fn groups(&self) -> impl Iterator<Item = &SampleGroup> {
        self.request.baseline.iter().chain(self.request.comparison_groups.iter())
    }

    fn patient_ids(&self) -> impl Iterator<Item = &String> {
        self.groups().flat_map(|g| g.ids.iter())
    }

    /// Covariate values per patient, in requested covariate order
    fn covariate_rows(&self) -> Result<Vec<(String, Vec<String>)>, AnalysisError> {
        let annotations: HashMap<&str, HashMap<&str, &str>> = self
            .request
            .annotations
            .iter()
            .map(|a| {
                let values = a.covariates.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                (a.patient_id.as_str(), values)
            })
            .collect();

        self.patient_ids()
            .map(|patient| -> Result<(String, Vec<String>), AnalysisError> {
                let values = annotations.get(patient.as_str());
                let row = self
                    .request
                    .covariates
                    .iter()
                    .map(|covariate| {
                        values
                            .and_then(|v| v.get(covariate.as_str()))
                            .map(|v| v.to_string())
                            .ok_or_else(|| {
                                AnalysisError::validation(format!(
                                    "Patient {patient} is missing covariate {covariate}."
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((patient.clone(), row))
            })
            .collect()
    }
}

fn string_vector<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values.into_iter().map(quoted).collect::<Vec<_>>().join(",")
}

impl CommandAnalysis for GeneralizedLinearModel {
    const KIND: RequestKind = RequestKind::GeneralizedLinearModel;

    fn request_id(&self) -> &RequestId {
        &self.request.id
    }

    fn to_request(&self) -> Request {
        Request::GeneralizedLinearModel(self.request.clone())
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let request = &self.request;

        if request.data_file.as_deref().map_or(true, str::is_empty) {
            return Err(AnalysisError::validation("Data file name is null or empty."));
        }

        let invalid = request.baseline.is_none()
            || request.comparison_groups.is_empty()
            || self.groups().any(|g| g.len() < MIN_GLM_GROUP_SIZE)
            || !ids_shared_between_groups(self.groups()).is_empty();
        if invalid {
            return Err(AnalysisError::validation(format!(
                "One or more groups have overlapping members or contain less than {MIN_GLM_GROUP_SIZE} entries."
            )));
        }

        if !request.covariates.is_empty() {
            self.covariate_rows()?;
        }
        Ok(())
    }

    fn execute(&self, session: &mut ComputeSession) -> Result<AnalysisResult, AnalysisError> {
        let request = &self.request;
        let (Some(data_file), Some(baseline)) = (request.data_file.as_deref(), &request.baseline) else {
            return Err(AnalysisError::internal("Generalized linear model request is incomplete."));
        };

        session.set_dataset(data_file)?;

        let patients = string_vector(self.patient_ids().map(String::as_str));
        session.eval_void(&format!("{PATIENTS_VAR} <- c({patients})"))?;

        let baseline_label = format!("0{}", baseline.name);
        let group_labels = std::iter::repeat(baseline_label.as_str())
            .take(baseline.len())
            .chain(
                request
                    .comparison_groups
                    .iter()
                    .flat_map(|g| std::iter::repeat(g.name.as_str()).take(g.len())),
            );
        session.eval_void(&format!("{GROUPS_VAR} <- c({})", string_vector(group_labels)))?;

        let glm_command = if request.covariates.is_empty() {
            format!("glmResult<-eagle.glm.array(dataMatrix, {PATIENTS_VAR}, {GROUPS_VAR}, FALSE, NULL)")
        } else {
            let rows = self.covariate_rows()?;
            let mut row_vars = Vec::with_capacity(rows.len());
            for (i, (_, values)) in rows.iter().enumerate() {
                let var = format!("PATIENT{i}");
                session.eval_void(&format!(
                    "{var}<-c({})",
                    string_vector(values.iter().map(String::as_str))
                ))?;
                row_vars.push(var);
            }

            session.eval_void(&format!(
                "DIMCOLUMNS<-c({})",
                string_vector(request.covariates.iter().map(String::as_str))
            ))?;
            session.eval_void(&format!(
                "DIMROWS<-c({})",
                string_vector(rows.iter().map(|(patient, _)| patient.as_str()))
            ))?;
            session.eval_void(&format!("boundCol <- rbind({})", row_vars.join(",")))?;
            session.eval_void(&format!("{MATRIX_VAR}<-as.matrix(boundCol)"))?;
            session.eval_void(&format!("dimnames({MATRIX_VAR})[[2]]<-DIMCOLUMNS"))?;
            session.eval_void(&format!("dimnames({MATRIX_VAR})[[1]]<-DIMROWS"))?;

            format!("glmResult<-eagle.glm.array(dataMatrix, {PATIENTS_VAR}, {GROUPS_VAR}, TRUE, {MATRIX_VAR})")
        };
        session.eval_void(&glm_command)?;

        let reporters = session.eval("glmReporters <- dimnames(glmResult)[[1]]")?.as_strings()?;
        let group_names = session.eval("glmGroups <- dimnames(glmResult)[[2]]")?.as_strings()?;

        let mut entries = Vec::with_capacity(reporters.len());
        for reporter_id in reporters {
            let group_p_values = session
                .eval(&format!("pvals <- glmResult[{},]", quoted(&reporter_id)))?
                .as_doubles()?;
            entries.push(GlmEntry {
                reporter_id,
                group_p_values,
            });
        }

        Ok(AnalysisResult::GeneralizedLinearModel(GeneralizedLinearModelResult {
            id: request.id.clone(),
            group_names,
            entries,
        }))
    }
}
