//! Command-string builders and the rendered-image helper shared by the
//! analysis tasks.

use std::collections::BTreeSet;
use tracing::{debug, warn};
use uuid::Uuid;

use super::AnalysisError;
use crate::constants::image;
use crate::engine::{ComputeSession, EngineValue};
use crate::messaging::RequestId;

/// Double-quoted engine string literal
pub fn quoted(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// `name <- c("id1","id2",...)`
pub fn group_command<S: AsRef<str>>(name: &str, ids: &[S]) -> String {
    let values: Vec<String> = ids.iter().map(|id| quoted(id.as_ref())).collect();
    format!("{name} <- c({})", values.join(","))
}

/// `name <- c(1.5,2,...)`
pub fn numeric_command(name: &str, values: &[f64]) -> String {
    let values: Vec<String> = values.iter().map(|v| format_number(*v)).collect();
    format!("{name} <- c({})", values.join(","))
}

pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        value.to_string()
    }
}

/// Identifiers present in both groups, sorted
pub fn overlapping_ids<S: AsRef<str>>(first: &[S], second: &[S]) -> Vec<String> {
    let first: BTreeSet<&str> = first.iter().map(AsRef::as_ref).collect();
    let second: BTreeSet<&str> = second.iter().map(AsRef::as_ref).collect();
    first.intersection(&second).map(|id| id.to_string()).collect()
}

/// Dendrogram width: enough horizontal room for every label
pub fn dendrogram_width_inches(label_count: usize) -> u32 {
    let points = label_count as f64 * image::POINTS_PER_LABEL;
    let inches = (points / f64::from(image::RESOLUTION_DPI)).round() as u32;
    inches.max(image::MIN_WIDTH_INCHES)
}

/// Engine-side file name for a rendered plot
pub fn image_file_name(request_id: &RequestId) -> String {
    format!("image_{}_{}.png", request_id.session_id, Uuid::new_v4().simple()).replace(' ', "_")
}

/// Render `plot_command` to a PNG inside the engine and download it
///
/// If the engine cannot open a bitmap device the plot is skipped and an
/// empty image returned.
pub fn render_plot(
    session: &mut ComputeSession,
    request_id: &RequestId,
    plot_command: &str,
    height_inches: u32,
    width_inches: u32,
) -> Result<Vec<u8>, AnalysisError> {
    let file_name = image_file_name(request_id);
    let device = format!(
        "try(bitmap({}, height = {height_inches}, width = {width_inches}, res = {} ))",
        quoted(&file_name),
        image::RESOLUTION_DPI
    );

    // `try` yields the error message as a string when the device fails.
    if let EngineValue::Str(messages) = session.eval(&device)? {
        let last_warning = session
            .eval("last.warning")
            .ok()
            .and_then(|w| w.as_strings().ok())
            .unwrap_or_default();
        warn!(
            request = %request_id,
            error = ?messages,
            last_warning = ?last_warning,
            "⚠️ TASK: Unable to open bitmap device; returning empty image"
        );
        return Ok(Vec::new());
    }

    session.eval_void(plot_command)?;
    session.eval_void("dev.off()")?;

    let bytes = session.read_file(&file_name)?;
    if let Err(e) = session.remove_file(&file_name) {
        warn!(request = %request_id, file = %file_name, error = %e, "⚠️ TASK: Rendered file left behind");
    }

    debug!(request = %request_id, bytes = bytes.len(), "TASK: Retrieved rendered image");
    Ok(bytes)
}
