use std::fs;
use std::path::PathBuf;

use log::debug;
use serde::Serialize;
use uviscore::diagnostics::{DiagnosticsResult, DiagnosticsSink, FrameRender};

/// Persists every requested frame as `<dir>/<label>.json`.
///
/// Frames of a request without an output directory land in `default_dir`.
#[derive(Clone, Debug)]
pub struct JsonDiagnostics {
    default_dir: PathBuf,
}

#[derive(Serialize)]
struct FrameDocument<'a> {
    title: &'a str,
    label: &'a str,
    rows: usize,
    cols: usize,
    min_value: f64,
    min: f64,
    max: f64,
    overlay: Option<&'a [(usize, usize)]>,
    /// row-major pixel values, clamped from below at `min_value`
    data: Vec<f64>,
}

impl JsonDiagnostics {
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        JsonDiagnostics {
            default_dir: default_dir.into(),
        }
    }
}

impl DiagnosticsSink for JsonDiagnostics {
    fn render_frames(&self, render: &FrameRender) -> DiagnosticsResult {
        if render.frames.len() != render.labels.len() {
            return Err(format!(
                "'{}' has {} frames but {} labels",
                render.title,
                render.frames.len(),
                render.labels.len()
            )
            .into());
        }

        let dir = render.output_dir.as_deref().unwrap_or(&self.default_dir);
        fs::create_dir_all(dir)?;

        for (frame, label) in render.frames.iter().zip(&render.labels) {
            let (rows, cols) = frame.dim();
            let data: Vec<f64> = frame.iter().map(|&v| v.max(render.min_value)).collect();
            let (min, max) = data
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

            let document = FrameDocument {
                title: &render.title,
                label,
                rows,
                cols,
                min_value: render.min_value,
                min,
                max,
                overlay: render.overlay.as_deref(),
                data,
            };

            let path = dir.join(format!("{}.json", label));
            fs::write(&path, serde_json::to_vec_pretty(&document)?)?;
            debug!("diagnostics frame written to {}", path.display());
        }

        Ok(())
    }
}
