use std::error::Error;
use std::path::PathBuf;

use log::warn;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::cube::ImageCube;
use crate::hit_map::BinaryHitMap;

pub type DiagnosticsResult = Result<(), Box<dyn Error + Send + Sync>>;

/// How much diagnostic output the engines request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    /// no diagnostics
    #[default]
    Off,
    /// one aggregate diagnostic covering the whole cube
    Aggregate,
    /// aggregate plus one diagnostic per frame
    PerFrame,
}

impl DiagnosticLevel {
    pub fn level(&self) -> u8 {
        match self {
            DiagnosticLevel::Off => 0,
            DiagnosticLevel::Aggregate => 1,
            DiagnosticLevel::PerFrame => 2,
        }
    }
}

impl From<u8> for DiagnosticLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => DiagnosticLevel::Off,
            1 => DiagnosticLevel::Aggregate,
            _ => DiagnosticLevel::PerFrame,
        }
    }
}

/// One request to visualise a set of frames
#[derive(Clone, Debug)]
pub struct FrameRender {
    pub frames: Vec<Array2<f64>>,
    /// (row, col) coordinates to mark on top of the frames
    pub overlay: Option<Vec<(usize, usize)>>,
    pub title: String,
    /// one label per frame, used as output name when persisted
    pub labels: Vec<String>,
    /// lower display cut
    pub min_value: f64,
    pub output_dir: Option<PathBuf>,
}

/// Receiver of before/after frames and hit locations.
///
/// Rendering is best-effort: a failing sink never aborts a rejection run.
pub trait DiagnosticsSink {
    fn render_frames(&self, render: &FrameRender) -> DiagnosticsResult;
}

/// Sink that drops every request
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn render_frames(&self, _render: &FrameRender) -> DiagnosticsResult {
        Ok(())
    }
}

/// Render requests both engines emit after a run
pub(crate) struct RejectionDiagnostics<'a> {
    pub level: DiagnosticLevel,
    pub output_dir: Option<&'a PathBuf>,
    pub min_value: f64,
}

impl RejectionDiagnostics<'_> {
    pub fn emit(
        &self,
        sink: &dyn DiagnosticsSink,
        before: &ImageCube,
        after: &ImageCube,
        hits: &BinaryHitMap,
    ) {
        if self.level == DiagnosticLevel::Off {
            return;
        }

        let first_before = before.index_axis(Axis(0), 0).to_owned();
        let first_after = after.index_axis(Axis(0), 0).to_owned();

        self.submit(
            sink,
            vec![first_before.clone(), first_after],
            None,
            "Temporal bad pixel removal example",
            vec!["before_cr_correction".to_string(), "after_cr_correction".to_string()],
        );

        self.submit(
            sink,
            vec![first_before],
            Some(hits.locations(None)),
            "Location of corrected pixels",
            vec!["cr_location".to_string()],
        );

        if self.level < DiagnosticLevel::PerFrame {
            return;
        }

        for (t, frame) in before.axis_iter(Axis(0)).enumerate() {
            self.submit(
                sink,
                vec![frame.to_owned()],
                Some(hits.locations(Some(t))),
                "Location of corrected pixels",
                vec![format!("cr_location_frame{}", t)],
            );
        }
    }

    fn submit(
        &self,
        sink: &dyn DiagnosticsSink,
        frames: Vec<Array2<f64>>,
        overlay: Option<Vec<(usize, usize)>>,
        title: &str,
        labels: Vec<String>,
    ) {
        let render = FrameRender {
            frames,
            overlay,
            title: title.to_string(),
            labels,
            min_value: self.min_value,
            output_dir: self.output_dir.cloned(),
        };

        if let Err(e) = sink.render_frames(&render) {
            warn!("diagnostics '{}' {:?} failed: {}", render.title, render.labels, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    /// Sink that remembers labels and overlay sizes of every request
    #[derive(Default)]
    pub struct RecordingDiagnostics {
        pub renders: RefCell<Vec<(Vec<String>, Option<usize>)>>,
        pub fail: bool,
    }

    impl RecordingDiagnostics {
        pub fn failing() -> Self {
            RecordingDiagnostics {
                renders: RefCell::new(Vec::new()),
                fail: true,
            }
        }

        pub fn labels(&self) -> Vec<String> {
            self.renders.borrow().iter().flat_map(|(labels, _)| labels.clone()).collect()
        }
    }

    impl DiagnosticsSink for RecordingDiagnostics {
        fn render_frames(&self, render: &FrameRender) -> DiagnosticsResult {
            self.renders
                .borrow_mut()
                .push((render.labels.clone(), render.overlay.as_ref().map(|o| o.len())));
            if self.fail {
                return Err("renderer unavailable".into());
            }
            Ok(())
        }
    }
}
