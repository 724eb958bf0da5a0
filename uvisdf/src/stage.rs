use std::error::Error;
use std::fs;
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use uviscore::progress::LogProgress;
use uviscore::rejection::fixed::{FixedIterationRejection, FixedIterationReport};
use uviscore::rejection::free::{FreeIterationRejection, FreeIterationReport};

use crate::config::{RejectionMethod, Stage1Config};
use crate::data::observation::{read_observation, write_observation};
use crate::diagnostics::JsonDiagnostics;

/// Report of one rejection step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EngineReport {
    Fixed(FixedIterationReport),
    Free(FreeIterationReport),
}

impl EngineReport {
    pub fn samples_flagged(&self) -> usize {
        match self {
            EngineReport::Fixed(report) => report.samples_flagged,
            EngineReport::Free(report) => report.frame_hits.iter().sum(),
        }
    }
}

/// Everything a finished run produced besides the output file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub input: String,
    pub output: String,
    pub frames: usize,
    pub rows: usize,
    pub cols: usize,
    /// samples carrying any quality flag before and after the run
    pub flagged_before: usize,
    pub flagged_after: usize,
    pub elapsed_seconds: f64,
    /// one report per rejection step, in run order
    pub steps: Vec<EngineReport>,
}

impl StageReport {
    /// Samples without a flag on input that carry one on output
    pub fn newly_flagged(&self) -> usize {
        self.flagged_after.saturating_sub(self.flagged_before)
    }
}

/// Reads the input observation, rejects temporal outliers and writes the result.
///
/// Steps run in order on the same observation, so each one sees the images
/// corrected by the steps before it and quality flags accumulate.
///
/// # Arguments
///
/// * `config` - input, output and the rejection steps of the run
///
/// # Returns
///
/// * `StageReport` - shape, timing and per-step counters; also written to `config.report` if set
///
pub fn run_stage(config: &Stage1Config) -> Result<StageReport, Box<dyn Error>> {
    let start = Instant::now();
    let mut obs = read_observation(&config.input)?;
    let shape = obs.shape();
    let flagged_before = obs.flagged_samples();
    info!(
        "loaded {}: {} frames of {}x{} pixels, {} samples already flagged",
        config.input.display(),
        shape.frames,
        shape.rows,
        shape.cols,
        flagged_before
    );
    if config.rejection.is_empty() {
        warn!("no rejection steps configured, {} is copied unchanged", config.input.display());
    }

    let mut progress = LogProgress::default();
    let mut steps = Vec::with_capacity(config.rejection.len());

    for (index, method) in config.rejection.iter().enumerate() {
        let diagnostics = JsonDiagnostics::new(config.step_diagnostics_dir(index));
        let step = match method {
            RejectionMethod::Fixed(fixed) => {
                let rejection = FixedIterationRejection::new(fixed.clone())?;
                EngineReport::Fixed(rejection.run(&mut obs, &diagnostics, &mut progress)?)
            }
            RejectionMethod::Free(free) => {
                let rejection = FreeIterationRejection::new(free.clone())?;
                EngineReport::Free(rejection.run(&mut obs, &diagnostics, &mut progress)?)
            }
        };
        info!(
            "step {} of {} ({}) flagged {} samples",
            index + 1,
            config.rejection.len(),
            method.name(),
            step.samples_flagged()
        );
        steps.push(step);
    }

    write_observation(&config.output, &obs, config.compression_level)?;

    let report = StageReport {
        input: config.input.display().to_string(),
        output: config.output.display().to_string(),
        frames: shape.frames,
        rows: shape.rows,
        cols: shape.cols,
        flagged_before,
        flagged_after: obs.flagged_samples(),
        elapsed_seconds: start.elapsed().as_secs_f64(),
        steps,
    };

    info!(
        "{} samples newly flagged over {} steps, wrote {} in {:.2}s",
        report.newly_flagged(),
        report.steps.len(),
        config.output.display(),
        report.elapsed_seconds
    );

    if let Some(path) = &config.report {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }

    Ok(report)
}
