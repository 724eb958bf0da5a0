use std::path::PathBuf;

use log::{info, warn};
use ndarray::{s, Array2, ArrayViewMut1, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::algorithm::sigma_clip::{sigma_clip_with, SigmaClipConfig};
use crate::cube::{check_shapes, ImageCube, Observation, QualityMask};
use crate::diagnostics::{DiagnosticLevel, DiagnosticsSink, RejectionDiagnostics};
use crate::error::Result;
use crate::hit_map::HitMap;
use crate::progress::ProgressSink;
use crate::rejection::common::{build_pool, RejectionOutcome};

/// Number of progress updates per sweep over the detector
const PROGRESS_STEPS: usize = 20;

/// Configuration for free-iteration temporal rejection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeIterationConfig {
    /// Per-pixel clipping parameters (default threshold: 3.5)
    pub clip: SigmaClipConfig,
    pub diagnostics: DiagnosticLevel,
    pub diagnostics_dir: Option<PathBuf>,
    /// Worker threads, 0 lets rayon decide (default: 0)
    pub num_threads: usize,
}

impl Default for FreeIterationConfig {
    fn default() -> Self {
        FreeIterationConfig {
            clip: SigmaClipConfig::default(),
            diagnostics: DiagnosticLevel::Off,
            diagnostics_dir: None,
            num_threads: 0,
        }
    }
}

impl FreeIterationConfig {
    pub fn new(threshold: f64) -> Self {
        FreeIterationConfig {
            clip: SigmaClipConfig::new(threshold),
            ..Default::default()
        }
    }
}

/// What happened to one spatial pixel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelStatus {
    /// time series sums to zero, outside the illuminated subarray
    #[default]
    Skipped,
    Clipped {
        replaced: usize,
        iterations: usize,
        converged: bool,
    },
}

/// Counters of a free-iteration run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FreeIterationReport {
    pub pixels_processed: usize,
    pub pixels_skipped: usize,
    pub samples_corrected: usize,
    pub total_samples: usize,
    /// (row, col) of pixels whose clipping stopped at the iteration cap
    pub unconverged: Vec<(usize, usize)>,
    pub frame_hits: Vec<usize>,
}

impl FreeIterationReport {
    fn from_status(status: &Array2<PixelStatus>) -> Self {
        let mut report = FreeIterationReport::default();
        for ((row, col), pixel) in status.indexed_iter() {
            match *pixel {
                PixelStatus::Skipped => report.pixels_skipped += 1,
                PixelStatus::Clipped {
                    replaced,
                    converged,
                    ..
                } => {
                    report.pixels_processed += 1;
                    report.samples_corrected += replaced;
                    if !converged {
                        report.unconverged.push((row, col));
                    }
                }
            }
        }
        report
    }
}

/// Rejects temporal outliers by clipping every pixel's time series to convergence.
///
/// Pixels are independent of each other and are processed in parallel.
#[derive(Clone, Debug)]
pub struct FreeIterationRejection {
    config: FreeIterationConfig,
}

impl FreeIterationRejection {
    pub fn new(config: FreeIterationConfig) -> Result<Self> {
        config.clip.validate()?;
        Ok(FreeIterationRejection { config })
    }

    pub fn config(&self) -> &FreeIterationConfig {
        &self.config
    }

    /// Reject outliers in an observation and commit the corrected data into it.
    ///
    /// On error the observation is left untouched.
    pub fn run(
        &self,
        obs: &mut Observation,
        diagnostics: &dyn DiagnosticsSink,
        progress: &mut dyn ProgressSink,
    ) -> Result<FreeIterationReport> {
        let outcome = self.reject(&obs.images, &obs.data_quality, diagnostics, progress)?;
        Ok(outcome.commit(obs))
    }

    /// Reject outliers, returning corrected copies of the cube and mask.
    ///
    /// # Arguments
    ///
    /// * `images` - image cube, not modified
    /// * `data_quality` - quality mask of the same shape, not modified
    /// * `diagnostics` - receives before/after frames according to the configured level
    /// * `progress` - receives updates while rows of the detector are swept
    ///
    /// # Returns
    ///
    /// * `RejectionOutcome` - corrected images, merged mask and per-pixel counters
    ///
    pub fn reject(
        &self,
        images: &ImageCube,
        data_quality: &QualityMask,
        diagnostics: &dyn DiagnosticsSink,
        progress: &mut dyn ProgressSink,
    ) -> Result<RejectionOutcome<FreeIterationReport>> {
        let shape = check_shapes(images, data_quality)?;
        let pool = build_pool(self.config.num_threads)?;
        let clip = &self.config.clip;

        let mut working = images.to_owned();
        let mut hit_map = HitMap::new(shape);
        let mut status = Array2::<PixelStatus>::default((shape.rows, shape.cols));

        let band = shape.rows.div_ceil(PROGRESS_STEPS).max(1);
        progress.start("free-iteration rejection", shape.rows);

        for start in (0..shape.rows).step_by(band) {
            let end = (start + band).min(shape.rows);
            let mut series = working.slice_mut(s![.., start..end, ..]);
            let mut hits = hit_map.counts_mut().slice_mut(s![.., start..end, ..]);
            let mut pixels = status.slice_mut(s![start..end, ..]);

            pool.install(|| {
                Zip::from(series.lanes_mut(Axis(0)))
                    .and(hits.lanes_mut(Axis(0)))
                    .and(&mut pixels)
                    .par_for_each(|lane, hit_lane, pixel| *pixel = clip_pixel(lane, hit_lane, clip));
            });

            progress.update(end);
        }

        progress.finish();

        let hits = hit_map.binarize();
        let mut mask = data_quality.to_owned();
        hits.merge_into(&mut mask)?;

        let mut report = FreeIterationReport::from_status(&status);
        report.total_samples = shape.samples();
        report.frame_hits = hits.frame_counts();

        info!(
            "clipped {} pixels ({} skipped outside the subarray): {} of {} samples replaced",
            report.pixels_processed,
            report.pixels_skipped,
            report.samples_corrected,
            report.total_samples
        );
        if !report.unconverged.is_empty() {
            warn!(
                "{} pixels reached the clipping iteration cap, their corrections are best-effort",
                report.unconverged.len()
            );
        }

        RejectionDiagnostics {
            level: self.config.diagnostics,
            output_dir: self.config.diagnostics_dir.as_ref(),
            min_value: 1.0,
        }
        .emit(diagnostics, images, &working, &hits);

        Ok(RejectionOutcome {
            images: working,
            data_quality: mask,
            report,
        })
    }
}

/// Clip one pixel's time series in place and mark replaced samples in its hit lane.
fn clip_pixel(
    mut series: ArrayViewMut1<f64>,
    mut hits: ArrayViewMut1<u32>,
    config: &SigmaClipConfig,
) -> PixelStatus {
    if series.sum() == 0.0 {
        return PixelStatus::Skipped;
    }

    let clipped = sigma_clip_with(&series.to_vec(), config);

    for ((value, hit), (&corrected, &replaced)) in series
        .iter_mut()
        .zip(hits.iter_mut())
        .zip(clipped.values.iter().zip(&clipped.replaced))
    {
        *value = corrected;
        if replaced {
            *hit = 1;
        }
    }

    PixelStatus::Clipped {
        replaced: clipped.replaced_count(),
        iterations: clipped.iterations,
        converged: clipped.converged,
    }
}
