use std::path::PathBuf;

use log::{debug, info};
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::algorithm::statistics::{median_in_place, population_std};
use crate::cube::{check_shapes, ImageCube, Observation, QualityMask};
use crate::diagnostics::{DiagnosticLevel, DiagnosticsSink, RejectionDiagnostics};
use crate::error::Result;
use crate::hit_map::HitMap;
use crate::progress::ProgressSink;
use crate::rejection::common::{build_pool, check_sigma, Replacement, RejectionOutcome};

/// Configuration for fixed-iteration temporal rejection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedIterationConfig {
    /// One rejection pass per entry, applied in order (default: [10.0, 10.0])
    pub sigmas: Vec<f64>,
    /// How flagged samples are replaced (default: global median)
    pub replacement: Replacement,
    pub diagnostics: DiagnosticLevel,
    /// Where diagnostics are persisted, if anywhere
    pub diagnostics_dir: Option<PathBuf>,
    /// Worker threads, 0 lets rayon decide (default: 0)
    pub num_threads: usize,
}

impl Default for FixedIterationConfig {
    fn default() -> Self {
        FixedIterationConfig {
            sigmas: vec![10.0, 10.0],
            replacement: Replacement::GlobalMedian,
            diagnostics: DiagnosticLevel::Off,
            diagnostics_dir: None,
            num_threads: 0,
        }
    }
}

impl FixedIterationConfig {
    pub fn new(sigmas: Vec<f64>, replacement: Replacement) -> Self {
        FixedIterationConfig {
            sigmas,
            replacement,
            ..Default::default()
        }
    }

    /// Check everything that does not depend on the cube
    pub fn validate(&self) -> Result<()> {
        for &sigma in &self.sigmas {
            check_sigma("sigma", sigma)?;
        }
        // the upper window bound needs the cube and is checked in `reject`
        self.replacement.validate(usize::MAX)
    }
}

/// Result of a single rejection pass
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub sigma: f64,
    /// samples replaced during this pass
    pub flagged: usize,
}

/// Counters of a fixed-iteration run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedIterationReport {
    pub passes: Vec<PassReport>,
    /// sum over passes, a sample replaced in two passes counts twice
    pub total_corrected: usize,
    /// distinct samples flagged in at least one pass
    pub samples_flagged: usize,
    /// every sample in the cube
    pub total_samples: usize,
    /// distinct flagged samples per frame
    pub frame_hits: Vec<usize>,
}

impl FixedIterationReport {
    pub fn corrected_fraction(&self) -> f64 {
        if self.total_samples == 0 {
            return 0.0;
        }
        self.samples_flagged as f64 / self.total_samples as f64
    }
}

/// Per-pixel median and standard deviation across time
struct PixelStatistics {
    median: Array2<f64>,
    std: Array2<f64>,
}

impl PixelStatistics {
    fn compute(cube: &ImageCube) -> Self {
        let (_, rows, cols) = cube.dim();
        let mut median = Array2::zeros((rows, cols));
        let mut std = Array2::zeros((rows, cols));

        Zip::from(&mut median)
            .and(&mut std)
            .and(cube.lanes(Axis(0)))
            .par_for_each(|m, s, series| {
                let mut values = series.to_vec();
                *s = population_std(&values);
                *m = median_in_place(&mut values);
            });

        PixelStatistics { median, std }
    }
}

/// Rejects temporal outliers with a fixed sequence of sigma thresholds.
///
/// Each pass compares every sample with its pixel's median and standard
/// deviation over time and replaces samples further than `sigma * std` from the
/// median. Passes run in order and each one sees the corrections of the
/// previous passes.
#[derive(Clone, Debug)]
pub struct FixedIterationRejection {
    config: FixedIterationConfig,
}

impl FixedIterationRejection {
    pub fn new(config: FixedIterationConfig) -> Result<Self> {
        config.validate()?;
        Ok(FixedIterationRejection { config })
    }

    pub fn config(&self) -> &FixedIterationConfig {
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
    ) -> Result<FixedIterationReport> {
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
    /// * `progress` - receives one update per pass
    ///
    /// # Returns
    ///
    /// * `RejectionOutcome` - corrected images, merged mask and per-pass counters
    ///
    pub fn reject(
        &self,
        images: &ImageCube,
        data_quality: &QualityMask,
        diagnostics: &dyn DiagnosticsSink,
        progress: &mut dyn ProgressSink,
    ) -> Result<RejectionOutcome<FixedIterationReport>> {
        let shape = check_shapes(images, data_quality)?;
        self.config.replacement.validate(shape.frames)?;
        let pool = build_pool(self.config.num_threads)?;

        let mut working = images.to_owned();
        let mut hit_map = HitMap::new(shape);
        let mut passes = Vec::with_capacity(self.config.sigmas.len());
        let n_passes = self.config.sigmas.len();

        progress.start("fixed-iteration rejection", n_passes);

        for (pass, &sigma) in self.config.sigmas.iter().enumerate() {
            let flagged = pool.install(|| {
                correction_pass(&mut working, &mut hit_map, sigma, self.config.replacement)
            });

            info!(
                "pass {} of {} with sigma {:.2}: {} samples replaced",
                pass + 1,
                n_passes,
                sigma,
                flagged
            );
            passes.push(PassReport { sigma, flagged });
            progress.update(pass + 1);
        }

        progress.finish();

        let total_corrected = hit_map.total_corrections() as usize;
        let hits = hit_map.binarize();
        let mut mask = data_quality.to_owned();
        hits.merge_into(&mut mask)?;

        let report = FixedIterationReport {
            total_corrected,
            samples_flagged: hits.total(),
            total_samples: shape.samples(),
            frame_hits: hits.frame_counts(),
            passes,
        };

        info!(
            "all passes complete: {} corrections, {} of {} samples flagged ({:.4}%)",
            report.total_corrected,
            report.samples_flagged,
            report.total_samples,
            100.0 * report.corrected_fraction()
        );

        RejectionDiagnostics {
            level: self.config.diagnostics,
            output_dir: self.config.diagnostics_dir.as_ref(),
            min_value: 0.0,
        }
        .emit(diagnostics, images, &working, &hits);

        Ok(RejectionOutcome {
            images: working,
            data_quality: mask,
            report,
        })
    }
}

/// One pass over the cube, returns the number of replaced samples.
///
/// Statistics and windowed medians are read from a snapshot taken at the
/// start of the pass, so frames can be corrected in parallel.
fn correction_pass(
    working: &mut ImageCube,
    hit_map: &mut HitMap,
    sigma: f64,
    replacement: Replacement,
) -> usize {
    let snapshot = working.clone();
    let stats = PixelStatistics::compute(&snapshot);
    let frames = snapshot.len_of(Axis(0));

    let flagged: usize = working
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(hit_map.counts_mut().axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .map(|(t, (frame, hits))| {
            let window = replacement.window_range(t, frames);
            let mut flagged = 0;

            Zip::indexed(frame)
                .and(hits)
                .and(&stats.median)
                .and(&stats.std)
                .for_each(|(row, col), value, hit, &median, &std| {
                    if (*value - median).abs() > sigma * std {
                        *value = match &window {
                            None => median,
                            Some(range) => {
                                let mut local = snapshot
                                    .slice(s![range.clone(), row, col])
                                    .to_vec();
                                median_in_place(&mut local)
                            }
                        };
                        *hit += 1;
                        flagged += 1;
                    }
                });

            flagged
        })
        .sum();

    debug!("correction pass with sigma {} replaced {} samples", sigma, flagged);
    flagged
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::cube::TEMPORAL_OUTLIER_FLAG;
    use crate::diagnostics::testing::RecordingDiagnostics;
    use crate::diagnostics::NullDiagnostics;
    use crate::error::RejectionError;
    use crate::progress::NullProgress;

    const QUIET: [f64; 10] = [10.0, 11.0, 9.0, 10.0, 10.0, 11.0, 9.0, 10.0, 10.0, 10.0];

    /// 2x2 pixels all following QUIET, with a cosmic ray of 1000 at (t=4, 1, 0)
    fn cosmic_ray_cube() -> ImageCube {
        let mut cube = ImageCube::from_shape_fn((10, 2, 2), |(t, _, _)| QUIET[t]);
        cube[[4, 1, 0]] = 1000.0;
        cube
    }

    fn engine(sigmas: Vec<f64>, replacement: Replacement) -> FixedIterationRejection {
        FixedIterationRejection::new(FixedIterationConfig::new(sigmas, replacement)).unwrap()
    }

    fn reject(
        engine: &FixedIterationRejection,
        images: &ImageCube,
        data_quality: &QualityMask,
    ) -> RejectionOutcome<FixedIterationReport> {
        engine
            .reject(images, data_quality, &NullDiagnostics, &mut NullProgress)
            .unwrap()
    }

    #[test]
    fn test_empty_sigmas_leave_cube_unchanged() {
        let images = cosmic_ray_cube();
        let mut data_quality = QualityMask::zeros(images.raw_dim());
        data_quality[[0, 0, 0]] = 4;

        let outcome = reject(&engine(vec![], Replacement::GlobalMedian), &images, &data_quality);

        assert_eq!(outcome.images, images);
        assert_eq!(outcome.data_quality, data_quality);
        assert_eq!(outcome.report.total_corrected, 0);
        assert!(outcome.report.passes.is_empty());
    }

    #[test]
    fn test_single_cosmic_ray_replaced_by_global_median() {
        let images = cosmic_ray_cube();
        let data_quality = QualityMask::zeros(images.raw_dim());

        let outcome = reject(&engine(vec![2.5, 2.5], Replacement::GlobalMedian), &images, &data_quality);

        assert_eq!(outcome.images[[4, 1, 0]], 10.0);
        assert_eq!(outcome.report.passes[0].flagged, 1);
        assert_eq!(outcome.report.passes[1].flagged, 0);
        assert_eq!(outcome.report.total_corrected, 1);
        assert_eq!(outcome.report.samples_flagged, 1);
        assert_eq!(outcome.report.total_samples, 40);
        assert_eq!(outcome.data_quality[[4, 1, 0]], TEMPORAL_OUTLIER_FLAG);
        assert_eq!(outcome.data_quality.sum(), 1);
        assert_eq!(outcome.report.frame_hits[4], 1);

        // everything else untouched
        let mut expected = images.clone();
        expected[[4, 1, 0]] = 10.0;
        assert_eq!(outcome.images, expected);
    }

    #[test]
    fn test_windowed_replacement_clips_at_start() {
        let series = [1000.0, 10.0, 12.0, 14.0, 16.0, 18.0, 20.0, 22.0, 24.0, 26.0];
        let images = ImageCube::from_shape_fn((10, 1, 1), |(t, _, _)| series[t]);
        let data_quality = QualityMask::zeros(images.raw_dim());

        let outcome = reject(
            &engine(vec![2.5], Replacement::WindowedMedian { window: 2 }),
            &images,
            &data_quality,
        );

        // median of frames 0..=2: (1000, 10, 12)
        assert_eq!(outcome.images[[0, 0, 0]], 12.0);
        assert_eq!(outcome.report.total_corrected, 1);
    }

    #[test]
    fn test_windowed_replacement_clips_at_end() {
        let series = [10.0, 12.0, 14.0, 16.0, 18.0, 20.0, 22.0, 24.0, 26.0, 1000.0];
        let images = ImageCube::from_shape_fn((10, 1, 1), |(t, _, _)| series[t]);
        let data_quality = QualityMask::zeros(images.raw_dim());

        let outcome = reject(
            &engine(vec![2.5], Replacement::WindowedMedian { window: 2 }),
            &images,
            &data_quality,
        );

        // median of frames 7..=9: (24, 26, 1000)
        assert_eq!(outcome.images[[9, 0, 0]], 26.0);
        assert_eq!(outcome.report.total_corrected, 1);
    }

    #[test]
    fn test_hits_accumulate_monotonically() {
        let images = cosmic_ray_cube();
        let data_quality = QualityMask::zeros(images.raw_dim());

        let one = reject(&engine(vec![2.5], Replacement::GlobalMedian), &images, &data_quality);
        let three = reject(&engine(vec![2.5, 1.0, 0.5], Replacement::GlobalMedian), &images, &data_quality);

        assert!(one.report.samples_flagged >= 1);
        assert!(three.report.samples_flagged >= one.report.samples_flagged);
        Zip::from(&one.data_quality)
            .and(&three.data_quality)
            .for_each(|&a, &b| assert!(a == 0 || b != 0));
    }

    #[test]
    fn test_zero_variance_pixels_never_flagged() {
        let images = ImageCube::from_elem((6, 3, 3), 7.25);
        let data_quality = QualityMask::zeros(images.raw_dim());

        let outcome = reject(&engine(vec![0.1, 0.1], Replacement::GlobalMedian), &images, &data_quality);

        assert_eq!(outcome.report.total_corrected, 0);
        assert_eq!(outcome.images, images);
    }

    #[test]
    fn test_shape_mismatch_leaves_observation_untouched() {
        let mut obs = Observation {
            images: ImageCube::ones((5, 3, 3)),
            data_quality: QualityMask::zeros((5, 3, 4)),
            exposure_times: Vec::new(),
        };
        let before = obs.clone();

        let err = engine(vec![3.0], Replacement::GlobalMedian)
            .run(&mut obs, &NullDiagnostics, &mut NullProgress)
            .unwrap_err();

        assert!(matches!(err, RejectionError::ShapeMismatch { .. }));
        assert_eq!(obs, before);
    }

    #[test]
    fn test_invalid_parameters() {
        let bad_sigma = FixedIterationConfig::new(vec![3.0, -1.0], Replacement::GlobalMedian);
        assert!(matches!(
            FixedIterationRejection::new(bad_sigma),
            Err(RejectionError::InvalidParameter(_))
        ));

        let zero_window = FixedIterationConfig::new(vec![3.0], Replacement::WindowedMedian { window: 0 });
        assert!(FixedIterationRejection::new(zero_window).is_err());

        let images = ImageCube::ones((4, 2, 2));
        let data_quality = QualityMask::zeros(images.raw_dim());
        let wide = engine(vec![3.0], Replacement::WindowedMedian { window: 5 });
        let err = wide
            .reject(&images, &data_quality, &NullDiagnostics, &mut NullProgress)
            .unwrap_err();
        assert!(matches!(err, RejectionError::InvalidParameter(_)));
    }

    #[test]
    fn test_run_commits_into_observation() {
        let mut obs = Observation::with_clean_mask(cosmic_ray_cube()).unwrap();

        let report = engine(vec![2.5], Replacement::GlobalMedian)
            .run(&mut obs, &NullDiagnostics, &mut NullProgress)
            .unwrap();

        assert_eq!(report.total_corrected, 1);
        assert_eq!(obs.images[[4, 1, 0]], 10.0);
        assert_eq!(obs.flagged_samples(), 1);
    }

    #[test]
    fn test_thread_count_does_not_change_result() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut images = ImageCube::from_shape_fn((24, 8, 8), |_| 100.0 + rng.gen_range(-5.0..5.0));
        for k in 0..12 {
            images[[(k * 7) % 24, (k * 3) % 8, (k * 5) % 8]] += 5000.0;
        }
        let data_quality = QualityMask::zeros(images.raw_dim());

        let mut config = FixedIterationConfig::new(vec![3.0, 3.0], Replacement::WindowedMedian { window: 3 });
        config.num_threads = 1;
        let sequential = reject(&FixedIterationRejection::new(config.clone()).unwrap(), &images, &data_quality);
        config.num_threads = 4;
        let parallel = reject(&FixedIterationRejection::new(config).unwrap(), &images, &data_quality);

        assert_eq!(sequential.images, parallel.images);
        assert_eq!(sequential.data_quality, parallel.data_quality);
        assert_eq!(sequential.report, parallel.report);
        assert!(sequential.report.total_corrected >= 12);
    }

    #[test]
    fn test_diagnostics_follow_level() {
        let images = cosmic_ray_cube();
        let data_quality = QualityMask::zeros(images.raw_dim());

        let mut config = FixedIterationConfig::new(vec![2.5], Replacement::GlobalMedian);
        config.diagnostics = DiagnosticLevel::PerFrame;
        let sink = RecordingDiagnostics::failing();

        let outcome = FixedIterationRejection::new(config)
            .unwrap()
            .reject(&images, &data_quality, &sink, &mut NullProgress)
            .unwrap();

        // a failing sink does not stop the correction
        assert_eq!(outcome.images[[4, 1, 0]], 10.0);
        assert_eq!(sink.renders.borrow().len(), 2 + 10);
        assert_eq!(sink.renders.borrow()[1].1, Some(1));
    }
}
