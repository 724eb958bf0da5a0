use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::algorithm::statistics::{median, Spread};
use crate::error::{RejectionError, Result};

/// Configuration for convergent sigma clipping of a single series
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigmaClipConfig {
    /// Values further than `threshold * spread` from the median are clipped (default: 3.5)
    pub threshold: f64,
    /// Spread estimator (default: population standard deviation)
    pub spread: Spread,
    /// Iteration cap, `None` means twice the series length
    pub max_iterations: Option<usize>,
}

impl Default for SigmaClipConfig {
    fn default() -> Self {
        SigmaClipConfig {
            threshold: 3.5,
            spread: Spread::StdDev,
            max_iterations: None,
        }
    }
}

impl SigmaClipConfig {
    pub fn new(threshold: f64) -> Self {
        SigmaClipConfig {
            threshold,
            ..Default::default()
        }
    }

    pub fn with_spread(mut self, spread: Spread) -> Self {
        self.spread = spread;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(RejectionError::InvalidParameter(format!(
                "clipping threshold must be positive and finite, got {}",
                self.threshold
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(RejectionError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn iteration_cap(&self, len: usize) -> usize {
        self.max_iterations.unwrap_or(2 * len).max(1)
    }
}

/// Outcome of clipping one series
#[derive(Clone, Debug, PartialEq)]
pub struct SigmaClipResult {
    /// input series with every clipped value replaced by `median`
    pub values: Vec<f64>,
    /// true where a value was replaced
    pub replaced: Vec<bool>,
    /// median of the retained values at the last iteration
    pub median: f64,
    pub iterations: usize,
    /// false when the iteration cap stopped the loop, the mask is then best-effort
    pub converged: bool,
}

impl SigmaClipResult {
    pub fn replaced_count(&self) -> usize {
        self.replaced.iter().filter(|&&r| r).count()
    }

    pub fn replaced_indices(&self) -> Vec<usize> {
        self.replaced.iter().positions(|&r| r).collect()
    }
}

/// Clip a series with the default estimator and the given threshold.
///
/// # Arguments
///
/// * `series` - values to clip
/// * `threshold` - number of standard deviations around the median to retain
///
/// # Returns
///
/// * `SigmaClipResult` - corrected copy of the series and the replacement mask
///
pub fn sigma_clip(series: &[f64], threshold: f64) -> SigmaClipResult {
    sigma_clip_with(series, &SigmaClipConfig::new(threshold))
}

/// Iteratively clip a series until the number of retained values stops changing.
///
/// Every iteration computes median and spread of the values retained so far,
/// then re-tests the whole series with `|x - median| <= threshold * spread`, so
/// values rejected earlier can come back. The loop stops when the retained count
/// is unchanged, when a test would retain nothing (previous mask is kept), or
/// when the iteration cap is reached. Rejected values are replaced by the last
/// median.
///
/// # Arguments
///
/// * `series` - values to clip
/// * `config` - threshold, spread estimator and iteration cap
///
/// # Returns
///
/// * `SigmaClipResult` - corrected copy of the series and the replacement mask
///
pub fn sigma_clip_with(series: &[f64], config: &SigmaClipConfig) -> SigmaClipResult {
    let n = series.len();
    if n == 0 {
        return SigmaClipResult {
            values: Vec::new(),
            replaced: Vec::new(),
            median: f64::NAN,
            iterations: 0,
            converged: true,
        };
    }

    let cap = config.iteration_cap(n);
    let mut retained = vec![true; n];
    let mut retained_count = n;
    let mut center = f64::NAN;
    let mut iterations = 0;
    let mut converged = false;
    let mut kept: Vec<f64> = Vec::with_capacity(n);

    while iterations < cap {
        iterations += 1;

        kept.clear();
        kept.extend(
            series
                .iter()
                .zip(&retained)
                .filter(|(_, &keep)| keep)
                .map(|(&value, _)| value),
        );

        center = median(&kept);
        let bound = config.threshold * config.spread.estimate(&kept, center);

        let next: Vec<bool> = series.iter().map(|&v| (v - center).abs() <= bound).collect();
        let next_count = next.iter().filter(|&&keep| keep).count();

        if next_count == 0 {
            break;
        }

        let stable = next_count == retained_count;
        retained = next;
        retained_count = next_count;

        if stable {
            converged = true;
            break;
        }
    }

    if !converged {
        debug!(
            "sigma clip stopped after {} iterations without converging ({} of {} retained)",
            iterations, retained_count, n
        );
    }

    let replaced: Vec<bool> = retained.iter().map(|&keep| !keep).collect();
    let values = series
        .iter()
        .zip(&replaced)
        .map(|(&value, &r)| if r { center } else { value })
        .collect();

    SigmaClipResult {
        values,
        replaced,
        median: center,
        iterations,
        converged,
    }
}
