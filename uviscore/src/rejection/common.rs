use std::ops::RangeInclusive;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::cube::{ImageCube, Observation, QualityMask};
use crate::error::{RejectionError, Result};

/// Value written over a flagged sample
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Replacement {
    /// per-pixel median over the whole time axis
    #[default]
    GlobalMedian,
    /// per-pixel median over frames `t - window ..= t + window`, clipped at the cube edges
    WindowedMedian { window: usize },
}

impl Replacement {
    /// `None` selects the global median, `Some(w)` a window of `w` frames either side
    pub fn from_window(window: Option<usize>) -> Self {
        match window {
            None => Replacement::GlobalMedian,
            Some(window) => Replacement::WindowedMedian { window },
        }
    }

    pub fn validate(&self, frames: usize) -> Result<()> {
        match *self {
            Replacement::GlobalMedian => Ok(()),
            Replacement::WindowedMedian { window: 0 } => Err(RejectionError::InvalidParameter(
                "replacement window must be at least 1 frame".to_string(),
            )),
            Replacement::WindowedMedian { window } if window > frames => {
                Err(RejectionError::InvalidParameter(format!(
                    "replacement window {} is larger than the cube length {}",
                    window, frames
                )))
            }
            Replacement::WindowedMedian { .. } => Ok(()),
        }
    }

    /// Frames whose median replaces a flagged sample in frame `t`, `None` for the global median.
    pub fn window_range(&self, t: usize, frames: usize) -> Option<RangeInclusive<usize>> {
        match *self {
            Replacement::GlobalMedian => None,
            Replacement::WindowedMedian { window } => {
                let last = frames.saturating_sub(1);
                Some(t.saturating_sub(window)..=(t + window).min(last))
            }
        }
    }
}

/// Corrected copies produced by an engine plus its run report.
///
/// Nothing is written back into the caller's data until [`RejectionOutcome::commit`].
#[derive(Clone, Debug)]
pub struct RejectionOutcome<R> {
    pub images: ImageCube,
    pub data_quality: QualityMask,
    pub report: R,
}

impl<R> RejectionOutcome<R> {
    /// Replace the observation's images and data quality, returning the report
    pub fn commit(self, obs: &mut Observation) -> R {
        obs.images = self.images;
        obs.data_quality = self.data_quality;
        self.report
    }
}

pub(crate) fn build_pool(num_threads: usize) -> Result<ThreadPool> {
    Ok(ThreadPoolBuilder::new().num_threads(num_threads).build()?)
}

pub(crate) fn check_sigma(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RejectionError::InvalidParameter(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}
