use ndarray::{Array3, Axis, Zip};

use crate::cube::{CubeShape, QualityMask, TEMPORAL_OUTLIER_FLAG};
use crate::error::{RejectionError, Result};

/// Per-sample correction counts accumulated during a single engine invocation.
#[derive(Clone, Debug)]
pub struct HitMap {
    counts: Array3<u32>,
}

impl HitMap {
    pub fn new(shape: CubeShape) -> Self {
        HitMap {
            counts: Array3::zeros((shape.frames, shape.rows, shape.cols)),
        }
    }

    /// Count one correction at (frame, row, col)
    #[cfg(test)]
    pub(crate) fn record(&mut self, frame: usize, row: usize, col: usize) {
        self.counts[[frame, row, col]] += 1;
    }

    #[cfg(test)]
    pub(crate) fn count(&self, frame: usize, row: usize, col: usize) -> u32 {
        self.counts[[frame, row, col]]
    }

    pub(crate) fn counts_mut(&mut self) -> &mut Array3<u32> {
        &mut self.counts
    }

    /// Sum of all counts, a sample corrected twice counts twice
    pub fn total_corrections(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Collapse counts to 0/1 flags, consuming the map
    pub fn binarize(self) -> BinaryHitMap {
        BinaryHitMap {
            flags: self.counts.mapv_into(|c| u32::from(c > 0)),
        }
    }
}

/// Hit map reduced to one flag per sample, ready to be merged into a quality mask.
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryHitMap {
    flags: Array3<u32>,
}

impl BinaryHitMap {
    #[cfg(test)]
    pub(crate) fn flags(&self) -> &Array3<u32> {
        &self.flags
    }

    #[cfg(test)]
    pub(crate) fn is_hit(&self, frame: usize, row: usize, col: usize) -> bool {
        self.flags[[frame, row, col]] != 0
    }

    /// Number of flagged samples
    pub fn total(&self) -> usize {
        self.flags.iter().filter(|&&f| f != 0).count()
    }

    /// Number of flagged samples in each frame
    pub fn frame_counts(&self) -> Vec<usize> {
        self.flags
            .axis_iter(Axis(0))
            .map(|frame| frame.iter().filter(|&&f| f != 0).count())
            .collect()
    }

    /// (row, col) of every flagged sample, in one frame or across all frames.
    ///
    /// Across frames a location is listed once per frame it was hit in.
    pub fn locations(&self, frame: Option<usize>) -> Vec<(usize, usize)> {
        match frame {
            Some(t) => self
                .flags
                .index_axis(Axis(0), t)
                .indexed_iter()
                .filter(|(_, &f)| f != 0)
                .map(|(loc, _)| loc)
                .collect(),
            None => self
                .flags
                .indexed_iter()
                .filter(|(_, &f)| f != 0)
                .map(|((_, row, col), _)| (row, col))
                .collect(),
        }
    }

    /// OR the temporal outlier flag into `mask` wherever a sample was hit.
    ///
    /// Flags already present in the mask are preserved.
    pub fn merge_into(&self, mask: &mut QualityMask) -> Result<()> {
        if mask.dim() != self.flags.dim() {
            return Err(RejectionError::ShapeMismatch {
                images: CubeShape::of(&self.flags).as_array(),
                data_quality: CubeShape::of(mask).as_array(),
            });
        }

        Zip::from(mask).and(&self.flags).for_each(|quality, &hit| {
            if hit != 0 {
                *quality |= TEMPORAL_OUTLIER_FLAG;
            }
        });
        Ok(())
    }
}
