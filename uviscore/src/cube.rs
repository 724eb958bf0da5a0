use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{RejectionError, Result};

/// Detector intensities indexed by (time, row, column)
pub type ImageCube = Array3<f64>;

/// Per-sample defect flags, 0 = good, anything else = flagged
pub type QualityMask = Array3<u32>;

/// Bit contributed to the quality mask by temporal outlier rejection
pub const TEMPORAL_OUTLIER_FLAG: u32 = 1;

/// Dimensions of an image cube
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CubeShape {
    pub frames: usize,
    pub rows: usize,
    pub cols: usize,
}

impl CubeShape {
    pub fn new(frames: usize, rows: usize, cols: usize) -> Self {
        CubeShape { frames, rows, cols }
    }

    pub fn of<A>(cube: &Array3<A>) -> Self {
        let (frames, rows, cols) = cube.dim();
        CubeShape { frames, rows, cols }
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.frames, self.rows, self.cols]
    }

    /// Number of spatial pixel locations in one frame
    pub fn pixels(&self) -> usize {
        self.rows * self.cols
    }

    /// Number of samples in the whole cube
    pub fn samples(&self) -> usize {
        self.frames * self.pixels()
    }

    /// Map a flat pixel index (row-major) to its (row, col) location
    pub fn location(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }

    /// Map a (row, col) location to its flat pixel index
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }
}

/// Check that images and data quality describe the same non-empty cube.
///
/// # Arguments
///
/// * `images` - image cube
/// * `data_quality` - quality mask that must share the cube's shape
///
/// # Returns
///
/// * `CubeShape` - the common shape
///
pub fn check_shapes(images: &ImageCube, data_quality: &QualityMask) -> Result<CubeShape> {
    let shape = CubeShape::of(images);
    let mask_shape = CubeShape::of(data_quality);

    if shape != mask_shape {
        return Err(RejectionError::ShapeMismatch {
            images: shape.as_array(),
            data_quality: mask_shape.as_array(),
        });
    }

    if shape.frames == 0 {
        return Err(RejectionError::EmptyCube { shape: shape.as_array() });
    }

    Ok(shape)
}

/// A time series of detector frames together with its data quality flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub images: ImageCube,
    pub data_quality: QualityMask,
    /// Exposure times per frame, carried through untouched
    #[serde(default)]
    pub exposure_times: Vec<f64>,
}

impl Observation {
    pub fn new(images: ImageCube, data_quality: QualityMask) -> Result<Self> {
        check_shapes(&images, &data_quality)?;
        Ok(Observation {
            images,
            data_quality,
            exposure_times: Vec::new(),
        })
    }

    /// Wrap an image cube with an all-good quality mask
    pub fn with_clean_mask(images: ImageCube) -> Result<Self> {
        let data_quality = QualityMask::zeros(images.raw_dim());
        Observation::new(images, data_quality)
    }

    pub fn with_exposure_times(mut self, exposure_times: Vec<f64>) -> Self {
        self.exposure_times = exposure_times;
        self
    }

    pub fn shape(&self) -> CubeShape {
        CubeShape::of(&self.images)
    }

    /// Validate the invariants that deserialization cannot enforce
    pub fn validate(&self) -> Result<CubeShape> {
        check_shapes(&self.images, &self.data_quality)
    }

    pub fn frame(&self, index: usize) -> ArrayView2<'_, f64> {
        self.images.index_axis(Axis(0), index)
    }

    /// Number of samples carrying any data quality flag
    pub fn flagged_samples(&self) -> usize {
        self.data_quality.iter().filter(|&&flag| flag != 0).count()
    }
}
