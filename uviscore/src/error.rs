use thiserror::Error;

/// Errors surfaced by the rejection engines.
///
/// Shape and parameter problems are detected before any pixel is touched.
/// Degenerate statistics (zero variance, clipping that hits its iteration cap)
/// are not errors; they show up in the engine reports instead.
#[derive(Debug, Error)]
pub enum RejectionError {
    #[error("image cube shape {images:?} does not match data quality shape {data_quality:?}")]
    ShapeMismatch {
        images: [usize; 3],
        data_quality: [usize; 3],
    },

    #[error("image cube of shape {shape:?} has no time samples")]
    EmptyCube { shape: [usize; 3] },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl RejectionError {
    /// True for the shape class of errors (mismatched or empty cubes).
    pub fn is_shape_error(&self) -> bool {
        matches!(self, RejectionError::ShapeMismatch { .. } | RejectionError::EmptyCube { .. })
    }
}

pub type Result<T> = std::result::Result<T, RejectionError>;
