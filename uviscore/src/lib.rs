// error and cube model
pub mod error;
pub mod cube;
pub mod hit_map;

// algorithm module
pub mod algorithm {
    pub mod statistics;
    pub mod sigma_clip;
}

// rejection engines
pub mod rejection {
    pub mod fixed;
    pub mod free;

    mod common;
    pub use common::*;
}

// side channels
pub mod diagnostics;
pub mod progress;

pub use algorithm::sigma_clip::{sigma_clip, sigma_clip_with, SigmaClipConfig, SigmaClipResult};
pub use algorithm::statistics::Spread;
pub use cube::{CubeShape, ImageCube, Observation, QualityMask, TEMPORAL_OUTLIER_FLAG};
pub use diagnostics::{DiagnosticLevel, DiagnosticsSink, FrameRender, NullDiagnostics};
pub use error::RejectionError;
pub use hit_map::{BinaryHitMap, HitMap};
pub use progress::{LogProgress, NullProgress, ProgressSink};
pub use rejection::fixed::{FixedIterationConfig, FixedIterationRejection, FixedIterationReport, PassReport};
pub use rejection::free::{FreeIterationConfig, FreeIterationRejection, FreeIterationReport, PixelStatus};
pub use rejection::{Replacement, RejectionOutcome};
