//! Detection oracle interface.
//!
//! The monitor treats segmentation as a black box: one frame in, a set of
//! masks out. The oracle is expensive and non-reentrant, so exactly one
//! component (the inference worker) may own an instance and invoke it.

mod stub;

pub use stub::{ScriptedOracle, StaticOracle};

use thiserror::Error;
use video_ingest::Frame;

/// One segmented object: its pixel coverage, a bounding box in frame
/// coordinates, and the model's confidence.
#[derive(Debug, Clone, Default)]
pub struct Mask {
    pub area_px: f64,
    pub bbox: [f32; 4],
    pub confidence: f32,
}

impl Mask {
    pub fn with_area(area_px: f64) -> Self {
        Self {
            area_px,
            ..Self::default()
        }
    }
}

/// All masks produced for one frame. Ephemeral; consumed within one cycle.
pub type DetectionSet = Vec<Mask>;

#[derive(Debug, Error)]
pub enum OracleError {
    /// Per-cycle inference failure; the caller skips the cycle and continues.
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

/// Black-box segmentation oracle.
///
/// `detect` is synchronous, has no latency bound, and must never run
/// concurrently with itself. Implementations take `&mut self` to make the
/// non-reentrancy part of the signature.
pub trait DetectionOracle: Send {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet, OracleError>;
}
