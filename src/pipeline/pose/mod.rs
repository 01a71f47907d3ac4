pub mod common;
mod ort;

use crate::types::{Frame, PoseLandmarks};

pub use self::ort::OrtPoseEngine;

/// Produces body landmarks for a frame. `Ok(None)` means no subject.
pub trait LandmarkSource: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Option<PoseLandmarks>>;
}
