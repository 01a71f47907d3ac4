use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{LandmarkSource, common};
use crate::types::{Frame, PoseLandmarks};

/// MediaPipe pose landmark model running on ONNX Runtime.
pub struct OrtPoseEngine {
    session: Session,
    min_confidence: f32,
}

impl OrtPoseEngine {
    pub fn new(model_path: &Path, min_confidence: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;

        log::info!(
            "pose ORT backend ready using {} (min confidence {min_confidence})",
            model_path.display()
        );
        Ok(Self {
            session,
            min_confidence,
        })
    }
}

impl LandmarkSource for OrtPoseEngine {
    fn detect(&mut self, frame: &Frame) -> Result<Option<PoseLandmarks>> {
        let (input, letterbox) = common::prepare_frame(frame, common::INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "pose model returned {} outputs, expected landmarks and confidence",
                outputs.len()
            ));
        }

        let confidence = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0);
        if confidence < self.min_confidence {
            log::trace!("pose confidence {confidence:.3} below threshold");
            return Ok(None);
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        common::decode_landmarks(&flattened, &letterbox).map(Some)
    }
}
