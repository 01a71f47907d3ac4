use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::{CameraFacing, OverlayVariant};

const CONFIG_ENV: &str = "TRY_ON_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "try_on.toml";

const POSE_MODEL_FILENAME: &str = "pose_estimation_mediapipe_2023mar.onnx";
const POSE_MODEL_URL: &str = "https://github.com/opencv/opencv_zoo/raw/main/models/pose_estimation_mediapipe/pose_estimation_mediapipe_2023mar.onnx";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub overlays: OverlaysConfig,
    pub placement: PlacementConfig,
    pub pose: PoseConfig,
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(from = "RawOverlaysConfig")]
pub struct OverlaysConfig {
    pub male: OverlayTuning,
    pub female: OverlayTuning,
    /// Turn near-white pixels transparent when the assets are loaded.
    pub strip_white_background: bool,
    pub white_threshold: u8,
}

/// Per-garment constants. These are calibrated against the specific artwork
/// and need re-tuning for any other image.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayTuning {
    pub path: PathBuf,
    /// Overlay height as a multiple of the shoulder-to-hip distance.
    pub height_multiplier: f32,
    /// Overlay width as a multiple of the shoulder width, used without hips.
    pub scale_factor: f32,
    /// Neckline position measured from the top of the image, as a fraction of its height.
    pub shoulder_y_ratio: f32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Minimum shoulder visibility, inclusive.
    pub shoulder_visibility: f32,
    /// Hip visibility must be strictly above this for torso sizing.
    pub hip_visibility: f32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub model_path: PathBuf,
    pub model_url: String,
    pub min_detection_confidence: f32,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub facing: CameraFacing,
    pub front_index: Option<usize>,
    pub back_index: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub output_dir: PathBuf,
    pub file_prefix: String,
}

impl OverlayTuning {
    pub fn male() -> Self {
        Self {
            path: PathBuf::from("assets").join("male.png"),
            height_multiplier: 2.95,
            scale_factor: 3.7,
            shoulder_y_ratio: 0.04,
        }
    }

    pub fn female() -> Self {
        Self {
            path: PathBuf::from("assets").join("female.png"),
            height_multiplier: 2.75,
            scale_factor: 3.4,
            shoulder_y_ratio: 0.04,
        }
    }
}

// Each variant falls back to its own calibration, field by field.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawOverlaysConfig {
    male: TuningOverrides,
    female: TuningOverrides,
    strip_white_background: Option<bool>,
    white_threshold: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TuningOverrides {
    path: Option<PathBuf>,
    height_multiplier: Option<f32>,
    scale_factor: Option<f32>,
    shoulder_y_ratio: Option<f32>,
}

impl TuningOverrides {
    fn apply(self, base: OverlayTuning) -> OverlayTuning {
        OverlayTuning {
            path: self.path.unwrap_or(base.path),
            height_multiplier: self.height_multiplier.unwrap_or(base.height_multiplier),
            scale_factor: self.scale_factor.unwrap_or(base.scale_factor),
            shoulder_y_ratio: self.shoulder_y_ratio.unwrap_or(base.shoulder_y_ratio),
        }
    }
}

impl From<RawOverlaysConfig> for OverlaysConfig {
    fn from(raw: RawOverlaysConfig) -> Self {
        let defaults = OverlaysConfig::default();
        Self {
            male: raw.male.apply(defaults.male),
            female: raw.female.apply(defaults.female),
            strip_white_background: raw
                .strip_white_background
                .unwrap_or(defaults.strip_white_background),
            white_threshold: raw.white_threshold.unwrap_or(defaults.white_threshold),
        }
    }
}

impl Default for OverlaysConfig {
    fn default() -> Self {
        Self {
            male: OverlayTuning::male(),
            female: OverlayTuning::female(),
            strip_white_background: false,
            white_threshold: 200,
        }
    }
}

impl OverlaysConfig {
    pub fn tuning(&self, variant: OverlayVariant) -> &OverlayTuning {
        match variant {
            OverlayVariant::Male => &self.male,
            OverlayVariant::Female => &self.female,
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            shoulder_visibility: 0.5,
            hip_visibility: 0.5,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models").join(POSE_MODEL_FILENAME),
            model_url: POSE_MODEL_URL.to_string(),
            min_detection_confidence: 0.5,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("captures"),
            file_prefix: "kindai-uniform".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads from `$TRY_ON_CONFIG`, else `try_on.toml`, else built-in defaults.
    pub fn load() -> Result<Self> {
        let path = env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let config = Self::load_from(&path)?;
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
