use std::time::Instant;

use serde::Deserialize;

/// Number of points in a BlazePose landmark set.
pub const POSE_LANDMARK_COUNT: usize = 33;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

/// A detected body point, normalized to the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self { x, y, visibility }
    }
}

/// BlazePose indices the placement engine reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum BodyPoint {
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftHip = 23,
    RightHip = 24,
}

/// One frame's pose result, ordered by the BlazePose index scheme.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseLandmarks {
    points: Vec<Landmark>,
}

impl PoseLandmarks {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn get(&self, point: BodyPoint) -> Option<&Landmark> {
        self.points.get(point as usize)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayVariant {
    #[default]
    Male,
    Female,
}

impl OverlayVariant {
    pub const ALL: [OverlayVariant; 2] = [OverlayVariant::Male, OverlayVariant::Female];

    pub fn index(self) -> usize {
        match self {
            OverlayVariant::Male => 0,
            OverlayVariant::Female => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn key(self) -> &'static str {
        match self {
            OverlayVariant::Male => "male",
            OverlayVariant::Female => "female",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OverlayVariant::Male => "男子制服",
            OverlayVariant::Female => "女子制服",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    pub fn toggled(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }

    /// Maps a normalized x coordinate into the orientation the frame is drawn in.
    pub fn correct_x(self, x: f32) -> f32 {
        match self {
            CameraFacing::Front => 1.0 - x,
            CameraFacing::Back => x,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            CameraFacing::Front => "front",
            CameraFacing::Back => "back",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CameraFacing::Front => "インカメラ",
            CameraFacing::Back => "外カメラ",
        }
    }
}

/// Where and how to draw the overlay for one frame, in canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacementTransform {
    pub anchor_x: f32,
    pub anchor_y: f32,
    pub rotation: f32,
    pub width: f32,
    pub height: f32,
    pub vertical_flip: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizingMode {
    Torso,
    ShoulderWidth,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub transform: PlacementTransform,
    /// Added to the overlay's draw origin so the neckline lands on the anchor.
    pub vertical_offset: f32,
    pub sizing: SizingMode,
}

/// Snapshot of the user-controlled state, read once per frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub variant: OverlayVariant,
    pub facing: CameraFacing,
    pub paused: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetStatus {
    Loading,
    Ready,
    Failed,
}

#[derive(Clone, Debug)]
pub struct CompositedFrame {
    pub frame: Frame,
    pub session: SessionState,
    pub subject_found: bool,
    pub placement: Option<Placement>,
    pub asset_status: AssetStatus,
}
