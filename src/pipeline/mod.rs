pub mod camera;
pub mod canvas;
pub mod compositor;
pub mod pose;
pub mod rgba_converter;
pub mod session;

pub use camera::CameraStream;
pub use pose::OrtPoseEngine;
pub use session::{SessionControls, SessionWorker, spawn_session};
