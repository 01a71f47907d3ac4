use std::sync::Arc;

use image::RgbaImage;

use crate::{
    overlay::{AssetState, OverlayRegistry},
    types::Frame,
};

pub fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> Frame {
    Frame::new(rgba.repeat((width * height) as usize), width, height)
}

/// Male overlay ready with `male` (or failed when `None`), female always failed.
pub fn overlay_registry(male: Option<RgbaImage>) -> OverlayRegistry {
    let male = match male {
        Some(image) => AssetState::Ready(Arc::new(image)),
        None => AssetState::Failed("not provided".to_string()),
    };
    OverlayRegistry::with_states(male, AssetState::Failed("not provided".to_string()))
}
