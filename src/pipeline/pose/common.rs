use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, Landmark, POSE_LANDMARK_COUNT, PoseLandmarks};

pub const INPUT_SIZE: u32 = 256;
/// Each landmark row: x, y, z, visibility logit, presence logit.
const VALUES_PER_LANDMARK: usize = 5;

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Resizes the frame to fit a `target_size` square, padded with black,
/// as an NHWC tensor in [0, 1].
pub fn prepare_frame(frame: &Frame, target_size: u32) -> Result<(Array4<f32>, LetterboxInfo)> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.width == 0 || frame.height == 0 || frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {} for {}x{}",
            frame.rgba.len(),
            expected_len,
            frame.width,
            frame.height
        ));
    }

    let letterbox = letterbox_for(frame.width, frame.height, target_size);
    let new_w = (frame.width as f32 * letterbox.scale).round().max(1.0) as u32;
    let new_h = (frame.height as f32 * letterbox.scale).round().max(1.0) as u32;

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("pose input resize failed")?;
    let resized = dst_image.into_vec();

    let side = target_size as usize;
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    let src_stride = new_w as usize * 4;
    let mut canvas = vec![0u8; side * side * 4];
    for row in 0..(new_h as usize).min(side - pad_y) {
        let dst_offset = ((pad_y + row) * side + pad_x) * 4;
        let len = src_stride.min((side - pad_x) * 4);
        canvas[dst_offset..dst_offset + len]
            .copy_from_slice(&resized[row * src_stride..row * src_stride + len]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec((1, side, side, 3), normalized)
        .map_err(|err| anyhow!("failed to build pose input tensor: {err}"))?;

    Ok((input, letterbox))
}

pub fn letterbox_for(width: u32, height: u32, target_size: u32) -> LetterboxInfo {
    let scale = target_size as f32 / (width.max(height) as f32);
    let new_w = (width as f32 * scale).round().max(1.0) as i64;
    let new_h = (height as f32 * scale).round().max(1.0) as i64;
    LetterboxInfo {
        scale,
        pad_x: ((target_size as i64 - new_w) / 2).max(0) as f32,
        pad_y: ((target_size as i64 - new_h) / 2).max(0) as f32,
        orig_w: width,
        orig_h: height,
    }
}

/// Decodes the model's landmark tensor into frame-normalized landmarks.
pub fn decode_landmarks(flat: &[f32], letterbox: &LetterboxInfo) -> Result<PoseLandmarks> {
    let needed = POSE_LANDMARK_COUNT * VALUES_PER_LANDMARK;
    if flat.len() < needed {
        return Err(anyhow!(
            "unexpected pose landmarks length: got {}, need {}",
            flat.len(),
            needed
        ));
    }

    let points = flat
        .chunks_exact(VALUES_PER_LANDMARK)
        .take(POSE_LANDMARK_COUNT)
        .map(|row| {
            let px = (row[0] - letterbox.pad_x) / letterbox.scale;
            let py = (row[1] - letterbox.pad_y) / letterbox.scale;
            Landmark::new(
                px / letterbox.orig_w as f32,
                py / letterbox.orig_h as f32,
                sigmoid(row[3]),
            )
        })
        .collect();
    Ok(PoseLandmarks::new(points))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
