use std::{
    fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result, anyhow};
use image::RgbaImage;

use crate::{config::CaptureConfig, types::Frame};

/// `<prefix>-<unix millis>.png`
pub fn capture_file_name(prefix: &str, at: SystemTime) -> String {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{prefix}-{millis}.png")
}

/// Writes the composited frame as a PNG into the configured output directory.
pub fn save_capture(frame: &Frame, config: &CaptureConfig, at: SystemTime) -> Result<PathBuf> {
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone()).ok_or_else(
        || {
            anyhow!(
                "capture buffer does not match {}x{}",
                frame.width,
                frame.height
            )
        },
    )?;

    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create capture directory {}",
            config.output_dir.display()
        )
    })?;

    let path = config
        .output_dir
        .join(capture_file_name(&config.file_prefix, at));
    image
        .save_with_format(&path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write capture {}", path.display()))?;

    log::info!("capture saved to {}", path.display());
    Ok(path)
}
