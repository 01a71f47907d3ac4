use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use thiserror::Error;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{format} buffer too small: got {got}, expected {expected}")]
    BufferTooSmall {
        format: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("{format} conversion failed: {message}")]
    Codec {
        format: &'static str,
        message: String,
    },
}

pub fn convert_camera_frame(buffer: &Buffer) -> Result<Frame, ConvertError> {
    let resolution = buffer.resolution();
    convert_raw(
        buffer.source_frame_format(),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

/// Converts one raw capture buffer in `format` to an RGBA frame.
pub fn convert_raw(
    format: FrameFormat,
    data: &[u8],
    width: u32,
    height: u32,
) -> Result<Frame, ConvertError> {
    let rgba = match format {
        FrameFormat::MJPEG => {
            let (rgba, width, height) = mjpeg_to_rgba(data)?;
            return Ok(Frame::new(rgba, width, height));
        }
        FrameFormat::NV12 => nv12_to_rgba(data, width, height)?,
        FrameFormat::YUYV => yuyv_to_rgba(data, width, height)?,
        FrameFormat::RAWRGB => rgb_like_to_rgba(data, width, height, false)?,
        FrameFormat::RAWBGR => rgb_like_to_rgba(data, width, height, true)?,
        FrameFormat::GRAY => gray_to_rgba(data, width, height)?,
    };
    Ok(Frame::new(rgba, width, height))
}

fn check_len(format: &'static str, data: &[u8], expected: usize) -> Result<(), ConvertError> {
    if data.len() < expected {
        return Err(ConvertError::BufferTooSmall {
            format,
            got: data.len(),
            expected,
        });
    }
    Ok(())
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let y_plane_len = pixel_count(width, height);
    let uv_plane_len = y_plane_len / 2;
    check_len("NV12", data, y_plane_len + uv_plane_len)?;

    let mut rgba = vec![0u8; y_plane_len * 4];
    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| ConvertError::Codec {
        format: "NV12",
        message: format!("{err:?}"),
    })?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    check_len("YUYV", data, pixel_count(width, height) * 2)?;

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| ConvertError::Codec {
        format: "YUYV",
        message: format!("{err:?}"),
    })?;

    Ok(rgba)
}

/// Decodes a JPEG frame, taking the dimensions from the JPEG header.
fn mjpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32), ConvertError> {
    let codec_err = |message: String| ConvertError::Codec {
        format: "MJPEG",
        message,
    };

    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder.decode().map_err(|err| codec_err(format!("{err:?}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| codec_err("missing image info".to_string()))?;
    let width = u32::try_from(info.width).map_err(|_| codec_err("width overflow".to_string()))?;
    let height =
        u32::try_from(info.height).map_err(|_| codec_err("height overflow".to_string()))?;

    check_len("MJPEG", &rgba, pixel_count(width, height) * 4)?;
    Ok((rgba, width, height))
}

fn rgb_like_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    swap_rb: bool,
) -> Result<Vec<u8>, ConvertError> {
    let format = if swap_rb { "BGR" } else { "RGB" };
    check_len(format, data, pixel_count(width, height) * 3)?;

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[..3].copy_from_slice(&[src[2], src[1], src[0]]);
            } else {
                dst[..3].copy_from_slice(src);
            }
            dst[3] = 255;
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let expected_len = pixel_count(width, height);
    check_len("GRAY", data, expected_len)?;

    let mut rgba = vec![0u8; expected_len * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_iter().copied())
        .for_each(|(dst, value)| dst.copy_from_slice(&[value, value, value, 255]));

    Ok(rgba)
}
