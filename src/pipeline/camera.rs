use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, bounded};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::rgba_converter;
use crate::{
    config::CameraConfig,
    types::{CameraFacing, Frame},
};

// Built-in macOS cameras often reject YUYV even though it is reported.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Any decodable format, still preferring frame rate over the driver default.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

/// Consecutive read failures after which the device is treated as lost.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 50;
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    failure_rx: Receiver<String>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    /// Returns the reason the capture thread gave up, once.
    pub fn take_failure(&self) -> Option<String> {
        self.failure_rx.try_recv().ok()
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

const BACK_LABEL_HINTS: &[&str] = &["back", "rear", "environment"];

/// Picks the device for `facing`: the configured list position when it
/// exists, then a label hint for the back camera, then position 0 for front
/// and 1 (or 0) for back.
pub fn resolve_device<'a>(
    devices: &'a [CameraDevice],
    facing: CameraFacing,
    config: &CameraConfig,
) -> Option<&'a CameraDevice> {
    let configured = match facing {
        CameraFacing::Front => config.front_index,
        CameraFacing::Back => config.back_index,
    };
    if let Some(position) = configured {
        match devices.get(position) {
            Some(device) => return Some(device),
            None => log::warn!(
                "configured {} camera index {position} not found among {} devices",
                facing.key(),
                devices.len()
            ),
        }
    }

    match facing {
        CameraFacing::Front => devices.first(),
        CameraFacing::Back => devices
            .iter()
            .find(|device| {
                let label = device.label.to_lowercase();
                BACK_LABEL_HINTS.iter().any(|hint| label.contains(hint))
            })
            .or_else(|| devices.get(1))
            .or_else(|| devices.first()),
    }
}

/// Enumerates devices and starts streaming from the one matching `facing`.
pub fn start_for_facing(
    facing: CameraFacing,
    config: &CameraConfig,
    frame_tx: Sender<Frame>,
) -> Result<(CameraDevice, CameraStream)> {
    let devices = available_cameras().context("failed to enumerate cameras")?;
    let device = resolve_device(&devices, facing, config)
        .cloned()
        .ok_or_else(|| anyhow!("no camera available"))?;

    log::info!("starting {} camera: {}", facing.key(), device.label);
    let stream = start_camera_stream(device.index.clone(), frame_tx)
        .with_context(|| format!("failed to open camera {}", device.label))?;
    Ok((device, stream))
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

pub fn start_camera_stream(index: CameraIndex, frame_tx: Sender<Frame>) -> Result<CameraStream> {
    // Open once up front so the caller sees the failure.
    build_camera(index.clone())?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let (failure_tx, failure_rx) = bounded(1);

    let handle = thread::spawn(move || {
        let mut camera = match build_camera(index) {
            Ok(cam) => cam,
            Err(err) => {
                log::error!("failed to open camera: {err:?}");
                let _ = failure_tx.try_send(format!("{err:#}"));
                return;
            }
        };

        let result = run_capture_loop(
            || {
                let buffer = camera.frame()?;
                match rgba_converter::convert_camera_frame(&buffer) {
                    Ok(frame) => Ok(Some(frame)),
                    Err(err) => {
                        log::warn!("failed to decode camera frame: {err}");
                        Ok(None)
                    }
                }
            },
            &stop_flag,
            &frame_tx,
        );

        if let Err(err) = result {
            log::error!("camera capture halted: {err:?}");
            let _ = failure_tx.try_send(format!("{err:#}"));
        }

        if let Err(err) = camera.stop_stream() {
            log::warn!("failed to stop camera stream: {err:?}");
        }
        log::info!("camera stream stopped");
    });

    Ok(CameraStream {
        stop,
        failure_rx,
        handle: Some(handle),
    })
}

/// Pulls frames until `stop` is set. `next_frame` yields `Ok(None)` for a
/// frame that could not be decoded. Read errors back off briefly and the loop
/// gives up after `MAX_CONSECUTIVE_READ_ERRORS` of them in a row.
fn run_capture_loop<F>(mut next_frame: F, stop: &AtomicBool, frame_tx: &Sender<Frame>) -> Result<()>
where
    F: FnMut() -> Result<Option<Frame>>,
{
    let mut consecutive_errors = 0;

    while !stop.load(Ordering::Relaxed) {
        match next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                if let Some(frame) = frame {
                    // Dropped when the session worker is busy.
                    let _ = frame_tx.try_send(frame);
                }
            }
            Err(err) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    bail!("camera stopped delivering frames: {err:#}");
                }
                log::warn!("camera frame read failed: {err:?}");
                thread::sleep(READ_RETRY_DELAY);
            }
        }
    }

    Ok(())
}
