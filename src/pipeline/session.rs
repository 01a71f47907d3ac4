use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{compositor::Compositor, pose::LandmarkSource};
use crate::{
    config::AppConfig,
    overlay::OverlayRegistry,
    types::{CameraFacing, CompositedFrame, Frame, OverlayVariant, PoseLandmarks, SessionState},
};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// User-controlled session state shared between the UI and the worker.
/// Written only by UI events, read by the worker once per frame.
#[derive(Debug)]
pub struct SessionControls {
    variant: AtomicUsize,
    back_facing: AtomicBool,
    paused: AtomicBool,
}

impl SessionControls {
    pub fn new(initial: SessionState) -> Self {
        Self {
            variant: AtomicUsize::new(initial.variant.index()),
            back_facing: AtomicBool::new(initial.facing == CameraFacing::Back),
            paused: AtomicBool::new(initial.paused),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        SessionState {
            variant: OverlayVariant::from_index(self.variant.load(Ordering::Acquire))
                .unwrap_or_default(),
            facing: if self.back_facing.load(Ordering::Acquire) {
                CameraFacing::Back
            } else {
                CameraFacing::Front
            },
            paused: self.is_paused(),
        }
    }

    pub fn set_variant(&self, variant: OverlayVariant) {
        self.variant.store(variant.index(), Ordering::Release);
    }

    pub fn set_facing(&self, facing: CameraFacing) {
        self.back_facing
            .store(facing == CameraFacing::Back, Ordering::Release);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Waits for a frame and returns the newest one queued, or `None` once
/// cancelled or the camera side hangs up.
fn recv_latest_frame(frame_rx: &Receiver<Frame>, cancel: &CancellationToken) -> Option<Frame> {
    let mut frame = loop {
        if cancel.is_cancelled() {
            return None;
        }
        match frame_rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(frame) => break frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    };
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(frame)
}

/// Stands in when the pose model cannot be loaded so the feed still renders.
struct NoLandmarks;

impl LandmarkSource for NoLandmarks {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<PoseLandmarks>> {
        Ok(None)
    }
}

/// One frame at a time: snapshot, detect, then composite. Frames that
/// arrive or finish inference while paused are dropped.
pub fn run_session_loop<S: LandmarkSource>(
    mut source: S,
    mut overlays: OverlayRegistry,
    controls: &SessionControls,
    config: &AppConfig,
    cancel: &CancellationToken,
    frame_rx: Receiver<Frame>,
    out_tx: Sender<CompositedFrame>,
) {
    let mut compositor = Compositor::new();

    while let Some(frame) = recv_latest_frame(&frame_rx, cancel) {
        overlays.poll();

        let session = controls.snapshot();
        if session.paused {
            continue;
        }

        let landmarks = match source.detect(&frame) {
            Ok(landmarks) => landmarks,
            Err(err) => {
                log::warn!("pose inference failed: {err:?}");
                None
            }
        };

        if controls.is_paused() || cancel.is_cancelled() {
            continue;
        }

        let composited =
            compositor.render(&frame, landmarks.as_ref(), &session, &overlays, config);
        // Dropped when the view has not consumed the previous frame.
        let _ = out_tx.try_send(composited);
    }

    log::info!("session worker stopped");
}

pub struct SessionWorker {
    cancel: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl SessionWorker {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts the session worker thread. `make_source` runs on that thread, and
/// if it fails the feed is composited without landmarks.
pub fn spawn_session<S, F>(
    make_source: F,
    overlays: OverlayRegistry,
    controls: Arc<SessionControls>,
    config: Arc<AppConfig>,
    frame_rx: Receiver<Frame>,
    out_tx: Sender<CompositedFrame>,
) -> SessionWorker
where
    S: LandmarkSource,
    F: FnOnce() -> Result<S> + Send + 'static,
{
    let cancel = CancellationToken::default();
    let worker_cancel = cancel.clone();

    let handle = thread::spawn(move || match make_source() {
        Ok(source) => run_session_loop(
            source,
            overlays,
            &controls,
            &config,
            &worker_cancel,
            frame_rx,
            out_tx,
        ),
        Err(err) => {
            log::error!("pose model unavailable, showing camera only: {err:?}");
            run_session_loop(
                NoLandmarks,
                overlays,
                &controls,
                &config,
                &worker_cancel,
                frame_rx,
                out_tx,
            );
        }
    });

    SessionWorker {
        cancel,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{overlay_registry, solid_frame},
        types::{BodyPoint, Landmark, POSE_LANDMARK_COUNT},
    };
    use anyhow::anyhow;
    use crossbeam_channel::bounded;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    /// Reports shoulders on every frame and counts calls. Optionally pauses
    /// the session from inside the call, as if the user pressed capture
    /// while inference was running.
    struct FakeSource {
        calls: Arc<AtomicUsize>,
        pause_during_detect: Option<Arc<SessionControls>>,
    }

    impl LandmarkSource for FakeSource {
        fn detect(&mut self, _frame: &Frame) -> Result<Option<PoseLandmarks>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(controls) = &self.pause_during_detect {
                controls.set_paused(true);
            }
            let mut points = vec![Landmark::new(0.0, 0.0, 0.0); POSE_LANDMARK_COUNT];
            points[BodyPoint::LeftShoulder as usize] = Landmark::new(0.6, 0.3, 0.9);
            points[BodyPoint::RightShoulder as usize] = Landmark::new(0.4, 0.3, 0.9);
            Ok(Some(PoseLandmarks::new(points)))
        }
    }

    struct Harness {
        worker: SessionWorker,
        controls: Arc<SessionControls>,
        calls: Arc<AtomicUsize>,
        frame_tx: Sender<Frame>,
        out_rx: Receiver<CompositedFrame>,
    }

    fn start(initial: SessionState, pause_during_detect: bool, queued: &[Frame]) -> Harness {
        let controls = Arc::new(SessionControls::new(initial));
        let calls = Arc::new(AtomicUsize::new(0));
        let (frame_tx, frame_rx) = bounded(4);
        let (out_tx, out_rx) = bounded(4);
        for frame in queued {
            frame_tx.send(frame.clone()).unwrap();
        }

        let source = FakeSource {
            calls: calls.clone(),
            pause_during_detect: pause_during_detect.then(|| controls.clone()),
        };
        let worker = spawn_session(
            move || Ok(source),
            overlay_registry(None),
            controls.clone(),
            Arc::new(AppConfig::default()),
            frame_rx,
            out_tx,
        );

        Harness {
            worker,
            controls,
            calls,
            frame_tx,
            out_rx,
        }
    }

    fn wait_for_calls(calls: &AtomicUsize, n: usize) {
        let deadline = Instant::now() + WAIT;
        while calls.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "source was not called");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_controls_snapshot_round_trips() {
        let controls = SessionControls::new(SessionState::default());
        assert_eq!(controls.snapshot(), SessionState::default());

        controls.set_variant(OverlayVariant::Female);
        controls.set_facing(CameraFacing::Back);
        controls.set_paused(true);
        assert_eq!(
            controls.snapshot(),
            SessionState {
                variant: OverlayVariant::Female,
                facing: CameraFacing::Back,
                paused: true,
            }
        );
    }

    #[test]
    fn test_live_frames_are_composited() {
        let h = start(SessionState::default(), false, &[]);
        h.frame_tx.send(solid_frame(10, 10, [0, 0, 0, 255])).unwrap();

        let out = h.out_rx.recv_timeout(WAIT).unwrap();
        assert!(out.subject_found);
        assert_eq!(out.session, SessionState::default());
        assert_eq!((out.frame.width, out.frame.height), (10, 10));
        h.worker.stop();
    }

    #[test]
    fn test_paused_frames_skip_detection() {
        let paused = SessionState {
            paused: true,
            ..SessionState::default()
        };
        let h = start(paused, false, &[]);
        h.frame_tx.send(solid_frame(4, 4, [0, 0, 0, 255])).unwrap();

        assert!(h.out_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        h.controls.set_paused(false);
        h.frame_tx.send(solid_frame(4, 4, [0, 0, 0, 255])).unwrap();
        assert!(h.out_rx.recv_timeout(WAIT).is_ok());
        h.worker.stop();
    }

    #[test]
    fn test_pause_during_inference_discards_frame() {
        let h = start(SessionState::default(), true, &[]);
        h.frame_tx.send(solid_frame(4, 4, [0, 0, 0, 255])).unwrap();

        wait_for_calls(&h.calls, 1);
        assert!(h.out_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(h.controls.is_paused());
        h.worker.stop();
    }

    #[test]
    fn test_newest_queued_frame_wins() {
        let queued = [
            solid_frame(2, 2, [0, 0, 0, 255]),
            solid_frame(3, 3, [0, 0, 0, 255]),
            solid_frame(5, 5, [0, 0, 0, 255]),
        ];
        let h = start(SessionState::default(), false, &queued);

        let out = h.out_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(out.frame.width, 5);
        assert!(h.out_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        h.worker.stop();
    }

    #[test]
    fn test_stop_joins_while_camera_is_open() {
        let h = start(SessionState::default(), false, &[]);
        let started = Instant::now();
        h.worker.stop();
        assert!(started.elapsed() < WAIT);
        // the worker hung up its output although frames could still arrive
        assert!(matches!(
            h.out_rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        ));
        drop(h.frame_tx);
    }

    #[test]
    fn test_failed_source_still_renders_feed() {
        let controls = Arc::new(SessionControls::new(SessionState::default()));
        let (frame_tx, frame_rx) = bounded(1);
        let (out_tx, out_rx) = bounded(1);
        let worker = spawn_session(
            || Err::<FakeSource, _>(anyhow!("model missing")),
            overlay_registry(None),
            controls,
            Arc::new(AppConfig::default()),
            frame_rx,
            out_tx,
        );

        frame_tx.send(solid_frame(3, 3, [9, 9, 9, 255])).unwrap();
        let out = out_rx.recv_timeout(WAIT).unwrap();
        assert!(!out.subject_found);
        assert!(out.placement.is_none());
        worker.stop();
    }
}
