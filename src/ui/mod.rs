use std::{mem, path::PathBuf, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, SharedString, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div,
    img, px,
};
use gpui::prelude::FluentBuilder;
use gpui_component::{
    ActiveTheme, Root, Selectable, StyledExt,
    button::{Button, ButtonVariants},
    h_flex,
    tag::Tag,
    v_flex,
};

use crate::{
    config::AppConfig,
    model_download::ModelDownloadEvent,
    overlay::OverlayRegistry,
    pipeline::{CameraStream, SessionControls, SessionWorker},
    types::{CompositedFrame, Frame, SessionState},
};

mod camera_view;
mod download;
mod main_view;
mod render_util;

const VIEW_MIN_SIZE: (f32, f32) = (320.0, 240.0);
const VIEW_MAX_SIZE: (f32, f32) = (960.0, 720.0);
const DEFAULT_CAMERA_RATIO: f32 = 4.0 / 3.0;

pub fn launch_ui(app: &mut App, config: Arc<AppConfig>) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some("制服試着".into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(config));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct AppView {
    screen: Screen,
    config: Arc<AppConfig>,
    controls: Arc<SessionControls>,
    frame_tx: Sender<Frame>,
    frame_rx: Option<Receiver<Frame>>,
    composited_tx: Option<Sender<CompositedFrame>>,
    composited_rx: Receiver<CompositedFrame>,
    overlays: Option<OverlayRegistry>,
    session: Option<SessionWorker>,
    camera_stream: Option<CameraStream>,
    camera_label: Option<String>,
    camera_error: Option<String>,
    latest: Option<CompositedFrame>,
    latest_image: Option<Arc<RenderImage>>,
    last_saved: Option<PathBuf>,
    save_error: Option<String>,
    download_rx: Receiver<DownloadMessage>,
    _download_handle: thread::JoinHandle<()>,
}

enum Screen {
    Camera(CameraState),
    Download(DownloadState),
    Main,
}

enum CameraState {
    Failed { message: String },
    Ready,
}

struct DownloadState {
    downloaded: u64,
    total: Option<u64>,
    message: String,
    error: Option<String>,
    finished: bool,
}

impl DownloadState {
    fn new() -> Self {
        Self {
            downloaded: 0,
            total: None,
            message: "モデルを準備しています...".to_string(),
            error: None,
            finished: false,
        }
    }
}

enum DownloadMessage {
    Event(ModelDownloadEvent),
    Error(String),
}

impl AppView {
    fn new(config: Arc<AppConfig>) -> Self {
        let (frame_tx, frame_rx) = bounded(1);
        let (composited_tx, composited_rx) = bounded(1);
        let (download_tx, download_rx) = unbounded();
        let download_handle = download::spawn_model_download(config.clone(), download_tx);

        let controls = Arc::new(SessionControls::new(SessionState {
            facing: config.camera.facing,
            ..SessionState::default()
        }));
        let overlays = OverlayRegistry::load(&config.overlays);

        let mut view = Self {
            screen: Screen::Camera(CameraState::Ready),
            config,
            controls,
            frame_tx,
            frame_rx: Some(frame_rx),
            composited_tx: Some(composited_tx),
            composited_rx,
            overlays: Some(overlays),
            session: None,
            camera_stream: None,
            camera_label: None,
            camera_error: None,
            latest: None,
            latest_image: None,
            last_saved: None,
            save_error: None,
            download_rx,
            _download_handle: download_handle,
        };
        view.screen = Screen::Camera(view.initial_camera_state());
        view
    }

    fn session_state(&self) -> SessionState {
        self.controls.snapshot()
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });
        self.poll_camera_failure();

        let mut screen = mem::replace(&mut self.screen, Screen::Main);
        let view = match screen {
            Screen::Camera(mut state) => {
                let view = self.render_camera_view(&mut state, cx);
                screen = match state {
                    CameraState::Ready => Screen::Download(DownloadState::new()),
                    failed => Screen::Camera(failed),
                };
                view
            }
            Screen::Download(mut state) => {
                self.poll_download_events(&mut state);
                let should_switch = state.finished && state.error.is_none();
                let view = self.render_download_view(&state, cx);
                if should_switch {
                    self.start_session_if_needed();
                    screen = Screen::Main;
                } else {
                    screen = Screen::Download(state);
                }
                view
            }
            Screen::Main => {
                screen = Screen::Main;
                self.render_main(window, cx)
            }
        };
        self.screen = screen;
        view
    }
}
