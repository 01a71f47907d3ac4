use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, CameraState, Context, IntoElement,
    ParentElement, Screen, SharedString, Styled, StyledExt, Tag, div, v_flex,
};
use crate::{pipeline::camera, types::CameraFacing};

impl AppView {
    pub(super) fn initial_camera_state(&mut self) -> CameraState {
        match self.start_camera(self.session_state().facing) {
            Ok(()) => CameraState::Ready,
            Err(message) => CameraState::Failed { message },
        }
    }

    /// Stops the running stream, then opens the device for `facing`.
    pub(super) fn start_camera(&mut self, facing: CameraFacing) -> Result<(), String> {
        self.stop_camera_stream();

        match camera::start_for_facing(facing, &self.config.camera, self.frame_tx.clone()) {
            Ok((device, stream)) => {
                self.camera_stream = Some(stream);
                self.camera_label = Some(device.label);
                self.camera_error = None;
                Ok(())
            }
            Err(err) => {
                log::error!("failed to start {} camera: {err:?}", facing.key());
                self.camera_label = None;
                let message = format!("カメラを起動できません: {err:#}");
                self.camera_error = Some(message.clone());
                Err(message)
            }
        }
    }

    /// Surfaces a capture thread that gave up after starting. The stream is
    /// dropped and stays down until the user retries.
    pub(super) fn poll_camera_failure(&mut self) {
        let Some(reason) = self
            .camera_stream
            .as_ref()
            .and_then(|stream| stream.take_failure())
        else {
            return;
        };
        self.stop_camera_stream();
        self.camera_error = Some(format!("カメラが停止しました: {reason}"));
    }

    pub(super) fn stop_camera_stream(&mut self) {
        if let Some(stream) = self.camera_stream.take() {
            stream.stop();
        }
    }

    pub(super) fn switch_facing(&mut self) {
        let session = self.session_state();
        if session.paused {
            return;
        }
        let facing = session.facing.toggled();
        self.controls.set_facing(facing);
        let _ = self.start_camera(facing);
    }

    /// Retries the current facing after a failure. Nothing retries on its own.
    pub(super) fn retry_camera(&mut self) {
        let next = self.initial_camera_state();
        if let Screen::Camera(state) = &mut self.screen {
            *state = next;
        }
    }

    pub(super) fn render_camera_view(
        &mut self,
        state: &mut CameraState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();
        let card = match state {
            CameraState::Failed { message } => v_flex()
                .gap_2()
                .p_4()
                .rounded_lg()
                .border_1()
                .border_color(theme.border)
                .bg(theme.group_box)
                .child(
                    div()
                        .text_sm()
                        .text_color(theme.accent)
                        .font_semibold()
                        .child("⚠ カメラを利用できません"),
                )
                .child(
                    div()
                        .text_xs()
                        .text_color(theme.muted_foreground)
                        .child("カメラの接続とアクセス許可を確認してください"),
                )
                .child(Tag::danger().rounded_full().child(message.clone()))
                .child(
                    Button::new(SharedString::from("camera-retry"))
                        .primary()
                        .label("再試行")
                        .on_click(cx.listener(|this, _, _, cx| {
                            this.retry_camera();
                            cx.notify();
                        })),
                ),
            CameraState::Ready => v_flex()
                .gap_2()
                .p_4()
                .rounded_lg()
                .border_1()
                .border_color(theme.border)
                .bg(theme.group_box)
                .child(
                    div()
                        .text_sm()
                        .text_color(theme.foreground)
                        .child("⟳ カメラを起動しています..."),
                ),
        };

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(card)
            .into_any_element()
    }
}
