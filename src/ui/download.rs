use std::{sync::Arc, thread};

use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, Context, DownloadMessage,
    DownloadState, IntoElement, ParentElement, Screen, Sender, SharedString, Styled, StyledExt,
    Tag, div, h_flex, v_flex,
};
use crate::{
    config::AppConfig,
    model_download::{ModelDownloadEvent, ensure_model_ready},
    pipeline::{OrtPoseEngine, spawn_session},
};

impl AppView {
    pub(super) fn poll_download_events(&mut self, state: &mut DownloadState) {
        while let Ok(msg) = self.download_rx.try_recv() {
            match msg {
                DownloadMessage::Event(ModelDownloadEvent::AlreadyPresent) => {
                    state.message = "モデルは準備済みです".to_string();
                }
                DownloadMessage::Event(ModelDownloadEvent::Started { total }) => {
                    state.total = total;
                    state.message = "姿勢推定モデルをダウンロードしています...".to_string();
                }
                DownloadMessage::Event(ModelDownloadEvent::Progress { downloaded, total }) => {
                    state.downloaded = downloaded;
                    state.total = total;
                }
                DownloadMessage::Event(ModelDownloadEvent::Finished) => {
                    state.finished = true;
                    state.message = "モデルの準備ができました".to_string();
                }
                DownloadMessage::Error(err) => {
                    state.error = Some(err);
                    state.finished = false;
                    state.message = "モデルのダウンロードに失敗しました".to_string();
                }
            }
        }
    }

    /// Hands the frame channel, overlays and output sender to the worker.
    /// Runs once.
    pub(super) fn start_session_if_needed(&mut self) {
        if self.session.is_some() {
            return;
        }

        let (Some(frame_rx), Some(composited_tx), Some(overlays)) = (
            self.frame_rx.take(),
            self.composited_tx.take(),
            self.overlays.take(),
        ) else {
            log::warn!("session resources already handed off");
            return;
        };

        let pose = self.config.pose.clone();
        let worker = spawn_session(
            move || OrtPoseEngine::new(&pose.model_path, pose.min_detection_confidence),
            overlays,
            self.controls.clone(),
            self.config.clone(),
            frame_rx,
            composited_tx,
        );
        self.session = Some(worker);
    }

    /// The session still runs and shows the camera feed, just without overlays.
    fn continue_without_model(&mut self) {
        if let Screen::Download(state) = &mut self.screen {
            log::warn!("continuing without the pose model");
            state.error = None;
            state.finished = true;
        }
    }

    pub(super) fn render_download_view(
        &self,
        state: &DownloadState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();
        let bar = progress_bar_string(state.downloaded, state.total);
        let detail = match (state.total, state.finished) {
            (_, true) => "完了".to_string(),
            (Some(total), false) if total > 0 => {
                let percent = (state.downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
                format!("{percent:.1}%")
            }
            _ => format!("{} KB 受信済み", state.downloaded / 1024),
        };

        let (status_icon, status_text, status_color) = if state.error.is_some() {
            ("✗", "モデルの取得に失敗", theme.accent)
        } else if state.finished {
            ("✓", "モデル準備完了", theme.success)
        } else {
            ("⟳", "モデル準備中", theme.foreground)
        };

        let mut container = v_flex()
            .gap_3()
            .p_6()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        div()
                            .text_color(status_color)
                            .font_semibold()
                            .child(format!("{status_icon} {status_text}")),
                    )
                    .child(
                        div()
                            .text_sm()
                            .text_color(theme.muted_foreground)
                            .child("姿勢推定モデル"),
                    ),
            )
            .child(
                div()
                    .px_3()
                    .py_2()
                    .rounded_md()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.muted)
                    .font_family(theme.mono_font_family.clone())
                    .text_color(theme.foreground)
                    .child(bar),
            )
            .child(
                div()
                    .text_sm()
                    .text_color(theme.muted_foreground)
                    .child(detail),
            )
            .child(
                div()
                    .text_color(theme.foreground)
                    .child(state.message.clone()),
            );

        if let Some(err) = &state.error {
            container = container
                .child(Tag::danger().rounded_full().child(format!("エラー: {err}")))
                .child(
                    Button::new(SharedString::from("continue-without-model"))
                        .outline()
                        .label("モデルなしで続ける")
                        .on_click(cx.listener(|this, _, _, cx| {
                            this.continue_without_model();
                            cx.notify();
                        })),
                );
        }

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(container)
            .into_any_element()
    }
}

pub(super) fn spawn_model_download(
    config: Arc<AppConfig>,
    tx: Sender<DownloadMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let result = ensure_model_ready(&config.pose.model_path, &config.pose.model_url, |event| {
            let _ = tx.send(DownloadMessage::Event(event));
        });

        if let Err(err) = result {
            log::error!("failed to prepare pose model: {err:?}");
            let _ = tx.send(DownloadMessage::Error(format!("{err:#}")));
        }
    })
}

fn progress_bar_string(downloaded: u64, total: Option<u64>) -> String {
    const BAR_LEN: usize = 30;
    match total {
        Some(total) if total > 0 => {
            let pct = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
            let filled = ((pct * BAR_LEN as f64).round() as usize).min(BAR_LEN);
            format!(
                "[{}{}] {:>5.1}%",
                "=".repeat(filled),
                " ".repeat(BAR_LEN - filled),
                pct * 100.0
            )
        }
        _ => {
            let head = (downloaded / (64 * 1024)) as usize % BAR_LEN;
            format!("[{}>{}] サイズ不明", "-".repeat(head), " ".repeat(BAR_LEN - head - 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::progress_bar_string;

    #[test]
    fn test_progress_bar_known_total() {
        assert_eq!(
            progress_bar_string(50, Some(100)),
            format!("[{}{}]  50.0%", "=".repeat(15), " ".repeat(15))
        );
        assert!(progress_bar_string(500, Some(100)).ends_with("100.0%"));
    }

    #[test]
    fn test_progress_bar_unknown_total_stays_in_bounds() {
        for downloaded in [0, 64 * 1024, 29 * 64 * 1024, 1 << 40] {
            let bar = progress_bar_string(downloaded, None);
            let inner = &bar[1..bar.find(']').unwrap()];
            assert_eq!(inner.len(), 30, "{bar}");
            assert_eq!(inner.matches('>').count(), 1, "{bar}");
        }
    }
}
