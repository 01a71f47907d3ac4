use std::{sync::Arc, time::SystemTime};

use super::render_util::frame_to_image;
use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, Context, DEFAULT_CAMERA_RATIO,
    FluentBuilder, IntoElement, ObjectFit, ParentElement, RenderImage, Selectable, SharedString,
    Styled, StyledExt, StyledImage, Tag, VIEW_MAX_SIZE, VIEW_MIN_SIZE, Window, div, h_flex, img,
    px, v_flex,
};
use crate::{
    capture::save_capture,
    types::{AssetStatus, OverlayVariant, SizingMode},
};

impl AppView {
    pub(super) fn render_main(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        self.poll_composited(window, cx);

        let session = self.session_state();
        let frozen = session.paused;

        let ratio = self.view_aspect_ratio();
        let view_width = VIEW_MAX_SIZE.0.min(VIEW_MAX_SIZE.1 * ratio);
        let view_height = (view_width / ratio).clamp(VIEW_MIN_SIZE.1, VIEW_MAX_SIZE.1);

        let frame_view: AnyElement = if let Some(image) = &self.latest_image {
            img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element()
        } else {
            div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child("カメラを待っています...")
                .into_any_element()
        };

        let view_shell = div()
            .relative()
            .w(px(view_width))
            .h(px(view_height))
            .overflow_hidden()
            .rounded_lg()
            .bg(gpui::rgb(0x000000))
            .child(frame_view)
            .when(frozen, |this| {
                this.child(
                    div()
                        .absolute()
                        .top(px(12.0))
                        .left(px(12.0))
                        .child(Tag::danger().rounded_full().child("● 撮影済み")),
                )
            });

        let variant_row = OverlayVariant::ALL.iter().fold(
            h_flex().gap_2(),
            |row, &variant| {
                row.child(
                    Button::new(SharedString::from(format!("variant-{}", variant.key())))
                        .label(variant.label())
                        .selected(session.variant == variant)
                        .outline()
                        .on_click(cx.listener(move |this, _, _, cx| {
                            this.controls.set_variant(variant);
                            cx.notify();
                        })),
                )
            },
        );

        let actions = if frozen {
            h_flex()
                .gap_2()
                .child(
                    Button::new(SharedString::from("capture-save"))
                        .primary()
                        .label("保存")
                        .on_click(cx.listener(|this, _, _, cx| {
                            this.save_frozen_frame();
                            cx.notify();
                        })),
                )
                .child(
                    Button::new(SharedString::from("capture-retry"))
                        .outline()
                        .label("撮り直す")
                        .on_click(cx.listener(|this, _, _, cx| {
                            this.resume_live();
                            cx.notify();
                        })),
                )
        } else {
            h_flex()
                .gap_2()
                .child(
                    Button::new(SharedString::from("capture"))
                        .primary()
                        .label("撮影")
                        .on_click(cx.listener(|this, _, _, cx| {
                            this.freeze();
                            cx.notify();
                        })),
                )
                .child(
                    Button::new(SharedString::from("facing-toggle"))
                        .outline()
                        .label(format!("⇄ {}", session.facing.toggled().label()))
                        .on_click(cx.listener(|this, _, _, cx| {
                            this.switch_facing();
                            cx.notify();
                        })),
                )
        };

        let theme = cx.theme();

        let (camera_icon, camera_text, camera_color) = match (&self.camera_error, &self.latest) {
            (Some(_), _) => ("✗", "カメラ停止".to_string(), theme.accent),
            (None, Some(latest)) => (
                "●",
                format!(
                    "{} {}x{}",
                    session.facing.label(),
                    latest.frame.width,
                    latest.frame.height
                ),
                theme.success,
            ),
            (None, None) => ("○", "映像待ち".to_string(), theme.muted_foreground),
        };

        let asset_status = self.latest.as_ref().map(|latest| latest.asset_status);
        let (asset_icon, asset_text, asset_color) = match asset_status {
            Some(AssetStatus::Ready) => ("●", "制服画像 OK", theme.success),
            Some(AssetStatus::Failed) => ("✗", "制服画像を読み込めません", theme.accent),
            Some(AssetStatus::Loading) | None => ("○", "制服画像を読み込み中", theme.muted_foreground),
        };

        let placement = self.latest.as_ref().and_then(|latest| latest.placement);
        let subject_found = self.latest.as_ref().is_some_and(|latest| latest.subject_found);
        let (subject_icon, subject_text, subject_color) = match placement {
            Some(placement) => match placement.sizing {
                SizingMode::Torso => ("●", "フィット中 (胴体)", theme.success),
                SizingMode::ShoulderWidth => ("●", "フィット中 (肩幅)", theme.success),
            },
            None if subject_found => ("◐", "肩が見えません", theme.muted_foreground),
            None => ("○", "人物が見つかりません", theme.muted_foreground),
        };

        let status_row = h_flex()
            .gap_4()
            .text_xs()
            .child(
                div()
                    .text_color(camera_color)
                    .child(format!("{camera_icon} {camera_text}")),
            )
            .child(
                div()
                    .text_color(asset_color)
                    .child(format!("{asset_icon} {asset_text}")),
            )
            .child(
                div()
                    .text_color(subject_color)
                    .child(format!("{subject_icon} {subject_text}")),
            );

        let camera_label = self
            .camera_label
            .clone()
            .unwrap_or_else(|| "カメラ未接続".to_string());

        let mut panel = v_flex()
            .gap_3()
            .p_4()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(
                div()
                    .text_sm()
                    .font_semibold()
                    .text_color(theme.foreground)
                    .child("制服試着"),
            )
            .child(
                div()
                    .text_xs()
                    .text_color(theme.muted_foreground)
                    .overflow_hidden()
                    .text_ellipsis()
                    .whitespace_nowrap()
                    .child(camera_label),
            )
            .when(!frozen, |this| this.child(variant_row))
            .child(actions)
            .child(status_row);

        if let Some(err) = &self.camera_error {
            panel = panel.child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(Tag::danger().rounded_full().child(err.clone()))
                    .child(
                        Button::new(SharedString::from("camera-retry-main"))
                            .ghost()
                            .label("再試行")
                            .on_click(cx.listener(|this, _, _, cx| {
                                let facing = this.session_state().facing;
                                let _ = this.start_camera(facing);
                                cx.notify();
                            })),
                    ),
            );
        }

        if let Some(err) = &self.save_error {
            panel = panel.child(Tag::danger().rounded_full().child(err.clone()));
        } else if let Some(path) = &self.last_saved {
            panel = panel.child(
                div()
                    .text_xs()
                    .text_color(theme.muted_foreground)
                    .font_family(theme.mono_font_family.clone())
                    .child(format!("保存しました: {}", path.display())),
            );
        }

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .gap_3()
            .p_4()
            .bg(theme.background)
            .child(view_shell)
            .child(div().w(px(view_width)).child(panel))
            .into_any_element()
    }

    /// Takes the newest composited frame unless the view is frozen, in which
    /// case anything still queued is discarded.
    fn poll_composited(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        let mut newest = None;
        while let Ok(composited) = self.composited_rx.try_recv() {
            newest = Some(composited);
        }
        if self.session_state().paused {
            return;
        }
        let Some(composited) = newest else {
            return;
        };

        if let Some(image) = frame_to_image(&composited.frame) {
            self.replace_latest_image(image, window, cx);
        }
        self.latest = Some(composited);
    }

    fn view_aspect_ratio(&self) -> f32 {
        match &self.latest {
            Some(latest) if latest.frame.height > 0 => {
                latest.frame.width as f32 / latest.frame.height as f32
            }
            _ => DEFAULT_CAMERA_RATIO,
        }
    }

    fn freeze(&mut self) {
        if self.latest.is_none() {
            return;
        }
        self.controls.set_paused(true);
        self.last_saved = None;
        self.save_error = None;
        log::info!("view frozen for capture");
    }

    fn resume_live(&mut self) {
        self.controls.set_paused(false);
        self.save_error = None;
        log::info!("live view resumed");
    }

    fn save_frozen_frame(&mut self) {
        let Some(latest) = &self.latest else {
            return;
        };
        match save_capture(&latest.frame, &self.config.capture, SystemTime::now()) {
            Ok(path) => {
                self.last_saved = Some(path);
                self.save_error = None;
            }
            Err(err) => {
                log::error!("failed to save capture: {err:?}");
                self.save_error = Some(format!("保存に失敗しました: {err:#}"));
            }
        }
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // The sprite atlas keeps every frame until it is dropped explicitly.
            cx.drop_image(old_image, Some(window));
        }
    }
}
