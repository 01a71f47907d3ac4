use crate::{
    config::AppConfig,
    overlay::OverlayRegistry,
    placement::{PlacementInput, compute_placement},
    types::{CameraFacing, CompositedFrame, Frame, Placement, PoseLandmarks, SessionState},
};

use super::canvas::{Canvas, SourceImage};

/// Owns the output canvas and renders one camera frame at a time.
pub struct Compositor {
    canvas: Canvas,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            canvas: Canvas::new(0, 0),
        }
    }

    pub fn render(
        &mut self,
        frame: &Frame,
        landmarks: Option<&PoseLandmarks>,
        session: &SessionState,
        overlays: &OverlayRegistry,
        config: &AppConfig,
    ) -> CompositedFrame {
        self.draw_frame(frame, session.facing);

        let placement = landmarks.and_then(|landmarks| {
            self.draw_overlay(landmarks, frame.width, frame.height, session, overlays, config)
        });

        CompositedFrame {
            frame: Frame {
                rgba: self.canvas.image().as_raw().clone(),
                width: self.canvas.width(),
                height: self.canvas.height(),
                timestamp: frame.timestamp,
            },
            session: *session,
            subject_found: landmarks.is_some(),
            placement,
            asset_status: overlays.get(session.variant).status(),
        }
    }

    fn draw_frame(&mut self, frame: &Frame, facing: CameraFacing) {
        if self.canvas.resize(frame.width, frame.height) {
            log::debug!("canvas resized to {}x{}", frame.width, frame.height);
        }
        self.canvas.clear();

        let (w, h) = (frame.width as f32, frame.height as f32);
        let mut scoped = self.canvas.save();
        if facing == CameraFacing::Front {
            scoped.translate(w, 0.0);
            scoped.scale(-1.0, 1.0);
        }
        scoped.draw_image(
            SourceImage {
                rgba: &frame.rgba,
                width: frame.width,
                height: frame.height,
            },
            0.0,
            0.0,
            w,
            h,
        );
    }

    fn draw_overlay(
        &mut self,
        landmarks: &PoseLandmarks,
        frame_width: u32,
        frame_height: u32,
        session: &SessionState,
        overlays: &OverlayRegistry,
        config: &AppConfig,
    ) -> Option<Placement> {
        let asset = overlays.get(session.variant);
        let input = PlacementInput {
            frame_width,
            frame_height,
            overlay: asset.size(),
            tuning: config.overlays.tuning(session.variant),
            thresholds: &config.placement,
            facing: session.facing,
        };
        let placement = compute_placement(landmarks, &input)?;
        let image = asset.image()?;

        draw_placement(&mut self.canvas, SourceImage::from(image.as_ref()), &placement);
        Some(placement)
    }
}

/// Anchor, rotate, optionally flip, then draw with the neckline on the anchor.
pub fn draw_placement(canvas: &mut Canvas, overlay: SourceImage<'_>, placement: &Placement) {
    let t = &placement.transform;
    let mut scoped = canvas.save();
    scoped.translate(t.anchor_x, t.anchor_y);
    scoped.rotate(t.rotation);
    if t.vertical_flip {
        scoped.scale(1.0, -1.0);
    }
    scoped.draw_image(
        overlay,
        -t.width / 2.0,
        -t.height / 2.0 + placement.vertical_offset,
        t.width,
        t.height,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::canvas::Affine,
        test_utils::{overlay_registry, solid_frame},
        types::{AssetStatus, BodyPoint, Landmark, OverlayVariant, POSE_LANDMARK_COUNT},
    };
    use image::{Rgba, RgbaImage};

    const BLACK: [u8; 4] = [0, 0, 0, 255];
    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    fn shoulders_only() -> PoseLandmarks {
        let mut points = vec![Landmark::new(0.0, 0.0, 0.0); POSE_LANDMARK_COUNT];
        points[BodyPoint::LeftShoulder as usize] = Landmark::new(0.6, 0.3, 0.9);
        points[BodyPoint::RightShoulder as usize] = Landmark::new(0.4, 0.3, 0.9);
        PoseLandmarks::new(points)
    }

    fn session(facing: CameraFacing) -> SessionState {
        SessionState {
            variant: OverlayVariant::Male,
            facing,
            paused: false,
        }
    }

    fn pixel(out: &CompositedFrame, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * out.frame.width + x) * 4) as usize;
        out.frame.rgba[idx..idx + 4].try_into().unwrap()
    }

    #[test]
    fn test_front_frame_is_mirrored() {
        let frame = Frame::new([RED, BLUE].concat(), 2, 1);
        let registry = overlay_registry(None);
        let mut compositor = Compositor::new();

        let out = compositor.render(&frame, None, &session(CameraFacing::Front), &registry, &AppConfig::default());
        assert_eq!(pixel(&out, 0, 0), BLUE);
        assert_eq!(pixel(&out, 1, 0), RED);

        let out = compositor.render(&frame, None, &session(CameraFacing::Back), &registry, &AppConfig::default());
        assert_eq!(pixel(&out, 0, 0), RED);
        assert_eq!(pixel(&out, 1, 0), BLUE);
        assert!(out.placement.is_none());
        assert!(!out.subject_found);
    }

    #[test]
    fn test_overlay_drawn_below_anchor() {
        // shoulders at 40px and 60px after mirroring, anchor (50, 30);
        // fallback width 20 * 3.7 = 74, height 148, top edge at y ≈ 24.1
        let frame = solid_frame(100, 100, BLACK);
        let overlay = RgbaImage::from_pixel(4, 8, Rgba(GREEN));
        let registry = overlay_registry(Some(overlay));
        let mut compositor = Compositor::new();

        let out = compositor.render(
            &frame,
            Some(&shoulders_only()),
            &session(CameraFacing::Front),
            &registry,
            &AppConfig::default(),
        );

        let placement = out.placement.unwrap();
        assert!((placement.transform.anchor_x - 50.0).abs() < 1e-3);
        assert!((placement.transform.width - 74.0).abs() < 1e-3);
        assert_eq!(pixel(&out, 50, 50), GREEN);
        assert_eq!(pixel(&out, 50, 20), BLACK);
        assert_eq!(pixel(&out, 5, 50), BLACK);
        assert_eq!(out.asset_status, AssetStatus::Ready);
        assert_eq!(compositor.canvas.transform(), Affine::IDENTITY);
    }

    #[test]
    fn test_back_camera_overlay_stays_upright() {
        // anchor (50, 45), top edge at y ≈ 39.1, red/blue seam at y ≈ 113.1
        let frame = solid_frame(100, 150, BLACK);
        let overlay = RgbaImage::from_fn(4, 8, |_, y| if y < 4 { Rgba(RED) } else { Rgba(BLUE) });
        let registry = overlay_registry(Some(overlay));
        let mut compositor = Compositor::new();

        for facing in [CameraFacing::Front, CameraFacing::Back] {
            let out = compositor.render(
                &frame,
                Some(&shoulders_only()),
                &session(facing),
                &registry,
                &AppConfig::default(),
            );
            assert_eq!(out.placement.unwrap().transform.vertical_flip, facing == CameraFacing::Back);
            assert_eq!(pixel(&out, 50, 50), RED, "{facing:?}");
            assert_eq!(pixel(&out, 50, 135), BLUE, "{facing:?}");
            assert_eq!(pixel(&out, 50, 30), BLACK, "{facing:?}");
        }
    }

    #[test]
    fn test_unready_overlay_draws_frame_only() {
        let frame = solid_frame(20, 20, BLACK);
        let registry = overlay_registry(None);
        let mut compositor = Compositor::new();

        let out = compositor.render(
            &frame,
            Some(&shoulders_only()),
            &session(CameraFacing::Front),
            &registry,
            &AppConfig::default(),
        );
        assert!(out.placement.is_none());
        assert!(out.subject_found);
        assert_eq!(out.asset_status, AssetStatus::Failed);
        assert!(out.frame.rgba.chunks_exact(4).all(|px| px == BLACK));
    }

    #[test]
    fn test_canvas_follows_frame_size() {
        let registry = overlay_registry(None);
        let mut compositor = Compositor::new();
        let config = AppConfig::default();

        let out = compositor.render(&solid_frame(8, 6, BLACK), None, &session(CameraFacing::Back), &registry, &config);
        assert_eq!((out.frame.width, out.frame.height), (8, 6));
        let out = compositor.render(&solid_frame(4, 3, RED), None, &session(CameraFacing::Back), &registry, &config);
        assert_eq!((out.frame.width, out.frame.height), (4, 3));
        assert_eq!(out.frame.rgba.len(), 4 * 3 * 4);
        assert_eq!(pixel(&out, 3, 2), RED);
    }
}
