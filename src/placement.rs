//! Fits the garment overlay to the subject's shoulders and hips.
//!
//! Everything here is a pure function of one frame's inputs. The overlay is
//! always anchored at the shoulder midpoint; its size comes from the torso
//! length when both hips are confidently detected, and from the shoulder
//! width otherwise.

use crate::{
    config::{OverlayTuning, PlacementConfig},
    types::{BodyPoint, CameraFacing, Landmark, Placement, PlacementTransform, PoseLandmarks, SizingMode},
};

/// Intrinsic pixel size of a loaded overlay image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlaySize {
    pub width: u32,
    pub height: u32,
}

/// Everything the engine needs besides the landmarks, for one frame.
#[derive(Clone, Copy, Debug)]
pub struct PlacementInput<'a> {
    pub frame_width: u32,
    pub frame_height: u32,
    /// `None` while the selected overlay is still loading or failed to load.
    pub overlay: Option<OverlaySize>,
    pub tuning: &'a OverlayTuning,
    pub thresholds: &'a PlacementConfig,
    pub facing: CameraFacing,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Point {
    x: f32,
    y: f32,
}

impl Point {
    fn midpoint(self, other: Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }

    fn distance(self, other: Point) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Computes the overlay placement, or `None` when the frame cannot carry one.
pub fn compute_placement(landmarks: &PoseLandmarks, input: &PlacementInput<'_>) -> Option<Placement> {
    let left_shoulder = landmarks.get(BodyPoint::LeftShoulder)?;
    let right_shoulder = landmarks.get(BodyPoint::RightShoulder)?;
    let min_shoulder = input.thresholds.shoulder_visibility;
    // NaN visibility must not pass the gate.
    if !(left_shoulder.visibility >= min_shoulder && right_shoulder.visibility >= min_shoulder) {
        return None;
    }

    let overlay = input.overlay.filter(|size| size.width > 0 && size.height > 0)?;

    let ls = to_pixel(left_shoulder, input);
    let rs = to_pixel(right_shoulder, input);
    let shoulder_center = ls.midpoint(rs);
    let shoulder_width = ls.distance(rs);
    let angle = (rs.y - ls.y).atan2(rs.x - ls.x);

    let tuning = input.tuning;
    let (width, height, sizing) = match visible_hips(landmarks, input.thresholds) {
        Some((left_hip, right_hip)) => {
            let hip_center = to_pixel(left_hip, input).midpoint(to_pixel(right_hip, input));
            let torso_length = shoulder_center.distance(hip_center);
            let height = torso_length * tuning.height_multiplier;
            let width = height * (overlay.width as f32 / overlay.height as f32);
            (width, height, SizingMode::Torso)
        }
        None => {
            let width = shoulder_width * tuning.scale_factor;
            let height = width * (overlay.height as f32 / overlay.width as f32);
            (width, height, SizingMode::ShoulderWidth)
        }
    };

    Some(Placement {
        transform: PlacementTransform {
            anchor_x: shoulder_center.x,
            anchor_y: shoulder_center.y,
            rotation: angle,
            width,
            height,
            vertical_flip: input.facing == CameraFacing::Back,
        },
        vertical_offset: height * (0.5 - tuning.shoulder_y_ratio),
        sizing,
    })
}

fn visible_hips<'a>(
    landmarks: &'a PoseLandmarks,
    thresholds: &PlacementConfig,
) -> Option<(&'a Landmark, &'a Landmark)> {
    let left = landmarks.get(BodyPoint::LeftHip)?;
    let right = landmarks.get(BodyPoint::RightHip)?;
    let min_hip = thresholds.hip_visibility;
    (left.visibility > min_hip && right.visibility > min_hip).then_some((left, right))
}

fn to_pixel(landmark: &Landmark, input: &PlacementInput<'_>) -> Point {
    Point {
        x: input.facing.correct_x(landmark.x) * input.frame_width as f32,
        y: landmark.y * input.frame_height as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::POSE_LANDMARK_COUNT;
    use std::f32::consts::PI;

    const EPS: f32 = 1e-3;

    fn make_pose(shoulders: [(f32, f32, f32); 2], hips: Option<[(f32, f32, f32); 2]>) -> PoseLandmarks {
        let mut points = vec![Landmark::new(0.0, 0.0, 0.0); POSE_LANDMARK_COUNT];
        let [ls, rs] = shoulders;
        points[BodyPoint::LeftShoulder as usize] = Landmark::new(ls.0, ls.1, ls.2);
        points[BodyPoint::RightShoulder as usize] = Landmark::new(rs.0, rs.1, rs.2);
        if let Some([lh, rh]) = hips {
            points[BodyPoint::LeftHip as usize] = Landmark::new(lh.0, lh.1, lh.2);
            points[BodyPoint::RightHip as usize] = Landmark::new(rh.0, rh.1, rh.2);
        }
        PoseLandmarks::new(points)
    }

    fn input<'a>(
        tuning: &'a OverlayTuning,
        thresholds: &'a PlacementConfig,
        facing: CameraFacing,
    ) -> PlacementInput<'a> {
        PlacementInput {
            frame_width: 640,
            frame_height: 480,
            overlay: Some(OverlaySize {
                width: 400,
                height: 800,
            }),
            tuning,
            thresholds,
            facing,
        }
    }

    fn scenario_pose() -> PoseLandmarks {
        make_pose(
            [(0.6, 0.3, 0.9), (0.4, 0.3, 0.9)],
            Some([(0.55, 0.6, 0.9), (0.45, 0.6, 0.9)]),
        )
    }

    #[test]
    fn test_front_torso_scenario() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let placement =
            compute_placement(&scenario_pose(), &input(&tuning, &thresholds, CameraFacing::Front))
                .unwrap();

        let t = placement.transform;
        assert_eq!(placement.sizing, SizingMode::Torso);
        assert!((t.anchor_x - 320.0).abs() < EPS);
        assert!((t.anchor_y - 144.0).abs() < EPS);
        assert!(t.rotation.abs() < EPS);
        // torso: shoulder center (320,144) to hip center (320,288)
        assert!((t.height - 144.0 * 2.95).abs() < EPS);
        assert!((t.width - 144.0 * 2.95 * 0.5).abs() < EPS);
        assert!((placement.vertical_offset - t.height * 0.46).abs() < EPS);
        assert!(!t.vertical_flip);
    }

    #[test]
    fn test_front_torso_scenario_female() {
        let tuning = OverlayTuning::female();
        let thresholds = PlacementConfig::default();
        let placement =
            compute_placement(&scenario_pose(), &input(&tuning, &thresholds, CameraFacing::Front))
                .unwrap();

        let t = placement.transform;
        assert_eq!(placement.sizing, SizingMode::Torso);
        assert!((t.height - 144.0 * 2.75).abs() < EPS);
        assert!((t.width - 144.0 * 2.75 * 0.5).abs() < EPS);
        assert!((placement.vertical_offset - t.height * 0.46).abs() < EPS);
    }

    #[test]
    fn test_back_camera_uses_raw_x_and_flips() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let placement =
            compute_placement(&scenario_pose(), &input(&tuning, &thresholds, CameraFacing::Back))
                .unwrap();

        let t = placement.transform;
        assert!((t.anchor_x - 320.0).abs() < EPS);
        // left shoulder at 384px, right at 256px: the vector points left
        assert!((t.rotation.abs() - PI).abs() < EPS);
        assert!(t.vertical_flip);
    }

    #[test]
    fn test_mirroring_moves_anchor_off_center() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let pose = make_pose([(0.3, 0.2, 0.9), (0.1, 0.2, 0.9)], None);

        let front = compute_placement(&pose, &input(&tuning, &thresholds, CameraFacing::Front)).unwrap();
        let back = compute_placement(&pose, &input(&tuning, &thresholds, CameraFacing::Back)).unwrap();

        assert!((front.transform.anchor_x - (1.0 - 0.2) * 640.0).abs() < EPS);
        assert!((back.transform.anchor_x - 0.2 * 640.0).abs() < EPS);
        assert_eq!(front.transform.anchor_y, back.transform.anchor_y);
    }

    #[test]
    fn test_low_shoulder_visibility_yields_nothing() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let input = input(&tuning, &thresholds, CameraFacing::Front);

        let left_low = make_pose([(0.6, 0.3, 0.49), (0.4, 0.3, 0.9)], None);
        let right_low = make_pose([(0.6, 0.3, 0.9), (0.4, 0.3, 0.1)], None);
        assert!(compute_placement(&left_low, &input).is_none());
        assert!(compute_placement(&right_low, &input).is_none());

        let at_threshold = make_pose([(0.6, 0.3, 0.5), (0.4, 0.3, 0.5)], None);
        assert!(compute_placement(&at_threshold, &input).is_some());
    }

    #[test]
    fn test_nan_visibility_counts_as_hidden() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let input = input(&tuning, &thresholds, CameraFacing::Front);

        let left_nan = make_pose([(0.6, 0.3, f32::NAN), (0.4, 0.3, 0.9)], None);
        let right_nan = make_pose([(0.6, 0.3, 0.9), (0.4, 0.3, f32::NAN)], None);
        assert!(compute_placement(&left_nan, &input).is_none());
        assert!(compute_placement(&right_nan, &input).is_none());

        let hip_nan = make_pose(
            [(0.6, 0.3, 0.9), (0.4, 0.3, 0.9)],
            Some([(0.55, 0.6, f32::NAN), (0.45, 0.6, 0.9)]),
        );
        let placement = compute_placement(&hip_nan, &input).unwrap();
        assert_eq!(placement.sizing, SizingMode::ShoulderWidth);
    }

    #[test]
    fn test_missing_shoulders_yield_nothing() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let input = input(&tuning, &thresholds, CameraFacing::Front);

        let truncated = PoseLandmarks::new(vec![Landmark::new(0.5, 0.5, 1.0); 12]);
        assert!(compute_placement(&truncated, &input).is_none());
        assert!(compute_placement(&PoseLandmarks::default(), &input).is_none());
    }

    #[test]
    fn test_unready_overlay_yields_nothing() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let mut input = input(&tuning, &thresholds, CameraFacing::Front);

        input.overlay = None;
        assert!(compute_placement(&scenario_pose(), &input).is_none());

        input.overlay = Some(OverlaySize {
            width: 400,
            height: 0,
        });
        assert!(compute_placement(&scenario_pose(), &input).is_none());
    }

    #[test]
    fn test_hip_visibility_boundary_uses_fallback() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let input = input(&tuning, &thresholds, CameraFacing::Front);

        let pose = make_pose(
            [(0.6, 0.3, 0.9), (0.4, 0.3, 0.9)],
            Some([(0.55, 0.6, 0.5), (0.45, 0.6, 0.9)]),
        );
        let placement = compute_placement(&pose, &input).unwrap();
        assert_eq!(placement.sizing, SizingMode::ShoulderWidth);

        let pose = make_pose(
            [(0.6, 0.3, 0.9), (0.4, 0.3, 0.9)],
            Some([(0.55, 0.6, 0.51), (0.45, 0.6, 0.51)]),
        );
        assert_eq!(compute_placement(&pose, &input).unwrap().sizing, SizingMode::Torso);
    }

    #[test]
    fn test_shoulder_width_fallback_per_variant() {
        let thresholds = PlacementConfig::default();
        let pose = make_pose([(0.6, 0.3, 0.9), (0.4, 0.3, 0.9)], None);
        let shoulder_width = 128.0;

        let male = OverlayTuning::male();
        let placement = compute_placement(&pose, &input(&male, &thresholds, CameraFacing::Front)).unwrap();
        assert_eq!(placement.sizing, SizingMode::ShoulderWidth);
        assert!((placement.transform.width - shoulder_width * 3.7).abs() < EPS);
        assert!((placement.transform.height - shoulder_width * 3.7 * 2.0).abs() < EPS);

        let female = OverlayTuning::female();
        let placement = compute_placement(&pose, &input(&female, &thresholds, CameraFacing::Front)).unwrap();
        assert!((placement.transform.width - shoulder_width * 3.4).abs() < EPS);
        assert!((placement.vertical_offset - placement.transform.height * 0.46).abs() < EPS);
    }

    #[test]
    fn test_aspect_ratio_preserved_in_both_modes() {
        let tuning = OverlayTuning::female();
        let thresholds = PlacementConfig::default();
        let mut input = input(&tuning, &thresholds, CameraFacing::Front);
        input.overlay = Some(OverlaySize {
            width: 517,
            height: 931,
        });
        let expected = 517.0 / 931.0;

        let torso = compute_placement(&scenario_pose(), &input).unwrap().transform;
        assert!((torso.width / torso.height - expected).abs() < 1e-4);

        let shoulders = make_pose([(0.7, 0.35, 0.8), (0.35, 0.25, 0.8)], None);
        let fallback = compute_placement(&shoulders, &input).unwrap().transform;
        assert!((fallback.width / fallback.height - expected).abs() < 1e-4);
    }

    #[test]
    fn test_angle_follows_pixel_space_shoulder_vector() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let pose = make_pose([(0.6, 0.25, 0.9), (0.4, 0.35, 0.9)], None);
        let placement = compute_placement(&pose, &input(&tuning, &thresholds, CameraFacing::Front)).unwrap();

        let (x1, y1): (f32, f32) = ((1.0 - 0.6) * 640.0, 0.25 * 480.0);
        let (x2, y2): (f32, f32) = ((1.0 - 0.4) * 640.0, 0.35 * 480.0);
        let t = placement.transform;
        assert!((t.rotation - (y2 - y1).atan2(x2 - x1)).abs() < 1e-5);
        assert!((t.anchor_x - (x1 + x2) / 2.0).abs() < EPS);
        assert!((t.anchor_y - (y1 + y2) / 2.0).abs() < EPS);
    }

    #[test]
    fn test_identical_inputs_are_bit_identical() {
        let tuning = OverlayTuning::male();
        let thresholds = PlacementConfig::default();
        let input = input(&tuning, &thresholds, CameraFacing::Back);
        let a = compute_placement(&scenario_pose(), &input).unwrap();
        let b = compute_placement(&scenario_pose(), &input).unwrap();
        assert_eq!(a.transform.width.to_bits(), b.transform.width.to_bits());
        assert_eq!(a.transform.rotation.to_bits(), b.transform.rotation.to_bits());
        assert_eq!(a.vertical_offset.to_bits(), b.vertical_offset.to_bits());
        assert_eq!(a, b);
    }
}
