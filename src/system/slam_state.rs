//! Per-scene SLAM state shared between pipeline components.

use std::collections::BTreeMap;

use image::RgbaImage;

use crate::geometry::{SE3, blend_poses, poses_are_similar};
use crate::tracking::frame::{ImageSize, MaskImage, RawDepthImage, View};
use crate::tracking::state::TrackingState;

/// Whether the scene's input is delivering frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputStatus {
    #[default]
    Active,
    /// No frame now, but more are expected.
    Idle,
    /// The input will deliver no more frames.
    Terminated,
}

/// A single sighting of a fiducial marker.
#[derive(Debug, Clone, PartialEq)]
pub struct FiducialMeasurement {
    pub id: String,
    /// World-space pose of the marker.
    pub pose: SE3,
}

/// A fiducial marker tracked over several frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Fiducial {
    pub id: String,
    pub pose: SE3,
    /// Number of consistent sightings.
    pub confidence: f32,
}

impl Fiducial {
    /// Confidence at which a fiducial's pose is considered reliable.
    pub const STABLE_CONFIDENCE: f32 = 5.0;

    /// Sightings further than this from the current estimate restart it.
    const ROTATION_THRESHOLD: f64 = 0.35;
    const TRANSLATION_THRESHOLD: f64 = 0.05;

    pub fn new(id: impl Into<String>, pose: SE3) -> Self {
        Self {
            id: id.into(),
            pose,
            confidence: 1.0,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.confidence >= Self::STABLE_CONFIDENCE
    }

    /// Fold a new sighting into the estimate.
    pub fn integrate(&mut self, pose: &SE3) {
        if poses_are_similar(&self.pose, pose, Self::ROTATION_THRESHOLD, Self::TRANSLATION_THRESHOLD) {
            if let Some(blended) = blend_poses(&[self.pose.clone(), pose.clone()]) {
                self.pose = blended;
            }
            self.confidence += 1.0;
        } else {
            self.pose = pose.clone();
            self.confidence = 1.0;
        }
    }
}

/// Everything one scene's pipeline reads and writes each frame.
pub struct SlamState {
    pub input_status: InputStatus,
    pub tracking_state: TrackingState,
    /// `None` until the first frame has been processed (or models loaded).
    pub view: Option<View>,
    pub input_rgb: RgbaImage,
    pub input_raw_depth: RawDepthImage,
    /// Optional depth-validity mask applied during tracking only.
    pub input_mask: Option<MaskImage>,
    rgb_image_size: ImageSize,
    depth_image_size: ImageSize,
    fiducials: BTreeMap<String, Fiducial>,
}

impl SlamState {
    pub fn new(rgb_image_size: ImageSize, depth_image_size: ImageSize) -> Self {
        Self {
            input_status: InputStatus::default(),
            tracking_state: TrackingState::default(),
            view: None,
            input_rgb: RgbaImage::new(rgb_image_size.width, rgb_image_size.height),
            input_raw_depth: RawDepthImage::new(depth_image_size.width, depth_image_size.height),
            input_mask: None,
            rgb_image_size,
            depth_image_size,
            fiducials: BTreeMap::new(),
        }
    }

    pub fn pose(&self) -> &SE3 {
        &self.tracking_state.pose
    }

    pub fn rgb_image_size(&self) -> ImageSize {
        self.rgb_image_size
    }

    pub fn depth_image_size(&self) -> ImageSize {
        self.depth_image_size
    }

    /// Replace the input buffers with blank images of the configured sizes.
    pub fn clear_input_images(&mut self) {
        self.input_rgb = RgbaImage::new(self.rgb_image_size.width, self.rgb_image_size.height);
        self.input_raw_depth = RawDepthImage::new(self.depth_image_size.width, self.depth_image_size.height);
    }

    /// Fiducials ordered by id.
    pub fn fiducials(&self) -> &BTreeMap<String, Fiducial> {
        &self.fiducials
    }

    pub fn update_fiducials(&mut self, measurements: Vec<FiducialMeasurement>) {
        for m in measurements {
            match self.fiducials.get_mut(&m.id) {
                Some(fiducial) => fiducial.integrate(&m.pose),
                None => {
                    self.fiducials.insert(m.id.clone(), Fiducial::new(m.id, m.pose));
                }
            }
        }
    }

    pub fn clear_fiducials(&mut self) {
        self.fiducials.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn at(x: f64) -> SE3 {
        SE3::from_axis_angle(Vector3::zeros(), Vector3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_consistent_sightings_build_confidence() {
        let mut state = SlamState::new(ImageSize::new(4, 3), ImageSize::new(2, 2));
        for _ in 0..5 {
            state.update_fiducials(vec![FiducialMeasurement {
                id: "7".into(),
                pose: at(1.0),
            }]);
        }

        let fiducial = &state.fiducials()["7"];
        assert!(fiducial.is_stable());
        assert_relative_eq!(fiducial.pose.translation.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_inconsistent_sighting_restarts_estimate() {
        let mut fiducial = Fiducial::new("a", at(0.0));
        fiducial.integrate(&at(0.02));
        assert_eq!(fiducial.confidence, 2.0);
        assert_relative_eq!(fiducial.pose.translation.x, 0.01, epsilon = 1e-9);

        fiducial.integrate(&at(1.0));
        assert_eq!(fiducial.confidence, 1.0);
        assert_relative_eq!(fiducial.pose.translation.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_input_buffers_sized_per_camera() {
        let mut state = SlamState::new(ImageSize::new(4, 3), ImageSize::new(2, 2));
        assert_eq!(state.input_rgb.dimensions(), (4, 3));
        assert_eq!(state.input_raw_depth.dimensions(), (2, 2));

        state.input_rgb.put_pixel(0, 0, image::Rgba([1, 2, 3, 4]));
        state.clear_input_images();
        assert_eq!(state.input_rgb.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(state.input_status, InputStatus::Active);
    }
}
