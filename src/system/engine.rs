//! Interfaces to the collaborators driven by the SLAM loop.
//!
//! Image acquisition, view building, volumetric fusion, remote mapping,
//! fiducial detection and motion capture all live outside this crate. The
//! loop only sees them through these traits.

use std::path::Path;

use anyhow::Result;
use image::RgbaImage;
use tracing::debug;

use crate::geometry::SE3;
use crate::system::slam_state::FiducialMeasurement;
use crate::tracking::frame::{DepthImage, ImageSize, RawDepthImage, RgbdCalibration, View};
use crate::tracking::state::TrackingState;

/// Which map representations are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingMode {
    #[default]
    VoxelsOnly,
    VoxelsAndSurfels,
}

/// Which map representation is rendered for the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    #[default]
    Voxels,
    Surfels,
}

/// Source of RGB-D frames.
pub trait ImageSource: Send {
    /// A frame can be read right now.
    fn has_images_now(&self) -> bool;

    /// More frames will arrive eventually.
    fn has_more_images(&self) -> bool;

    /// Read the next frame into the given buffers.
    fn get_images(&mut self, rgb: &mut RgbaImage, raw_depth: &mut RawDepthImage) -> Result<()>;

    fn rgb_image_size(&self) -> ImageSize;

    /// `None` if the depth images have the same size as the colour images.
    fn depth_image_size(&self) -> Option<ImageSize>;

    fn calibration(&self) -> RgbdCalibration;

    /// For sources that play several sequences back to back: the sequence
    /// currently being played has no more frames.
    fn current_sequence_exhausted(&self) -> bool {
        false
    }
}

/// Converts raw input images into a `View`.
pub trait ViewBuilder: Send {
    fn update_view(&mut self, rgb: &RgbaImage, raw_depth: &RawDepthImage, use_bilateral_filter: bool) -> Result<View>;
}

/// Builds views by converting raw depth through the sensor calibration.
///
/// Does no filtering; builders that support smoothing implement
/// `ViewBuilder` themselves.
pub struct CalibratedViewBuilder {
    calib: RgbdCalibration,
}

impl CalibratedViewBuilder {
    pub fn new(calib: RgbdCalibration) -> Self {
        Self { calib }
    }
}

impl ViewBuilder for CalibratedViewBuilder {
    fn update_view(&mut self, rgb: &RgbaImage, raw_depth: &RawDepthImage, use_bilateral_filter: bool) -> Result<View> {
        if use_bilateral_filter {
            debug!("Bilateral filtering requested but not supported; using raw depth");
        }
        let calib = self.calib;
        let depth = DepthImage::from_fn(raw_depth.width(), raw_depth.height(), |x, y| {
            image::Luma([calib.depth_to_metres(raw_depth.get_pixel(x, y).0[0])])
        });
        Ok(View {
            rgb: rgb.clone(),
            depth,
            calib,
        })
    }
}

/// Volumetric (voxel) fusion engine of one scene.
pub trait DenseMapper: Send {
    fn reset_scene(&mut self);

    /// Integrate the view into the map at the tracked pose.
    fn process_frame(&mut self, view: &View, tracking: &TrackingState, reset_visible_list: bool) -> Result<()>;

    /// Refresh the set of visible map blocks without integrating.
    fn update_visible_list(&mut self, view: &View, tracking: &TrackingState, reset_visible_list: bool) -> Result<()>;

    /// Render the map from the current pose for the next frame's tracking.
    fn prepare_for_tracking(&mut self, view: &View, tracking: &TrackingState) -> Result<()>;

    fn save_to_directory(&self, dir: &Path) -> Result<()>;

    fn load_from_directory(&mut self, dir: &Path) -> Result<()>;
}

/// Surfel fusion engine of one scene.
pub trait SurfelMapper: Send {
    fn reset_scene(&mut self);

    fn process_frame(&mut self, view: &View, tracking: &TrackingState) -> Result<()>;

    fn prepare_for_tracking(&mut self, view: &View, tracking: &TrackingState) -> Result<()>;

    /// Render the supersampled surfel index image used to find
    /// correspondences in the next frame.
    fn find_surface(&mut self, view: &View, tracking: &TrackingState) -> Result<()>;
}

/// Calibration sent once when a mapping client is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbdCalibrationMessage {
    pub calib: RgbdCalibration,
}

/// One fused frame streamed to a remote mapping server.
#[derive(Debug, Clone)]
pub struct RgbdFrameMessage {
    /// Number of frames fused before this one.
    pub frame_index: usize,
    pub pose: SE3,
    pub rgb: RgbaImage,
    pub raw_depth: RawDepthImage,
}

/// Client side of a remote mapping connection.
pub trait MappingClient: Send + Sync {
    fn send_calibration(&self, message: &RgbdCalibrationMessage) -> Result<()>;

    /// Queue a frame for sending. Returns false if the frame was dropped.
    fn push_frame(&self, message: RgbdFrameMessage) -> bool;
}

pub trait FiducialDetector: Send + Sync {
    /// Detect fiducials in the view, returning their world-space poses.
    fn detect_fiducials(&self, view: &View, camera_pose: &SE3) -> Vec<FiducialMeasurement>;

    /// Whether stable fiducials from this detector anchor the motion-capture
    /// coordinate frame.
    fn anchors_motion_capture(&self) -> bool {
        false
    }
}

/// External motion-capture system whose frame can be tied to a scene.
pub trait MotionCaptureLink: Send + Sync {
    fn world_to_mocap_transform(&self, scene_id: &str) -> Option<SE3>;

    fn set_world_to_mocap_transform(&self, scene_id: &str, transform: SE3);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::{CameraModel, Intrinsics};
    use image::Luma;

    #[test]
    fn test_calibrated_view_builder_converts_depth() {
        let calib = RgbdCalibration::shared(CameraModel {
            size: ImageSize::new(2, 1),
            intrinsics: Intrinsics::new(1.0, 1.0, 1.0, 0.5),
        });
        let mut builder = CalibratedViewBuilder::new(calib);
        let mut raw = RawDepthImage::new(2, 1);
        raw.put_pixel(0, 0, Luma([1200]));

        let view = builder.update_view(&RgbaImage::new(2, 1), &raw, false).unwrap();
        assert!((view.depth.get_pixel(0, 0).0[0] - 1.2).abs() < 1e-6);
        assert!(view.depth.get_pixel(1, 0).0[0] < 0.0);
        assert_eq!(view.calib, calib);
    }
}
