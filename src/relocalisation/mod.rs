//! Relocalisation: recovering the camera pose after tracking is lost.
//!
//! A `Relocaliser` is trained online with (image, pose) pairs while tracking
//! is good and queried for ranked pose candidates when it fails.

pub mod forest_relocaliser;

use std::path::Path;

use anyhow::Result;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;
use crate::tracking::frame::{DepthImage, Intrinsics};

pub use forest_relocaliser::{
    FeatureCalculator, FeatureImages, ForestRelocaliser, ForestRelocaliserConfig, Keypoint3D,
};

/// Confidence label attached to a relocalisation candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocalisationQuality {
    Good,
    Poor,
}

/// One ranked pose candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RelocalisationResult {
    /// Camera-to-world pose.
    pub pose: SE3,
    pub quality: RelocalisationQuality,
    /// Higher is better; only meaningful within one relocaliser.
    pub score: f64,
}

pub trait Relocaliser: Send {
    /// Ranked pose candidates for the frame, best first. Empty if the frame
    /// could not be relocalised.
    fn relocalise(
        &mut self,
        rgb: &RgbaImage,
        depth: &DepthImage,
        intrinsics: &Intrinsics,
    ) -> Result<Vec<RelocalisationResult>>;

    /// Add a frame observed from `camera_pose` to the model.
    fn train(
        &mut self,
        rgb: &RgbaImage,
        depth: &DepthImage,
        intrinsics: &Intrinsics,
        camera_pose: &SE3,
    ) -> Result<()>;

    /// Lightweight per-frame maintenance, run on frames that are not trained on.
    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    /// No further `train`/`update` calls will be made.
    fn finish_training(&mut self) {}

    fn reset(&mut self);

    fn save_to_disk(&self, dir: &Path) -> Result<()>;

    fn load_from_disk(&mut self, dir: &Path) -> Result<()>;
}
