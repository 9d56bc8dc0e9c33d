//! Tracking quality and per-scene tracking state.

use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

/// Quality of the pose estimate for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingQuality {
    /// Pose can be trusted.
    Good,
    /// Pose is usable but uncertain.
    Poor,
    /// Tracking failed; the pose must not be used for fusion.
    Failed,
}

impl Default for TrackingQuality {
    fn default() -> Self {
        Self::Good
    }
}

/// Current pose estimate and its quality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingState {
    pub pose: SE3,
    pub quality: TrackingQuality,
}

impl TrackingState {
    pub fn new(pose: SE3, quality: TrackingQuality) -> Self {
        Self { pose, quality }
    }

    /// Back to the identity pose with good quality.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
