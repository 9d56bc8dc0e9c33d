//! Tracker capability interfaces.
//!
//! A tracker advances the pose of a scene by one frame. Concrete trackers
//! (ICP, colour alignment, file-based, ...) live outside this crate and are
//! plugged in through the tracker factory.

use crate::tracking::frame::View;
use crate::tracking::state::TrackingState;

/// Frame-to-frame pose estimator.
pub trait Tracker: Send {
    /// Estimate the pose for `view`, starting from `state.pose`, and set
    /// `state.quality` accordingly.
    fn track(&mut self, state: &mut TrackingState, view: &View);

    /// Whether the tracker needs a point cloud rendered from the map each
    /// frame (as opposed to e.g. a depth raycast or nothing at all).
    fn requires_point_cloud_rendering(&self) -> bool {
        true
    }

    /// Give the tracker a chance to set the pose before the first frame.
    fn update_initial_pose(&mut self, _state: &mut TrackingState) {}

    /// Trackers that can tell when they have lost track expose it here.
    fn as_fallible(&self) -> Option<&dyn FallibleTracker> {
        None
    }
}

/// A tracker that can report that it has lost tracking.
pub trait FallibleTracker {
    fn lost_tracking(&self) -> bool;
}
