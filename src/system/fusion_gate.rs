//! Per-scene counters deciding whether a frame is fused into the map and
//! whether the relocaliser trains on it.

use crate::tracking::state::TrackingQuality;

#[derive(Debug, Clone)]
pub struct FusionGate {
    /// Poorly tracked frames are fused while fewer than this many frames
    /// have been fused.
    initial_frames_to_fuse: usize,
    fused_frames: usize,
    enabled: bool,
    /// Well-tracked frames seen by the training schedule.
    training_count: usize,
}

impl FusionGate {
    pub fn new(initial_frames_to_fuse: usize) -> Self {
        Self {
            initial_frames_to_fuse,
            fused_frames: 0,
            enabled: true,
            training_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.fused_frames = 0;
        self.enabled = true;
        self.training_count = 0;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn fused_frames(&self) -> usize {
        self.fused_frames
    }

    pub fn record_fused(&mut self) {
        self.fused_frames += 1;
    }

    /// Whether a frame of the given quality is fused.
    ///
    /// Failed frames never are; poor frames only during the initial grace
    /// period; nothing is fused while a fallible tracker reports loss.
    pub fn should_fuse(&self, quality: TrackingQuality, tracker_lost: bool) -> bool {
        if !self.enabled || tracker_lost {
            return false;
        }
        match quality {
            TrackingQuality::Good => true,
            TrackingQuality::Poor => self.fused_frames < self.initial_frames_to_fuse,
            TrackingQuality::Failed => false,
        }
    }

    /// Advance the training schedule for a well-tracked frame and report
    /// whether the relocaliser trains on it (every `skip`-th frame, starting
    /// with the first; `skip == 0` trains on all).
    pub fn take_training_turn(&mut self, skip: usize) -> bool {
        if skip == 0 {
            return true;
        }
        let turn = self.training_count % skip == 0;
        self.training_count += 1;
        turn
    }
}
