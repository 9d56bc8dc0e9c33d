//! Per-scene SLAM orchestration.
//!
//! This module contains `SlamComponent`, which drives tracking,
//! relocalisation and fusion for one scene, together with the process-wide
//! scene registry (`SlamContext`), settings, and the interfaces to the
//! external engines it drives.

pub mod context;
pub mod engine;
pub mod fusion_gate;
pub mod persistence;
pub mod settings;
mod slam_component;
pub mod slam_state;

pub use context::SlamContext;
pub use engine::{
    CalibratedViewBuilder, DenseMapper, FiducialDetector, ImageSource, MappingClient, MappingMode,
    MotionCaptureLink, RgbdCalibrationMessage, RgbdFrameMessage, SurfelMapper, TrackingMode, ViewBuilder,
};
pub use fusion_gate::FusionGate;
pub use settings::{FailureMode, SceneParams, SlamComponentSettings, SlamSettings};
pub use slam_component::{SlamComponent, SlamComponentConfig, SlamEngines};
pub use slam_state::{Fiducial, FiducialMeasurement, InputStatus, SlamState};
