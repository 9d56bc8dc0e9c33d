//! Camera tracking: per-frame pose estimation and its building blocks.
//!
//! - `frame`: images, calibration and the per-frame `View`
//! - `state`: tracking quality and per-scene pose state
//! - `tracker`: the `Tracker` / `FallibleTracker` capability traits
//! - `composite`: arena-backed tracker trees (fallback and refinement)
//! - `factory`: builds tracker trees from YAML documents

pub mod composite;
pub mod factory;
pub mod frame;
pub mod state;
pub mod tracker;

pub use composite::{CompositePolicy, NodeId, TrackerNode, TrackerTree};
pub use factory::{BuiltTracker, DocumentLoader, TrackerConfigError, TrackerFactory};
pub use state::{TrackingQuality, TrackingState};
pub use tracker::{FallibleTracker, Tracker};
