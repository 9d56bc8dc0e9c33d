//! Regression-forest relocalisation kernel.
//!
//! - Descent: per tree, follow split nodes from the root to a leaf
//! - Merge: bounded K-way merge of the reached leaves' sorted mode lists
//!
//! Both steps are pure per-pixel functions; `kernel` maps them over images.

pub mod kernel;
pub mod model;
pub mod prediction;
pub mod tree;

pub use kernel::{DescriptorImage, evaluate_forest, predict_image, predictions_for_leaves};
pub use model::ForestModel;
pub use prediction::{LeafPrediction, MAX_MODES, Mode, merge_leaf_predictions};
pub use tree::{Forest, ForestError, Node};
