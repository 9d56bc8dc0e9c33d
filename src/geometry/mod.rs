//! Geometry utilities: SE3 transforms and geometric consensus.
//!
//! Everything here depends only on `SE3` and `nalgebra` 3-D points, so the
//! module can be used on its own.

pub mod consensus;
pub mod dual_quat;
pub mod rigid;
pub mod se3;

pub use consensus::{BestHypothesis, find_best_hypothesis, find_best_hypothesis_in, poses_are_similar};
pub use dual_quat::blend_poses;
pub use rigid::{estimate_rigid_transform, estimate_rigid_transform_matrix, estimate_rigid_transform_rt};
pub use se3::SE3;
