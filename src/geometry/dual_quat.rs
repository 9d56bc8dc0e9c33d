//! Pose blending via dual quaternions.
//!
//! A unit dual quaternion encodes rotation and translation jointly, so a
//! normalised linear combination of several of them interpolates both parts
//! consistently (dual-quaternion linear blending, Kavan et al.).

use nalgebra::{DualQuaternion, Quaternion, Translation3, UnitDualQuaternion};

use super::SE3;

/// Convert a pose to its unit dual quaternion.
pub fn pose_to_dual_quat(pose: &SE3) -> UnitDualQuaternion<f64> {
    UnitDualQuaternion::from_parts(Translation3::from(pose.translation), pose.rotation)
}

/// Convert a unit dual quaternion back to a pose.
pub fn dual_quat_to_pose(dq: &UnitDualQuaternion<f64>) -> SE3 {
    SE3 {
        rotation: dq.rotation(),
        translation: dq.translation().vector,
    }
}

/// Normalised weighted sum of unit dual quaternions.
///
/// Each quaternion is flipped onto the hemisphere of the first one before
/// accumulation, since `q` and `-q` encode the same rigid transform.
pub fn linear_blend(dqs: &[UnitDualQuaternion<f64>], weights: &[f64]) -> Option<UnitDualQuaternion<f64>> {
    let first = dqs.first()?;
    if dqs.len() != weights.len() {
        return None;
    }

    let mut real = Quaternion::new(0.0, 0.0, 0.0, 0.0);
    let mut dual = Quaternion::new(0.0, 0.0, 0.0, 0.0);
    for (dq, &w) in dqs.iter().zip(weights) {
        let sign = if dq.real.coords.dot(&first.real.coords) < 0.0 {
            -w
        } else {
            w
        };
        real += dq.real * sign;
        dual += dq.dual * sign;
    }

    if real.norm() < 1e-12 {
        return None;
    }

    Some(UnitDualQuaternion::new_normalize(
        DualQuaternion::from_real_and_dual(real, dual),
    ))
}

/// Uniformly weighted blend of a set of poses.
///
/// Returns `None` for an empty set. Blending a single pose returns that pose.
pub fn blend_poses(poses: &[SE3]) -> Option<SE3> {
    if poses.is_empty() {
        return None;
    }

    let weight = 1.0 / poses.len() as f64;
    let dqs: Vec<_> = poses.iter().map(pose_to_dual_quat).collect();
    let weights = vec![weight; dqs.len()];

    linear_blend(&dqs, &weights).map(|dq| dual_quat_to_pose(&dq))
}
