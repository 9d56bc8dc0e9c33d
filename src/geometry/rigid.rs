//! Closed-form least-squares rigid alignment of matched point sets.
//!
//! Algorithm (Arun / Kabsch, scale fixed to 1):
//! 1. Compute the centroids of both point sets
//! 2. Centre the points
//! 3. Cross-covariance `A = sum(p_i * q_i^T)`
//! 4. SVD: `A = V * S * W^T`
//! 5. `R = W * diag(1, 1, d) * V^T`, with `d = -1` iff `det(V * W^T) < 0`
//! 6. `t = c_q - R * c_p`

use nalgebra::{Matrix3, Matrix4, Vector3};

use super::SE3;

/// Estimate the rigid transform `(R, t)` such that `q_i ≈ R * p_i + t`.
///
/// Needs at least three correspondences and equally sized inputs. The
/// returned rotation is always proper (det = +1).
pub fn estimate_rigid_transform_rt(
    p: &[Vector3<f64>],
    q: &[Vector3<f64>],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    if p.len() < 3 || p.len() != q.len() {
        return None;
    }

    let centroid_p = compute_centroid(p);
    let centroid_q = compute_centroid(q);

    let mut a = Matrix3::zeros();
    for (pi, qi) in p.iter().zip(q) {
        a += (pi - centroid_p) * (qi - centroid_q).transpose();
    }

    let svd = a.svd(true, true);
    let v = svd.u?;
    let w = svd.v_t?.transpose();

    let mut correction = Matrix3::identity();
    if (v * w.transpose()).determinant() < 0.0 {
        correction[(2, 2)] = -1.0;
    }

    let rotation = w * correction * v.transpose();
    let translation = centroid_q - rotation * centroid_p;
    Some((rotation, translation))
}

/// Estimate the rigid transform mapping `p` onto `q` as an `SE3`.
pub fn estimate_rigid_transform(p: &[Vector3<f64>], q: &[Vector3<f64>]) -> Option<SE3> {
    estimate_rigid_transform_rt(p, q).map(|(r, t)| SE3::from_rt(r, t))
}

/// Matrix form: the columns of `p` and `q` are the three matched points.
///
/// Returns the homogeneous transform `[R | t; 0 0 0 1]`.
pub fn estimate_rigid_transform_matrix(p: &Matrix3<f64>, q: &Matrix3<f64>) -> Option<Matrix4<f64>> {
    let ps: Vec<Vector3<f64>> = p.column_iter().map(|c| c.into_owned()).collect();
    let qs: Vec<Vector3<f64>> = q.column_iter().map(|c| c.into_owned()).collect();
    let (r, t) = estimate_rigid_transform_rt(&ps, &qs)?;

    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
    Some(m)
}

fn compute_centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}
