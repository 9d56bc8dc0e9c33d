//! Consensus voting over pose hypotheses.
//!
//! Each hypothesis votes for every hypothesis that is "similar" to it (within
//! a rotation-angle and a translation-distance threshold). The hypothesis
//! with the largest support wins; ties go to the earliest inserted one.

use super::SE3;

/// Result of a consensus vote.
#[derive(Debug, Clone)]
pub struct BestHypothesis<K> {
    /// Identifier of the winning hypothesis.
    pub id: K,
    /// The winning pose.
    pub pose: SE3,
    /// All hypotheses similar to the winner (including itself), in insertion order.
    pub inliers: Vec<SE3>,
}

/// True iff both the rotation-angle difference (radians) and the translation
/// distance are within the given thresholds.
pub fn poses_are_similar(pose1: &SE3, pose2: &SE3, rot_threshold: f64, trans_threshold: f64) -> bool {
    pose1.rotation_angle_to(pose2) <= rot_threshold
        && pose1.translation_distance_to(pose2) <= trans_threshold
}

/// Find the hypothesis supported by the largest number of similar hypotheses.
///
/// `hypotheses` is an insertion-ordered set of `(id, pose)` pairs. Returns
/// `None` iff it is empty. Cost is quadratic in the number of hypotheses.
pub fn find_best_hypothesis<K: Clone>(
    hypotheses: &[(K, SE3)],
    rot_threshold: f64,
    trans_threshold: f64,
) -> Option<BestHypothesis<K>> {
    let mut best: Option<BestHypothesis<K>> = None;

    for (id, pose) in hypotheses {
        let inliers: Vec<SE3> = hypotheses
            .iter()
            .filter(|(_, other)| poses_are_similar(pose, other, rot_threshold, trans_threshold))
            .map(|(_, other)| other.clone())
            .collect();

        // Strictly greater, so the earliest of equally supported hypotheses wins.
        let better = best
            .as_ref()
            .map_or(true, |b| inliers.len() > b.inliers.len());
        if better {
            best = Some(BestHypothesis {
                id: id.clone(),
                pose: pose.clone(),
                inliers,
            });
        }
    }

    best
}

/// Convenience form keyed by position in `poses`.
pub fn find_best_hypothesis_in(
    poses: &[SE3],
    rot_threshold: f64,
    trans_threshold: f64,
) -> Option<BestHypothesis<usize>> {
    let keyed: Vec<(usize, SE3)> = poses.iter().cloned().enumerate().collect();
    find_best_hypothesis(&keyed, rot_threshold, trans_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    const ROT: f64 = 0.1;
    const TRANS: f64 = 0.05;

    fn pose(rz: f64, tx: f64) -> SE3 {
        SE3::from_axis_angle(Vector3::new(0.0, 0.0, rz), Vector3::new(tx, 0.0, 0.0))
    }

    #[test]
    fn test_similarity_requires_both_thresholds() {
        let a = pose(0.0, 0.0);
        assert!(poses_are_similar(&a, &pose(0.05, 0.01), ROT, TRANS));
        assert!(!poses_are_similar(&a, &pose(0.5, 0.01), ROT, TRANS));
        assert!(!poses_are_similar(&a, &pose(0.05, 1.0), ROT, TRANS));
    }

    #[test]
    fn test_pair_beats_isolated_hypothesis() {
        let hyps = vec![
            ("a".to_string(), pose(0.0, 0.0)),
            ("b".to_string(), pose(0.02, 0.01)),
            ("c".to_string(), pose(1.5, 3.0)),
        ];

        let best = find_best_hypothesis(&hyps, ROT, TRANS).unwrap();
        assert_eq!(best.id, "a");
        assert_eq!(best.inliers.len(), 2);
    }

    #[test]
    fn test_tie_goes_to_first_inserted() {
        let hyps = vec![(7u32, pose(1.0, 5.0)), (3u32, pose(-1.0, -5.0))];

        let best = find_best_hypothesis(&hyps, ROT, TRANS).unwrap();
        assert_eq!(best.id, 7);
        assert_eq!(best.inliers.len(), 1);
    }

    #[test]
    fn test_empty_has_no_winner() {
        let hyps: Vec<(usize, SE3)> = Vec::new();
        assert!(find_best_hypothesis(&hyps, ROT, TRANS).is_none());
        assert!(find_best_hypothesis_in(&[], ROT, TRANS).is_none());
    }

    #[test]
    fn test_positional_keys() {
        let poses = vec![pose(2.0, 9.0), pose(0.0, 0.0), pose(0.01, 0.0), pose(0.0, 0.02)];

        let best = find_best_hypothesis_in(&poses, ROT, TRANS).unwrap();
        assert_eq!(best.id, 1);
        assert_eq!(best.inliers.len(), 3);
    }
}
