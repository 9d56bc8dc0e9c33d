//! Leaf predictions and the per-pixel merge of per-tree mode lists.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Maximum number of modes stored in a leaf and returned for a pixel.
pub const MAX_MODES: usize = 10;

/// A clustered 3D-location hypothesis stored in a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    /// Predicted world-space position.
    pub position: Vector3<f32>,
    /// Mean colour of the training samples in the cluster.
    pub colour: [u8; 3],
    /// Number of training samples supporting this mode.
    pub inliers: u32,
}

/// Bounded list of modes, sorted by decreasing inlier count.
///
/// Deserialised values pass through `new`, so stored lists are re-sorted and
/// capped as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredLeafPrediction")]
pub struct LeafPrediction {
    modes: Vec<Mode>,
}

#[derive(Deserialize)]
struct StoredLeafPrediction {
    modes: Vec<Mode>,
}

impl From<StoredLeafPrediction> for LeafPrediction {
    fn from(stored: StoredLeafPrediction) -> Self {
        Self::new(stored.modes)
    }
}

impl LeafPrediction {
    /// Build a prediction, sorting modes once (stable, descending inliers) and
    /// keeping at most `MAX_MODES`.
    pub fn new(mut modes: Vec<Mode>) -> Self {
        modes.sort_by(|a, b| b.inliers.cmp(&a.inliers));
        modes.truncate(MAX_MODES);
        Self { modes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// The highest-ranked mode, if any.
    pub fn best(&self) -> Option<&Mode> {
        self.modes.first()
    }
}

/// Merge the sorted mode lists of the leaves a pixel reached, one per tree.
///
/// Repeatedly emits the next mode with the largest inlier count across all
/// trees (ties go to the lowest tree index) until `MAX_MODES` modes were
/// emitted or no candidate with a positive inlier count remains. The result
/// may be shorter than `MAX_MODES`.
pub fn merge_leaf_predictions(leaves: &[&LeafPrediction]) -> LeafPrediction {
    let mut cursors = vec![0usize; leaves.len()];
    let mut merged = Vec::with_capacity(MAX_MODES);

    while merged.len() < MAX_MODES {
        let mut best_tree = None;
        let mut best_inliers = 0u32;

        for (tree, leaf) in leaves.iter().enumerate() {
            if let Some(mode) = leaf.modes.get(cursors[tree]) {
                if mode.inliers > best_inliers {
                    best_tree = Some(tree);
                    best_inliers = mode.inliers;
                }
            }
        }

        let Some(tree) = best_tree else {
            break;
        };
        merged.push(leaves[tree].modes[cursors[tree]]);
        cursors[tree] += 1;
    }

    // Already in non-increasing order; bypass `new` so nothing is re-sorted.
    LeafPrediction { modes: merged }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(inliers: u32, tag: f32) -> Mode {
        Mode {
            position: Vector3::new(tag, 0.0, 0.0),
            colour: [0, 0, 0],
            inliers,
        }
    }

    fn tags(pred: &LeafPrediction) -> Vec<f32> {
        pred.modes().iter().map(|m| m.position.x).collect()
    }

    #[test]
    fn test_new_sorts_and_bounds() {
        let modes: Vec<_> = (0..15).map(|i| mode(i, i as f32)).collect();
        let pred = LeafPrediction::new(modes);

        assert_eq!(pred.len(), MAX_MODES);
        assert_eq!(pred.best().unwrap().inliers, 14);
        assert!(pred.modes().windows(2).all(|w| w[0].inliers >= w[1].inliers));
    }

    #[test]
    fn test_merge_interleaves_by_inliers() {
        let a = LeafPrediction::new(vec![mode(10, 1.0), mode(4, 2.0)]);
        let b = LeafPrediction::new(vec![mode(7, 3.0), mode(5, 4.0)]);

        let merged = merge_leaf_predictions(&[&a, &b]);
        assert_eq!(tags(&merged), vec![1.0, 3.0, 4.0, 2.0]);
    }

    #[test]
    fn test_merge_tie_prefers_lowest_tree() {
        let a = LeafPrediction::new(vec![mode(5, 1.0)]);
        let b = LeafPrediction::new(vec![mode(5, 2.0)]);

        let merged = merge_leaf_predictions(&[&a, &b]);
        assert_eq!(tags(&merged), vec![1.0, 2.0]);
    }

    #[test]
    fn test_merge_stops_at_zero_inliers_and_empty_leaves() {
        let a = LeafPrediction::new(vec![mode(3, 1.0), mode(0, 2.0)]);
        let b = LeafPrediction::empty();

        let merged = merge_leaf_predictions(&[&a, &b]);
        assert_eq!(tags(&merged), vec![1.0]);
        assert!(merge_leaf_predictions(&[&b, &b]).is_empty());
    }

    #[test]
    fn test_merge_never_exceeds_max_modes() {
        let leaf = LeafPrediction::new((1..=MAX_MODES as u32).map(|i| mode(i, i as f32)).collect());
        let leaves = vec![&leaf; 5];

        let merged = merge_leaf_predictions(&leaves);
        assert_eq!(merged.len(), MAX_MODES);
        assert!(merged.modes().iter().all(|m| m.inliers > 0));
        assert_eq!(merge_leaf_predictions(&leaves), merged);
    }
}
