//! Regression forest structure and per-pixel descent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A node of a decision tree.
///
/// Split nodes send a descriptor to `left_child` when the selected feature is
/// at most `threshold`, and to `left_child + 1` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: u32,
        threshold: f32,
        left_child: u32,
    },
    Leaf {
        leaf: u32,
    },
}

/// Errors detected while validating a forest.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForestError {
    #[error("forest has no trees")]
    Empty,
    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },
    #[error("tree {tree}: node {node} points to child {child}, but the tree has {len} nodes")]
    ChildOutOfRange {
        tree: usize,
        node: usize,
        child: usize,
        len: usize,
    },
    #[error("tree {tree}: node {node} points to itself or an ancestor (child {child})")]
    BackwardChild { tree: usize, node: usize, child: usize },
    #[error("tree {tree}: leaf {leaf} has no prediction (tree has {available} leaves)")]
    LeafOutOfRange {
        tree: usize,
        leaf: usize,
        available: usize,
    },
}

/// Immutable ensemble of decision trees.
///
/// `trees[t]` holds the nodes of tree `t`; node 0 is the root. Children are
/// always stored after their parent, which guarantees descent terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    trees: Vec<Vec<Node>>,
}

impl Forest {
    /// Build a forest, validating child offsets.
    pub fn new(trees: Vec<Vec<Node>>) -> Result<Self, ForestError> {
        if trees.is_empty() {
            return Err(ForestError::Empty);
        }

        for (t, nodes) in trees.iter().enumerate() {
            if nodes.is_empty() {
                return Err(ForestError::EmptyTree { tree: t });
            }
            for (n, node) in nodes.iter().enumerate() {
                if let Node::Split { left_child, .. } = *node {
                    let left = left_child as usize;
                    if left <= n {
                        return Err(ForestError::BackwardChild {
                            tree: t,
                            node: n,
                            child: left,
                        });
                    }
                    if left + 1 >= nodes.len() {
                        return Err(ForestError::ChildOutOfRange {
                            tree: t,
                            node: n,
                            child: left + 1,
                            len: nodes.len(),
                        });
                    }
                }
            }
        }

        Ok(Self { trees })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn nodes(&self, tree: usize) -> &[Node] {
        &self.trees[tree]
    }

    /// Number of leaves of each tree (one past the largest leaf index).
    pub fn leaf_counts(&self) -> Vec<usize> {
        self.trees
            .iter()
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| match n {
                        Node::Leaf { leaf } => Some(*leaf as usize + 1),
                        Node::Split { .. } => None,
                    })
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Descend a single tree and return the reached leaf index.
    ///
    /// A feature index beyond the descriptor length reads as zero.
    pub fn descend_tree(&self, tree: usize, descriptor: &[f32]) -> u32 {
        let nodes = &self.trees[tree];
        let mut idx = 0usize;
        loop {
            match nodes[idx] {
                Node::Leaf { leaf } => return leaf,
                Node::Split {
                    feature,
                    threshold,
                    left_child,
                } => {
                    let value = descriptor.get(feature as usize).copied().unwrap_or(0.0);
                    idx = left_child as usize + usize::from(value > threshold);
                }
            }
        }
    }

    /// Leaf index reached in every tree, in tree order.
    pub fn descend(&self, descriptor: &[f32]) -> Vec<u32> {
        (0..self.trees.len())
            .map(|t| self.descend_tree(t, descriptor))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two trees of depth 1/2 over a 2-dimensional descriptor.
    pub(crate) fn small_forest() -> Forest {
        let tree0 = vec![
            Node::Split {
                feature: 0,
                threshold: 0.5,
                left_child: 1,
            },
            Node::Leaf { leaf: 0 },
            Node::Leaf { leaf: 1 },
        ];
        let tree1 = vec![
            Node::Split {
                feature: 1,
                threshold: 0.0,
                left_child: 1,
            },
            Node::Leaf { leaf: 0 },
            Node::Split {
                feature: 0,
                threshold: 2.0,
                left_child: 3,
            },
            Node::Leaf { leaf: 1 },
            Node::Leaf { leaf: 2 },
        ];
        Forest::new(vec![tree0, tree1]).unwrap()
    }

    #[test]
    fn test_descent_follows_thresholds() {
        let forest = small_forest();

        assert_eq!(forest.descend(&[0.1, -1.0]), vec![0, 0]);
        assert_eq!(forest.descend(&[1.0, 1.0]), vec![1, 1]);
        assert_eq!(forest.descend(&[3.0, 1.0]), vec![1, 2]);
    }

    #[test]
    fn test_equal_to_threshold_goes_left() {
        let forest = small_forest();
        assert_eq!(forest.descend_tree(0, &[0.5, 0.0]), 0);
    }

    #[test]
    fn test_descent_is_deterministic() {
        let forest = small_forest();
        let descriptor = [0.75, 0.25];

        let first = forest.descend(&descriptor);
        for _ in 0..10 {
            assert_eq!(forest.descend(&descriptor), first);
        }
    }

    #[test]
    fn test_short_descriptor_reads_zero() {
        let forest = small_forest();
        assert_eq!(forest.descend(&[]), vec![0, 0]);
    }

    #[test]
    fn test_leaf_counts() {
        assert_eq!(small_forest().leaf_counts(), vec![2, 3]);
    }

    #[test]
    fn test_validation_rejects_bad_children() {
        let bad = vec![vec![
            Node::Split {
                feature: 0,
                threshold: 0.0,
                left_child: 1,
            },
            Node::Leaf { leaf: 0 },
        ]];
        assert!(matches!(Forest::new(bad), Err(ForestError::ChildOutOfRange { .. })));

        let cyclic = vec![vec![
            Node::Split {
                feature: 0,
                threshold: 0.0,
                left_child: 0,
            },
            Node::Leaf { leaf: 0 },
        ]];
        assert!(matches!(Forest::new(cyclic), Err(ForestError::BackwardChild { .. })));

        assert_eq!(Forest::new(Vec::new()), Err(ForestError::Empty));
    }
}
