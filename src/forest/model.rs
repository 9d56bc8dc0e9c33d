//! A forest together with its leaf prediction table.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::prediction::{LeafPrediction, merge_leaf_predictions};
use super::tree::{Forest, ForestError};

/// Forest structure plus, for every tree, one prediction per leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    forest: Forest,
    leaves: Vec<Vec<LeafPrediction>>,
}

impl ForestModel {
    /// Pair a forest with its leaf table, checking every reachable leaf has a
    /// prediction.
    pub fn new(forest: Forest, leaves: Vec<Vec<LeafPrediction>>) -> Result<Self, ForestError> {
        for (tree, count) in forest.leaf_counts().into_iter().enumerate() {
            let available = leaves.get(tree).map_or(0, Vec::len);
            if count > available {
                return Err(ForestError::LeafOutOfRange {
                    tree,
                    leaf: count - 1,
                    available,
                });
            }
        }
        Ok(Self { forest, leaves })
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn leaf_prediction(&self, tree: usize, leaf: u32) -> &LeafPrediction {
        &self.leaves[tree][leaf as usize]
    }

    /// Merged prediction for the leaves reached by one pixel.
    pub fn prediction_for_leaves(&self, leaf_indices: &[u32]) -> LeafPrediction {
        let selected: Vec<&LeafPrediction> = leaf_indices
            .iter()
            .enumerate()
            .map(|(tree, &leaf)| self.leaf_prediction(tree, leaf))
            .collect();
        merge_leaf_predictions(&selected)
    }

    /// Descend every tree and merge the reached leaves for one descriptor.
    pub fn predict(&self, descriptor: &[f32]) -> LeafPrediction {
        self.prediction_for_leaves(&self.forest.descend(descriptor))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write forest to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let raw: ForestModel = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse forest from {}", path.display()))?;

        // Leaf lists are normalised during parsing; the tree structure is checked here.
        let forest = Forest::new((0..raw.forest.num_trees()).map(|t| raw.forest.nodes(t).to_vec()).collect())?;
        Ok(Self::new(forest, raw.leaves)?)
    }
}
