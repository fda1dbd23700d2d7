//! Decision-tree ensemble over probe-grid samples.
//!
//! Each split probes one marker-space point (x, y in 0..1); the sampled gray
//! value below the binarization threshold routes left (dark), otherwise
//! right. Leaves vote for a marker name; the ensemble verifies when a strict
//! majority agrees.

use crate::Result;
use blockmark_core::{MarkerLabel, MarkerVocabulary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        x: f32,
        y: f32,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        label: String,
    },
}

impl TreeNode {
    fn walk<'a>(&'a self, grid: &[u8], n: usize, threshold: u8) -> &'a str {
        match self {
            TreeNode::Leaf { label } => label,
            TreeNode::Split { x, y, left, right } => {
                let gx = ((x * n as f32) as usize).min(n - 1);
                let gy = ((y * n as f32) as usize).min(n - 1);
                if grid[gy * n + gx] < threshold {
                    left.walk(grid, n, threshold)
                } else {
                    right.walk(grid, n, threshold)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<TreeNode>,
}

impl TreeEnsemble {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let ensemble: TreeEnsemble = serde_json::from_str(&text)?;
        Ok(ensemble)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Run every tree and return the winning label with its vote count.
    pub fn classify(&self, grid: &[u8], n: usize, threshold: u8) -> (MarkerLabel, usize) {
        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        for tree in &self.trees {
            *votes.entry(tree.walk(grid, n, threshold)).or_default() += 1;
        }
        let best = votes.into_iter().max_by_key(|&(_, v)| v);
        match best {
            Some((name, count)) => (MarkerVocabulary::label_from_name(name), count),
            None => (MarkerLabel::unknown(), 0),
        }
    }
}
