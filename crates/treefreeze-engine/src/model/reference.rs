//! Reference evaluation on raw node arrays

use super::{FittedModel, ModelError, TreeArrays};

impl TreeArrays {
    /// Class distribution of the leaf `row` lands in, normalized to sum to one.
    ///
    /// Walks from node 0 taking the left child while
    /// `row[feature] <= threshold`, the host library's split rule. A NaN
    /// feature compares false and goes right.
    pub fn predict_distribution(&self, row: &[f64], tree: usize) -> Result<Vec<f64>, ModelError> {
        let broken = |reason: String| ModelError::BrokenTree { tree, reason };
        let n_nodes = self.n_nodes();
        let mut node = 0usize;

        // A well-formed tree reaches a leaf in fewer than n_nodes steps.
        for _ in 0..=n_nodes {
            if node >= n_nodes {
                return Err(broken(format!("node {} out of range", node)));
            }
            if self.is_leaf(node) {
                let counts = self
                    .value
                    .get(node)
                    .ok_or_else(|| broken(format!("no value for node {}", node)))?;
                let total: f64 = counts.iter().sum();
                return Ok(counts.iter().map(|c| c / total).collect());
            }

            let feature = usize::try_from(self.feature[node])
                .map_err(|_| broken(format!("negative feature at split {}", node)))?;
            let x = *row
                .get(feature)
                .ok_or_else(|| broken(format!("feature {} out of range", feature)))?;
            let next = if x <= self.threshold[node] {
                self.children_left[node]
            } else {
                self.children_right[node]
            };
            node = usize::try_from(next)
                .map_err(|_| broken(format!("negative child at split {}", node)))?;
        }

        Err(broken("cycle in node arrays".to_string()))
    }
}

impl FittedModel {
    /// Positive-class probability for one sample, as the host library reports it.
    ///
    /// Ensembles average the per-tree distributions in tree order.
    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ModelError> {
        if row.len() != self.n_features_in {
            return Err(ModelError::FeatureCount {
                expected: self.n_features_in,
                got: row.len(),
            });
        }

        let trees = self.trees();
        let mut sum = 0.0;
        for (i, tree) in trees.iter().enumerate() {
            let distribution = tree.predict_distribution(row, i)?;
            sum += distribution.get(1).copied().unwrap_or(0.0);
        }
        Ok(sum / trees.len() as f64)
    }

    /// [`predict_proba`](Self::predict_proba) for every row
    pub fn predict_proba_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        rows.iter().map(|row| self.predict_proba(row)).collect()
    }
}
