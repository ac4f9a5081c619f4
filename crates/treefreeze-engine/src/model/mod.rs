//! Fitted model snapshots
//!
//! A [`FittedModel`] is a read-only snapshot of a fitted scikit-learn tree
//! classifier: the estimator's class name and the per-tree node arrays exactly
//! as the host library stores them (`tree_.children_left`, `tree_.feature`,
//! ...). Snapshots are usually loaded from JSON.
//!
//! [`FittedModel::predict_proba`] walks these arrays the way the host library
//! does and is the reference every compiled backend is checked against.

mod reference;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Node index the host library stores for "no child"
pub const TREE_LEAF: i64 = -1;

/// Errors that can occur while loading or evaluating a snapshot
#[derive(Debug, Error)]
pub enum ModelError {
    /// Failed to read snapshot file
    #[error("Failed to read model snapshot: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse JSON
    #[error("Failed to parse model snapshot: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Sample has the wrong number of features
    #[error("Expected {expected} features, got {got}")]
    FeatureCount { expected: usize, got: usize },

    /// Tree arrays cannot be walked
    #[error("Broken tree {tree}: {reason}")]
    BrokenTree { tree: usize, reason: String },
}

/// The two supported shapes of tree classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimatorKind {
    /// One tree (`DecisionTreeClassifier`, `ExtraTreeClassifier`)
    DecisionTree,
    /// Averaged ensemble (`RandomForestClassifier`, `ExtraTreesClassifier`)
    Forest,
}

impl EstimatorKind {
    /// Map a host-library class name to its kind
    pub fn from_estimator_name(name: &str) -> Option<Self> {
        match name {
            "DecisionTreeClassifier" | "ExtraTreeClassifier" => Some(Self::DecisionTree),
            "RandomForestClassifier" | "ExtraTreesClassifier" => Some(Self::Forest),
            _ => None,
        }
    }
}

/// Node arrays of one fitted tree (`estimator.tree_`)
///
/// All arrays are indexed by node id. A node is a leaf when its left and
/// right child are equal (the host library stores `-1` for both).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeArrays {
    /// Left child per node
    pub children_left: Vec<i64>,
    /// Right child per node
    pub children_right: Vec<i64>,
    /// Split feature per node (negative for leaves)
    pub feature: Vec<i64>,
    /// Split threshold per node
    pub threshold: Vec<f64>,
    /// Per-node class distribution (counts or fractions), one entry per class
    pub value: Vec<Vec<f64>>,
}

impl TreeArrays {
    /// Number of nodes (length of `children_left`)
    pub fn n_nodes(&self) -> usize {
        self.children_left.len()
    }

    /// Whether `node` is a leaf
    pub fn is_leaf(&self, node: usize) -> bool {
        self.children_left[node] == self.children_right[node]
    }
}

/// Snapshot of a fitted tree classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FittedModel {
    /// Host-library class name, e.g. `RandomForestClassifier`
    pub estimator: String,

    /// Number of features seen during fit
    pub n_features_in: usize,

    /// Number of classes seen during fit
    pub n_classes: usize,

    /// Tree of a single-tree estimator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<TreeArrays>,

    /// Trees of an ensemble, in `estimators_` order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub estimators: Vec<TreeArrays>,
}

impl FittedModel {
    /// Snapshot of a single-tree classifier
    pub fn decision_tree(n_features_in: usize, n_classes: usize, tree: TreeArrays) -> Self {
        Self {
            estimator: "DecisionTreeClassifier".to_string(),
            n_features_in,
            n_classes,
            tree: Some(tree),
            estimators: Vec::new(),
        }
    }

    /// Snapshot of a random forest classifier
    pub fn random_forest(n_features_in: usize, n_classes: usize, trees: Vec<TreeArrays>) -> Self {
        Self {
            estimator: "RandomForestClassifier".to_string(),
            n_features_in,
            n_classes,
            tree: None,
            estimators: trees,
        }
    }

    /// Parse a JSON snapshot
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON snapshot from disk
    pub fn from_json_file(path: &Path) -> Result<Self, ModelError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Supported kind of this estimator, if any
    pub fn kind(&self) -> Option<EstimatorKind> {
        EstimatorKind::from_estimator_name(&self.estimator)
    }

    /// Trees of the model, single-tree estimators yield one
    pub fn trees(&self) -> Vec<&TreeArrays> {
        match self.kind() {
            Some(EstimatorKind::DecisionTree) => self.tree.iter().collect(),
            _ => self.estimators.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_kinds() {
        assert_eq!(
            EstimatorKind::from_estimator_name("DecisionTreeClassifier"),
            Some(EstimatorKind::DecisionTree)
        );
        assert_eq!(
            EstimatorKind::from_estimator_name("ExtraTreesClassifier"),
            Some(EstimatorKind::Forest)
        );
        assert_eq!(EstimatorKind::from_estimator_name("DecisionTreeRegressor"), None);
    }

    #[test]
    fn test_parse_snapshot() {
        let json = r#"{
            "estimator": "DecisionTreeClassifier",
            "n_features_in": 1,
            "n_classes": 2,
            "tree": {
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [0, -2, -2],
                "threshold": [2.5, -2.0, -2.0],
                "value": [[5.0, 5.0], [9.0, 1.0], [1.0, 9.0]]
            }
        }"#;

        let model = FittedModel::from_json_str(json).unwrap();
        assert_eq!(model.kind(), Some(EstimatorKind::DecisionTree));
        assert_eq!(model.trees().len(), 1);
        assert!(model.trees()[0].is_leaf(1));
        assert!(!model.trees()[0].is_leaf(0));
    }

    #[test]
    fn test_parse_invalid_json() {
        let result = FittedModel::from_json_str("{ not json");
        assert!(matches!(result, Err(ModelError::ParseError(_))));
    }
}
