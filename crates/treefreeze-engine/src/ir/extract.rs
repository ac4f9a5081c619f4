//! Snapshot to IR extraction

use super::{Aggregation, Forest, Node, NodeId, Tree, TreeValidationError};
use crate::model::{EstimatorKind, FittedModel, TreeArrays};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while extracting the IR
#[derive(Debug, Error, PartialEq)]
pub enum ExtractError {
    /// Estimator kind or class count the compiler does not handle
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Node arrays do not describe a valid tree
    #[error("Malformed model: tree {tree}: {reason}")]
    MalformedModel { tree: usize, reason: String },
}

impl ExtractError {
    fn malformed(tree: usize, reason: impl Into<String>) -> Self {
        Self::MalformedModel {
            tree,
            reason: reason.into(),
        }
    }
}

/// Extract the immutable IR of a fitted binary classifier.
///
/// Each tree is walked once from node 0 and its nodes renumbered into
/// pre-order, so the root is always node 0 and a left subtree precedes its
/// right sibling.
pub fn extract(model: &FittedModel) -> Result<Forest, ExtractError> {
    let kind = model.kind().ok_or_else(|| {
        ExtractError::UnsupportedModel(format!(
            "estimator `{}` is not a tree classifier",
            model.estimator
        ))
    })?;
    if model.n_classes != 2 {
        return Err(ExtractError::UnsupportedModel(format!(
            "binary classification only, model has {} classes",
            model.n_classes
        )));
    }

    let arrays = model.trees();
    if arrays.is_empty() {
        return Err(ExtractError::malformed(0, "model has no fitted trees"));
    }

    let trees = arrays
        .iter()
        .enumerate()
        .map(|(i, tree)| extract_tree(i, tree))
        .collect::<Result<Vec<_>, _>>()?;

    let aggregation = match kind {
        EstimatorKind::DecisionTree => Aggregation::Identity,
        EstimatorKind::Forest => Aggregation::Mean,
    };
    let forest = Forest::new(trees, aggregation, model.n_features_in, kind)
        .map_err(|e| ExtractError::malformed(tree_of(&e), e.to_string()))?;

    debug!(
        estimator = %model.estimator,
        trees = forest.trees().len(),
        n_features = forest.n_features(),
        "extracted tree IR"
    );
    Ok(forest)
}

fn tree_of(error: &TreeValidationError) -> usize {
    match error {
        TreeValidationError::FeatureOutOfRange { tree, .. } => *tree,
        _ => 0,
    }
}

fn extract_tree(index: usize, arrays: &TreeArrays) -> Result<Tree, ExtractError> {
    let n_nodes = arrays.n_nodes();
    if n_nodes == 0 {
        return Err(ExtractError::malformed(index, "tree has no nodes"));
    }
    let lengths = [
        arrays.children_right.len(),
        arrays.feature.len(),
        arrays.threshold.len(),
        arrays.value.len(),
    ];
    if lengths.iter().any(|&len| len != n_nodes) {
        return Err(ExtractError::malformed(
            index,
            format!("node arrays disagree in length ({} nodes)", n_nodes),
        ));
    }

    // Pre-order walk with an explicit stack; `slot` is the new id reserved
    // for the node, patched into its parent once both children are numbered.
    let mut new_id: Vec<Option<NodeId>> = vec![None; n_nodes];
    let mut nodes: Vec<Node> = Vec::with_capacity(n_nodes);
    let mut stack: Vec<usize> = vec![0];

    while let Some(old) = stack.pop() {
        if new_id[old].is_some() {
            return Err(ExtractError::malformed(
                index,
                format!("node {} is reachable more than once", old),
            ));
        }
        new_id[old] = Some(nodes.len() as NodeId);

        if arrays.is_leaf(old) {
            nodes.push(Node::Leaf {
                probability: leaf_probability(index, old, &arrays.value[old])?,
            });
            continue;
        }

        let left = child_index(index, old, arrays.children_left[old], n_nodes)?;
        let right = child_index(index, old, arrays.children_right[old], n_nodes)?;
        let feature = u32::try_from(arrays.feature[old]).map_err(|_| {
            ExtractError::malformed(
                index,
                format!("split {} has invalid feature {}", old, arrays.feature[old]),
            )
        })?;

        // Children are patched after the walk, keep the old ids for now.
        nodes.push(Node::Split {
            feature,
            threshold: arrays.threshold[old],
            left: left as NodeId,
            right: right as NodeId,
        });
        stack.push(right);
        stack.push(left);
    }

    if let Some(unreached) = new_id.iter().position(Option::is_none) {
        return Err(ExtractError::malformed(
            index,
            format!("node {} is unreachable from the root", unreached),
        ));
    }

    for node in &mut nodes {
        if let Node::Split { left, right, .. } = node {
            *left = new_id[*left as usize].unwrap_or_default();
            *right = new_id[*right as usize].unwrap_or_default();
        }
    }

    Tree::new(nodes, 0).map_err(|e| ExtractError::malformed(index, e.to_string()))
}

fn child_index(tree: usize, node: usize, child: i64, n_nodes: usize) -> Result<usize, ExtractError> {
    usize::try_from(child)
        .ok()
        .filter(|&c| c < n_nodes)
        .ok_or_else(|| {
            ExtractError::malformed(
                tree,
                format!("node {} references child {} out of bounds", node, child),
            )
        })
}

fn leaf_probability(tree: usize, node: usize, counts: &[f64]) -> Result<f64, ExtractError> {
    if counts.len() != 2 {
        return Err(ExtractError::UnsupportedModel(format!(
            "binary classification only, tree {} leaf {} has {} class values",
            tree,
            node,
            counts.len()
        )));
    }
    let total = counts[0] + counts[1];
    if !total.is_finite() || total <= 0.0 {
        return Err(ExtractError::malformed(
            tree,
            format!("leaf {} has class totals {:?}", node, counts),
        ));
    }
    Ok(counts[1] / total)
}
