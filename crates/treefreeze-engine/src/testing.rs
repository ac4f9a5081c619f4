//! Snapshot fixtures shared by unit tests

use crate::model::{FittedModel, TreeArrays, TREE_LEAF};

/// Tree arrays of a single split with two leaves
pub(crate) fn stump_arrays(feature: i64, threshold: f64, left: f64, right: f64) -> TreeArrays {
    TreeArrays {
        children_left: vec![1, TREE_LEAF, TREE_LEAF],
        children_right: vec![2, TREE_LEAF, TREE_LEAF],
        feature: vec![feature, -2, -2],
        threshold: vec![threshold, -2.0, -2.0],
        value: vec![
            vec![1.0, 1.0],
            vec![1.0 - left, left],
            vec![1.0 - right, right],
        ],
    }
}

/// One-feature decision tree with a single split
pub(crate) fn stump(feature: i64, threshold: f64, left: f64, right: f64) -> FittedModel {
    let n_features = feature as usize + 1;
    FittedModel::decision_tree(n_features, 2, stump_arrays(feature, threshold, left, right))
}

/// Random forest made of stumps `(feature, threshold, left, right)`
pub(crate) fn forest_of_stumps(stumps: &[(i64, f64, f64, f64)]) -> FittedModel {
    let n_features = stumps.iter().map(|s| s.0 as usize + 1).max().unwrap_or(1);
    let trees = stumps
        .iter()
        .map(|&(f, t, l, r)| stump_arrays(f, t, l, r))
        .collect();
    FittedModel::random_forest(n_features, 2, trees)
}

/// Two-feature depth-2 tree:
///
/// ```text
/// x0 <= 0.5 ? (x1 <= -1.25 ? 0.25 : 0.75) : 1.0
/// ```
pub(crate) fn depth_two() -> FittedModel {
    let tree = TreeArrays {
        children_left: vec![1, 2, TREE_LEAF, TREE_LEAF, TREE_LEAF],
        children_right: vec![4, 3, TREE_LEAF, TREE_LEAF, TREE_LEAF],
        feature: vec![0, 1, -2, -2, -2],
        threshold: vec![0.5, -1.25, -2.0, -2.0, -2.0],
        value: vec![
            vec![4.0, 4.0],
            vec![3.0, 2.0],
            vec![3.0, 1.0],
            vec![1.0, 3.0],
            vec![0.0, 3.0],
        ],
    };
    FittedModel::decision_tree(2, 2, tree)
}

/// One-feature tree whose left spine is `depth` splits long
pub(crate) fn chain(depth: usize) -> FittedModel {
    let mut tree = TreeArrays {
        children_left: Vec::new(),
        children_right: Vec::new(),
        feature: Vec::new(),
        threshold: Vec::new(),
        value: Vec::new(),
    };
    // Split k is node 2k, its right leaf node 2k + 1; the final left leaf closes the spine
    for k in 0..depth {
        let id = 2 * k as i64;
        tree.children_left.push(id + 2);
        tree.children_right.push(id + 1);
        tree.feature.push(0);
        tree.threshold.push(-(k as f64));
        tree.value.push(vec![1.0, 1.0]);

        tree.children_left.push(TREE_LEAF);
        tree.children_right.push(TREE_LEAF);
        tree.feature.push(-2);
        tree.threshold.push(-2.0);
        tree.value.push(vec![1.0, 3.0]);
    }
    tree.children_left.push(TREE_LEAF);
    tree.children_right.push(TREE_LEAF);
    tree.feature.push(-2);
    tree.threshold.push(-2.0);
    tree.value.push(vec![3.0, 1.0]);
    FittedModel::decision_tree(1, 2, tree)
}
