//! Shared fixtures for integration tests

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use treefreeze_engine::config::CompilerConfig;
use treefreeze_engine::native::NativeCompiler;
use treefreeze_engine::{FittedModel, TreeArrays};

/// Values on a 0.01 grid, so samples regularly hit split thresholds exactly
fn grid_value(rng: &mut StdRng, bound: f64) -> f64 {
    (rng.gen_range(-bound..bound) * 100.0).round() / 100.0
}

fn grow(
    rng: &mut StdRng,
    tree: &mut TreeArrays,
    n_features: usize,
    depth: usize,
    max_depth: usize,
) -> i64 {
    let id = tree.children_left.len();
    tree.children_left.push(-1);
    tree.children_right.push(-1);
    tree.feature.push(-2);
    tree.threshold.push(-2.0);
    tree.value.push(Vec::new());

    let is_leaf = depth == max_depth || (depth > 0 && rng.gen_bool(0.25));
    if is_leaf {
        let c0 = rng.gen_range(0..20) as f64;
        let mut c1 = rng.gen_range(0..20) as f64;
        if c0 + c1 == 0.0 {
            c1 = 1.0;
        }
        tree.value[id] = vec![c0, c1];
        return id as i64;
    }

    tree.feature[id] = rng.gen_range(0..n_features) as i64;
    tree.threshold[id] = grid_value(rng, 2.0);
    let left = grow(rng, tree, n_features, depth + 1, max_depth);
    let right = grow(rng, tree, n_features, depth + 1, max_depth);
    tree.children_left[id] = left;
    tree.children_right[id] = right;

    let (l, r) = (&tree.value[left as usize], &tree.value[right as usize]);
    tree.value[id] = vec![l[0] + r[0], l[1] + r[1]];
    id as i64
}

/// Random tree grown depth-first, node ids in creation order
pub fn random_tree(rng: &mut StdRng, n_features: usize, max_depth: usize) -> TreeArrays {
    let mut tree = TreeArrays {
        children_left: Vec::new(),
        children_right: Vec::new(),
        feature: Vec::new(),
        threshold: Vec::new(),
        value: Vec::new(),
    };
    grow(rng, &mut tree, n_features, 0, max_depth);
    tree
}

/// Seeded random forest classifier snapshot
pub fn random_forest(seed: u64, n_trees: usize, n_features: usize, max_depth: usize) -> FittedModel {
    let mut rng = StdRng::seed_from_u64(seed);
    let trees = (0..n_trees)
        .map(|_| random_tree(&mut rng, n_features, max_depth))
        .collect();
    FittedModel::random_forest(n_features, 2, trees)
}

/// Seeded single decision tree snapshot
pub fn random_decision_tree(seed: u64, n_features: usize, max_depth: usize) -> FittedModel {
    let mut rng = StdRng::seed_from_u64(seed);
    FittedModel::decision_tree(n_features, 2, random_tree(&mut rng, n_features, max_depth))
}

/// Seeded samples, row by row
pub fn random_rows(seed: u64, n_rows: usize, n_features: usize) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_rows)
        .map(|_| (0..n_features).map(|_| grid_value(&mut rng, 2.5)).collect())
        .collect()
}

/// Whether the configured C compiler can be run on this machine
pub fn c_compiler_available() -> bool {
    let config = CompilerConfig::default();
    let available =
        NativeCompiler::new(config.native.compiler, config.native.flags).is_available();
    if !available {
        eprintln!("no C compiler available, skipping native checks");
    }
    available
}

/// Default configuration writing artifacts into `dir`
pub fn config_in(dir: &std::path::Path) -> CompilerConfig {
    CompilerConfig::default().with_cache_dir(dir)
}
