//! Language-neutral tree IR
//!
//! The IR is the single source of truth for code generation:
//! - [`Node`]: a split or a leaf, stored in a per-tree arena
//! - [`Tree`]: validated node arena, root first
//! - [`Forest`]: ordered trees plus the aggregation rule
//!
//! Every structure is immutable once built and compares by value, so two
//! extractions of the same snapshot can be checked for equality.

mod extract;

pub use extract::{extract, ExtractError};

use crate::model::EstimatorKind;

/// Index of a node inside its tree's arena
pub type NodeId = u32;

/// One decision-tree node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Node {
    /// Internal node: go left when `x[feature] <= threshold`
    Split {
        feature: u32,
        threshold: f64,
        left: NodeId,
        right: NodeId,
    },
    /// Terminal node carrying the positive-class probability
    Leaf { probability: f64 },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// Structural validation errors for [`Tree`] and [`Forest`]
#[derive(Debug, Clone, PartialEq)]
pub enum TreeValidationError {
    /// Tree has no nodes.
    EmptyTree,
    /// Root index outside the arena.
    RootOutOfBounds { root: NodeId, n_nodes: usize },
    /// A child index references an out-of-bounds node.
    ChildOutOfBounds {
        node: NodeId,
        child: NodeId,
        n_nodes: usize,
    },
    /// A node was reached twice (cycle or shared subtree).
    DuplicateVisit { node: NodeId },
    /// A node exists in the arena but is unreachable from the root.
    UnreachableNode { node: NodeId },
    /// Split threshold is NaN or infinite.
    NonFiniteThreshold { node: NodeId },
    /// Leaf probability outside [0, 1].
    InvalidProbability { node: NodeId, probability: f64 },
    /// Split feature not below the forest's feature count.
    FeatureOutOfRange {
        tree: usize,
        node: NodeId,
        feature: u32,
        n_features: usize,
    },
    /// Forest without trees.
    EmptyForest,
    /// Identity aggregation over more than one tree.
    IdentityOverMany { n_trees: usize },
}

impl std::fmt::Display for TreeValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTree => write!(f, "tree has no nodes"),
            Self::RootOutOfBounds { root, n_nodes } => {
                write!(f, "root {} out of bounds ({} nodes)", root, n_nodes)
            }
            Self::ChildOutOfBounds {
                node,
                child,
                n_nodes,
            } => write!(
                f,
                "node {} references child {} out of bounds ({} nodes)",
                node, child, n_nodes
            ),
            Self::DuplicateVisit { node } => {
                write!(f, "node {} is reachable more than once", node)
            }
            Self::UnreachableNode { node } => write!(f, "node {} is unreachable", node),
            Self::NonFiniteThreshold { node } => {
                write!(f, "node {} has a non-finite threshold", node)
            }
            Self::InvalidProbability { node, probability } => {
                write!(f, "leaf {} has probability {} outside [0, 1]", node, probability)
            }
            Self::FeatureOutOfRange {
                tree,
                node,
                feature,
                n_features,
            } => write!(
                f,
                "tree {} node {} splits on feature {} but the model has {} features",
                tree, node, feature, n_features
            ),
            Self::EmptyForest => write!(f, "forest has no trees"),
            Self::IdentityOverMany { n_trees } => {
                write!(f, "identity aggregation needs one tree, got {}", n_trees)
            }
        }
    }
}

impl std::error::Error for TreeValidationError {}

/// Validated node arena
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Build a tree, checking that the nodes reachable from `root` form a tree
    /// covering the whole arena.
    pub fn new(nodes: Vec<Node>, root: NodeId) -> Result<Self, TreeValidationError> {
        let tree = Self { nodes, root };
        tree.validate()?;
        Ok(tree)
    }

    fn validate(&self) -> Result<(), TreeValidationError> {
        let n_nodes = self.nodes.len();
        if n_nodes == 0 {
            return Err(TreeValidationError::EmptyTree);
        }
        if self.root as usize >= n_nodes {
            return Err(TreeValidationError::RootOutOfBounds {
                root: self.root,
                n_nodes,
            });
        }

        let mut visited = vec![false; n_nodes];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut visited[id as usize], true) {
                return Err(TreeValidationError::DuplicateVisit { node: id });
            }
            match self.nodes[id as usize] {
                Node::Split {
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if !threshold.is_finite() {
                        return Err(TreeValidationError::NonFiniteThreshold { node: id });
                    }
                    for child in [right, left] {
                        if child as usize >= n_nodes {
                            return Err(TreeValidationError::ChildOutOfBounds {
                                node: id,
                                child,
                                n_nodes,
                            });
                        }
                        stack.push(child);
                    }
                }
                Node::Leaf { probability } => {
                    if !(0.0..=1.0).contains(&probability) {
                        return Err(TreeValidationError::InvalidProbability {
                            node: id,
                            probability,
                        });
                    }
                }
            }
        }

        if let Some(unreached) = visited.iter().position(|v| !v) {
            return Err(TreeValidationError::UnreachableNode {
                node: unreached as NodeId,
            });
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Largest feature index used by a split, if any
    pub fn max_feature(&self) -> Option<u32> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }

    /// Number of edges on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            match self.nodes[id as usize] {
                Node::Split { left, right, .. } => {
                    stack.push((left, depth + 1));
                    stack.push((right, depth + 1));
                }
                Node::Leaf { .. } => max_depth = max_depth.max(depth),
            }
        }
        max_depth
    }

    /// Leaf probability for one sample (`x <= threshold` goes left)
    ///
    /// # Panics
    ///
    /// Panics if `row` is shorter than a feature index the tree splits on.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut id = self.root;
        loop {
            match self.nodes[id as usize] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[feature as usize] <= threshold {
                        left
                    } else {
                        right
                    };
                }
                Node::Leaf { probability } => return probability,
            }
        }
    }
}

/// How per-tree probabilities combine into the model output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Single tree, its value is the output
    Identity,
    /// Sum in tree order, divided by the number of trees
    Mean,
}

/// Ordered trees plus aggregation rule
#[derive(Debug, Clone, PartialEq)]
pub struct Forest {
    trees: Vec<Tree>,
    aggregation: Aggregation,
    n_features: usize,
    kind: EstimatorKind,
}

impl Forest {
    pub fn new(
        trees: Vec<Tree>,
        aggregation: Aggregation,
        n_features: usize,
        kind: EstimatorKind,
    ) -> Result<Self, TreeValidationError> {
        if trees.is_empty() {
            return Err(TreeValidationError::EmptyForest);
        }
        if aggregation == Aggregation::Identity && trees.len() != 1 {
            return Err(TreeValidationError::IdentityOverMany {
                n_trees: trees.len(),
            });
        }
        for (t, tree) in trees.iter().enumerate() {
            for (id, node) in tree.nodes().iter().enumerate() {
                if let Node::Split { feature, .. } = node {
                    if *feature as usize >= n_features {
                        return Err(TreeValidationError::FeatureOutOfRange {
                            tree: t,
                            node: id as NodeId,
                            feature: *feature,
                            n_features,
                        });
                    }
                }
            }
        }

        Ok(Self {
            trees,
            aggregation,
            n_features,
            kind,
        })
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn kind(&self) -> EstimatorKind {
        self.kind
    }

    /// Aggregated probability for one sample
    ///
    /// # Panics
    ///
    /// Panics if `row` is shorter than a feature index any tree splits on.
    pub fn predict(&self, row: &[f64]) -> f64 {
        match self.aggregation {
            Aggregation::Identity => self.trees[0].predict(row),
            Aggregation::Mean => {
                let sum = self
                    .trees
                    .iter()
                    .fold(0.0, |acc, tree| acc + tree.predict(row));
                sum / self.trees.len() as f64
            }
        }
    }
}
