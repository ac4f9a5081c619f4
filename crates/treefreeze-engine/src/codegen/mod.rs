//! Source generation
//!
//! Renders a [`Forest`] into source text for one of three dialects. Every
//! dialect emits the same shape:
//! - `predict_proba_t<k>`: one nested `<=` cascade per tree
//! - `predict_proba`: the entry point, aggregating the trees in order
//! - `predict_proba_batch`: a row loop over the entry point (batch mode only)
//!
//! Generation is pure and byte-stable: the same forest always yields the
//! same text, which is what the artifact cache hashes.

mod c;
mod cython;
mod emit;
mod python;

pub use emit::{arg_names, float_literal};

use crate::dialect::MAX_NESTING;
use crate::ir::{Forest, Tree};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Entry function name
pub const ENTRY_SYMBOL: &str = "predict_proba";
/// Batch wrapper name
pub const BATCH_SYMBOL: &str = "predict_proba_batch";
/// Exported feature-count symbol of native artifacts
pub const NATIVE_N_FEATURES_SYMBOL: &str = "treefreeze_n_features";
/// Exported single-row symbol of native artifacts
pub const NATIVE_PREDICT_SYMBOL: &str = "treefreeze_predict";
/// Exported batch symbol of native artifacts
pub const NATIVE_PREDICT_BATCH_SYMBOL: &str = "treefreeze_predict_batch";

/// Name of the function evaluating tree `index`
pub fn tree_symbol(index: usize) -> String {
    format!("{}_t{}", ENTRY_SYMBOL, index)
}

/// Target dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Interpreted reference dialect (`.py`)
    Python,
    /// Staged dialect compiled through tree bytecode (`.pyx`)
    Cython,
    /// Native dialect built by the system C compiler (`.c`)
    C,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Python, Backend::Cython, Backend::C];

    /// Tag used in records and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Python => "python",
            Backend::Cython => "cython",
            Backend::C => "c",
        }
    }

    /// Extension of the generated source file
    pub fn source_ext(&self) -> &'static str {
        match self {
            Backend::Python => "py",
            Backend::Cython => "pyx",
            Backend::C => "c",
        }
    }

    /// Whether the dialect has a batch wrapper
    pub fn supports(&self, mode: CallingMode) -> bool {
        !matches!((self, mode), (Backend::Python, CallingMode::Batch))
    }

    /// Deepest tree the dialect's toolchain accepts, `None` when unbounded.
    ///
    /// Python and cython sources go through the dialect parser, whose nesting
    /// limit covers the function body and the leaf expression on top of one
    /// block per tree level.
    pub fn max_tree_depth(&self) -> Option<usize> {
        match self {
            Backend::Python | Backend::Cython => Some(MAX_NESTING - 2),
            Backend::C => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = CodegenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Backend::Python),
            "cython" => Ok(Backend::Cython),
            "c" => Ok(Backend::C),
            other => Err(CodegenError::UnknownBackend(other.to_string())),
        }
    }
}

/// How the compiled function is called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingMode {
    /// One sample per call, one scalar per feature
    #[default]
    Single,
    /// A row-major matrix per call, one output per row
    Batch,
}

impl CallingMode {
    /// Tag used in records
    pub fn as_str(&self) -> &'static str {
        match self {
            CallingMode::Single => "single",
            CallingMode::Batch => "batch",
        }
    }
}

impl fmt::Display for CallingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallingMode {
    type Err = CodegenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" | "default" => Ok(CallingMode::Single),
            "batch" | "numpy" => Ok(CallingMode::Batch),
            other => Err(CodegenError::UnknownMode(other.to_string())),
        }
    }
}

/// Errors that can occur during generation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// Dialect has no rendition of the calling mode
    #[error("Unsupported backend: {backend} has no {mode} calling mode")]
    UnsupportedBackend {
        backend: Backend,
        mode: CallingMode,
    },

    /// Backend tag not recognized
    #[error("Unsupported backend: unknown backend '{0}' (expected python, cython or c)")]
    UnknownBackend(String),

    /// A tree nests deeper than the dialect's toolchain accepts
    #[error("Unsupported backend: {backend} accepts trees up to {limit} levels deep, tree {tree} has {depth}")]
    TreeTooDeep {
        backend: Backend,
        tree: usize,
        depth: usize,
        limit: usize,
    },

    /// Calling mode tag not recognized
    #[error("Unsupported backend: unknown calling mode '{0}' (expected single or numpy)")]
    UnknownMode(String),
}

/// Generated source text and what it was generated for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub backend: Backend,
    pub mode: CallingMode,
    pub n_features: usize,
    pub text: String,
}

/// Render `forest` for `backend` in `mode`
pub fn generate(
    forest: &Forest,
    backend: Backend,
    mode: CallingMode,
) -> Result<GeneratedSource, CodegenError> {
    if !backend.supports(mode) {
        return Err(CodegenError::UnsupportedBackend { backend, mode });
    }
    if let Some(limit) = backend.max_tree_depth() {
        let deepest = forest
            .trees()
            .iter()
            .map(Tree::depth)
            .enumerate()
            .max_by_key(|&(_, depth)| depth);
        if let Some((tree, depth)) = deepest.filter(|&(_, depth)| depth > limit) {
            return Err(CodegenError::TreeTooDeep {
                backend,
                tree,
                depth,
                limit,
            });
        }
    }

    let text = match backend {
        Backend::Python => python::render(forest),
        Backend::Cython => cython::render(forest, mode),
        Backend::C => c::render(forest, mode),
    };
    debug!(%backend, %mode, bytes = text.len(), "generated source");

    Ok(GeneratedSource {
        backend,
        mode,
        n_features: forest.n_features(),
        text,
    })
}
