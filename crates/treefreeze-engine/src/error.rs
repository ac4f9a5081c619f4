//! Engine error type

use crate::codegen::{Backend, CodegenError};
use crate::config::ConfigError;
use crate::handle::InvocationError;
use crate::ir::ExtractError;
use thiserror::Error;
use treefreeze_cache::CacheError;

/// Every failure a compile or a call can report
#[derive(Debug, Error)]
pub enum Error {
    /// Estimator kind or class count not handled; never reaches code generation
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Snapshot arrays do not describe valid trees
    #[error("Malformed model: tree {tree}: {reason}")]
    MalformedModel { tree: usize, reason: String },

    /// Invalid backend, calling mode, or combination of the two
    #[error(transparent)]
    UnsupportedBackend(#[from] CodegenError),

    /// Translator, JIT, C compiler or loader failure
    #[error("{backend} toolchain failed:\n{diagnostics}")]
    Toolchain {
        backend: Backend,
        diagnostics: String,
    },

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ExtractError> for Error {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsupportedModel(reason) => Error::UnsupportedModel(reason),
            ExtractError::MalformedModel { tree, reason } => Error::MalformedModel { tree, reason },
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
