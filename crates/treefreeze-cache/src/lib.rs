//! Treefreeze artifact cache
//!
//! Persists compiled model artifacts under a module name and decides, on every
//! compile, whether the persisted artifact can be reused or must be rebuilt:
//! - Source hashing (SHA-256 of the generated source text)
//! - Artifact records (`<module>.freeze.json`) naming the files of an artifact
//! - Atomic write-then-rename persistence
//! - Pluggable builders through [`ArtifactBuilder`]

pub mod cache;
pub mod hash;
pub mod layout;
pub mod record;

pub use cache::{
    decide, ArtifactBuilder, ArtifactCache, BuildJob, Decision, Origin, RebuildReason, Resolution,
};
pub use hash::SourceHash;
pub use layout::{atomic_write, validate_module_name, ArtifactFiles, ArtifactLayout, FileLayout};
pub use record::{ArtifactKind, ArtifactRecord, RecordError};

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Module name cannot be used as a file stem
    #[error("Invalid module name '{0}': expected an identifier like `my_model`")]
    InvalidModuleName(String),

    /// Record error
    #[error("Record error: {0}")]
    RecordError(#[from] RecordError),

    /// Builder finished without producing its output file
    #[error("Build produced no artifact at {0}")]
    MissingOutput(String),
}
