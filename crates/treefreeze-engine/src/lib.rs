//! Treefreeze Engine
//!
//! Compiles a fitted binary decision tree or random forest into specialized
//! inference code and hands back a callable:
//! - **Model**: snapshots of fitted classifiers and reference evaluation (`model`)
//! - **IR**: validated, immutable trees extracted from a snapshot (`ir`)
//! - **Codegen**: source text for the python, cython and c dialects (`codegen`)
//! - **Dialect**: lexer, parser and interpreter shared by the python and cython dialects (`dialect`)
//! - **Staged**: cython source to checksummed tree bytecode, run by a VM or Cranelift (`staged`)
//! - **Native**: external C compiler driver and shared-library loader (`native`)
//! - **Compiler**: the pipeline, cached by content hash through `treefreeze-cache`
//!
//! # Example
//!
//! ```rust,ignore
//! use treefreeze_engine::{compile, Backend, CallingMode, FittedModel};
//!
//! let model = FittedModel::from_json_file("forest.json".as_ref())?;
//!
//! // Persisted as ./forest.{c,<hash>.so,freeze.json}; reused while the model is unchanged
//! let predict = compile(&model, Backend::C, Some("forest"), CallingMode::Single)?;
//! let p = predict.call(&[5.1, 3.5, 1.4, 0.2])?;
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

pub mod codegen;
pub mod compiler;
pub mod config;
pub mod dialect;
pub mod error;
pub mod handle;
pub mod ir;
pub mod model;
pub mod native;
pub mod staged;
pub mod toolchain;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use codegen::{generate, Backend, CallingMode, CodegenError, GeneratedSource};
pub use compiler::{compile, CompileOptions, Compiler};
pub use config::{CompilerConfig, ConfigError};
pub use error::{Error, Result};
pub use handle::{Args, CompiledFunction, InvocationError, Output};
pub use ir::{extract, Aggregation, ExtractError, Forest, Node, Tree};
pub use model::{EstimatorKind, FittedModel, ModelError, TreeArrays};
pub use toolchain::{toolchain_for, DynToolchain, LoadedArtifact};

pub use treefreeze_cache::{Origin, SourceHash};
