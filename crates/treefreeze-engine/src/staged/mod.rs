//! Staged backend
//!
//! Cython-dialect source is parsed, translated to tree bytecode and persisted
//! as a checksummed `.tcb` file. Loading decodes and verifies the bytecode and
//! either lowers it to machine code (feature `jit`) or evaluates it with the
//! bytecode interpreter.

#[cfg(feature = "jit")]
mod jit;
pub mod program;
mod translate;
mod vm;

#[cfg(feature = "jit")]
pub use jit::{JitError, JitProgram};
pub use program::{Instr, Program, ProgramError};
pub use translate::{translate, TranslateError};
pub use vm::Vm;

use crate::dialect::parse_module;
use thiserror::Error;
use tracing::debug;

/// Staged build or load failure
#[derive(Debug, Error)]
pub enum StagedError {
    /// Source does not parse; carries the formatted excerpt
    #[error("{0}")]
    Syntax(String),

    /// Source parses but cannot be lowered; carries the formatted excerpt
    #[error("{0}")]
    Translate(String),

    #[error("Invalid tree bytecode: {0}")]
    Program(#[from] ProgramError),

    #[cfg(feature = "jit")]
    #[error(transparent)]
    Jit(#[from] JitError),
}

/// Parse and translate staged-dialect source
pub fn stage(source: &str) -> Result<Program, StagedError> {
    let module =
        parse_module(source).map_err(|e| StagedError::Syntax(e.format_with_source(source)))?;
    translate(&module).map_err(|e| StagedError::Translate(e.format_with_source(source)))
}

enum Engine {
    #[cfg(feature = "jit")]
    Native(JitProgram),
    Interpreted(Vm),
}

/// A loaded staged artifact
pub struct StagedProgram {
    engine: Engine,
    n_features: usize,
    batch: bool,
}

impl StagedProgram {
    /// Verify and load a program, lowering it to machine code when `use_jit`
    /// is set and the `jit` feature is compiled in
    pub fn load(program: Program, use_jit: bool) -> Result<Self, StagedError> {
        program.verify()?;
        let n_features = program.n_features as usize;
        let batch = program.batch;

        #[cfg(feature = "jit")]
        let engine = if use_jit {
            Engine::Native(JitProgram::compile(&program)?)
        } else {
            Engine::Interpreted(Vm::new(program)?)
        };
        #[cfg(not(feature = "jit"))]
        let engine = {
            if use_jit {
                debug!("jit requested but not compiled in, using the bytecode interpreter");
            }
            Engine::Interpreted(Vm::new(program)?)
        };

        Ok(Self {
            engine,
            n_features,
            batch,
        })
    }

    /// Decode `.tcb` bytes and load them
    pub fn from_bytes(bytes: &[u8], use_jit: bool) -> Result<Self, StagedError> {
        let program = Program::decode(bytes)?;
        debug!(
            trees = program.trees.len(),
            divisor = program.divisor,
            "decoded tree bytecode"
        );
        Self::load(program, use_jit)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Whether the source defined the batch entry point
    pub fn has_batch(&self) -> bool {
        self.batch
    }

    /// Whether evaluation runs through machine code
    pub fn is_native(&self) -> bool {
        match self.engine {
            #[cfg(feature = "jit")]
            Engine::Native(_) => true,
            Engine::Interpreted(_) => false,
        }
    }

    /// Aggregated result for one row of exactly `n_features` values
    ///
    /// # Panics
    ///
    /// Panics if `row` holds fewer than `n_features` values.
    pub fn eval_row(&self, row: &[f64]) -> f64 {
        match &self.engine {
            #[cfg(feature = "jit")]
            Engine::Native(code) => code.eval_row(row),
            Engine::Interpreted(vm) => vm.eval_row(row),
        }
    }
}

impl std::fmt::Debug for StagedProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedProgram")
            .field("n_features", &self.n_features)
            .field("batch", &self.batch)
            .field("native", &self.is_native())
            .finish()
    }
}
