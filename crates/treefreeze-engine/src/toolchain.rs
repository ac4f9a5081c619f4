//! Toolchain drivers
//!
//! One [`ArtifactBuilder`] per backend. The cache calls `build` on a miss and
//! `load` on every resolution; all three load into a [`LoadedArtifact`].
//!
//! | Backend | Persisted files                      | Build                 | Load                  |
//! |---------|--------------------------------------|-----------------------|-----------------------|
//! | python  | `<m>.py`                             | parse check           | parse + interpreter   |
//! | cython  | `<m>.pyx`, `<m>.tcb`                 | translate to bytecode | JIT or bytecode VM    |
//! | c       | `<m>.c`, `<m>.<hash16>.<dll>`        | external C compiler   | `dlopen`              |

use crate::codegen::{Backend, CallingMode, ENTRY_SYMBOL};
use crate::config::CompilerConfig;
use crate::dialect::{parse_module, Interpreter};
use crate::error::Error;
use crate::handle::InvocationError;
use crate::native::{NativeCompiler, NativeLibrary};
use crate::staged::{stage, StagedProgram};
use std::fs;
use std::path::Path;
use tracing::debug;
use treefreeze_cache::{ArtifactBuilder, ArtifactFiles, BuildJob, CacheError, FileLayout};

/// Loaded, invocable code of one compiled model
pub trait LoadedArtifact: Send + Sync + std::fmt::Debug {
    /// Number of features each row must hold
    fn n_features(&self) -> usize;

    /// Result for one row of exactly `n_features` values
    fn eval_row(&self, row: &[f64]) -> Result<f64, InvocationError>;

    /// Results for `rows` row-major rows, in input order
    fn eval_batch(&self, data: &[f64], rows: usize) -> Result<Vec<f64>, InvocationError> {
        let n = self.n_features();
        check_batch(data, rows, n)?;
        if n == 0 {
            return (0..rows).map(|_| self.eval_row(&[])).collect();
        }
        data.chunks_exact(n).map(|row| self.eval_row(row)).collect()
    }
}

fn check_row(row: &[f64], n_features: usize) -> Result<(), InvocationError> {
    if row.len() != n_features {
        return Err(InvocationError::Arity {
            expected: n_features,
            got: row.len(),
        });
    }
    Ok(())
}

fn check_batch(data: &[f64], rows: usize, n_features: usize) -> Result<(), InvocationError> {
    if Some(data.len()) != rows.checked_mul(n_features) {
        return Err(InvocationError::RaggedBatch {
            len: data.len(),
            n_cols: n_features,
        });
    }
    Ok(())
}

/// Type-erased toolchain as the compiler drives it
pub type DynToolchain = dyn ArtifactBuilder<Artifact = Box<dyn LoadedArtifact>, Error = Error>;

/// Toolchain for `backend` in `mode` configured from `config`
pub fn toolchain_for(
    backend: Backend,
    mode: CallingMode,
    n_features: usize,
    config: &CompilerConfig,
) -> Box<DynToolchain> {
    match backend {
        Backend::Python => Box::new(ReferenceToolchain { n_features }),
        Backend::Cython => Box::new(StagedToolchain {
            mode,
            n_features,
            jit: config.staged.jit,
        }),
        Backend::C => Box::new(NativeToolchain {
            compiler: NativeCompiler::new(
                config.native.compiler.clone(),
                config.native.flags.clone(),
            ),
            mode,
            n_features,
        }),
    }
}

fn toolchain_error(backend: Backend, diagnostics: impl std::fmt::Display) -> Error {
    Error::Toolchain {
        backend,
        diagnostics: diagnostics.to_string(),
    }
}

fn read_source(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|e| Error::Cache(CacheError::from(e)))
}

fn check_arity(backend: Backend, found: usize, expected: usize) -> Result<(), Error> {
    if found == expected {
        Ok(())
    } else {
        Err(toolchain_error(
            backend,
            format!("artifact reads {} features, expected {}", found, expected),
        ))
    }
}

// ============================================================================
// Reference (python)
// ============================================================================

/// Parses reference-dialect source and interprets it
#[derive(Debug, Clone)]
pub struct ReferenceToolchain {
    pub n_features: usize,
}

/// Interpreted reference-dialect module
#[derive(Debug)]
pub struct ReferenceArtifact {
    interpreter: Interpreter,
    n_features: usize,
}

impl ReferenceToolchain {
    fn interpret(&self, path: &Path) -> Result<ReferenceArtifact, Error> {
        let source = read_source(path)?;
        let module = parse_module(&source)
            .map_err(|e| toolchain_error(Backend::Python, e.format_with_source(&source)))?;
        let interpreter = Interpreter::new(module)
            .map_err(|e| toolchain_error(Backend::Python, e.format_with_source(&source)))?;

        let arity = interpreter.arity(ENTRY_SYMBOL).ok_or_else(|| {
            toolchain_error(Backend::Python, format!("no `{}` function", ENTRY_SYMBOL))
        })?;
        check_arity(Backend::Python, arity, self.n_features)?;

        Ok(ReferenceArtifact {
            interpreter,
            n_features: arity,
        })
    }
}

impl ArtifactBuilder for ReferenceToolchain {
    type Artifact = Box<dyn LoadedArtifact>;
    type Error = Error;

    fn file_layout(&self) -> FileLayout {
        FileLayout::source_only(Backend::Python.source_ext())
    }

    fn build(&self, job: &BuildJob<'_>) -> Result<(), Error> {
        // The source is the artifact; building only checks that it loads.
        self.interpret(job.source_path).map(|_| ())
    }

    fn load(&self, files: &ArtifactFiles) -> Result<Box<dyn LoadedArtifact>, Error> {
        Ok(Box::new(self.interpret(&files.source)?))
    }
}

impl LoadedArtifact for ReferenceArtifact {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn eval_row(&self, row: &[f64]) -> Result<f64, InvocationError> {
        self.interpreter
            .call(ENTRY_SYMBOL, row)
            .map_err(|e| InvocationError::Evaluation(e.to_string()))
    }
}

// ============================================================================
// Staged (cython)
// ============================================================================

/// Translates staged-dialect source into tree bytecode
#[derive(Debug, Clone)]
pub struct StagedToolchain {
    pub mode: CallingMode,
    pub n_features: usize,
    /// Lower to machine code on load
    pub jit: bool,
}

impl ArtifactBuilder for StagedToolchain {
    type Artifact = Box<dyn LoadedArtifact>;
    type Error = Error;

    fn file_layout(&self) -> FileLayout {
        FileLayout::with_binary(Backend::Cython.source_ext(), "tcb", false)
    }

    fn build(&self, job: &BuildJob<'_>) -> Result<(), Error> {
        let source = read_source(job.source_path)?;
        let program = stage(&source).map_err(|e| toolchain_error(Backend::Cython, e))?;
        check_arity(Backend::Cython, program.n_features as usize, self.n_features)?;

        let output = job
            .output_path
            .ok_or_else(|| toolchain_error(Backend::Cython, "no bytecode output path"))?;
        let bytes = program.encode();
        fs::write(output, &bytes).map_err(CacheError::from)?;
        debug!(
            module = job.module_name,
            bytes = bytes.len(),
            "wrote tree bytecode"
        );
        Ok(())
    }

    fn load(&self, files: &ArtifactFiles) -> Result<Box<dyn LoadedArtifact>, Error> {
        let path = files
            .binary
            .as_deref()
            .ok_or_else(|| toolchain_error(Backend::Cython, "no bytecode file"))?;
        let bytes = fs::read(path).map_err(CacheError::from)?;
        let program = StagedProgram::from_bytes(&bytes, self.jit)
            .map_err(|e| toolchain_error(Backend::Cython, e))?;

        check_arity(Backend::Cython, program.n_features(), self.n_features)?;
        if self.mode == CallingMode::Batch && !program.has_batch() {
            return Err(toolchain_error(
                Backend::Cython,
                "bytecode has no batch entry point",
            ));
        }
        Ok(Box::new(program))
    }
}

impl LoadedArtifact for StagedProgram {
    fn n_features(&self) -> usize {
        StagedProgram::n_features(self)
    }

    fn eval_row(&self, row: &[f64]) -> Result<f64, InvocationError> {
        check_row(row, self.n_features())?;
        Ok(StagedProgram::eval_row(self, row))
    }
}

// ============================================================================
// Native (c)
// ============================================================================

/// Compiles C source with the external compiler and loads the library
#[derive(Debug, Clone)]
pub struct NativeToolchain {
    pub compiler: NativeCompiler,
    pub mode: CallingMode,
    pub n_features: usize,
}

impl ArtifactBuilder for NativeToolchain {
    type Artifact = Box<dyn LoadedArtifact>;
    type Error = Error;

    fn file_layout(&self) -> FileLayout {
        FileLayout::with_binary(
            Backend::C.source_ext(),
            std::env::consts::DLL_EXTENSION,
            true,
        )
    }

    fn build(&self, job: &BuildJob<'_>) -> Result<(), Error> {
        let output = job
            .output_path
            .ok_or_else(|| toolchain_error(Backend::C, "no library output path"))?;
        self.compiler
            .build(job.module_name, job.source_path, output, job.work_dir)
            .map_err(|e| toolchain_error(Backend::C, e))?;
        Ok(())
    }

    fn load(&self, files: &ArtifactFiles) -> Result<Box<dyn LoadedArtifact>, Error> {
        let path = files
            .binary
            .as_deref()
            .ok_or_else(|| toolchain_error(Backend::C, "no library file"))?;
        let library = NativeLibrary::open(path, self.mode, self.n_features)
            .map_err(|e| toolchain_error(Backend::C, e))?;
        Ok(Box::new(library))
    }
}

impl LoadedArtifact for NativeLibrary {
    fn n_features(&self) -> usize {
        NativeLibrary::n_features(self)
    }

    fn eval_row(&self, row: &[f64]) -> Result<f64, InvocationError> {
        check_row(row, self.n_features())?;
        Ok(NativeLibrary::eval_row(self, row))
    }

    fn eval_batch(&self, data: &[f64], rows: usize) -> Result<Vec<f64>, InvocationError> {
        check_batch(data, rows, self.n_features())?;
        Ok(NativeLibrary::eval_batch(self, data, rows))
    }
}
