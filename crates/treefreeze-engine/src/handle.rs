//! Compiled function handle

use crate::codegen::{Backend, CallingMode};
use crate::toolchain::LoadedArtifact;
use tempfile::TempDir;
use thiserror::Error;
use treefreeze_cache::{Origin, SourceHash};

/// Call-time argument errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvocationError {
    /// Row has the wrong number of features
    #[error("Invocation error: expected {expected} features, got {got}")]
    Arity { expected: usize, got: usize },

    /// Batch column count differs from the feature count
    #[error("Invocation error: batch has {n_cols} columns, model expects {expected}")]
    Shape { expected: usize, n_cols: usize },

    /// Batch data is not a whole number of rows
    #[error("Invocation error: {len} values do not form rows of {n_cols} columns")]
    RaggedBatch { len: usize, n_cols: usize },

    /// Called in a mode the function was not compiled for
    #[error("Invocation error: function was compiled for {compiled} mode, called in {called} mode")]
    ModeMismatch {
        compiled: CallingMode,
        called: CallingMode,
    },

    /// Loaded code failed while evaluating
    #[error("Invocation error: {0}")]
    Evaluation(String),
}

/// Arguments of a uniform [`CompiledFunction::invoke`]
#[derive(Debug, Clone, Copy)]
pub enum Args<'a> {
    /// One sample
    Row(&'a [f64]),
    /// Row-major samples of `n_cols` features each
    Batch { data: &'a [f64], n_cols: usize },
}

/// Result of a uniform [`CompiledFunction::invoke`]
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Scalar(f64),
    Vector(Vec<f64>),
}

/// A compiled model, callable per row or per batch.
///
/// Loaded code is immutable, so the handle can be shared across threads.
#[derive(Debug)]
pub struct CompiledFunction {
    // Declared before `scratch` so the code is unloaded before its directory goes away.
    artifact: Box<dyn LoadedArtifact>,
    backend: Backend,
    mode: CallingMode,
    origin: Origin,
    hash: SourceHash,
    scratch: Option<TempDir>,
}

impl CompiledFunction {
    pub(crate) fn new(
        artifact: Box<dyn LoadedArtifact>,
        backend: Backend,
        mode: CallingMode,
        origin: Origin,
        hash: SourceHash,
        scratch: Option<TempDir>,
    ) -> Self {
        Self {
            artifact,
            backend,
            mode,
            origin,
            hash,
            scratch,
        }
    }

    /// Positive-class probability of one sample
    pub fn call(&self, row: &[f64]) -> Result<f64, InvocationError> {
        self.expect_mode(CallingMode::Single)?;
        let expected = self.n_features();
        if row.len() != expected {
            return Err(InvocationError::Arity {
                expected,
                got: row.len(),
            });
        }
        self.artifact.eval_row(row)
    }

    /// Probabilities of row-major samples, one per row in input order
    pub fn call_batch(&self, data: &[f64], n_cols: usize) -> Result<Vec<f64>, InvocationError> {
        self.expect_mode(CallingMode::Batch)?;
        let expected = self.n_features();
        if n_cols != expected {
            return Err(InvocationError::Shape { expected, n_cols });
        }
        if n_cols == 0 {
            return if data.is_empty() {
                Ok(Vec::new())
            } else {
                Err(InvocationError::RaggedBatch {
                    len: data.len(),
                    n_cols,
                })
            };
        }
        if data.len() % n_cols != 0 {
            return Err(InvocationError::RaggedBatch {
                len: data.len(),
                n_cols,
            });
        }
        self.artifact.eval_batch(data, data.len() / n_cols)
    }

    /// Mode-agnostic entry point
    pub fn invoke(&self, args: Args<'_>) -> Result<Output, InvocationError> {
        match args {
            Args::Row(row) => self.call(row).map(Output::Scalar),
            Args::Batch { data, n_cols } => self.call_batch(data, n_cols).map(Output::Vector),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn mode(&self) -> CallingMode {
        self.mode
    }

    pub fn n_features(&self) -> usize {
        self.artifact.n_features()
    }

    /// Whether this handle was built, reused, or built in a scratch directory
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Hash of the generated source the code was built from
    pub fn source_hash(&self) -> &SourceHash {
        &self.hash
    }

    /// Scratch directory of an ephemeral compile
    pub fn scratch_dir(&self) -> Option<&std::path::Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    fn expect_mode(&self, called: CallingMode) -> Result<(), InvocationError> {
        if self.mode == called {
            Ok(())
        } else {
            Err(InvocationError::ModeMismatch {
                compiled: self.mode,
                called,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns the sum of each row
    #[derive(Debug)]
    struct RowSum(usize);

    impl LoadedArtifact for RowSum {
        fn n_features(&self) -> usize {
            self.0
        }

        fn eval_row(&self, row: &[f64]) -> Result<f64, InvocationError> {
            Ok(row.iter().sum())
        }
    }

    fn handle(mode: CallingMode) -> CompiledFunction {
        CompiledFunction::new(
            Box::new(RowSum(2)),
            Backend::Cython,
            mode,
            Origin::Ephemeral,
            SourceHash::of("x"),
            None,
        )
    }

    #[test]
    fn test_call() {
        let f = handle(CallingMode::Single);
        assert_eq!(f.call(&[1.0, 2.0]).unwrap(), 3.0);
        assert_eq!(
            f.call(&[1.0]),
            Err(InvocationError::Arity {
                expected: 2,
                got: 1
            })
        );
        assert!(matches!(
            f.call_batch(&[1.0, 2.0], 2),
            Err(InvocationError::ModeMismatch { .. })
        ));
    }

    #[test]
    fn test_call_batch() {
        let f = handle(CallingMode::Batch);
        assert_eq!(
            f.call_batch(&[1.0, 2.0, 3.0, 4.0], 2).unwrap(),
            vec![3.0, 7.0]
        );
        assert_eq!(f.call_batch(&[], 2).unwrap(), Vec::<f64>::new());
        assert_eq!(
            f.call_batch(&[1.0, 2.0, 3.0], 3),
            Err(InvocationError::Shape {
                expected: 2,
                n_cols: 3
            })
        );
        assert_eq!(
            f.call_batch(&[1.0, 2.0, 3.0], 2),
            Err(InvocationError::RaggedBatch { len: 3, n_cols: 2 })
        );
        assert!(matches!(
            f.call(&[1.0, 2.0]),
            Err(InvocationError::ModeMismatch { .. })
        ));
    }

    #[test]
    fn test_invoke() {
        let f = handle(CallingMode::Batch);
        assert_eq!(
            f.invoke(Args::Batch {
                data: &[0.5, 0.5],
                n_cols: 2
            })
            .unwrap(),
            Output::Vector(vec![1.0])
        );
        assert!(f.invoke(Args::Row(&[0.5, 0.5])).is_err());
    }

    #[test]
    fn test_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledFunction>();
    }
}
