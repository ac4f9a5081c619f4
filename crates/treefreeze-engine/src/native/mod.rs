//! Native backend
//!
//! Drives an external C compiler over generated C source and loads the
//! resulting shared library. Every build leaves a descriptor
//! (`<module>.build.json`) next to the artifact recording exactly how the
//! compiler was invoked.

mod loader;

pub use loader::{Library, LoadError};

use crate::codegen::{
    CallingMode, NATIVE_N_FEATURES_SYMBOL, NATIVE_PREDICT_BATCH_SYMBOL, NATIVE_PREDICT_SYMBOL,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};
use treefreeze_cache::{atomic_write, CacheError};

/// Native build failure
#[derive(Debug, Error)]
pub enum NativeError {
    /// Compiler executable could not be started
    #[error("Failed to run C compiler '{compiler}': {source}")]
    Spawn {
        compiler: String,
        source: std::io::Error,
    },

    /// Compiler exited unsuccessfully
    #[error("C compiler failed ({status}):\n{diagnostics}")]
    CompilerFailed { status: String, diagnostics: String },

    /// Descriptor could not be written
    #[error("Failed to write build descriptor: {0}")]
    Descriptor(String),

    /// Source or output path could not be made absolute
    #[error("Failed to resolve path '{}': {source}", .path.display())]
    Path {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl From<CacheError> for NativeError {
    fn from(e: CacheError) -> Self {
        NativeError::Descriptor(e.to_string())
    }
}

/// How one native artifact was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    pub module: String,
    pub compiler: String,
    pub arguments: Vec<String>,
    pub source: PathBuf,
    pub output: PathBuf,
    pub tool_version: String,
}

/// External C compiler and its flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCompiler {
    program: String,
    flags: Vec<String>,
}

impl NativeCompiler {
    pub fn new(program: impl Into<String>, flags: Vec<String>) -> Self {
        Self {
            program: program.into(),
            flags,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the compiler can be started at all
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Full argument list for compiling `source` into the shared library `output`
    pub fn arguments(&self, source: &Path, output: &Path) -> Vec<String> {
        let mut args = self.flags.clone();
        args.push("-shared".to_string());
        if !cfg!(windows) {
            args.push("-fPIC".to_string());
        }
        args.push("-o".to_string());
        args.push(output.display().to_string());
        args.push(source.display().to_string());
        args
    }

    /// Write the build descriptor, run the compiler, and capture its output.
    ///
    /// The compiler runs inside `work_dir`; `source` and `output` are passed
    /// as absolute paths so relative ones keep naming the same files there.
    pub fn build(
        &self,
        module: &str,
        source: &Path,
        output: &Path,
        work_dir: &Path,
    ) -> Result<BuildDescriptor, NativeError> {
        let source = &resolve_path(source)?;
        let output = &resolve_path(output)?;
        let descriptor = BuildDescriptor {
            module: module.to_string(),
            compiler: self.program.clone(),
            arguments: self.arguments(source, output),
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let json = serde_json::to_string_pretty(&descriptor)
            .map_err(|e| NativeError::Descriptor(e.to_string()))?;
        atomic_write(&work_dir.join(format!("{}.build.json", module)), json.as_bytes())?;

        info!(
            compiler = %self.program,
            args = %descriptor.arguments.join(" "),
            "invoking C compiler"
        );
        let out = Command::new(&self.program)
            .args(&descriptor.arguments)
            .current_dir(work_dir)
            .output()
            .map_err(|source| NativeError::Spawn {
                compiler: self.program.clone(),
                source,
            })?;

        if !out.status.success() {
            let mut diagnostics = String::from_utf8_lossy(&out.stderr).into_owned();
            let stdout = String::from_utf8_lossy(&out.stdout);
            if !stdout.trim().is_empty() {
                diagnostics.push_str(&stdout);
            }
            return Err(NativeError::CompilerFailed {
                status: out.status.to_string(),
                diagnostics,
            });
        }
        debug!(output = %output.display(), "C compiler finished");
        Ok(descriptor)
    }
}

fn resolve_path(path: &Path) -> Result<PathBuf, NativeError> {
    std::path::absolute(path).map_err(|source| NativeError::Path {
        path: path.to_path_buf(),
        source,
    })
}

type NFeaturesFn = unsafe extern "C" fn() -> usize;
type PredictFn = unsafe extern "C" fn(*const f64) -> f64;
type PredictBatchFn = unsafe extern "C" fn(*const f64, usize, *mut f64);

#[derive(Clone, Copy)]
enum Entry {
    Single(PredictFn),
    Batch(PredictBatchFn),
}

/// Loaded shared library with its resolved entry point
pub struct NativeLibrary {
    entry: Entry,
    n_features: usize,
    // Keeps the code mapped while `entry` is in use.
    library: Library,
}

impl NativeLibrary {
    /// Open the library and resolve the entry point for `mode`, checking that
    /// it was built for `expected_features` inputs
    pub fn open(path: &Path, mode: CallingMode, expected_features: usize) -> Result<Self, LoadError> {
        let library = Library::open(path)?;

        // SAFETY: the symbols are generated with exactly these C signatures.
        let n_features = unsafe {
            let n_features: NFeaturesFn = library.get(NATIVE_N_FEATURES_SYMBOL)?;
            n_features()
        };
        if n_features != expected_features {
            return Err(LoadError::FeatureCountMismatch {
                library: library.path().display().to_string(),
                expected: expected_features,
                found: n_features,
            });
        }

        let entry = unsafe {
            match mode {
                CallingMode::Single => Entry::Single(library.get(NATIVE_PREDICT_SYMBOL)?),
                CallingMode::Batch => Entry::Batch(library.get(NATIVE_PREDICT_BATCH_SYMBOL)?),
            }
        };

        debug!(path = %library.path().display(), n_features, %mode, "loaded native library");
        Ok(Self {
            entry,
            n_features,
            library,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn path(&self) -> &Path {
        self.library.path()
    }

    /// Result for one row
    ///
    /// # Panics
    ///
    /// Panics if `row` holds fewer than `n_features` values.
    pub fn eval_row(&self, row: &[f64]) -> f64 {
        assert!(row.len() >= self.n_features, "row shorter than feature count");
        match self.entry {
            // SAFETY: the generated code reads exactly n_features values.
            Entry::Single(predict) => unsafe { predict(row.as_ptr()) },
            Entry::Batch(_) => self.eval_batch(&row[..self.n_features], 1)[0],
        }
    }

    /// Results for `rows` row-major rows of `n_features` values each
    ///
    /// # Panics
    ///
    /// Panics if `data` does not hold exactly `rows * n_features` values.
    pub fn eval_batch(&self, data: &[f64], rows: usize) -> Vec<f64> {
        assert_eq!(data.len(), rows * self.n_features, "batch shape mismatch");
        match self.entry {
            Entry::Batch(predict_batch) => {
                let mut out = vec![0.0; rows];
                // SAFETY: `data` holds rows * n_features values and `out` holds rows.
                unsafe { predict_batch(data.as_ptr(), rows, out.as_mut_ptr()) };
                out
            }
            Entry::Single(predict) => (0..rows)
                .map(|i| unsafe { predict(data[i * self.n_features..].as_ptr()) })
                .collect(),
        }
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.library.path())
            .field("n_features", &self.n_features)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        let compiler = NativeCompiler::new("cc", vec!["-O2".to_string()]);
        let args = compiler.arguments(Path::new("m.c"), Path::new("m.abc.so"));
        assert_eq!(args.first().map(String::as_str), Some("-O2"));
        assert!(args.contains(&"-shared".to_string()));
        assert_eq!(&args[args.len() - 3..], ["-o", "m.abc.so", "m.c"]);
    }

    #[test]
    fn test_missing_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = NativeCompiler::new("treefreeze-no-such-cc", Vec::new());
        assert!(!compiler.is_available());

        let source = dir.path().join("m.c");
        std::fs::write(&source, "int x;\n").unwrap();
        let err = compiler
            .build("m", &source, &dir.path().join("m.so"), dir.path())
            .unwrap_err();
        assert!(matches!(err, NativeError::Spawn { .. }));

        // The descriptor is written before the compiler runs
        let json = std::fs::read_to_string(dir.path().join("m.build.json")).unwrap();
        let descriptor: BuildDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(descriptor.compiler, "treefreeze-no-such-cc");
        assert_eq!(descriptor.module, "m");
    }

    #[test]
    fn test_compiler_failure_captures_diagnostics() {
        let compiler = NativeCompiler::new("cc", Vec::new());
        if !compiler.is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.c");
        std::fs::write(&source, "double f( { return 1.0; }\n").unwrap();
        let err = compiler
            .build("broken", &source, &dir.path().join("broken.so"), dir.path())
            .unwrap_err();
        match err {
            NativeError::CompilerFailed { diagnostics, .. } => assert!(!diagnostics.is_empty()),
            other => panic!("expected compiler failure, got {}", other),
        }
    }

    #[test]
    fn test_relative_paths_survive_work_dir() {
        let compiler = NativeCompiler::new("cc", Vec::new());
        if !compiler.is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let cwd = std::env::current_dir().unwrap();
        let rel = |name: &str| {
            let path = dir.path().join(name);
            pathdiff(&path, &cwd).unwrap_or(path)
        };

        let source = rel("rel.c");
        std::fs::write(&source, "double treefreeze_rel(void) { return 1.0; }\n").unwrap();
        let output = rel("rel.so");
        let descriptor = compiler.build("rel", &source, &output, dir.path()).unwrap();

        assert!(descriptor.source.is_absolute());
        assert!(descriptor.output.is_absolute());
        assert!(dir.path().join("rel.so").is_file());
    }

    /// `path` relative to `base` when both share a prefix
    fn pathdiff(path: &Path, base: &Path) -> Option<PathBuf> {
        let mut ups = PathBuf::new();
        let mut base = base;
        loop {
            if let Ok(rest) = path.strip_prefix(base) {
                return Some(ups.join(rest));
            }
            ups.push("..");
            base = base.parent()?;
        }
    }
}
