//! Artifact reuse and rebuild decisions as seen through the compiler

mod common;

use common::{c_compiler_available, config_in, random_forest, random_rows};
use std::cell::Cell;
use std::fs;
use treefreeze_cache::{ArtifactBuilder, ArtifactFiles, ArtifactRecord, BuildJob, FileLayout};
use treefreeze_engine::{
    toolchain_for, Backend, CallingMode, CompileOptions, Compiler, DynToolchain, Error,
    FittedModel, LoadedArtifact, Origin,
};

/// Wraps a real toolchain and counts builds
struct Counting {
    inner: Box<DynToolchain>,
    builds: Cell<usize>,
}

impl Counting {
    fn new(compiler: &Compiler, backend: Backend, mode: CallingMode, model: &FittedModel) -> Self {
        Self {
            inner: toolchain_for(backend, mode, model.n_features_in, compiler.config()),
            builds: Cell::new(0),
        }
    }
}

impl ArtifactBuilder for Counting {
    type Artifact = Box<dyn LoadedArtifact>;
    type Error = Error;

    fn file_layout(&self) -> FileLayout {
        self.inner.file_layout()
    }

    fn build(&self, job: &BuildJob<'_>) -> Result<(), Error> {
        self.builds.set(self.builds.get() + 1);
        self.inner.build(job)
    }

    fn load(&self, files: &ArtifactFiles) -> Result<Box<dyn LoadedArtifact>, Error> {
        self.inner.load(files)
    }
}

fn backends() -> Vec<Backend> {
    let mut backends = vec![Backend::Python, Backend::Cython];
    if c_compiler_available() {
        backends.push(Backend::C);
    }
    backends
}

#[test]
fn test_unchanged_model_is_not_rebuilt() {
    let model = random_forest(1, 5, 3, 4);
    let rows = random_rows(2, 30, 3);

    for backend in backends() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(config_in(dir.path()));
        let options = CompileOptions::named("model");
        let counting = Counting::new(&compiler, backend, CallingMode::Single, &model);

        let first = compiler
            .compile_with(&model, backend, &options, &counting)
            .unwrap();
        assert_eq!(first.origin(), Origin::Built);
        assert_eq!(counting.builds.get(), 1);

        for _ in 0..3 {
            let again = compiler
                .compile_with(&model, backend, &options, &counting)
                .unwrap();
            assert_eq!(again.origin(), Origin::Reused);
            assert_eq!(again.source_hash(), first.source_hash());
            for row in &rows {
                assert_eq!(again.call(row).unwrap(), first.call(row).unwrap());
            }
        }
        assert_eq!(counting.builds.get(), 1, "{} rebuilt an unchanged model", backend);
    }
}

#[test]
fn test_changed_model_rebuilds_once() {
    let old = random_forest(3, 4, 3, 4);
    let new = random_forest(4, 4, 3, 4);
    let rows = random_rows(5, 50, 3);
    let expected = new.predict_proba_rows(&rows).unwrap();

    for backend in backends() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(config_in(dir.path()));
        let options = CompileOptions::named("model");
        let counting = Counting::new(&compiler, backend, CallingMode::Single, &old);

        let before = compiler
            .compile_with(&old, backend, &options, &counting)
            .unwrap();
        let after = compiler
            .compile_with(&new, backend, &options, &counting)
            .unwrap();
        let reused = compiler
            .compile_with(&new, backend, &options, &counting)
            .unwrap();

        assert_eq!(counting.builds.get(), 2, "{}", backend);
        assert_eq!(after.origin(), Origin::Built);
        assert_eq!(reused.origin(), Origin::Reused);
        assert_ne!(before.source_hash(), after.source_hash());
        for (row, e) in rows.iter().zip(&expected) {
            assert!((after.call(row).unwrap() - e).abs() < 1e-9);
            assert!((reused.call(row).unwrap() - e).abs() < 1e-9);
        }
    }
}

#[test]
fn test_mode_change_rebuilds() {
    let model = random_forest(6, 3, 2, 3);
    let dir = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(config_in(dir.path()));

    let single = compiler
        .compile(&model, Backend::Cython, &CompileOptions::named("m"))
        .unwrap();
    let batch = compiler
        .compile(
            &model,
            Backend::Cython,
            &CompileOptions::named("m").with_mode(CallingMode::Batch),
        )
        .unwrap();
    assert_eq!(single.origin(), Origin::Built);
    assert_eq!(batch.origin(), Origin::Built);

    let record = ArtifactRecord::load(&dir.path().join("m.freeze.json")).unwrap();
    assert_eq!(record.kind.mode, "batch");
}

#[test]
fn test_persisted_layout() {
    let model = random_forest(7, 3, 2, 3);
    let dir = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(config_in(dir.path()));

    compiler
        .compile(&model, Backend::Python, &CompileOptions::named("ref"))
        .unwrap();
    compiler
        .compile(&model, Backend::Cython, &CompileOptions::named("staged"))
        .unwrap();

    assert!(dir.path().join("ref.py").is_file());
    assert!(dir.path().join("ref.freeze.json").is_file());
    assert!(dir.path().join("staged.pyx").is_file());
    assert!(dir.path().join("staged.tcb").is_file());
    assert!(dir.path().join("staged.freeze.json").is_file());

    let record = ArtifactRecord::load(&dir.path().join("staged.freeze.json")).unwrap();
    assert_eq!(record.kind.backend, "cython");
    assert_eq!(record.binary_file.as_deref(), Some("staged.tcb"));
}

#[test]
fn test_ephemeral_compile_persists_nothing() {
    let model = random_forest(8, 2, 2, 3);
    let dir = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(config_in(dir.path()));

    let f = compiler
        .compile(&model, Backend::Cython, &CompileOptions::default())
        .unwrap();
    assert_eq!(f.origin(), Origin::Ephemeral);
    assert!(f.scratch_dir().is_some());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_corrupt_bytecode_is_rebuilt() {
    let model = random_forest(9, 3, 2, 3);
    let dir = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(config_in(dir.path()));
    let options = CompileOptions::named("m");

    compiler.compile(&model, Backend::Cython, &options).unwrap();

    let tcb = dir.path().join("m.tcb");
    let mut bytes = fs::read(&tcb).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5a;
    fs::write(&tcb, &bytes).unwrap();

    let f = compiler.compile(&model, Backend::Cython, &options).unwrap();
    assert_eq!(f.origin(), Origin::Built);
    let row = [0.3, -0.7];
    assert!((f.call(&row).unwrap() - model.predict_proba(&row).unwrap()).abs() < 1e-9);
}

#[test]
fn test_edited_source_is_rebuilt() {
    let model = random_forest(10, 3, 2, 3);
    let dir = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(config_in(dir.path()));
    let options = CompileOptions::named("m");

    compiler.compile(&model, Backend::Python, &options).unwrap();
    fs::write(dir.path().join("m.py"), "def predict_proba(x0, x1):\n    return 0.5\n").unwrap();

    let f = compiler.compile(&model, Backend::Python, &options).unwrap();
    assert_eq!(f.origin(), Origin::Built);
    let row = [1.0, 1.0];
    assert!((f.call(&row).unwrap() - model.predict_proba(&row).unwrap()).abs() < 1e-9);
}

#[test]
fn test_native_rebuild_replaces_library() {
    if !c_compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(config_in(dir.path()));
    let options = CompileOptions::named("native").with_mode(CallingMode::Batch);

    let first = compiler
        .compile(&random_forest(11, 3, 2, 3), Backend::C, &options)
        .unwrap();
    let ext = std::env::consts::DLL_EXTENSION;
    let first_lib = dir
        .path()
        .join(format!("native.{}.{}", first.source_hash().short(), ext));
    assert!(first_lib.is_file());
    assert!(dir.path().join("native.c").is_file());
    assert!(dir.path().join("native.build.json").is_file());

    let second = compiler
        .compile(&random_forest(12, 3, 2, 3), Backend::C, &options)
        .unwrap();
    let second_lib = dir
        .path()
        .join(format!("native.{}.{}", second.source_hash().short(), ext));
    assert!(second_lib.is_file());
    if cfg!(unix) {
        assert!(!first_lib.exists());
    }

    // The first handle keeps its own mapping of the superseded library
    assert_eq!(first.call_batch(&[0.0, 0.0], 2).unwrap().len(), 1);
}

#[test]
fn test_native_compiler_failure_is_toolchain_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.native.compiler = "treefreeze-missing-cc".to_string();
    let err = Compiler::new(config)
        .compile(&random_forest(13, 2, 2, 2), Backend::C, &CompileOptions::named("m"))
        .unwrap_err();
    match err {
        Error::Toolchain { backend, diagnostics } => {
            assert_eq!(backend, Backend::C);
            assert!(diagnostics.contains("treefreeze-missing-cc"));
        }
        other => panic!("expected toolchain error, got {}", other),
    }
    assert!(!dir.path().join("m.freeze.json").exists());
}

#[test]
fn test_relative_cache_dir_persists_every_backend() {
    // A directory under the working directory, named relatively
    let scratch = tempfile::Builder::new()
        .prefix("treefreeze-rel-")
        .tempdir_in(".")
        .unwrap();
    let relative = std::path::PathBuf::from(scratch.path().file_name().unwrap()).join("models");
    assert!(relative.is_relative());

    let compiler = Compiler::new(treefreeze_engine::CompilerConfig::default().with_cache_dir(&relative));
    let model = random_forest(14, 3, 2, 3);
    let row = [0.25, -0.5];
    let expected = model.predict_proba(&row).unwrap();

    for backend in backends() {
        let options = CompileOptions::named(format!("rel_{}", backend));
        let built = compiler.compile(&model, backend, &options).unwrap();
        assert_eq!(built.origin(), Origin::Built, "{}", backend);
        assert!((built.call(&row).unwrap() - expected).abs() < 1e-9);

        let reused = compiler.compile(&model, backend, &options).unwrap();
        assert_eq!(reused.origin(), Origin::Reused, "{}", backend);
        assert!(relative.join(format!("rel_{}.freeze.json", backend)).is_file());
    }
}
