//! Integration tests for artifact resolution
//!
//! Drives the cache with a fake builder that counts its invocations.

use std::cell::Cell;
use std::fs;
use treefreeze_cache::{
    ArtifactBuilder, ArtifactCache, ArtifactFiles, ArtifactKind, ArtifactRecord, BuildJob,
    CacheError, FileLayout, Origin, SourceHash,
};

/// Builder whose "artifact" is the upper-cased source
struct UppercaseBuilder {
    builds: Cell<usize>,
    layout: FileLayout,
    fail: bool,
}

impl UppercaseBuilder {
    fn new(layout: FileLayout) -> Self {
        Self {
            builds: Cell::new(0),
            layout,
            fail: false,
        }
    }

    fn failing(layout: FileLayout) -> Self {
        Self {
            fail: true,
            ..Self::new(layout)
        }
    }
}

#[derive(Debug)]
struct TestError(String);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CacheError> for TestError {
    fn from(e: CacheError) -> Self {
        TestError(e.to_string())
    }
}

impl ArtifactBuilder for UppercaseBuilder {
    type Artifact = String;
    type Error = TestError;

    fn file_layout(&self) -> FileLayout {
        self.layout
    }

    fn build(&self, job: &BuildJob<'_>) -> Result<(), TestError> {
        self.builds.set(self.builds.get() + 1);
        if self.fail {
            return Err(TestError("compiler exploded".to_string()));
        }
        if let Some(output) = job.output_path {
            let source = fs::read_to_string(job.source_path).map_err(|e| TestError(e.to_string()))?;
            fs::write(output, source.to_uppercase()).map_err(|e| TestError(e.to_string()))?;
        }
        Ok(())
    }

    fn load(&self, files: &ArtifactFiles) -> Result<String, TestError> {
        let path = files.binary.as_ref().unwrap_or(&files.source);
        fs::read_to_string(path).map_err(|e| TestError(e.to_string()))
    }
}

fn kind() -> ArtifactKind {
    ArtifactKind::new("cython", "single")
}

#[test]
fn test_ephemeral_always_builds() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::with_binary("pyx", "tcb", false));

    let first = cache.resolve(None, "abc", &kind(), &builder).unwrap();
    let second = cache.resolve(None, "abc", &kind(), &builder).unwrap();

    assert_eq!(first.artifact, "ABC");
    assert_eq!(second.origin, Origin::Ephemeral);
    assert_eq!(builder.builds.get(), 2);
    // Nothing persisted in the cache directory
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_unchanged_source_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::with_binary("pyx", "tcb", false));

    let first = cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();
    assert_eq!(first.origin, Origin::Built);
    assert_eq!(builder.builds.get(), 1);

    let second = cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();
    assert_eq!(second.origin, Origin::Reused);
    assert_eq!(second.artifact, "ABC");
    assert_eq!(builder.builds.get(), 1);
}

#[test]
fn test_changed_source_rebuilds_once() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::with_binary("pyx", "tcb", false));

    cache.resolve(Some("model"), "old", &kind(), &builder).unwrap();
    let rebuilt = cache.resolve(Some("model"), "new", &kind(), &builder).unwrap();
    assert_eq!(rebuilt.origin, Origin::Built);
    assert_eq!(rebuilt.artifact, "NEW");
    assert_eq!(builder.builds.get(), 2);

    let reused = cache.resolve(Some("model"), "new", &kind(), &builder).unwrap();
    assert_eq!(reused.origin, Origin::Reused);
    assert_eq!(builder.builds.get(), 2);
}

#[test]
fn test_record_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::with_binary("pyx", "tcb", false));

    cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();

    let record = ArtifactRecord::load(&dir.path().join("model.freeze.json")).unwrap();
    assert_eq!(record.module_name, "model");
    assert_eq!(record.kind, kind());
    assert_eq!(record.hash().unwrap(), SourceHash::of("abc"));
    assert_eq!(record.source_file, "model.pyx");
    assert_eq!(record.binary_file.as_deref(), Some("model.tcb"));
    assert_eq!(fs::read_to_string(dir.path().join("model.pyx")).unwrap(), "abc");
}

#[test]
fn test_hashed_binary_supersedes_old_file() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::with_binary("c", "so", true));

    cache.resolve(Some("model"), "old", &kind(), &builder).unwrap();
    let old_binary = dir
        .path()
        .join(format!("model.{}.so", SourceHash::of("old").short()));
    assert!(old_binary.is_file());

    cache.resolve(Some("model"), "new", &kind(), &builder).unwrap();
    let new_binary = dir
        .path()
        .join(format!("model.{}.so", SourceHash::of("new").short()));
    assert!(new_binary.is_file());
    assert!(!old_binary.exists());
}

#[test]
fn test_kind_change_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::with_binary("pyx", "tcb", false));

    cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();
    let batch = ArtifactKind::new("cython", "batch");
    let second = cache.resolve(Some("model"), "abc", &batch, &builder).unwrap();
    assert_eq!(second.origin, Origin::Built);
    assert_eq!(builder.builds.get(), 2);
}

#[test]
fn test_missing_binary_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::with_binary("pyx", "tcb", false));

    cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();
    fs::remove_file(dir.path().join("model.tcb")).unwrap();

    let second = cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();
    assert_eq!(second.origin, Origin::Built);
    assert_eq!(builder.builds.get(), 2);
}

#[test]
fn test_tampered_source_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::source_only("py"));

    cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();
    fs::write(dir.path().join("model.py"), "edited by hand").unwrap();

    let second = cache.resolve(Some("model"), "abc", &kind(), &builder).unwrap();
    assert_eq!(second.origin, Origin::Built);
    assert_eq!(second.artifact, "abc");
}

#[test]
fn test_failed_build_keeps_previous_record() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let layout = FileLayout::with_binary("pyx", "tcb", false);

    let good = UppercaseBuilder::new(layout);
    cache.resolve(Some("model"), "abc", &kind(), &good).unwrap();

    let bad = UppercaseBuilder::failing(layout);
    let err = cache.resolve(Some("model"), "xyz", &kind(), &bad).unwrap_err();
    assert_eq!(err.to_string(), "compiler exploded");

    let record = ArtifactRecord::load(&dir.path().join("model.freeze.json")).unwrap();
    assert_eq!(record.hash().unwrap(), SourceHash::of("abc"));
    assert!(dir.path().join("model.tcb").is_file());
    let staging_left: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(staging_left.is_empty());
}

#[test]
fn test_invalid_module_name() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path());
    let builder = UppercaseBuilder::new(FileLayout::source_only("py"));

    let err = cache
        .resolve(Some("../model"), "abc", &kind(), &builder)
        .unwrap_err();
    assert!(err.to_string().contains("Invalid module name"));
    assert_eq!(builder.builds.get(), 0);
}

#[test]
fn test_relative_dir_is_made_absolute() {
    let cache = ArtifactCache::new("build/models");
    assert!(cache.dir().is_absolute());
    assert!(cache.dir().ends_with("build/models"));
}

#[test]
fn test_tampered_record_never_removes_outside_files() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("cache");
    fs::create_dir(&dir).unwrap();
    let victim = root.path().join("victim.so");
    fs::write(&victim, "keep me").unwrap();

    let cache = ArtifactCache::new(&dir);
    let builder = UppercaseBuilder::new(FileLayout::with_binary("c", "so", true));
    cache.resolve(Some("model"), "old", &kind(), &builder).unwrap();

    let record_path = dir.join("model.freeze.json");
    let mut record = ArtifactRecord::load(&record_path).unwrap();
    record.binary_file = Some("../victim.so".to_string());
    record.save(&record_path).unwrap();

    let rebuilt = cache.resolve(Some("model"), "new", &kind(), &builder).unwrap();
    assert_eq!(rebuilt.origin, Origin::Built);
    assert_eq!(rebuilt.artifact, "NEW");
    assert_eq!(fs::read_to_string(&victim).unwrap(), "keep me");
}
