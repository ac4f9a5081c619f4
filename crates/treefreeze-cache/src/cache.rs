//! Reuse-or-rebuild resolution of compiled artifacts

use crate::hash::SourceHash;
use crate::layout::{atomic_write, staging_path, ArtifactFiles, ArtifactLayout, FileLayout};
use crate::record::{ArtifactKind, ArtifactRecord};
use crate::CacheError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Module name used for files inside a scratch directory
const SCRATCH_MODULE: &str = "scratch";

/// A toolchain the cache can drive.
///
/// `build` is only called on a cache miss; `load` is called for every
/// resolution, including freshly built artifacts.
pub trait ArtifactBuilder {
    /// Loaded, invocable artifact
    type Artifact;
    /// Builder error; cache failures convert into it
    type Error: From<CacheError> + std::fmt::Display;

    /// File naming scheme of this builder
    fn file_layout(&self) -> FileLayout;

    /// Turn the source at `job.source_path` into the artifact at `job.output_path`.
    fn build(&self, job: &BuildJob<'_>) -> Result<(), Self::Error>;

    /// Load a persisted (or freshly built) artifact
    fn load(&self, files: &ArtifactFiles) -> Result<Self::Artifact, Self::Error>;
}

/// Inputs of a single build invocation
#[derive(Debug)]
pub struct BuildJob<'a> {
    /// Module name the artifact is built for
    pub module_name: &'a str,
    /// Source file, already written
    pub source_path: &'a Path,
    /// Where the artifact must be written (a staging name), if the layout has one
    pub output_path: Option<&'a Path>,
    /// Directory for auxiliary build files
    pub work_dir: &'a Path,
}

/// Where a resolved artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Built in a scratch directory, nothing persisted
    Ephemeral,
    /// Loaded from a persisted artifact without building
    Reused,
    /// Built and persisted by this resolution
    Built,
}

/// Why a persisted artifact cannot be reused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// No record for the module
    NoRecord,
    /// Recorded source hash differs
    HashChanged,
    /// Recorded backend or calling mode differs
    KindChanged,
}

/// Outcome of comparing a record with a freshly generated source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Reuse,
    Rebuild(RebuildReason),
}

/// Decide between reuse and rebuild.
///
/// A pure function of the persisted record and the new source hash: neither
/// timestamps nor tool versions take part.
pub fn decide(record: Option<&ArtifactRecord>, hash: &SourceHash, kind: &ArtifactKind) -> Decision {
    let Some(record) = record else {
        return Decision::Rebuild(RebuildReason::NoRecord);
    };

    if record.kind != *kind {
        return Decision::Rebuild(RebuildReason::KindChanged);
    }

    match record.hash() {
        Ok(recorded) if recorded == *hash => Decision::Reuse,
        _ => Decision::Rebuild(RebuildReason::HashChanged),
    }
}

/// A loaded artifact and how it was obtained
#[derive(Debug)]
pub struct Resolution<A> {
    /// Loaded artifact
    pub artifact: A,
    /// Reused, built or ephemeral
    pub origin: Origin,
    /// Hash of the source the artifact was built from
    pub hash: SourceHash,
    /// Scratch directory of an ephemeral build; must outlive the artifact
    pub scratch: Option<TempDir>,
}

/// Artifact cache rooted at one directory
///
/// Owns every artifact file under its directory; callers only receive loaded
/// artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Cache rooted at `dir` (created lazily on the first persisted build).
    ///
    /// A relative `dir` is resolved against the current directory once, here,
    /// so builders that run tools in other directories see the same paths.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let dir = std::path::absolute(&dir).unwrap_or(dir);
        Self { dir }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Layout of `module_name` for `builder`
    pub fn layout<B: ArtifactBuilder + ?Sized>(
        &self,
        module_name: &str,
        builder: &B,
    ) -> Result<ArtifactLayout, CacheError> {
        ArtifactLayout::new(&self.dir, module_name, builder.file_layout())
    }

    /// Load the artifact for `source`, building it only when needed.
    ///
    /// Without a module name the artifact is built in a scratch directory and
    /// nothing is persisted. With a module name a persisted artifact whose
    /// recorded hash matches `source` is loaded directly; otherwise the
    /// artifact is rebuilt and persisted before loading.
    pub fn resolve<B: ArtifactBuilder + ?Sized>(
        &self,
        module_name: Option<&str>,
        source: &str,
        kind: &ArtifactKind,
        builder: &B,
    ) -> Result<Resolution<B::Artifact>, B::Error> {
        match module_name {
            None => self.resolve_ephemeral(source, builder),
            Some(name) => self.resolve_persisted(name, source, kind, builder),
        }
    }

    fn resolve_ephemeral<B: ArtifactBuilder + ?Sized>(
        &self,
        source: &str,
        builder: &B,
    ) -> Result<Resolution<B::Artifact>, B::Error> {
        let hash = SourceHash::of(source);
        let scratch = tempfile::Builder::new()
            .prefix("treefreeze-")
            .tempdir()
            .map_err(CacheError::from)?;

        let layout = ArtifactLayout::new(scratch.path(), SCRATCH_MODULE, builder.file_layout())?;
        let files = layout.files_for(&hash);
        fs::write(&files.source, source).map_err(CacheError::from)?;

        debug!(dir = %scratch.path().display(), %hash, "building ephemeral artifact");
        builder.build(&BuildJob {
            module_name: SCRATCH_MODULE,
            source_path: &files.source,
            output_path: files.binary.as_deref(),
            work_dir: scratch.path(),
        })?;
        ensure_output(files.binary.as_deref())?;

        let artifact = builder.load(&files)?;
        Ok(Resolution {
            artifact,
            origin: Origin::Ephemeral,
            hash,
            scratch: Some(scratch),
        })
    }

    fn resolve_persisted<B: ArtifactBuilder + ?Sized>(
        &self,
        module_name: &str,
        source: &str,
        kind: &ArtifactKind,
        builder: &B,
    ) -> Result<Resolution<B::Artifact>, B::Error> {
        let layout = self.layout(module_name, builder)?;
        let hash = SourceHash::of(source);

        let record = match ArtifactRecord::load_if_exists(&layout.record_path()) {
            Ok(record) => record,
            Err(e) => {
                warn!(module = module_name, error = %e, "ignoring unreadable artifact record");
                None
            }
        };

        match decide(record.as_ref(), &hash, kind) {
            Decision::Reuse => {
                // The record matched; the files it names must still be intact.
                let files = record
                    .as_ref()
                    .and_then(|r| r.files(&self.dir).ok())
                    .unwrap_or_else(|| layout.files_for(&hash));
                if persisted_files_intact(&files, &hash) {
                    match builder.load(&files) {
                        Ok(artifact) => {
                            info!(module = module_name, %hash, "reusing persisted artifact");
                            return Ok(Resolution {
                                artifact,
                                origin: Origin::Reused,
                                hash,
                                scratch: None,
                            });
                        }
                        Err(e) => {
                            warn!(module = module_name, error = %e, "persisted artifact failed to load, rebuilding");
                        }
                    }
                } else {
                    warn!(module = module_name, "persisted artifact files are missing or modified, rebuilding");
                }
            }
            Decision::Rebuild(reason) => {
                info!(module = module_name, %hash, ?reason, "building artifact");
            }
        }

        let files = self.build_persisted(&layout, source, &hash, kind, builder)?;

        if let Some(stale) = record
            .as_ref()
            .and_then(|r| match r.files(&self.dir) {
                Ok(files) => files.binary,
                Err(e) => {
                    warn!(module = module_name, error = %e, "not removing superseded artifact");
                    None
                }
            })
            .filter(|stale| Some(stale) != files.binary.as_ref())
        {
            if let Err(e) = fs::remove_file(&stale) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %stale.display(), error = %e, "failed to remove superseded artifact");
                }
            }
        }

        let artifact = builder.load(&files)?;
        Ok(Resolution {
            artifact,
            origin: Origin::Built,
            hash,
            scratch: None,
        })
    }

    fn build_persisted<B: ArtifactBuilder + ?Sized>(
        &self,
        layout: &ArtifactLayout,
        source: &str,
        hash: &SourceHash,
        kind: &ArtifactKind,
        builder: &B,
    ) -> Result<ArtifactFiles, B::Error> {
        fs::create_dir_all(&self.dir).map_err(CacheError::from)?;

        let files = layout.files_for(hash);
        atomic_write(&files.source, source.as_bytes())?;

        // Build under a staging name; only a complete artifact gets the final name.
        let staging = files.binary.as_deref().map(staging_path);
        let built = builder.build(&BuildJob {
            module_name: layout.module_name(),
            source_path: &files.source,
            output_path: staging.as_deref(),
            work_dir: &self.dir,
        });
        if let Err(e) = built {
            if let Some(staging) = &staging {
                let _ = fs::remove_file(staging);
            }
            return Err(e);
        }

        if let (Some(staging), Some(binary)) = (&staging, &files.binary) {
            ensure_output(Some(staging))?;
            fs::rename(staging, binary).map_err(CacheError::from)?;
        }

        let record = ArtifactRecord::new(layout.module_name(), kind.clone(), hash, &files);
        record.save(&layout.record_path())?;
        debug!(module = layout.module_name(), record = %layout.record_path().display(), "artifact persisted");

        Ok(files)
    }
}

/// The source on disk still hashes to `hash` and the artifact file exists
fn persisted_files_intact(files: &ArtifactFiles, hash: &SourceHash) -> bool {
    let source_matches = fs::read(&files.source)
        .map(|bytes| SourceHash::of_bytes(&bytes) == *hash)
        .unwrap_or(false);
    let binary_present = files.binary.as_ref().map_or(true, |b| b.is_file());
    source_matches && binary_present
}

fn ensure_output(path: Option<&Path>) -> Result<(), CacheError> {
    match path {
        Some(path) if !path.is_file() => Err(CacheError::MissingOutput(path.display().to_string())),
        _ => Ok(()),
    }
}
