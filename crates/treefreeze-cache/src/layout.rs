//! On-disk layout of persisted artifacts
//!
//! Every artifact lives in the cache directory under names derived from its
//! module name:
//!
//! ```text
//! <dir>/
//! ├── <module>.<source-ext>            generated source
//! ├── <module>.<binary-ext>            built artifact (staged backends)
//! ├── <module>.<hash16>.<binary-ext>   built artifact (hash-qualified, native)
//! └── <module>.freeze.json             artifact record (commit point)
//! ```

use crate::hash::SourceHash;
use crate::CacheError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffix of artifact record files
pub const RECORD_SUFFIX: &str = "freeze.json";

/// File naming scheme a builder needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLayout {
    /// Extension of the persisted source file (without the dot)
    pub source_ext: &'static str,
    /// Extension of the built artifact, `None` when the source is the artifact
    pub binary_ext: Option<&'static str>,
    /// Qualify the artifact name with the source hash.
    ///
    /// Needed when the loader caches by path (as `dlopen` does), so a rebuilt
    /// artifact never reuses the name of one already mapped into the process.
    pub hashed_binary: bool,
}

impl FileLayout {
    /// Layout for a backend whose source file is its own artifact
    pub const fn source_only(source_ext: &'static str) -> Self {
        Self {
            source_ext,
            binary_ext: None,
            hashed_binary: false,
        }
    }

    /// Layout for a backend that builds a separate artifact file
    pub const fn with_binary(
        source_ext: &'static str,
        binary_ext: &'static str,
        hashed_binary: bool,
    ) -> Self {
        Self {
            source_ext,
            binary_ext: Some(binary_ext),
            hashed_binary,
        }
    }
}

/// Files that make up one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFiles {
    /// Generated source file
    pub source: PathBuf,
    /// Built artifact, if the backend produces one
    pub binary: Option<PathBuf>,
}

/// Paths of one module inside a cache directory
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    dir: PathBuf,
    module_name: String,
    files: FileLayout,
}

impl ArtifactLayout {
    /// Create the layout for `module_name`, rejecting names that are not identifiers
    pub fn new(dir: &Path, module_name: &str, files: FileLayout) -> Result<Self, CacheError> {
        validate_module_name(module_name)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            module_name: module_name.to_string(),
            files,
        })
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Module name
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// `<dir>/<module>.<source-ext>`
    pub fn source_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.module_name, self.files.source_ext))
    }

    /// Artifact path for a given source hash, if the backend builds one
    pub fn binary_path(&self, hash: &SourceHash) -> Option<PathBuf> {
        let ext = self.files.binary_ext?;
        let name = if self.files.hashed_binary {
            format!("{}.{}.{}", self.module_name, hash.short(), ext)
        } else {
            format!("{}.{}", self.module_name, ext)
        };
        Some(self.dir.join(name))
    }

    /// `<dir>/<module>.freeze.json`
    pub fn record_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.module_name, RECORD_SUFFIX))
    }

    /// Files of the artifact built from `hash`
    pub fn files_for(&self, hash: &SourceHash) -> ArtifactFiles {
        ArtifactFiles {
            source: self.source_path(),
            binary: self.binary_path(hash),
        }
    }
}

/// Staging name next to `path`, unique to this process
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}

/// Write `bytes` to `path` without ever exposing a partial file under `path`.
///
/// The data is written to a staging file in the same directory, synced, and
/// renamed over the destination.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp_path = staging_path(path);
    let result = (|| {
        let mut tmp_file = fs::File::create(&tmp_path)?;
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(CacheError::from)
}

/// Check that a module name is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`)
pub fn validate_module_name(name: &str) -> Result<(), CacheError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidModuleName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_validation() {
        assert!(validate_module_name("model").is_ok());
        assert!(validate_module_name("_model_2").is_ok());
        assert!(validate_module_name("").is_err());
        assert!(validate_module_name("2model").is_err());
        assert!(validate_module_name("my-model").is_err());
        assert!(validate_module_name("../escape").is_err());
    }

    #[test]
    fn test_paths() {
        let layout = ArtifactLayout::new(
            Path::new("/cache"),
            "iris",
            FileLayout::with_binary("c", "so", true),
        )
        .unwrap();
        let hash = SourceHash::of("abc");

        assert_eq!(layout.source_path(), PathBuf::from("/cache/iris.c"));
        assert_eq!(
            layout.binary_path(&hash),
            Some(PathBuf::from("/cache/iris.ba7816bf8f01cfea.so"))
        );
        assert_eq!(layout.record_path(), PathBuf::from("/cache/iris.freeze.json"));
    }

    #[test]
    fn test_source_only_layout_has_no_binary() {
        let layout =
            ArtifactLayout::new(Path::new("."), "m", FileLayout::source_only("py")).unwrap();
        assert_eq!(layout.binary_path(&SourceHash::of("x")), None);
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
