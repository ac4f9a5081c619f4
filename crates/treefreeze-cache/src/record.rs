//! Artifact records
//!
//! A record is the commit point of a persisted artifact: it names the source
//! hash the artifact was built from and the files that make it up. It is
//! written last, so a record on disk only ever refers to complete files.

use crate::hash::SourceHash;
use crate::layout::{atomic_write, ArtifactFiles};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during record operations
#[derive(Debug, Error)]
pub enum RecordError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Stored hash is not 64 hex characters
    #[error("Invalid source hash in record: {0}")]
    InvalidHash(String),

    /// File name that would resolve outside the cache directory
    #[error("Invalid file name in record: '{0}'")]
    InvalidFileName(String),
}

/// Backend and calling mode an artifact was generated for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactKind {
    /// Backend tag (`python`, `cython`, `c`)
    pub backend: String,
    /// Calling mode tag (`single`, `batch`)
    pub mode: String,
}

impl ArtifactKind {
    pub fn new(backend: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            mode: mode.into(),
        }
    }
}

/// Persisted description of one compiled artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Module name (cache key)
    pub module_name: String,

    /// Backend and calling mode
    #[serde(flatten)]
    pub kind: ArtifactKind,

    /// SHA-256 of the generated source (hex-encoded)
    pub source_hash: String,

    /// Source file name, relative to the cache directory
    pub source_file: String,

    /// Built artifact file name, relative to the cache directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_file: Option<String>,

    /// Version of the tool that wrote the record (informational only)
    pub tool_version: String,

    /// Timestamp when built (Unix timestamp)
    pub built_at: u64,
}

impl ArtifactRecord {
    /// Create a record for freshly built `files`
    pub fn new(
        module_name: &str,
        kind: ArtifactKind,
        hash: &SourceHash,
        files: &ArtifactFiles,
    ) -> Self {
        Self {
            module_name: module_name.to_string(),
            kind,
            source_hash: hash.to_hex(),
            source_file: file_name(&files.source),
            binary_file: files.binary.as_deref().map(file_name),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            built_at: Self::current_timestamp(),
        }
    }

    /// Parsed source hash
    pub fn hash(&self) -> Result<SourceHash, RecordError> {
        SourceHash::from_hex(&self.source_hash)
            .ok_or_else(|| RecordError::InvalidHash(self.source_hash.clone()))
    }

    /// Files of this record, resolved against the cache directory.
    ///
    /// Names must be bare file names; anything with a separator, a parent
    /// component or a root is rejected.
    pub fn files(&self, dir: &Path) -> Result<ArtifactFiles, RecordError> {
        Ok(ArtifactFiles {
            source: dir.join(bare_file_name(&self.source_file)?),
            binary: self
                .binary_file
                .as_deref()
                .map(|name| bare_file_name(name).map(|n| dir.join(n)))
                .transpose()?,
        })
    }

    /// Load a record from a JSON file
    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let contents = fs::read_to_string(path)?;
        let record = serde_json::from_str(&contents)?;
        Ok(record)
    }

    /// Load a record, `Ok(None)` when no record exists
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, RecordError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Save the record atomically
    pub fn save(&self, path: &Path) -> Result<(), crate::CacheError> {
        let json = serde_json::to_string_pretty(self).map_err(RecordError::from)?;
        atomic_write(path, json.as_bytes())
    }

    fn current_timestamp() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

fn bare_file_name(name: &str) -> Result<&str, RecordError> {
    let bare = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(std::ffi::OsStr::new(name));
    if bare {
        Ok(name)
    } else {
        Err(RecordError::InvalidFileName(name.to_string()))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_record() -> ArtifactRecord {
        let files = ArtifactFiles {
            source: PathBuf::from("/tmp/model.c"),
            binary: Some(PathBuf::from("/tmp/model.0123456789abcdef.so")),
        };
        ArtifactRecord::new(
            "model",
            ArtifactKind::new("c", "single"),
            &SourceHash::of("int main;"),
            &files,
        )
    }

    #[test]
    fn test_record_creation() {
        let record = sample_record();
        assert_eq!(record.module_name, "model");
        assert_eq!(record.source_file, "model.c");
        assert_eq!(
            record.binary_file,
            Some("model.0123456789abcdef.so".to_string())
        );
        assert_eq!(record.hash().unwrap(), SourceHash::of("int main;"));
        assert!(record.built_at > 0);
    }

    #[test]
    fn test_files_resolve_against_dir() {
        let record = sample_record();
        let files = record.files(Path::new("/cache")).unwrap();
        assert_eq!(files.source, PathBuf::from("/cache/model.c"));
        assert_eq!(
            files.binary,
            Some(PathBuf::from("/cache/model.0123456789abcdef.so"))
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.freeze.json");
        let record = sample_record();

        record.save(&path).unwrap();
        let loaded = ArtifactRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_load_if_exists_missing() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ArtifactRecord::load_if_exists(&dir.path().join("none.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_kind_is_flattened() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["backend"], "c");
        assert_eq!(json["mode"], "single");
    }

    #[test]
    fn test_files_reject_paths_outside_dir() {
        for name in ["../victim.so", "sub/model.so", "/etc/passwd", "..", "", "a\\b.so"] {
            let mut record = sample_record();
            record.binary_file = Some(name.to_string());
            assert!(
                matches!(
                    record.files(Path::new("/cache")),
                    Err(RecordError::InvalidFileName(_))
                ),
                "{:?} accepted",
                name
            );
        }

        let mut record = sample_record();
        record.source_file = "../model.c".to_string();
        assert!(record.files(Path::new("/cache")).is_err());
    }
}
