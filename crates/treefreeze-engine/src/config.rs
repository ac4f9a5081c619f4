//! Compiler configuration (treefreeze.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration file name looked up by [`CompilerConfig::discover`]
pub const CONFIG_FILE: &str = "treefreeze.toml";

/// Errors that can occur while reading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Compiler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompilerConfig {
    /// Artifact cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// External C compiler settings
    #[serde(default)]
    pub native: NativeConfig,

    /// Staged backend settings
    #[serde(default)]
    pub staged: StagedConfig,
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory persisted artifacts are written to (default: ".")
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

/// C compiler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NativeConfig {
    /// Compiler executable (default: `$CC`, else "cc")
    #[serde(default = "default_compiler")]
    pub compiler: String,

    /// Flags passed before the shared-library arguments
    #[serde(default = "default_flags")]
    pub flags: Vec<String>,
}

fn default_compiler() -> String {
    std::env::var("CC")
        .ok()
        .filter(|cc| !cc.trim().is_empty())
        .unwrap_or_else(|| "cc".to_string())
}

fn default_flags() -> Vec<String> {
    vec!["-O2".to_string()]
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            flags: default_flags(),
        }
    }
}

/// Staged backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StagedConfig {
    /// Lower bytecode to machine code when the `jit` feature is compiled in
    #[serde(default = "default_jit")]
    pub jit: bool,
}

fn default_jit() -> bool {
    true
}

impl Default for StagedConfig {
    fn default() -> Self {
        Self { jit: default_jit() }
    }
}

impl CompilerConfig {
    /// Parse a configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `treefreeze.toml` from `dir`, falling back to defaults when absent
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            debug!(path = %path.display(), "loading configuration");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.native.compiler.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "native.compiler cannot be empty".to_string(),
            ));
        }
        if self.cache.dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "cache.dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Configuration with the artifact directory replaced
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache.dir = dir.into();
        self
    }
}
