//! Compile pipeline: snapshot → IR → source → cached artifact → handle

use crate::codegen::{generate, Backend, CallingMode, GeneratedSource};
use crate::config::CompilerConfig;
use crate::error::Result;
use crate::handle::CompiledFunction;
use crate::ir::extract;
use crate::model::FittedModel;
use crate::toolchain::{toolchain_for, DynToolchain};
use std::path::Path;
use tracing::info;
use treefreeze_cache::{ArtifactCache, ArtifactKind};

/// Per-compile options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Persist under this name and reuse across compiles; `None` compiles
    /// into a scratch directory
    pub module_name: Option<String>,
    pub mode: CallingMode,
}

impl CompileOptions {
    /// Persisted compile under `module_name`
    pub fn named(module_name: impl Into<String>) -> Self {
        Self {
            module_name: Some(module_name.into()),
            mode: CallingMode::Single,
        }
    }

    pub fn with_mode(mut self, mode: CallingMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Compiler bound to a configuration and its artifact directory
#[derive(Debug, Clone)]
pub struct Compiler {
    config: CompilerConfig,
    cache: ArtifactCache,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        let cache = ArtifactCache::new(config.cache.dir.clone());
        Self { config, cache }
    }

    /// Compiler configured from `treefreeze.toml` in `dir`, if present
    pub fn discover(dir: &Path) -> Result<Self> {
        Ok(Self::new(CompilerConfig::discover(dir)?))
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Extract the IR and render it; no files are touched
    pub fn generate(
        &self,
        model: &FittedModel,
        backend: Backend,
        mode: CallingMode,
    ) -> Result<GeneratedSource> {
        let forest = extract(model)?;
        Ok(generate(&forest, backend, mode)?)
    }

    /// Compile `model` for `backend` with the configured toolchain
    pub fn compile(
        &self,
        model: &FittedModel,
        backend: Backend,
        options: &CompileOptions,
    ) -> Result<CompiledFunction> {
        let source = self.generate(model, backend, options.mode)?;
        let toolchain = toolchain_for(backend, options.mode, source.n_features, &self.config);
        self.resolve(source, options, toolchain.as_ref())
    }

    /// Compile `model` driving `toolchain` instead of the configured one
    pub fn compile_with(
        &self,
        model: &FittedModel,
        backend: Backend,
        options: &CompileOptions,
        toolchain: &DynToolchain,
    ) -> Result<CompiledFunction> {
        let source = self.generate(model, backend, options.mode)?;
        self.resolve(source, options, toolchain)
    }

    fn resolve(
        &self,
        source: GeneratedSource,
        options: &CompileOptions,
        toolchain: &DynToolchain,
    ) -> Result<CompiledFunction> {
        let kind = ArtifactKind::new(source.backend.as_str(), source.mode.as_str());
        let resolution = self.cache.resolve(
            options.module_name.as_deref(),
            &source.text,
            &kind,
            toolchain,
        )?;

        info!(
            backend = %source.backend,
            mode = %source.mode,
            module = options.module_name.as_deref().unwrap_or("<ephemeral>"),
            origin = ?resolution.origin,
            hash = %resolution.hash.short(),
            "compiled model"
        );
        Ok(CompiledFunction::new(
            resolution.artifact,
            source.backend,
            source.mode,
            resolution.origin,
            resolution.hash,
            resolution.scratch,
        ))
    }
}

/// Compile with the configuration found in the current directory
///
/// `module_name` persists the artifact in the configured cache directory;
/// `None` compiles into a scratch directory.
pub fn compile(
    model: &FittedModel,
    backend: Backend,
    module_name: Option<&str>,
    mode: CallingMode,
) -> Result<CompiledFunction> {
    let options = CompileOptions {
        module_name: module_name.map(str::to_string),
        mode,
    };
    Compiler::discover(Path::new("."))?.compile(model, backend, &options)
}
