//! # flatjit compilation host
//!
//! Owns one [`CompilationSession`] (metadata, configuration, profiles and the
//! shared caches) and drives planning and call-site adapter generation for the
//! methods it describes. Compilations running on different threads share the
//! session's caches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flatjit_common::{
    CompilerConfig, ConfigError, MetaError, Metadata, MetadataDescription, MethodId, ProfileTable,
};
use flatjit_compiler_codegen::{call_site_adapter, CallSiteAdapter, CodegenError};
use flatjit_compiler_mir::{
    CompilationContext, CompilationSession, CompileError, DescriptorError, ScalarizedSignature,
};
use rayon::prelude::*;
use tracing::{debug, info, span, Level};

/// Errors surfaced by the host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Metadata(#[from] MetaError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error("Unknown method '{0}', expected 'Holder.name'")]
    UnknownMethod(String),
}

pub type HostResult<T> = Result<T, HostError>;

fn read(path: &Path) -> HostResult<String> {
    std::fs::read_to_string(path).map_err(|source| HostError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub struct CompilationHost {
    session: CompilationSession,
}

impl CompilationHost {
    pub fn new(metadata: Metadata, config: CompilerConfig) -> Self {
        Self {
            session: CompilationSession::new(metadata, config),
        }
    }

    /// Loads a JSON metadata description and an optional TOML configuration
    pub fn from_files(metadata: &Path, config: Option<&Path>) -> HostResult<Self> {
        let _span = span!(Level::INFO, "load", metadata = %metadata.display()).entered();

        let description = MetadataDescription::from_json(&read(metadata)?)?;
        let metadata = description.build()?;
        let config = match config {
            Some(path) => CompilerConfig::from_toml_str(&read(path)?)?,
            None => CompilerConfig::default(),
        };
        info!(
            "loaded {} types and {} methods",
            metadata.types().count(),
            metadata.methods().count()
        );
        debug!(?config);
        Ok(Self::new(metadata, config))
    }

    pub fn with_profiles(self, profiles: ProfileTable) -> Self {
        Self {
            session: self.session.with_profiles(profiles),
        }
    }

    pub fn context(&self) -> CompilationContext<'_> {
        self.session.context()
    }

    pub fn metadata(&self) -> &Metadata {
        self.context().metadata
    }

    pub fn config(&self) -> &CompilerConfig {
        self.context().config
    }

    /// Resolves a `Holder.name` method name
    pub fn method(&self, name: &str) -> HostResult<MethodId> {
        self.metadata()
            .lookup_method(name)
            .ok_or_else(|| HostError::UnknownMethod(name.to_string()))
    }

    pub fn plan(&self, name: &str) -> HostResult<Arc<ScalarizedSignature>> {
        let _span = span!(Level::INFO, "plan", method = name).entered();
        let method = self.method(name)?;
        let plan = self.context().plan(method)?;
        info!(entries = ?plan.entries(), "planned");
        Ok(plan)
    }

    /// Plans every method of the metadata in parallel, in declaration order
    pub fn plan_all(&self) -> HostResult<Vec<Arc<ScalarizedSignature>>> {
        let _span = span!(Level::INFO, "plan_all").entered();
        let methods: Vec<MethodId> = self.metadata().methods().map(|(id, _)| id).collect();
        let context = self.context();
        let plans = methods
            .par_iter()
            .map(|&method| context.plan(method).map_err(HostError::from))
            .collect::<HostResult<Vec<_>>>()?;
        info!("planned {} methods", plans.len());
        Ok(plans)
    }

    /// The code a boxed caller runs around a call to `name`
    pub fn adapter(&self, name: &str, statically_bound: bool) -> HostResult<CallSiteAdapter> {
        let _span = span!(Level::INFO, "adapter", method = name, statically_bound).entered();
        let method = self.method(name)?;
        let adapter = call_site_adapter(self.context(), method, statically_bound)?;
        info!(
            current = ?adapter.current.entry,
            expected = ?adapter.expected.entry,
            "built adapter"
        );
        Ok(adapter)
    }
}
