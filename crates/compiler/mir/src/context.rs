//! # Compilation context
//!
//! Everything a compilation reads: metadata, configuration, profiles and the
//! shared compute-once caches. A [`CompilationSession`] owns these; a
//! [`CompilationContext`] is the cheap borrowed view threaded through every
//! entry point.

use std::sync::Arc;

use flatjit_common::{CompilerConfig, FieldType, Metadata, MethodId, ProfileTable, TypeId};

use crate::{
    descriptor, AggregateType, CompileResult, DescriptorError, OnceCache, ScalarizedSignature,
    SnippetCache, SpeculationLog,
};

/// Aggregate descriptors, one per value class
pub type DescriptorCache = OnceCache<TypeId, Result<Arc<AggregateType>, DescriptorError>>;

/// Scalarization plans, one per method
pub type SignatureCache = OnceCache<MethodId, CompileResult<Arc<ScalarizedSignature>>>;

/// Borrowed view of a session used by one compilation
#[derive(Debug, Clone, Copy)]
pub struct CompilationContext<'a> {
    pub metadata: &'a Metadata,
    pub config: &'a CompilerConfig,
    pub descriptors: &'a DescriptorCache,
    pub signatures: &'a SignatureCache,
    pub snippets: &'a SnippetCache,
    pub profiles: &'a ProfileTable,
    pub speculations: &'a SpeculationLog,
}

impl<'a> CompilationContext<'a> {
    /// The flattened description of value class `ty`, computed once
    pub fn describe(&self, ty: TypeId) -> Result<Arc<AggregateType>, DescriptorError> {
        self.descriptors
            .get_or_init(ty, || descriptor::describe(self.metadata, ty).map(Arc::new))
    }

    /// The scalarization plan of `method`, computed once
    pub fn plan(&self, method: MethodId) -> CompileResult<Arc<ScalarizedSignature>> {
        crate::plan(self, method)
    }

    /// The descriptor of `ty` if it names a value class
    pub fn aggregate_of(
        &self,
        ty: FieldType,
    ) -> Result<Option<Arc<AggregateType>>, DescriptorError> {
        match ty {
            FieldType::Reference(id) if self.metadata.ty(id).is_value() => {
                self.describe(id).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Owner of everything compilations share
#[derive(Debug)]
pub struct CompilationSession {
    metadata: Metadata,
    config: CompilerConfig,
    profiles: ProfileTable,
    descriptors: DescriptorCache,
    signatures: SignatureCache,
    snippets: SnippetCache,
    speculations: SpeculationLog,
}

impl CompilationSession {
    pub fn new(metadata: Metadata, config: CompilerConfig) -> Self {
        Self {
            metadata,
            config,
            profiles: ProfileTable::new(),
            descriptors: DescriptorCache::new(),
            signatures: SignatureCache::new(),
            snippets: SnippetCache::new(),
            speculations: SpeculationLog::new(),
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn context(&self) -> CompilationContext<'_> {
        CompilationContext {
            metadata: &self.metadata,
            config: &self.config,
            descriptors: &self.descriptors,
            signatures: &self.signatures,
            snippets: &self.snippets,
            profiles: &self.profiles,
            speculations: &self.speculations,
        }
    }

    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub const fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub const fn speculation_log(&self) -> &SpeculationLog {
        &self.speculations
    }

    pub const fn descriptor_cache(&self) -> &DescriptorCache {
        &self.descriptors
    }

    pub const fn signature_cache(&self) -> &SignatureCache {
        &self.signatures
    }
}
