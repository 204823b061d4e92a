//! # flatjit-common
//!
//! Types shared by every stage of the value-object compiler: slot kinds, resolved
//! type and method metadata, the heap object model, per-site profiles and the
//! compiler configuration.

pub mod config;
pub mod error;
pub mod heap;
pub mod kind;
pub mod meta;
pub mod method;
pub mod profile;
pub mod schema;

pub use config::CompilerConfig;
pub use error::{ConfigError, HeapError, MetaError};
pub use heap::{Address, Heap, HEAP_BASE, IDENTITY_MASK, NULL, UNLOCKED_MARK};
pub use kind::Kind;
pub use meta::{
    ArrayShape, ClassBuilder, DeclaredField, FieldSpec, FieldType, Metadata, TypeId, TypeMeta,
    TypeShape, ARRAY_BASE_OFFSET, ARRAY_LENGTH_OFFSET, HEADER_SIZE, HUB_OFFSET, MARK_OFFSET,
};
pub use method::{Dispatch, MethodId, MethodMeta, ParamDecl};
pub use profile::{AcmpProfile, OperandObservation, ProfileTable, SiteId};
pub use schema::MetadataDescription;
