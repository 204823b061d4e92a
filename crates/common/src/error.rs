//! Errors raised while building or querying metadata and the heap model.

use crate::heap::Address;

/// Malformed or inconsistent type/method metadata
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("Unknown type '{0}'")]
    UnknownType(String),
    #[error("Unknown kind '{0}'")]
    UnknownKind(String),
    #[error("Type '{0}' is already defined")]
    DuplicateType(String),
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),
    #[error("Field '{field}' cannot be flattened: '{ty}' is not a value type")]
    NotFlattenable { field: String, ty: String },
    #[error("Field '{field}' flattens '{ty}' whose layout is not known yet")]
    UndefinedLayout { field: String, ty: String },
    #[error("Invalid array element type: {0}")]
    InvalidArray(String),
    #[error("Invalid metadata description: {0}")]
    Json(#[from] serde_json::Error),
}

/// Faults raised by the heap model
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("Null dereference")]
    NullDereference,
    #[error("Address {0:#x} is outside the heap")]
    OutOfBounds(Address),
    #[error("Unknown hub {0:#x}")]
    UnknownHub(u64),
    #[error("Object at {0:#x} is not an array")]
    NotAnArray(Address),
    #[error("Index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: i64, length: u32 },
    #[error("Type '{0}' cannot be instantiated")]
    NotInstantiable(String),
}

/// Configuration that failed to parse
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}
