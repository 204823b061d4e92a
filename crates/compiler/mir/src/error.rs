//! Errors raised while compiling.
//!
//! All errors here are fatal for the compilation that raised them.
//! Deoptimization is not an error, see [`crate::Lowered`].

use flatjit_common::HeapError;
use thiserror::Error;

/// A type that cannot be described as a flattened aggregate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("Type '{0}' is not a value class")]
    NotAValueType(String),

    #[error("Value class '{0}' has no computed layout")]
    MissingLayout(String),

    #[error("Value class '{ty}' contains itself through flat field '{path}'")]
    SelfReferential { ty: String, path: String },

    #[error("Unknown type id {0}")]
    UnknownType(usize),
}

/// Errors raised while building or lowering MIR
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("Unknown field '{field}' in type '{ty}'")]
    UnknownField { ty: String, field: String },

    #[error("'{0}' is not an array type")]
    NotAnArray(String),

    #[error("Wrong number of arguments calling '{method}': expected {expected}, got {actual}")]
    ArityMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("Method '{0}' returns a value but none was given")]
    MissingReturnValue(String),

    #[error("Invalid IR in '{function}': {message}")]
    InvalidIr { function: String, message: String },

    #[error("MIR validation failed for '{function}': {message}")]
    Validation { function: String, message: String },

    #[error("Heap error while compiling: {0}")]
    Heap(#[from] HeapError),
}

/// Result type for compilation steps
pub type CompileResult<T> = Result<T, CompileError>;
