//! # flatjit machine-level calling conventions
//!
//! This crate materializes the planner's scalarization decisions at the
//! machine level. It runs after register allocation, when every argument of a
//! call already sits in a register or an outgoing stack slot.
//!
//! ## Architecture
//!
//! 1. **Target model** ([`target`]): registers, register classes and locations
//! 2. **Layouts** ([`layout`]): physical locations of an entry's slots
//! 3. **Shuffle** ([`shuffle`]): moving and unpacking arguments between layouts
//! 4. **Tagged returns** ([`tagged`]): encoding and decoding the tag register
//! 5. **Simulation** ([`simulator`]): executing emitted code against the heap model

use flatjit_compiler_mir::CompileError;

pub mod adapter;
pub mod layout;
pub mod masm;
pub mod shuffle;
pub mod simulator;
pub mod tagged;
pub mod target;

pub use adapter::{call_site_adapter, CallSiteAdapter};
pub use layout::{ArgumentLayout, CallLayout, CallingConvention};
pub use masm::{Emitted, Label, LabelId, MachInst, MacroAssembler, MachineCode};
pub use shuffle::{shuffle, unpack, FieldMove, ShuffleJob, ShuffleStats, SlotState};
pub use simulator::{Machine, SimError};
pub use tagged::{decode_return, encode_return, TAG_BIT};
pub use target::{Location, Register, RegisterClass, STACK_SLOT_SIZE};

/// A shuffle that could not place every argument
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShuffleError {
    #[error("{pending} of {total} argument moves unresolved after {passes} passes")]
    Unresolved {
        pending: usize,
        total: usize,
        passes: usize,
    },
}

/// Errors that can occur during code generation
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Shuffle(#[from] ShuffleError),
    #[error("Return needs more than the {available} {class:?} return registers")]
    TooManyReturnSlots {
        class: RegisterClass,
        available: usize,
    },
    #[error("Label '{0}' was never bound")]
    UnboundLabel(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result type for codegen operations
pub type CodegenResult<T> = Result<T, CodegenError>;
