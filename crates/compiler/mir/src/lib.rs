//! # flatjit Intermediate Representation (MIR)
//!
//! This crate defines the Mid-level Intermediate Representation used by the
//! flatjit compiler, together with the value-object layer built on top of it:
//! scalarization planning, substitutability checks, flattened field access and
//! the lowering of everything that is still virtual at the end of optimization.
//!
//! ## Design Principles
//!
//! 1. **Control Flow Graph (CFG)**: Functions are represented as directed graphs of basic blocks
//! 2. **Three-Address Code (TAC)**: Instructions are simple, atomic operations
//! 3. **Static Single Assignment (SSA)**: Each value is assigned exactly once; merges use phis
//! 4. **Explicit Control Flow**: All control flow is explicit through terminators,
//!    including deoptimization
//!
//! ## Architecture
//!
//! ```text
//! MirModule
//! functions: IndexVec<FunctionId, MirFunction>
//! entries:   CallTarget -> FunctionId
//!
//! MirFunction (one compiled entry of a method)
//! basic_blocks: IndexVec<BasicBlockId, BasicBlock>
//! parameters:   calling-convention slots
//!
//! BasicBlock
//! instructions: Vec<Instruction>
//! terminator: Terminator
//! ```
//!
//! ## Value objects
//!
//! - [`descriptor`]: flattened leaf layout of value classes
//! - [`planner`]: which signature positions travel as scalarized slots
//! - [`builder`]: IR construction, including flattened access, substitutability
//!   and scalarized calls
//! - [`passes`]: virtualization, materialization and comparison lowering
//! - [`snippets`]: runtime substitutability code bound per value class
//! - [`interpreter`]: reference execution of lowered MIR against the heap model

#![allow(clippy::option_if_let_else)]

pub use basic_block::BasicBlock;
pub use builder::{ArrayLayout, CfgBuilder, InstrBuilder, MirBuilder};
pub use cache::OnceCache;
pub use context::{CompilationContext, CompilationSession, DescriptorCache, SignatureCache};
pub use deopt::{
    DeoptAction, DeoptReason, Deoptimization, FrameState, Lowered, Speculation, SpeculationKind,
};
pub use descriptor::{describe, AggregateType, FieldDescriptor, FieldRole};
pub use error::{CompileError, CompileResult, DescriptorError};
pub use function::MirFunction;
pub use instruction::{
    BinaryOp, CompareOp, InlineNullState, Instruction, InstructionKind, LocationIdentity,
    RuntimeFunction, UnaryOp,
};
pub use interpreter::{InterpError, Interpreter, Outcome};
pub use mir_types::{MirType, RefStamp};
pub use module::MirModule;
pub use passes::{
    ConstantFolding, CopyPropagation, DeadCodeElimination, FixedPoint, ForwardStores,
    LowerComparisons, MaterializeInlineValues, MergeBlocks, MirPass, PassManager,
    SimplifyBranches, Validation, VirtualizeInlineValues,
};
pub use pipeline::{build_entry, compile_method, compile_module, optimize_function, MethodBody};
pub use planner::{
    plan, CallTarget, EntryKind, PositionPlan, ScalarizedSignature, SignaturePosition, Slot,
    SlotRole,
};
pub use snippets::{LowerToSnippet, SnippetCache, SnippetSite};
pub use speculation::SpeculationLog;
pub use terminator::Terminator;
pub use value::{Literal, Value};
pub use virtual_object::{VirtualObject, VirtualObjectTable};

pub mod basic_block;
pub mod builder;
pub mod cache;
pub mod context;
pub mod deopt;
pub mod descriptor;
pub mod error;
pub mod function;
pub mod instruction;
pub mod interpreter;
pub mod mir_types;
pub mod module;
pub mod passes;
pub mod pipeline;
pub mod planner;
pub mod snippets;
pub mod speculation;
pub mod terminator;
pub mod value;
pub mod virtual_object;

#[cfg(test)]
mod testing;


// --- Core Identifiers ---

index_vec::define_index_type! {
    /// Unique identifier for a function within a MIR module
    pub struct FunctionId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for a basic block within a function
    pub struct BasicBlockId = usize;
}

index_vec::define_index_type! {
    /// Unique identifier for a value (virtual register) within a function
    pub struct ValueId = usize;
}

// --- Pretty Printing Support ---

/// Trait for pretty-printing MIR constructs
pub trait PrettyPrint {
    fn pretty_print(&self, indent: usize) -> String;
}

/// Helper function to create indentation
pub(crate) fn indent_str(level: usize) -> String {
    "  ".repeat(level)
}
