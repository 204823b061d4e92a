//! # MIR Basic Block
//!
//! A basic block is a straight-line sequence of instructions with exactly one
//! entry point and one exit point.

use crate::{indent_str, Instruction, InstructionKind, PrettyPrint, Terminator};

/// A basic block in the Control Flow Graph
///
/// # Invariants
///
/// - Every basic block ends with exactly one terminator
/// - Phi instructions come before every other instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Optional name for debugging
    pub name: Option<String>,

    /// The sequence of instructions in this block
    pub instructions: Vec<Instruction>,

    /// The terminator that ends this block and transfers control
    pub terminator: Terminator,
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicBlock {
    /// Creates a new empty basic block with an unreachable terminator
    pub const fn new() -> Self {
        Self {
            name: None,
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }

    /// Creates a new named basic block
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Adds an instruction to the end of this block
    pub fn push_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Inserts a phi after the existing phis
    pub fn push_phi(&mut self, instruction: Instruction) {
        let position = self.phi_count();
        self.instructions.insert(position, instruction);
    }

    /// Number of leading phi instructions
    pub fn phi_count(&self) -> usize {
        self.instructions
            .iter()
            .take_while(|instr| matches!(instr.kind, InstructionKind::Phi { .. }))
            .count()
    }

    /// Sets the terminator for this block
    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    /// Returns true if this block has a meaningful terminator
    pub const fn is_terminated(&self) -> bool {
        !matches!(self.terminator, Terminator::Unreachable)
    }

    /// Validates the basic block structure
    pub fn validate(&self) -> Result<(), String> {
        let phis = self.phi_count();
        if let Some(position) = self.instructions[phis..]
            .iter()
            .position(|instr| matches!(instr.kind, InstructionKind::Phi { .. }))
        {
            return Err(format!(
                "Phi instruction at position {} found after non-phi instruction",
                phis + position
            ));
        }
        if !self.is_terminated() {
            return Err("Block is not terminated".to_string());
        }
        Ok(())
    }
}

impl PrettyPrint for BasicBlock {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = String::new();
        for instruction in &self.instructions {
            result.push_str(&format!(
                "{}{}\n",
                indent_str(indent),
                instruction.pretty_print(0)
            ));
        }
        result.push_str(&format!(
            "{}{}\n",
            indent_str(indent),
            self.terminator.pretty_print(0)
        ));
        result
    }
}
