//! # MIR Terminators
//!
//! This module defines terminators, which end basic blocks and transfer control flow.
//! Every basic block must end with exactly one terminator.

use smallvec::SmallVec;

use crate::{BasicBlockId, Deoptimization, PrettyPrint, Value, ValueId};

/// A terminator ends a basic block and transfers control
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional jump: `jump target`
    Jump { target: BasicBlockId },

    /// Conditional branch: `if condition then jump then_target else jump else_target`
    If {
        condition: Value,
        then_target: BasicBlockId,
        else_target: BasicBlockId,
    },

    /// Function return; scalarized returns produce several values
    Return { values: Vec<Value> },

    /// Leaves compiled code and resumes in the interpreter
    Deoptimize(Box<Deoptimization>),

    /// Unreachable code: placeholder during construction
    Unreachable,
}

impl Terminator {
    /// Creates a new jump terminator
    pub const fn jump(target: BasicBlockId) -> Self {
        Self::Jump { target }
    }

    /// Creates a new conditional branch terminator
    pub const fn branch(
        condition: Value,
        then_target: BasicBlockId,
        else_target: BasicBlockId,
    ) -> Self {
        Self::If {
            condition,
            then_target,
            else_target,
        }
    }

    /// Creates a new return terminator
    pub const fn return_values(values: Vec<Value>) -> Self {
        Self::Return { values }
    }

    pub fn deoptimize(deopt: Deoptimization) -> Self {
        Self::Deoptimize(Box::new(deopt))
    }

    /// Returns all basic block targets of this terminator
    pub fn target_blocks(&self) -> SmallVec<[BasicBlockId; 2]> {
        match self {
            Self::Jump { target } => smallvec::smallvec![*target],
            Self::If {
                then_target,
                else_target,
                ..
            } => smallvec::smallvec![*then_target, *else_target],
            Self::Return { .. } | Self::Deoptimize(_) | Self::Unreachable => SmallVec::new(),
        }
    }

    /// Returns all values read by this terminator
    pub fn used_values(&self) -> SmallVec<[ValueId; 4]> {
        let values: Vec<Value> = match self {
            Self::If { condition, .. } => vec![*condition],
            Self::Return { values } => values.clone(),
            Self::Deoptimize(deopt) => deopt.state.locals.clone(),
            Self::Jump { .. } | Self::Unreachable => Vec::new(),
        };
        values.iter().filter_map(Value::as_operand).collect()
    }

    /// Replaces every read of `from` with `to`
    pub fn replace_value_uses(&mut self, from: ValueId, to: Value) {
        let replace = |value: &mut Value| {
            if *value == Value::Operand(from) {
                *value = to;
            }
        };
        match self {
            Self::If { condition, .. } => replace(condition),
            Self::Return { values } => values.iter_mut().for_each(replace),
            Self::Deoptimize(deopt) => deopt.state.locals.iter_mut().for_each(replace),
            Self::Jump { .. } | Self::Unreachable => {}
        }
    }
}

impl PrettyPrint for Terminator {
    fn pretty_print(&self, _indent: usize) -> String {
        match self {
            Self::Jump { target } => format!("jump {}", target.index()),
            Self::If {
                condition,
                then_target,
                else_target,
            } => format!(
                "if {} then jump {} else jump {}",
                condition.pretty_print(0),
                then_target.index(),
                else_target.index()
            ),
            Self::Return { values } => {
                if values.is_empty() {
                    "return".to_string()
                } else {
                    let values = values
                        .iter()
                        .map(|value| value.pretty_print(0))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("return {values}")
                }
            }
            Self::Deoptimize(deopt) => deopt.pretty_print(0),
            Self::Unreachable => "unreachable".to_string(),
        }
    }
}
