//! # MIR Values
//!
//! This module defines values and operands in the MIR system.
//! Values represent data that flows through the program.

use flatjit_common::{Metadata, TypeId};

use crate::{PrettyPrint, ValueId};

/// Represents any value in the program: literals or computed values.
///
/// Every value travels as 64 raw bits at runtime: primitive literals store their
/// widened slot bits, references store an address and hubs store a metadata
/// pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum Value {
    /// A constant literal value
    Literal(Literal),

    /// An operand that references a computed value
    Operand(ValueId),
}

/// Literal constant values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum Literal {
    /// Raw slot bits of a primitive (integers sign-extended, floats as IEEE bits)
    Integer(i64),

    /// Boolean literal
    Boolean(bool),

    /// The null reference
    Null,

    /// Metadata pointer of a type
    Hub(TypeId),

    /// Unit value (void)
    Unit,
}

impl Value {
    /// Creates a new integer literal value
    pub const fn integer(value: i64) -> Self {
        Self::Literal(Literal::Integer(value))
    }

    /// Creates a new boolean literal value
    pub const fn boolean(value: bool) -> Self {
        Self::Literal(Literal::Boolean(value))
    }

    /// The null reference
    pub const fn null() -> Self {
        Self::Literal(Literal::Null)
    }

    /// The hub of a type
    pub const fn hub(ty: TypeId) -> Self {
        Self::Literal(Literal::Hub(ty))
    }

    /// Creates the unit value
    pub const fn unit() -> Self {
        Self::Literal(Literal::Unit)
    }

    /// Creates a new operand value
    pub const fn operand(id: ValueId) -> Self {
        Self::Operand(id)
    }

    /// Returns the literal value if this is a literal
    pub const fn as_literal(&self) -> Option<Literal> {
        match self {
            Self::Literal(lit) => Some(*lit),
            Self::Operand(_) => None,
        }
    }

    /// Returns the operand ID if this is an operand
    pub const fn as_operand(&self) -> Option<ValueId> {
        match self {
            Self::Operand(id) => Some(*id),
            Self::Literal(_) => None,
        }
    }

    /// Returns true for the null literal
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Literal(Literal::Null))
    }

    /// Constant truth value of a boolean-like literal
    pub const fn as_const_bool(&self) -> Option<bool> {
        match self {
            Self::Literal(Literal::Boolean(value)) => Some(*value),
            Self::Literal(Literal::Integer(value)) => Some(*value != 0),
            _ => None,
        }
    }
}

impl Literal {
    /// Slot bits of literals that do not depend on metadata
    pub const fn raw_bits(self) -> Option<u64> {
        match self {
            Self::Integer(value) => Some(value as u64),
            Self::Boolean(value) => Some(value as u64),
            Self::Null | Self::Unit => Some(0),
            Self::Hub(_) => None,
        }
    }

    /// Slot bits of this literal at runtime
    pub fn bits(self, metadata: &Metadata) -> u64 {
        match self {
            Self::Hub(ty) => metadata.get(ty).map_or(0, |meta| meta.hub),
            other => other.raw_bits().unwrap_or(0),
        }
    }
}

impl From<ValueId> for Value {
    fn from(id: ValueId) -> Self {
        Self::Operand(id)
    }
}

impl PrettyPrint for Value {
    fn pretty_print(&self, _indent: usize) -> String {
        match self {
            Self::Literal(lit) => lit.pretty_print(0),
            Self::Operand(id) => id.pretty_print(0),
        }
    }
}

impl PrettyPrint for Literal {
    fn pretty_print(&self, _indent: usize) -> String {
        match self {
            Self::Integer(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
            Self::Null => "null".to_string(),
            Self::Hub(ty) => format!("hub({})", ty.index()),
            Self::Unit => "()".to_string(),
        }
    }
}

impl PrettyPrint for ValueId {
    fn pretty_print(&self, _indent: usize) -> String {
        format!("%{}", self.index())
    }
}
