//! # Target machine model
//!
//! A 64-bit register machine with sixteen general-purpose and sixteen
//! floating-point registers, modeled on x86-64. Values of every kind occupy a
//! full 8-byte slot when held in a register or an outgoing stack slot.
//!
//! A few registers are reserved for code emitted between register allocation
//! and the call itself and never hold arguments:
//!
//! | register | use |
//! |----------|-----|
//! | `r13`    | spill scratch of the general class |
//! | `xmm15`  | spill scratch of the floating class |
//! | `r14`    | base register when an unpacked reference arrives on the stack |
//! | `r15`    | transit register for general stack-to-stack moves |
//! | `xmm14`  | transit register for floating stack-to-stack moves |

use std::fmt;

use flatjit_common::Kind;

/// Register class of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    General,
    Floating,
}

impl RegisterClass {
    pub const fn of(kind: Kind) -> Self {
        if kind.is_floating() {
            Self::Floating
        } else {
            Self::General
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::General => 0,
            Self::Floating => 1,
        }
    }

    /// The register a blocked source of this class is spilled into
    pub const fn spill_scratch(self) -> Register {
        match self {
            Self::General => Register::R13,
            Self::Floating => Register::XMM15,
        }
    }

    /// The register stack-to-stack moves of this class go through
    pub const fn transit(self) -> Register {
        match self {
            Self::General => Register::R15,
            Self::Floating => Register::XMM14,
        }
    }
}

/// A physical register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    Gpr(u8),
    Xmm(u8),
}

const GPR_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

impl Register {
    pub const RAX: Self = Self::Gpr(0);
    pub const RCX: Self = Self::Gpr(1);
    pub const RDX: Self = Self::Gpr(2);
    pub const RBX: Self = Self::Gpr(3);
    pub const RSP: Self = Self::Gpr(4);
    pub const RSI: Self = Self::Gpr(6);
    pub const RDI: Self = Self::Gpr(7);
    pub const R8: Self = Self::Gpr(8);
    pub const R9: Self = Self::Gpr(9);
    pub const R10: Self = Self::Gpr(10);
    pub const R13: Self = Self::Gpr(13);
    pub const R14: Self = Self::Gpr(14);
    pub const R15: Self = Self::Gpr(15);
    pub const XMM14: Self = Self::Xmm(14);
    pub const XMM15: Self = Self::Xmm(15);

    /// Every general-purpose register, in encoding order
    pub fn general() -> impl Iterator<Item = Self> {
        (0..16).map(Self::Gpr)
    }

    /// Every floating-point register, in encoding order
    pub fn floating() -> impl Iterator<Item = Self> {
        (0..16).map(Self::Xmm)
    }

    pub const fn class(self) -> RegisterClass {
        match self {
            Self::Gpr(_) => RegisterClass::General,
            Self::Xmm(_) => RegisterClass::Floating,
        }
    }

    /// Dense index over both register files
    pub const fn index(self) -> usize {
        match self {
            Self::Gpr(n) => n as usize,
            Self::Xmm(n) => 16 + n as usize,
        }
    }

    /// Registers the shuffler and the tagged-return code clobber
    pub const fn is_reserved(self) -> bool {
        matches!(
            self,
            Self::RSP | Self::R13 | Self::R14 | Self::R15 | Self::XMM14 | Self::XMM15
        )
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpr(n) => write!(f, "{}", GPR_NAMES[*n as usize & 15]),
            Self::Xmm(n) => write!(f, "xmm{n}"),
        }
    }
}

/// Size of one outgoing stack slot in bytes
pub const STACK_SLOT_SIZE: u32 = 8;

/// Where a calling-convention slot lives at the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    Register(Register),
    /// Byte offset from the stack pointer
    Stack(u32),
}

impl Location {
    /// Dense id over registers and stack slots
    pub const fn id(self) -> usize {
        match self {
            Self::Register(register) => register.index(),
            Self::Stack(offset) => 32 + (offset / STACK_SLOT_SIZE) as usize,
        }
    }

    pub const fn register(self) -> Option<Register> {
        match self {
            Self::Register(register) => Some(register),
            Self::Stack(_) => None,
        }
    }

    pub const fn is_stack(self) -> bool {
        matches!(self, Self::Stack(_))
    }

    /// The same location after the stack pointer moved down by `bytes`
    pub const fn below(self, bytes: u32) -> Self {
        match self {
            Self::Register(_) => self,
            Self::Stack(offset) => Self::Stack(offset + bytes),
        }
    }
}

impl From<Register> for Location {
    fn from(register: Register) -> Self {
        Self::Register(register)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(register) => write!(f, "{register}"),
            Self::Stack(offset) => write!(f, "[rsp+{offset}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_ids_are_dense_and_distinct() {
        assert_eq!(Location::Register(Register::RAX).id(), 0);
        assert_eq!(Location::Register(Register::Xmm(0)).id(), 16);
        assert_eq!(Location::Stack(0).id(), 32);
        assert_eq!(Location::Stack(16).id(), 34);
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Register::RDI.to_string(), "rdi");
        assert_eq!(Register::R10.to_string(), "r10");
        assert_eq!(Register::R13.to_string(), "r13");
        assert_eq!(Register::Xmm(3).to_string(), "xmm3");
        assert_eq!(Location::Stack(8).to_string(), "[rsp+8]");
    }

    #[test]
    fn test_scratch_registers_are_reserved() {
        for class in [RegisterClass::General, RegisterClass::Floating] {
            assert!(class.spill_scratch().is_reserved());
            assert!(class.transit().is_reserved());
            assert_eq!(class.spill_scratch().class(), class);
        }
        assert_eq!(RegisterClass::of(Kind::Double), RegisterClass::Floating);
        assert_eq!(RegisterClass::of(Kind::Object), RegisterClass::General);
    }
}
