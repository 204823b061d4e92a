//! # Calling-convention layouts
//!
//! Assigns physical locations to a list of calling-convention slots. General
//! slots take the next free argument register of the general class, floating
//! slots the next floating register; once a class runs out, slots overflow to
//! 8-byte outgoing stack slots in slot order.

use flatjit_common::Kind;
use flatjit_compiler_mir::{
    EntryKind, PrettyPrint, ScalarizedSignature, SignaturePosition, Slot, SlotRole,
};

use crate::{CodegenError, CodegenResult, Location, Register, RegisterClass, STACK_SLOT_SIZE};

/// Register assignment rules of one calling convention
#[derive(Debug, Clone, Copy)]
pub struct CallingConvention {
    pub general_args: &'static [Register],
    pub floating_args: &'static [Register],
    pub general_returns: &'static [Register],
    pub floating_returns: &'static [Register],
}

impl CallingConvention {
    /// The System V convention extended to multi-register returns
    pub const SYSTEM_V: Self = Self {
        general_args: &[
            Register::RDI,
            Register::RSI,
            Register::RDX,
            Register::RCX,
            Register::R8,
            Register::R9,
        ],
        floating_args: &[
            Register::Xmm(0),
            Register::Xmm(1),
            Register::Xmm(2),
            Register::Xmm(3),
            Register::Xmm(4),
            Register::Xmm(5),
            Register::Xmm(6),
            Register::Xmm(7),
        ],
        general_returns: &[
            Register::RAX,
            Register::RDX,
            Register::RCX,
            Register::RSI,
            Register::RDI,
            Register::R8,
            Register::R9,
        ],
        floating_returns: &[
            Register::Xmm(0),
            Register::Xmm(1),
            Register::Xmm(2),
            Register::Xmm(3),
            Register::Xmm(4),
            Register::Xmm(5),
            Register::Xmm(6),
            Register::Xmm(7),
        ],
    };

    /// Locations of outgoing arguments of the given kinds
    pub fn assign_arguments(&self, kinds: impl IntoIterator<Item = Kind>) -> ArgumentLayout {
        let mut next = [0usize; 2];
        let mut stack_size = 0;
        let locations = kinds
            .into_iter()
            .map(|kind| {
                let class = RegisterClass::of(kind);
                let registers = match class {
                    RegisterClass::General => self.general_args,
                    RegisterClass::Floating => self.floating_args,
                };
                let cursor = &mut next[class.index()];
                if let Some(&register) = registers.get(*cursor) {
                    *cursor += 1;
                    Location::Register(register)
                } else {
                    let offset = stack_size;
                    stack_size += STACK_SLOT_SIZE;
                    Location::Stack(offset)
                }
            })
            .collect();
        ArgumentLayout {
            locations,
            stack_size,
        }
    }

    /// Locations of returned values; returns never use the stack
    pub fn assign_returns(
        &self,
        kinds: impl IntoIterator<Item = Kind>,
    ) -> CodegenResult<ArgumentLayout> {
        let mut next = [0usize; 2];
        let mut locations = Vec::new();
        for kind in kinds {
            let class = RegisterClass::of(kind);
            let registers = match class {
                RegisterClass::General => self.general_returns,
                RegisterClass::Floating => self.floating_returns,
            };
            let cursor = &mut next[class.index()];
            let register = registers
                .get(*cursor)
                .copied()
                .ok_or(CodegenError::TooManyReturnSlots {
                    class,
                    available: registers.len(),
                })?;
            *cursor += 1;
            locations.push(Location::Register(register));
        }
        Ok(ArgumentLayout {
            locations,
            stack_size: 0,
        })
    }
}

/// Physical locations of a slot list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentLayout {
    pub locations: Vec<Location>,
    /// Bytes of outgoing stack the layout needs
    pub stack_size: u32,
}

/// The slots of one entry of a method together with their locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLayout {
    pub entry: EntryKind,
    pub slots: Vec<Slot>,
    pub locations: Vec<Location>,
    pub stack_size: u32,
}

impl CallLayout {
    /// The argument layout a call to `entry` of `plan` expects
    pub fn arguments(plan: &ScalarizedSignature, entry: EntryKind) -> Self {
        let slots = plan.param_slots(entry);
        let layout = CallingConvention::SYSTEM_V.assign_arguments(slots.iter().map(|s| s.kind));
        Self {
            entry,
            slots,
            locations: layout.locations,
            stack_size: layout.stack_size,
        }
    }

    /// Where `entry` of `plan` leaves its return value
    pub fn returns(plan: &ScalarizedSignature, entry: EntryKind) -> CodegenResult<Self> {
        let slots = plan.return_slots(entry);
        let layout = CallingConvention::SYSTEM_V.assign_returns(slots.iter().map(|s| s.kind))?;
        Ok(Self {
            entry,
            slots,
            locations: layout.locations,
            stack_size: 0,
        })
    }

    /// Index of the first slot of parameter `param`
    pub fn first_slot_of(&self, param: usize) -> usize {
        self.slots
            .iter()
            .position(|slot| slot.position == SignaturePosition::Param(param))
            .unwrap_or(self.slots.len())
    }

    pub fn location_of(&self, role: SlotRole) -> Option<Location> {
        self.slots
            .iter()
            .position(|slot| slot.role == role)
            .map(|index| self.locations[index])
    }
}

impl PrettyPrint for CallLayout {
    fn pretty_print(&self, indent: usize) -> String {
        let base = "  ".repeat(indent);
        let mut result = format!("{base}{:?} ({} stack bytes)\n", self.entry, self.stack_size);
        for (slot, location) in self.slots.iter().zip(&self.locations) {
            let role = match slot.role {
                SlotRole::Primitive => "primitive".to_string(),
                SlotRole::Reference => "reference".to_string(),
                SlotRole::Leaf(index) => format!("leaf {index}"),
                SlotRole::NotNull => "not-null".to_string(),
                SlotRole::TaggedReturn => "tagged".to_string(),
            };
            let position = match slot.position {
                SignaturePosition::Param(index) => format!("param {index}"),
                SignaturePosition::Return => "return".to_string(),
            };
            let location = location.to_string();
            result.push_str(&format!(
                "{base}  {location:<9} {position} {role}: {}\n",
                slot.kind.name()
            ));
        }
        result
    }
}
