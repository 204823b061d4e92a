//! Simulated machine executing [`MachineCode`] against the heap model.
//!
//! Registers and outgoing stack slots hold 8-byte slots; field loads and
//! stores go through [`Heap`] with the widening of their kind. Reading a
//! stack slot that was never written is an error so tests notice code that
//! reads garbage.

use flatjit_common::{Heap, HeapError, Metadata};
use rustc_hash::FxHashMap;

use crate::{LabelId, Location, MachInst, MachineCode, Register};

/// Initial stack pointer
pub const STACK_TOP: u64 = 0x7ffe_0000;

/// Upper bound on executed instructions per run
const STEP_LIMIT: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("Stack slot at {0:#x} read before it was written")]
    UninitializedStack(u64),
    #[error("Jump to unbound label {0}")]
    UnboundLabel(String),
    #[error("Execution did not finish within {0} steps")]
    StepLimit(usize),
}

/// Register file, stack and heap of the simulated machine
#[derive(Debug)]
pub struct Machine<'a> {
    metadata: &'a Metadata,
    heap: &'a mut Heap,
    registers: [u64; 32],
    stack: FxHashMap<u64, u64>,
    zero_flag: bool,
}

impl<'a> Machine<'a> {
    pub fn new(metadata: &'a Metadata, heap: &'a mut Heap) -> Self {
        let mut registers = [0; 32];
        registers[Register::RSP.index()] = STACK_TOP;
        Self {
            metadata,
            heap,
            registers,
            stack: FxHashMap::default(),
            zero_flag: false,
        }
    }

    pub fn heap(&self) -> &Heap {
        self.heap
    }

    pub const fn register(&self, register: Register) -> u64 {
        self.registers[register.index()]
    }

    pub fn set_register(&mut self, register: Register, bits: u64) {
        self.registers[register.index()] = bits;
    }

    const fn stack_address(&self, offset: u32) -> u64 {
        self.register(Register::RSP) + offset as u64
    }

    pub fn get(&self, location: Location) -> Result<u64, SimError> {
        match location {
            Location::Register(register) => Ok(self.register(register)),
            Location::Stack(offset) => {
                let address = self.stack_address(offset);
                self.stack
                    .get(&address)
                    .copied()
                    .ok_or(SimError::UninitializedStack(address))
            }
        }
    }

    pub fn set(&mut self, location: Location, bits: u64) {
        match location {
            Location::Register(register) => self.set_register(register, bits),
            Location::Stack(offset) => {
                let address = self.stack_address(offset);
                self.stack.insert(address, bits);
            }
        }
    }

    /// Runs `code` from its first instruction until it falls off the end
    pub fn run(&mut self, code: &MachineCode) -> Result<(), SimError> {
        let mut pc = 0;
        let mut steps = 0;
        while let Some(emitted) = code.instructions.get(pc) {
            steps += 1;
            if steps > STEP_LIMIT {
                return Err(SimError::StepLimit(STEP_LIMIT));
            }
            pc = match self.step(&emitted.inst)? {
                Some(label) => code
                    .label_position(label)
                    .ok_or_else(|| SimError::UnboundLabel(format!("{label:?}")))?,
                None => pc + 1,
            };
        }
        Ok(())
    }

    fn step(&mut self, inst: &MachInst) -> Result<Option<LabelId>, SimError> {
        match *inst {
            MachInst::Bind(_) => {}
            MachInst::Mov { dst, src, .. } => self.set_register(dst, self.register(src)),
            MachInst::MovImm { dst, imm } => self.set_register(dst, imm),
            MachInst::Zero { dst } => self.set_register(dst, 0),
            MachInst::LoadStack { dst, offset } => {
                let bits = self.get(Location::Stack(offset))?;
                self.set_register(dst, bits);
            }
            MachInst::StoreStack { offset, src } => {
                self.set(Location::Stack(offset), self.register(src));
            }
            MachInst::StoreStackImm { offset, imm } => self.set(Location::Stack(offset), imm),
            MachInst::LoadField {
                dst,
                base,
                offset,
                kind,
            } => {
                let address = self.register(base) + offset as u64;
                let bits = self.heap.read(address, kind)?;
                self.set_register(dst, bits);
            }
            MachInst::StoreField {
                base,
                offset,
                src,
                kind,
            } => {
                let address = self.register(base) + offset as u64;
                let bits = self.register(src);
                self.heap.write(address, kind, bits)?;
            }
            MachInst::AndImm { dst, imm } => self.set_register(dst, self.register(dst) & imm),
            MachInst::OrImm { dst, imm } => self.set_register(dst, self.register(dst) | imm),
            MachInst::Test { reg, mask } => self.zero_flag = self.register(reg) & mask == 0,
            MachInst::Jz(label) if self.zero_flag => return Ok(Some(label)),
            MachInst::Jnz(label) if !self.zero_flag => return Ok(Some(label)),
            MachInst::Jz(_) | MachInst::Jnz(_) => {}
            MachInst::Jmp(label) => return Ok(Some(label)),
            MachInst::ReserveStack(bytes) => {
                let sp = self.register(Register::RSP) - bytes as u64;
                self.set_register(Register::RSP, sp);
            }
            MachInst::AllocateInstance { dst, hub } => {
                let hub = self.register(hub);
                let ty = self
                    .metadata
                    .type_of_hub(hub)
                    .ok_or(HeapError::UnknownHub(hub))?;
                let object = self.heap.allocate(self.metadata, ty)?;
                self.set_register(dst, object);
            }
        }
        Ok(None)
    }
}
