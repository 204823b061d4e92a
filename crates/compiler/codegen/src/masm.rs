//! # Macro assembler
//!
//! Emits [`MachInst`]s for the code placed around calls: argument shuffles,
//! tagged-return encoding and decoding. Moves are expressed over
//! [`Location`]s and expanded here into register, stack and memory forms, so
//! callers never special-case where a slot lives.

use std::fmt;

use flatjit_common::Kind;
use index_vec::IndexVec;

use crate::{CodegenError, CodegenResult, Location, Register, RegisterClass};

index_vec::define_index_type! {
    /// A branch target within one piece of machine code
    pub struct LabelId = usize;
}

/// One machine instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachInst {
    /// Marks the position of a label; emits no code
    Bind(LabelId),
    Mov { dst: Register, src: Register, kind: Kind },
    MovImm { dst: Register, imm: u64 },
    Zero { dst: Register },
    LoadStack { dst: Register, offset: u32 },
    StoreStack { offset: u32, src: Register },
    StoreStackImm { offset: u32, imm: u64 },
    /// Widening load of a `kind` field at `base + offset`
    LoadField { dst: Register, base: Register, offset: u32, kind: Kind },
    /// Narrowing store of a `kind` field at `base + offset`
    StoreField { base: Register, offset: u32, src: Register, kind: Kind },
    AndImm { dst: Register, imm: u64 },
    OrImm { dst: Register, imm: u64 },
    /// Sets the zero flag from `reg & mask`
    Test { reg: Register, mask: u64 },
    Jz(LabelId),
    Jnz(LabelId),
    Jmp(LabelId),
    /// Moves the stack pointer down by the given number of bytes
    ReserveStack(u32),
    /// Runtime call allocating an instance of the class whose hub is in `hub`
    AllocateInstance { dst: Register, hub: Register },
}

const fn width(kind: Kind) -> &'static str {
    match kind.byte_size() {
        1 => "byte",
        2 => "word",
        4 => "dword",
        _ => "qword",
    }
}

const fn mov_mnemonic(kind: Kind, class: RegisterClass) -> &'static str {
    match (class, kind) {
        (RegisterClass::Floating, Kind::Float) => "movss",
        (RegisterClass::Floating, _) => "movsd",
        (RegisterClass::General, _) => "mov",
    }
}

/// A named branch target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    /// Instruction index the label was bound at
    pub position: Option<usize>,
}

/// An emitted instruction with its optional comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub inst: MachInst,
    pub comment: Option<String>,
}

/// Finished machine code: instructions plus resolved labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineCode {
    pub instructions: Vec<Emitted>,
    pub labels: IndexVec<LabelId, Label>,
}

impl MachineCode {
    pub fn insts(&self) -> impl Iterator<Item = &MachInst> {
        self.instructions.iter().map(|emitted| &emitted.inst)
    }

    /// Number of instructions that emit code
    pub fn len(&self) -> usize {
        self.insts()
            .filter(|inst| !matches!(inst, MachInst::Bind(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label_position(&self, label: LabelId) -> Option<usize> {
        self.labels.get(label).and_then(|label| label.position)
    }

    pub fn count(&self, predicate: impl Fn(&MachInst) -> bool) -> usize {
        self.insts().filter(|inst| predicate(inst)).count()
    }

    /// Renders one instruction in assembler syntax
    pub fn render(&self, inst: &MachInst) -> String {
        let label = |id: LabelId| {
            self.labels
                .get(id)
                .map_or_else(|| format!("{id:?}"), |label| label.name.clone())
        };
        match *inst {
            MachInst::Bind(id) => format!("{}:", label(id)),
            MachInst::Mov { dst, src, kind } => {
                format!("{} {dst}, {src}", mov_mnemonic(kind, dst.class()))
            }
            MachInst::MovImm { dst, imm } => format!("mov {dst}, {imm:#x}"),
            MachInst::Zero { dst } => match dst.class() {
                RegisterClass::General => format!("xor {dst}, {dst}"),
                RegisterClass::Floating => format!("xorps {dst}, {dst}"),
            },
            MachInst::LoadStack { dst, offset } => match dst.class() {
                RegisterClass::General => format!("mov {dst}, qword [rsp+{offset}]"),
                RegisterClass::Floating => format!("movsd {dst}, qword [rsp+{offset}]"),
            },
            MachInst::StoreStack { offset, src } => match src.class() {
                RegisterClass::General => format!("mov qword [rsp+{offset}], {src}"),
                RegisterClass::Floating => format!("movsd qword [rsp+{offset}], {src}"),
            },
            MachInst::StoreStackImm { offset, imm } => {
                format!("mov qword [rsp+{offset}], {imm:#x}")
            }
            MachInst::LoadField {
                dst,
                base,
                offset,
                kind,
            } => format!(
                "{} {dst}, {} [{base}+{offset}]",
                mov_mnemonic(kind, dst.class()),
                width(kind)
            ),
            MachInst::StoreField {
                base,
                offset,
                src,
                kind,
            } => format!(
                "{} {} [{base}+{offset}], {src}",
                mov_mnemonic(kind, src.class()),
                width(kind)
            ),
            MachInst::AndImm { dst, imm } => format!("and {dst}, {imm:#x}"),
            MachInst::OrImm { dst, imm } => format!("or {dst}, {imm:#x}"),
            MachInst::Test { reg, mask } if mask == u64::MAX => format!("test {reg}, {reg}"),
            MachInst::Test { reg, mask } => format!("test {reg}, {mask:#x}"),
            MachInst::Jz(target) => format!("jz {}", label(target)),
            MachInst::Jnz(target) => format!("jnz {}", label(target)),
            MachInst::Jmp(target) => format!("jmp {}", label(target)),
            MachInst::ReserveStack(bytes) => format!("sub rsp, {bytes}"),
            MachInst::AllocateInstance { dst, hub } => {
                format!("call allocate_instance({hub}) -> {dst}")
            }
        }
    }

    /// Converts to assembly text, one instruction per line
    pub fn to_asm(&self) -> String {
        let mut result = String::new();
        for emitted in &self.instructions {
            let text = self.render(&emitted.inst);
            let line = match (&emitted.inst, &emitted.comment) {
                (MachInst::Bind(_), _) => text,
                (_, Some(comment)) => format!("  {text:<32} // {comment}"),
                (_, None) => format!("  {text}"),
            };
            result.push_str(line.trim_end());
            result.push('\n');
        }
        result
    }
}

impl fmt::Display for MachineCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_asm())
    }
}

/// Builder of machine code
#[derive(Debug, Default)]
pub struct MacroAssembler {
    instructions: Vec<Emitted>,
    labels: IndexVec<LabelId, Label>,
}

impl MacroAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, inst: MachInst) {
        self.instructions.push(Emitted {
            inst,
            comment: None,
        });
    }

    /// Attaches a comment to the last emitted instruction
    pub fn annotate(&mut self, comment: impl Into<String>) {
        if let Some(last) = self.instructions.last_mut() {
            last.comment = Some(comment.into());
        }
    }

    /// Creates an unbound label named `{prefix}_{n}`
    pub fn new_label(&mut self, prefix: &str) -> LabelId {
        let name = format!(".{}_{}", prefix, self.labels.len());
        self.labels.push(Label {
            name,
            position: None,
        })
    }

    pub fn bind(&mut self, label: LabelId) {
        self.labels[label].position = Some(self.instructions.len());
        self.emit(MachInst::Bind(label));
    }

    /// Copies a slot between any two locations
    pub fn move_slot(&mut self, dst: Location, src: Location, kind: Kind) {
        match (dst, src) {
            _ if dst == src => {}
            (Location::Register(dst), Location::Register(src)) => {
                self.emit(MachInst::Mov { dst, src, kind });
            }
            (Location::Register(dst), Location::Stack(offset)) => {
                self.emit(MachInst::LoadStack { dst, offset });
            }
            (Location::Stack(offset), Location::Register(src)) => {
                self.emit(MachInst::StoreStack { offset, src });
            }
            (Location::Stack(to), Location::Stack(from)) => {
                let transit = RegisterClass::of(kind).transit();
                self.emit(MachInst::LoadStack {
                    dst: transit,
                    offset: from,
                });
                self.emit(MachInst::StoreStack {
                    offset: to,
                    src: transit,
                });
            }
        }
    }

    /// Loads the `kind` field at `base + offset` into any location
    pub fn load_field(&mut self, dst: Location, base: Register, offset: u32, kind: Kind) {
        match dst {
            Location::Register(dst) => self.emit(MachInst::LoadField {
                dst,
                base,
                offset,
                kind,
            }),
            Location::Stack(slot) => {
                let transit = RegisterClass::of(kind).transit();
                self.emit(MachInst::LoadField {
                    dst: transit,
                    base,
                    offset,
                    kind,
                });
                self.emit(MachInst::StoreStack {
                    offset: slot,
                    src: transit,
                });
            }
        }
    }

    /// Stores a slot held in any location into the `kind` field at `base + offset`
    pub fn store_field(&mut self, base: Register, offset: u32, src: Location, kind: Kind) {
        let src = match src {
            Location::Register(src) => src,
            Location::Stack(slot) => {
                let transit = RegisterClass::of(kind).transit();
                self.emit(MachInst::LoadStack {
                    dst: transit,
                    offset: slot,
                });
                transit
            }
        };
        self.emit(MachInst::StoreField {
            base,
            offset,
            src,
            kind,
        });
    }

    /// Writes an immediate into a general location
    pub fn set_imm(&mut self, dst: Location, imm: u64) {
        match dst {
            Location::Register(dst) if imm == 0 => self.emit(MachInst::Zero { dst }),
            Location::Register(dst) => self.emit(MachInst::MovImm { dst, imm }),
            Location::Stack(offset) => self.emit(MachInst::StoreStackImm { offset, imm }),
        }
    }

    pub fn zero(&mut self, dst: Location) {
        self.set_imm(dst, 0);
    }

    pub fn test(&mut self, reg: Register) {
        self.emit(MachInst::Test {
            reg,
            mask: u64::MAX,
        });
    }

    pub fn test_bits(&mut self, reg: Register, mask: u64) {
        self.emit(MachInst::Test { reg, mask });
    }

    pub fn jz(&mut self, target: LabelId) {
        self.emit(MachInst::Jz(target));
    }

    pub fn jnz(&mut self, target: LabelId) {
        self.emit(MachInst::Jnz(target));
    }

    pub fn jmp(&mut self, target: LabelId) {
        self.emit(MachInst::Jmp(target));
    }

    pub fn reserve_stack(&mut self, bytes: u32) {
        if bytes > 0 {
            self.emit(MachInst::ReserveStack(bytes));
        }
    }

    /// Finishes emission; every referenced label must be bound
    pub fn finish(self) -> CodegenResult<MachineCode> {
        if let Some(label) = self.labels.iter().find(|label| label.position.is_none()) {
            return Err(CodegenError::UnboundLabel(label.name.clone()));
        }
        Ok(MachineCode {
            instructions: self.instructions,
            labels: self.labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(code: &MachineCode) -> String {
        code.to_asm().lines().map(str::trim).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_moves_expand_by_location() {
        let mut masm = MacroAssembler::new();
        let rdi = Location::Register(Register::RDI);
        masm.move_slot(rdi, rdi, Kind::Int);
        masm.move_slot(Location::Register(Register::RSI), rdi, Kind::Int);
        masm.move_slot(Location::Stack(8), Location::Stack(0), Kind::Long);
        masm.annotate("stack to stack");
        masm.move_slot(
            Location::Register(Register::Xmm(1)),
            Location::Register(Register::Xmm(0)),
            Kind::Float,
        );
        let code = masm.finish().unwrap();

        assert_eq!(code.len(), 4);
        insta::assert_snapshot!(listing(&code), @r"
        mov rsi, rdi
        mov r15, qword [rsp+0]
        mov qword [rsp+8], r15           // stack to stack
        movss xmm1, xmm0
        ");
    }

    #[test]
    fn test_field_access_through_stack_slots() {
        let mut masm = MacroAssembler::new();
        masm.load_field(Location::Stack(16), Register::RAX, 24, Kind::Double);
        masm.store_field(Register::RAX, 32, Location::Stack(0), Kind::Boolean);
        let code = masm.finish().unwrap();
        insta::assert_snapshot!(listing(&code), @r"
        movsd xmm14, qword [rax+24]
        movsd qword [rsp+16], xmm14
        mov r15, qword [rsp+0]
        mov byte [rax+32], r15
        ");
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut masm = MacroAssembler::new();
        let done = masm.new_label("done");
        masm.jmp(done);
        assert!(matches!(
            masm.finish(),
            Err(CodegenError::UnboundLabel(name)) if name == ".done_0"
        ));
    }
}
