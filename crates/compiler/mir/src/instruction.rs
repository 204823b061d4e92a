//! # MIR Instructions
//!
//! This module defines the instruction types for MIR.
//! Instructions perform computations but do not transfer control flow.
//!
//! Besides the usual arithmetic, memory and call instructions, the instruction
//! set carries the value-object nodes:
//!
//! - [`InstructionKind::InlineValue`]: a scalarized aggregate that has not been
//!   allocated, given by its leaf values
//! - [`InstructionKind::Compare`]: reference comparisons, see [`CompareOp`]
//! - [`InstructionKind::TagReturn`] / [`InstructionKind::UntagReturn`]: encoding
//!   and decoding of the tagged register of a scalarized return

use flatjit_common::{Kind, TypeId};
use smallvec::SmallVec;

use crate::{BasicBlockId, CallTarget, MirType, PrettyPrint, Value, ValueId};

/// Binary operators over raw slot bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    /// Raw 64-bit equality
    Eq,
    /// Raw 64-bit inequality
    Ne,
    /// Signed less-than
    Lt,
    /// Equality of two primitive slots of the given kind under substitutability
    /// rules: integral kinds compare their memory bits, floating kinds compare
    /// bits after NaN canonicalization
    BitsEq(Kind),
}

impl BinaryOp {
    /// Evaluates the operator on raw slot bits
    pub fn apply(self, left: u64, right: u64) -> u64 {
        match self {
            Self::Add => left.wrapping_add(right),
            Self::Sub => left.wrapping_sub(right),
            Self::And => left & right,
            Self::Or => left | right,
            Self::Xor => left ^ right,
            Self::Eq => (left == right) as u64,
            Self::Ne => (left != right) as u64,
            Self::Lt => ((left as i64) < (right as i64)) as u64,
            Self::BitsEq(kind) => kind.bits_equal(left, right) as u64,
        }
    }

    /// Whether the result is a boolean
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::BitsEq(_)
        )
    }

    const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::BitsEq(_) => "bits_eq",
        }
    }
}

/// Unary operators over raw slot bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Boolean negation (`0` ↔ `1`)
    Not,
    /// Two's complement negation
    Neg,
}

impl UnaryOp {
    pub const fn apply(self, value: u64) -> u64 {
        match self {
            Self::Not => (value == 0) as u64,
            Self::Neg => value.wrapping_neg(),
        }
    }
}

/// Aliasing tag of a memory access.
///
/// Two accesses with different location identities never touch the same
/// memory. Accesses tagged [`LocationIdentity::Any`] may alias everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationIdentity {
    /// A field (or flattened leaf) at `offset` within objects of type `holder`
    Field { holder: TypeId, offset: u32 },
    /// Element storage of arrays of type `array`, at `offset` within the element
    ArrayElement { array: TypeId, offset: u32 },
    /// Mark word and hub
    Header,
    /// Unknown memory
    Any,
}

impl LocationIdentity {
    /// Whether accesses tagged `self` and `other` may touch the same memory
    pub fn may_alias(self, other: Self) -> bool {
        self == other || self == Self::Any || other == Self::Any
    }
}

/// Calls into runtime support code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFunction {
    /// `(left, right) -> bool`: field-wise substitutability of two value objects
    /// of the same runtime type
    IsSubstitutable,
    /// `(array, index) -> ref`: element load from an array whose flat layout is
    /// only known at runtime
    LoadUnknownInline,
    /// `(array, index, value) -> bool`: element store into an array whose flat
    /// layout is only known at runtime; false when a null was refused by a
    /// null-free element and nothing was written
    StoreUnknownInline,
}

impl RuntimeFunction {
    pub const fn name(self) -> &'static str {
        match self {
            Self::IsSubstitutable => "is_substitutable",
            Self::LoadUnknownInline => "load_unknown_inline",
            Self::StoreUnknownInline => "store_unknown_inline",
        }
    }
}

/// Nullability of an [`InstructionKind::InlineValue`].
///
/// The not-null flag and the buffered oop are present together or not at all;
/// an absent state means the value is statically known to be non-null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineNullState {
    /// Boolean: the value is not null
    pub is_not_null: Value,
    /// An existing heap instance holding the same fields, or null
    pub oop: Value,
}

/// Reference comparison flavours.
///
/// All three share the same lowering interface (see
/// [`crate::snippets::LowerToSnippet`]) and each variant carries only what its
/// lowering needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Raw pointer equality, valid when one operand has identity
    PointerEquals,
    /// Full substitutability check resolved at runtime
    ObjectEquals,
    /// Comparison of leaf `slot` of two value objects whose offset is bound when
    /// the snippet template is instantiated for a concrete type
    DelayedRawCompare {
        slot: usize,
        kind: Kind,
        offset: Option<u32>,
    },
}

/// An instruction performs an operation but does NOT transfer control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The kind of instruction and its operands
    pub kind: InstructionKind,

    /// Optional comment for debugging
    pub comment: Option<String>,
}

/// The different kinds of instructions available in MIR
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    /// Simple assignment: `dest = source`
    Assign { dest: ValueId, source: Value },

    /// Unary operation: `dest = op source`
    UnaryOp {
        op: UnaryOp,
        dest: ValueId,
        source: Value,
    },

    /// Binary operation: `dest = left op right`
    BinaryOp {
        op: BinaryOp,
        dest: ValueId,
        left: Value,
        right: Value,
    },

    /// `dest = condition ? if_true : if_false`
    Select {
        dest: ValueId,
        condition: Value,
        if_true: Value,
        if_false: Value,
    },

    /// SSA merge; must appear before any other instruction of its block
    Phi {
        dest: ValueId,
        ty: MirType,
        sources: Vec<(BasicBlockId, Value)>,
    },

    /// Call of a compiled method entry: `dests = call target(args)`
    Call {
        dests: Vec<ValueId>,
        target: CallTarget,
        args: Vec<Value>,
    },

    /// Call into runtime support code
    RuntimeCall {
        dests: Vec<ValueId>,
        function: RuntimeFunction,
        args: Vec<Value>,
    },

    /// Allocates a zeroed instance with an initialized header
    NewInstance { dest: ValueId, ty: TypeId },

    /// `dest = [base + offset]` as `kind`
    Load {
        dest: ValueId,
        base: Value,
        offset: u32,
        kind: Kind,
        location: LocationIdentity,
    },

    /// `[base + offset] = value` as `kind`
    Store {
        base: Value,
        offset: u32,
        kind: Kind,
        value: Value,
        location: LocationIdentity,
    },

    /// Bounds-checked address of element `index`: `array + 24 + index * scale`
    ElementAddress {
        dest: ValueId,
        array: Value,
        index: Value,
        scale: u32,
    },

    /// Metadata pointer of an object
    LoadHub { dest: ValueId, object: Value },

    /// Header mark word of an object
    LoadMarkWord { dest: ValueId, object: Value },

    /// `dest = value == null`
    IsNull { dest: ValueId, value: Value },

    /// `dest = array uses the flat element layout`
    IsFlatArray { dest: ValueId, array: Value },

    /// A scalarized value object that has not been allocated
    InlineValue {
        dest: ValueId,
        ty: TypeId,
        /// One value per leaf of the type's aggregate descriptor
        fields: Vec<Value>,
        null_state: Option<InlineNullState>,
    },

    /// Encodes the tagged register of a scalarized return: null when
    /// `is_not_null` is false, `oop` when it is an existing instance, the hub of
    /// `ty` with bit 0 set otherwise
    TagReturn {
        dest: ValueId,
        ty: TypeId,
        oop: Value,
        is_not_null: Value,
    },

    /// Decodes a tagged return register: the oop if bit 0 is clear, null otherwise
    UntagReturn { dest: ValueId, tagged: Value },

    /// Reference comparison producing a boolean
    Compare {
        dest: ValueId,
        op: CompareOp,
        left: Value,
        right: Value,
    },

    /// Monitor enter/exit; requires an object with identity
    Monitor { object: Value, enter: bool },
}

impl Instruction {
    pub const fn new(kind: InstructionKind) -> Self {
        Self {
            kind,
            comment: None,
        }
    }

    pub const fn assign(dest: ValueId, source: Value) -> Self {
        Self::new(InstructionKind::Assign { dest, source })
    }

    pub const fn unary_op(op: UnaryOp, dest: ValueId, source: Value) -> Self {
        Self::new(InstructionKind::UnaryOp { op, dest, source })
    }

    pub const fn binary_op(op: BinaryOp, dest: ValueId, left: Value, right: Value) -> Self {
        Self::new(InstructionKind::BinaryOp {
            op,
            dest,
            left,
            right,
        })
    }

    pub const fn phi(dest: ValueId, ty: MirType, sources: Vec<(BasicBlockId, Value)>) -> Self {
        Self::new(InstructionKind::Phi { dest, ty, sources })
    }

    pub const fn load(
        dest: ValueId,
        base: Value,
        offset: u32,
        kind: Kind,
        location: LocationIdentity,
    ) -> Self {
        Self::new(InstructionKind::Load {
            dest,
            base,
            offset,
            kind,
            location,
        })
    }

    pub const fn store(
        base: Value,
        offset: u32,
        kind: Kind,
        value: Value,
        location: LocationIdentity,
    ) -> Self {
        Self::new(InstructionKind::Store {
            base,
            offset,
            kind,
            value,
            location,
        })
    }

    pub const fn compare(dest: ValueId, op: CompareOp, left: Value, right: Value) -> Self {
        Self::new(InstructionKind::Compare {
            dest,
            op,
            left,
            right,
        })
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Returns all destinations of this instruction
    pub fn destinations(&self) -> SmallVec<[ValueId; 2]> {
        match &self.kind {
            InstructionKind::Assign { dest, .. }
            | InstructionKind::UnaryOp { dest, .. }
            | InstructionKind::BinaryOp { dest, .. }
            | InstructionKind::Select { dest, .. }
            | InstructionKind::Phi { dest, .. }
            | InstructionKind::NewInstance { dest, .. }
            | InstructionKind::Load { dest, .. }
            | InstructionKind::ElementAddress { dest, .. }
            | InstructionKind::LoadHub { dest, .. }
            | InstructionKind::LoadMarkWord { dest, .. }
            | InstructionKind::IsNull { dest, .. }
            | InstructionKind::IsFlatArray { dest, .. }
            | InstructionKind::InlineValue { dest, .. }
            | InstructionKind::TagReturn { dest, .. }
            | InstructionKind::UntagReturn { dest, .. }
            | InstructionKind::Compare { dest, .. } => smallvec::smallvec![*dest],
            InstructionKind::Call { dests, .. } | InstructionKind::RuntimeCall { dests, .. } => {
                dests.iter().copied().collect()
            }
            InstructionKind::Store { .. } | InstructionKind::Monitor { .. } => SmallVec::new(),
        }
    }

    /// Returns the single destination of this instruction, if it has exactly one
    pub fn destination(&self) -> Option<ValueId> {
        let dests = self.destinations();
        (dests.len() == 1).then(|| dests[0])
    }

    /// Returns all operand values read by this instruction, in operand order
    pub fn operands(&self) -> SmallVec<[Value; 4]> {
        let mut operands = SmallVec::new();
        match &self.kind {
            InstructionKind::Assign { source, .. } | InstructionKind::UnaryOp { source, .. } => {
                operands.push(*source)
            }
            InstructionKind::BinaryOp { left, right, .. }
            | InstructionKind::Compare { left, right, .. } => {
                operands.push(*left);
                operands.push(*right);
            }
            InstructionKind::Select {
                condition,
                if_true,
                if_false,
                ..
            } => operands.extend([*condition, *if_true, *if_false]),
            InstructionKind::Phi { sources, .. } => {
                operands.extend(sources.iter().map(|(_, value)| *value))
            }
            InstructionKind::Call { args, .. } | InstructionKind::RuntimeCall { args, .. } => {
                operands.extend(args.iter().copied())
            }
            InstructionKind::NewInstance { .. } => {}
            InstructionKind::Load { base, .. } => operands.push(*base),
            InstructionKind::Store { base, value, .. } => {
                operands.push(*base);
                operands.push(*value);
            }
            InstructionKind::ElementAddress { array, index, .. } => {
                operands.push(*array);
                operands.push(*index);
            }
            InstructionKind::LoadHub { object, .. }
            | InstructionKind::LoadMarkWord { object, .. }
            | InstructionKind::Monitor { object, .. } => operands.push(*object),
            InstructionKind::IsNull { value, .. } => operands.push(*value),
            InstructionKind::IsFlatArray { array, .. } => operands.push(*array),
            InstructionKind::InlineValue {
                fields, null_state, ..
            } => {
                operands.extend(fields.iter().copied());
                if let Some(state) = null_state {
                    operands.push(state.is_not_null);
                    operands.push(state.oop);
                }
            }
            InstructionKind::TagReturn {
                oop, is_not_null, ..
            } => {
                operands.push(*oop);
                operands.push(*is_not_null);
            }
            InstructionKind::UntagReturn { tagged, .. } => operands.push(*tagged),
        }
        operands
    }

    /// Returns all value ids read by this instruction
    pub fn used_values(&self) -> SmallVec<[ValueId; 4]> {
        self.operands()
            .into_iter()
            .filter_map(|value| value.as_operand())
            .collect()
    }

    /// Replaces every read of `from` with `to`
    pub fn replace_value_uses(&mut self, from: ValueId, to: Value) {
        let replace = |value: &mut Value| {
            if *value == Value::Operand(from) {
                *value = to;
            }
        };
        match &mut self.kind {
            InstructionKind::Assign { source, .. } | InstructionKind::UnaryOp { source, .. } => {
                replace(source)
            }
            InstructionKind::BinaryOp { left, right, .. }
            | InstructionKind::Compare { left, right, .. } => {
                replace(left);
                replace(right);
            }
            InstructionKind::Select {
                condition,
                if_true,
                if_false,
                ..
            } => {
                replace(condition);
                replace(if_true);
                replace(if_false);
            }
            InstructionKind::Phi { sources, .. } => {
                sources.iter_mut().for_each(|(_, value)| replace(value))
            }
            InstructionKind::Call { args, .. } | InstructionKind::RuntimeCall { args, .. } => {
                args.iter_mut().for_each(replace)
            }
            InstructionKind::NewInstance { .. } => {}
            InstructionKind::Load { base, .. } => replace(base),
            InstructionKind::Store { base, value, .. } => {
                replace(base);
                replace(value);
            }
            InstructionKind::ElementAddress { array, index, .. } => {
                replace(array);
                replace(index);
            }
            InstructionKind::LoadHub { object, .. }
            | InstructionKind::LoadMarkWord { object, .. }
            | InstructionKind::Monitor { object, .. } => replace(object),
            InstructionKind::IsNull { value, .. } => replace(value),
            InstructionKind::IsFlatArray { array, .. } => replace(array),
            InstructionKind::InlineValue {
                fields, null_state, ..
            } => {
                fields.iter_mut().for_each(replace);
                if let Some(state) = null_state {
                    replace(&mut state.is_not_null);
                    replace(&mut state.oop);
                }
            }
            InstructionKind::TagReturn {
                oop, is_not_null, ..
            } => {
                replace(oop);
                replace(is_not_null);
            }
            InstructionKind::UntagReturn { tagged, .. } => replace(tagged),
        }
    }

    /// Whether removing this instruction when its results are unused changes
    /// observable behavior
    pub const fn has_side_effects(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::Call { .. }
                | InstructionKind::RuntimeCall { .. }
                | InstructionKind::Store { .. }
                | InstructionKind::Monitor { .. }
        )
    }

    /// Whether this instruction may write memory
    pub const fn may_write_memory(&self) -> bool {
        self.has_side_effects()
    }
}

impl PrettyPrint for Instruction {
    fn pretty_print(&self, _indent: usize) -> String {
        let p = |value: &Value| value.pretty_print(0);
        let list = |values: &[Value]| values.iter().map(p).collect::<Vec<_>>().join(", ");
        let dests = |dests: &[ValueId]| {
            dests
                .iter()
                .map(|dest| dest.pretty_print(0))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut result = match &self.kind {
            InstructionKind::Assign { dest, source } => {
                format!("{} = {}", dest.pretty_print(0), p(source))
            }
            InstructionKind::UnaryOp { op, dest, source } => {
                let name = match op {
                    UnaryOp::Not => "not",
                    UnaryOp::Neg => "neg",
                };
                format!("{} = {name} {}", dest.pretty_print(0), p(source))
            }
            InstructionKind::BinaryOp {
                op,
                dest,
                left,
                right,
            } => match op {
                BinaryOp::BitsEq(kind) => format!(
                    "{} = bits_eq.{kind} {}, {}",
                    dest.pretty_print(0),
                    p(left),
                    p(right)
                ),
                _ => format!(
                    "{} = {} {}, {}",
                    dest.pretty_print(0),
                    op.mnemonic(),
                    p(left),
                    p(right)
                ),
            },
            InstructionKind::Select {
                dest,
                condition,
                if_true,
                if_false,
            } => format!(
                "{} = select {}, {}, {}",
                dest.pretty_print(0),
                p(condition),
                p(if_true),
                p(if_false)
            ),
            InstructionKind::Phi { dest, sources, .. } => {
                let sources = sources
                    .iter()
                    .map(|(block, value)| format!("[{}, {}]", p(value), block.index()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} = phi {sources}", dest.pretty_print(0))
            }
            InstructionKind::Call {
                dests: call_dests,
                target,
                args,
            } => {
                let call = format!(
                    "call m{}.{}({})",
                    target.method.index(),
                    target.entry.suffix(),
                    list(args)
                );
                if call_dests.is_empty() {
                    call
                } else {
                    format!("{} = {call}", dests(call_dests))
                }
            }
            InstructionKind::RuntimeCall {
                dests: call_dests,
                function,
                args,
            } => {
                let call = format!("runtime {}({})", function.name(), list(args));
                if call_dests.is_empty() {
                    call
                } else {
                    format!("{} = {call}", dests(call_dests))
                }
            }
            InstructionKind::NewInstance { dest, ty } => {
                format!("{} = new type{}", dest.pretty_print(0), ty.index())
            }
            InstructionKind::Load {
                dest,
                base,
                offset,
                kind,
                ..
            } => format!(
                "{} = load.{kind} [{} + {offset}]",
                dest.pretty_print(0),
                p(base)
            ),
            InstructionKind::Store {
                base,
                offset,
                kind,
                value,
                ..
            } => format!("store.{kind} [{} + {offset}], {}", p(base), p(value)),
            InstructionKind::ElementAddress {
                dest,
                array,
                index,
                scale,
            } => format!(
                "{} = element_address {}[{} * {scale}]",
                dest.pretty_print(0),
                p(array),
                p(index)
            ),
            InstructionKind::LoadHub { dest, object } => {
                format!("{} = load_hub {}", dest.pretty_print(0), p(object))
            }
            InstructionKind::LoadMarkWord { dest, object } => {
                format!("{} = load_mark {}", dest.pretty_print(0), p(object))
            }
            InstructionKind::IsNull { dest, value } => {
                format!("{} = is_null {}", dest.pretty_print(0), p(value))
            }
            InstructionKind::IsFlatArray { dest, array } => {
                format!("{} = is_flat_array {}", dest.pretty_print(0), p(array))
            }
            InstructionKind::InlineValue {
                dest,
                ty,
                fields,
                null_state,
            } => {
                let mut text = format!(
                    "{} = inline type{} {{{}}}",
                    dest.pretty_print(0),
                    ty.index(),
                    list(fields)
                );
                if let Some(state) = null_state {
                    text.push_str(&format!(
                        " not_null={} oop={}",
                        p(&state.is_not_null),
                        p(&state.oop)
                    ));
                }
                text
            }
            InstructionKind::TagReturn {
                dest,
                ty,
                oop,
                is_not_null,
            } => format!(
                "{} = tag_return type{} oop={} not_null={}",
                dest.pretty_print(0),
                ty.index(),
                p(oop),
                p(is_not_null)
            ),
            InstructionKind::UntagReturn { dest, tagged } => {
                format!("{} = untag_return {}", dest.pretty_print(0), p(tagged))
            }
            InstructionKind::Compare {
                dest,
                op,
                left,
                right,
            } => {
                let op = match op {
                    CompareOp::PointerEquals => "pointer_eq".to_string(),
                    CompareOp::ObjectEquals => "object_eq".to_string(),
                    CompareOp::DelayedRawCompare { slot, kind, offset } => match offset {
                        Some(offset) => format!("raw_eq.{kind}@{offset}"),
                        None => format!("raw_eq.{kind}#{slot}"),
                    },
                };
                format!("{} = {op} {}, {}", dest.pretty_print(0), p(left), p(right))
            }
            InstructionKind::Monitor { object, enter } => {
                let action = if *enter { "monitor_enter" } else { "monitor_exit" };
                format!("{action} {}", p(object))
            }
        };

        if let Some(comment) = &self.comment {
            result.push_str(&format!(" // {comment}"));
        }
        result
    }
}
