//! # Instruction Builder
//!
//! This module provides a fluent API for creating MIR instructions.
//! Every constructor allocates a typed destination, appends the instruction to
//! the current block and returns the destination as a [`Value`].

use flatjit_common::{Kind, TypeId};

use crate::{
    BasicBlockId, BinaryOp, CallTarget, CompareOp, InlineNullState, Instruction, InstructionKind,
    LocationIdentity, MirFunction, MirType, RefStamp, RuntimeFunction, UnaryOp, Value,
};

/// A builder for creating MIR instructions with a fluent API
///
/// The InstrBuilder manages instruction creation and automatically handles
/// destination allocation.
pub struct InstrBuilder<'f> {
    function: &'f mut MirFunction,
    current_block: BasicBlockId,
}

impl<'f> InstrBuilder<'f> {
    /// Creates a new instruction builder for the given function and current block
    pub const fn new(function: &'f mut MirFunction, current_block: BasicBlockId) -> Self {
        Self {
            function,
            current_block,
        }
    }

    /// Add an instruction to the current block
    pub fn add_instruction(&mut self, instruction: Instruction) {
        if let Some(block) = self.function.basic_blocks.get_mut(self.current_block) {
            block.push_instruction(instruction);
        }
    }

    fn emit(&mut self, ty: MirType, kind: impl FnOnce(crate::ValueId) -> InstructionKind) -> Value {
        let dest = self.function.new_typed_value_id(ty);
        self.add_instruction(Instruction::new(kind(dest)));
        Value::operand(dest)
    }

    /// `dest = source`, typed `ty`; used to attach a sharper type to a value
    pub fn assign(&mut self, source: Value, ty: MirType) -> Value {
        self.emit(ty, |dest| InstructionKind::Assign { dest, source })
    }

    pub fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Value {
        let ty = if op.is_comparison() {
            MirType::bool()
        } else {
            match self.function.value_type(left) {
                MirType::Primitive(kind) => MirType::Primitive(kind),
                _ => MirType::long(),
            }
        };
        self.emit(ty, |dest| InstructionKind::BinaryOp {
            op,
            dest,
            left,
            right,
        })
    }

    pub fn not(&mut self, source: Value) -> Value {
        self.emit(MirType::bool(), |dest| InstructionKind::UnaryOp {
            op: UnaryOp::Not,
            dest,
            source,
        })
    }

    pub fn select(&mut self, condition: Value, if_true: Value, if_false: Value, ty: MirType) -> Value {
        self.emit(ty, |dest| InstructionKind::Select {
            dest,
            condition,
            if_true,
            if_false,
        })
    }

    /// Inserts a phi at the start of the current block
    pub fn phi(&mut self, ty: MirType, sources: Vec<(BasicBlockId, Value)>) -> Value {
        let dest = self.function.new_typed_value_id(ty);
        if let Some(block) = self.function.basic_blocks.get_mut(self.current_block) {
            block.push_phi(Instruction::phi(dest, ty, sources));
        }
        Value::operand(dest)
    }

    pub fn load(
        &mut self,
        base: Value,
        offset: u32,
        kind: Kind,
        location: LocationIdentity,
        ty: MirType,
    ) -> Value {
        self.emit(ty, |dest| InstructionKind::Load {
            dest,
            base,
            offset,
            kind,
            location,
        })
    }

    pub fn store(
        &mut self,
        base: Value,
        offset: u32,
        kind: Kind,
        value: Value,
        location: LocationIdentity,
    ) -> &mut Self {
        self.add_instruction(Instruction::store(base, offset, kind, value, location));
        self
    }

    pub fn element_address(&mut self, array: Value, index: Value, scale: u32) -> Value {
        self.emit(MirType::Address, |dest| InstructionKind::ElementAddress {
            dest,
            array,
            index,
            scale,
        })
    }

    pub fn load_hub(&mut self, object: Value) -> Value {
        self.emit(MirType::Hub, |dest| InstructionKind::LoadHub { dest, object })
    }

    pub fn load_mark_word(&mut self, object: Value) -> Value {
        self.emit(MirType::long(), |dest| InstructionKind::LoadMarkWord {
            dest,
            object,
        })
    }

    pub fn is_null(&mut self, value: Value) -> Value {
        self.emit(MirType::bool(), |dest| InstructionKind::IsNull { dest, value })
    }

    pub fn is_flat_array(&mut self, array: Value) -> Value {
        self.emit(MirType::bool(), |dest| InstructionKind::IsFlatArray {
            dest,
            array,
        })
    }

    /// A scalarized value object; it is known non-null when it has no null
    /// state or its not-null flag is the literal `true`
    pub fn inline_value(
        &mut self,
        ty: TypeId,
        fields: Vec<Value>,
        null_state: Option<InlineNullState>,
    ) -> Value {
        let non_null =
            null_state.map_or(true, |state| state.is_not_null.as_const_bool() == Some(true));
        self.emit(
            MirType::Reference(RefStamp::exact(ty).with_non_null(non_null)),
            |dest| InstructionKind::InlineValue {
                dest,
                ty,
                fields,
                null_state,
            },
        )
    }

    pub fn tag_return(&mut self, ty: TypeId, oop: Value, is_not_null: Value) -> Value {
        self.emit(MirType::object(), |dest| InstructionKind::TagReturn {
            dest,
            ty,
            oop,
            is_not_null,
        })
    }

    pub fn untag_return(&mut self, tagged: Value, ty: TypeId) -> Value {
        self.emit(MirType::Reference(RefStamp::exact(ty)), |dest| {
            InstructionKind::UntagReturn { dest, tagged }
        })
    }

    pub fn compare(&mut self, op: CompareOp, left: Value, right: Value) -> Value {
        self.emit(MirType::bool(), |dest| InstructionKind::Compare {
            dest,
            op,
            left,
            right,
        })
    }

    /// Calls a compiled entry; one destination per returned slot
    pub fn call(&mut self, target: CallTarget, args: Vec<Value>, returns: &[MirType]) -> Vec<Value> {
        let dests: Vec<_> = returns
            .iter()
            .map(|ty| self.function.new_typed_value_id(*ty))
            .collect();
        self.add_instruction(Instruction::new(InstructionKind::Call {
            dests: dests.clone(),
            target,
            args,
        }));
        dests.into_iter().map(Value::operand).collect()
    }

    pub fn runtime_call(
        &mut self,
        function: RuntimeFunction,
        args: Vec<Value>,
        returns: &[MirType],
    ) -> Vec<Value> {
        let dests: Vec<_> = returns
            .iter()
            .map(|ty| self.function.new_typed_value_id(*ty))
            .collect();
        self.add_instruction(Instruction::new(InstructionKind::RuntimeCall {
            dests: dests.clone(),
            function,
            args,
        }));
        dests.into_iter().map(Value::operand).collect()
    }

    pub fn monitor(&mut self, object: Value, enter: bool) -> &mut Self {
        self.add_instruction(Instruction::new(InstructionKind::Monitor { object, enter }));
        self
    }
}
