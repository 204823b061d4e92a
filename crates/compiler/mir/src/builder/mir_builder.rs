//! # Function Builder
//!
//! [`MirBuilder`] owns the function under construction and the block where new
//! instructions go. The value-object operations are implemented on it in
//! sibling modules: flattened field and element access, substitutability and
//! scalarized calls.

use flatjit_common::Kind;

use crate::{
    BasicBlockId, CfgBuilder, CompilationContext, DeoptAction, DeoptReason, Deoptimization,
    FieldDescriptor, FrameState, InstrBuilder, MirFunction, MirType, RefStamp, Value,
};

/// Builds one MIR function
pub struct MirBuilder<'a> {
    ctx: CompilationContext<'a>,
    function: MirFunction,
    current_block: BasicBlockId,
    frame_state: FrameState,
}

impl<'a> MirBuilder<'a> {
    pub fn new(ctx: CompilationContext<'a>, name: impl Into<String>) -> Self {
        let function = MirFunction::new(name);
        let current_block = function.entry_block;
        Self {
            ctx,
            function,
            current_block,
            frame_state: FrameState::default(),
        }
    }

    pub const fn ctx(&self) -> CompilationContext<'a> {
        self.ctx
    }

    pub const fn function(&self) -> &MirFunction {
        &self.function
    }

    pub fn function_mut(&mut self) -> &mut MirFunction {
        &mut self.function
    }

    /// Returns the built function
    pub fn finish(self) -> MirFunction {
        self.function
    }

    pub const fn current_block(&self) -> BasicBlockId {
        self.current_block
    }

    /// Instruction builder positioned at the end of the current block
    pub fn instr(&mut self) -> InstrBuilder<'_> {
        InstrBuilder::new(&mut self.function, self.current_block)
    }

    /// CFG builder positioned at the current block
    pub fn cfg(&mut self) -> CfgBuilder<'_> {
        CfgBuilder::new(&mut self.function, self.current_block)
    }

    /// Adds an incoming slot
    pub fn add_parameter(&mut self, ty: MirType) -> Value {
        Value::operand(self.function.add_parameter(ty))
    }

    pub fn new_block(&mut self, name: &str) -> BasicBlockId {
        self.cfg().new_block(Some(name.to_string()))
    }

    pub fn switch_to(&mut self, block: BasicBlockId) {
        self.current_block = block;
    }

    pub fn is_terminated(&self) -> bool {
        self.function.basic_blocks[self.current_block].is_terminated()
    }

    pub fn jump(&mut self, target: BasicBlockId) {
        self.cfg().terminate_with_jump(target);
    }

    pub fn branch(&mut self, condition: Value, then_target: BasicBlockId, else_target: BasicBlockId) {
        self.cfg()
            .terminate_with_branch(condition, then_target, else_target);
    }

    pub fn ret(&mut self, values: Vec<Value>) {
        self.cfg().terminate_with_return(values);
    }

    /// Sets the interpreter state deoptimizations created from now on resume at
    pub fn set_frame_state(&mut self, state: FrameState) {
        self.frame_state = state;
    }

    pub const fn frame_state(&self) -> &FrameState {
        &self.frame_state
    }

    /// Ends the current block with an unconditional deoptimization
    pub fn deoptimize(&mut self, reason: DeoptReason, action: DeoptAction) -> Deoptimization {
        let deopt = Deoptimization {
            reason,
            action,
            state: self.frame_state.clone(),
        };
        self.cfg().terminate_with_deopt(deopt.clone());
        deopt
    }

    /// Continues in a new block where `condition` holds; the other edge
    /// deoptimizes
    pub fn guard(&mut self, condition: Value, reason: DeoptReason, action: DeoptAction) {
        if condition.as_const_bool() == Some(true) {
            return;
        }
        let pass = self.new_block("guard.pass");
        let fail = self.new_block("guard.fail");
        self.branch(condition, pass, fail);
        self.switch_to(fail);
        self.deoptimize(reason, action);
        self.switch_to(pass);
    }

    pub fn value_type(&self, value: Value) -> MirType {
        self.function.value_type(value)
    }

    /// What is statically known about a reference value
    pub fn stamp(&self, value: Value) -> RefStamp {
        match self.function.value_type(value) {
            MirType::Reference(stamp) => stamp,
            _ => RefStamp::unknown(),
        }
    }

    /// Inserts a phi at the start of the current block
    pub fn phi(&mut self, ty: MirType, sources: Vec<(BasicBlockId, Value)>) -> Value {
        self.instr().phi(ty, sources)
    }

    /// Boolean test of a reference for null, folded when the stamp decides it
    pub(crate) fn null_check(&mut self, value: Value) -> Value {
        let stamp = self.stamp(value);
        if stamp.always_null {
            Value::boolean(true)
        } else if stamp.non_null {
            Value::boolean(false)
        } else {
            self.instr().is_null(value)
        }
    }
}

/// The all-zero slot value of `kind`
pub(crate) const fn zero_of(kind: Kind) -> Value {
    match kind {
        Kind::Object => Value::null(),
        Kind::Boolean => Value::boolean(false),
        _ => Value::integer(0),
    }
}

/// MIR type of a leaf value
pub(crate) fn leaf_type(field: &FieldDescriptor) -> MirType {
    match field.declared {
        Some(ty) if field.is_reference() => {
            MirType::Reference(RefStamp::of(ty).with_non_null(field.null_free))
        }
        _ => MirType::from_kind(field.kind),
    }
}
