//! # Reference interpreter
//!
//! Executes lowered MIR against the [`Heap`] model. It is the ground truth the
//! tests hold optimized code to: a function and its optimized form must return
//! the same slot bits and leave the heap in the same observable state.
//!
//! Every value is a raw 64-bit slot. Phis of a block are evaluated together
//! from the edge the block was entered by. Calls run the callee entry from the
//! attached [`MirModule`]; a deoptimization anywhere ends the whole execution.

use flatjit_common::{Heap, HeapError, Kind, TypeId, ARRAY_BASE_OFFSET, NULL};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    AggregateType, BasicBlockId, CallTarget, CompilationContext, CompileError, DeoptAction,
    DeoptReason, Deoptimization, Instruction, InstructionKind, MirFunction, MirModule,
    PrettyPrint, RuntimeFunction, Terminator, Value, ValueId,
};

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Slot bits of the returned values
    Returned(Vec<u64>),
    /// Control left compiled code; `locals` is the evaluated frame state
    Deoptimized {
        reason: DeoptReason,
        action: DeoptAction,
        bci: u32,
        locals: Vec<u64>,
    },
}

impl Outcome {
    pub fn returned(&self) -> Option<&[u64]> {
        match self {
            Self::Returned(values) => Some(values),
            Self::Deoptimized { .. } => None,
        }
    }

    pub const fn is_deoptimized(&self) -> bool {
        matches!(self, Self::Deoptimized { .. })
    }
}

/// Faults of the executed program or of the interpreter itself
#[derive(Debug, Error)]
pub enum InterpError {
    #[error("Monitor operation on object {0:#x} without identity")]
    IllegalMonitorState(u64),

    #[error("'{function}' contains an unlowered instruction: {instruction}")]
    Unlowered { function: String, instruction: String },

    #[error("Step limit exceeded")]
    StepLimit,

    #[error("No compiled entry for {0:?}")]
    UnknownEntry(CallTarget),

    #[error("Reached unreachable block '{0}'")]
    Unreachable(String),

    #[error("Value {0:?} read before being defined")]
    UndefinedValue(ValueId),

    #[error("'{function}' expects {expected} slots, got {actual}")]
    ArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Control flow out of one instruction
enum Flow {
    Continue,
    Deoptimized(Outcome),
}

/// Executes MIR functions over a heap
pub struct Interpreter<'a> {
    ctx: CompilationContext<'a>,
    heap: &'a mut Heap,
    module: Option<&'a MirModule>,
    step_limit: usize,
    steps: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: CompilationContext<'a>, heap: &'a mut Heap) -> Self {
        Self {
            ctx,
            heap,
            module: None,
            step_limit: 1_000_000,
            steps: 0,
        }
    }

    /// Resolves calls against the entries of `module`
    pub const fn with_module(mut self, module: &'a MirModule) -> Self {
        self.module = Some(module);
        self
    }

    pub const fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn heap(&self) -> &Heap {
        &*self.heap
    }

    /// Runs `function` with one slot per parameter
    pub fn execute(&mut self, function: &MirFunction, args: &[u64]) -> Result<Outcome, InterpError> {
        if args.len() != function.parameters.len() {
            return Err(InterpError::ArgumentCount {
                function: function.name.clone(),
                expected: function.parameters.len(),
                actual: args.len(),
            });
        }

        let mut env: FxHashMap<ValueId, u64> =
            function.parameters.iter().copied().zip(args.iter().copied()).collect();
        let mut current = function.entry_block;
        let mut previous: Option<BasicBlockId> = None;

        loop {
            let block = &function.basic_blocks[current];

            let mut incoming = Vec::new();
            for instr in &block.instructions {
                let InstructionKind::Phi { dest, sources, .. } = &instr.kind else {
                    break;
                };
                let source = sources
                    .iter()
                    .find(|(pred, _)| Some(*pred) == previous)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| InterpError::Unreachable(block_name(function, current)))?;
                incoming.push((*dest, self.eval(&env, source)?));
            }
            env.extend(incoming);

            for instr in &block.instructions[block.phi_count()..] {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(InterpError::StepLimit);
                }
                if let Flow::Deoptimized(outcome) = self.step(function, &mut env, instr)? {
                    return Ok(outcome);
                }
            }

            match &block.terminator {
                Terminator::Jump { target } => {
                    previous = Some(current);
                    current = *target;
                }
                Terminator::If {
                    condition,
                    then_target,
                    else_target,
                } => {
                    previous = Some(current);
                    current = if self.eval(&env, *condition)? != 0 {
                        *then_target
                    } else {
                        *else_target
                    };
                }
                Terminator::Return { values } => {
                    let values = values
                        .iter()
                        .map(|value| self.eval(&env, *value))
                        .collect::<Result<_, _>>()?;
                    return Ok(Outcome::Returned(values));
                }
                Terminator::Deoptimize(deopt) => return self.deoptimize(&env, deopt),
                Terminator::Unreachable => {
                    return Err(InterpError::Unreachable(block_name(function, current)))
                }
            }
        }
    }

    fn deoptimize(
        &self,
        env: &FxHashMap<ValueId, u64>,
        deopt: &Deoptimization,
    ) -> Result<Outcome, InterpError> {
        if deopt.action == DeoptAction::InvalidateRecompile {
            if let Some(speculation) = deopt.speculation() {
                self.ctx.speculations.record_failure(speculation);
            }
        }
        let locals = deopt
            .state
            .locals
            .iter()
            .map(|value| self.eval(env, *value))
            .collect::<Result<_, _>>()?;
        Ok(Outcome::Deoptimized {
            reason: deopt.reason,
            action: deopt.action,
            bci: deopt.state.bci,
            locals,
        })
    }

    fn eval(&self, env: &FxHashMap<ValueId, u64>, value: Value) -> Result<u64, InterpError> {
        match value {
            Value::Literal(literal) => Ok(literal.bits(self.ctx.metadata)),
            Value::Operand(id) => env.get(&id).copied().ok_or(InterpError::UndefinedValue(id)),
        }
    }

    fn step(
        &mut self,
        function: &MirFunction,
        env: &mut FxHashMap<ValueId, u64>,
        instr: &Instruction,
    ) -> Result<Flow, InterpError> {
        let metadata = self.ctx.metadata;
        match &instr.kind {
            InstructionKind::Assign { dest, source } => {
                let value = self.eval(env, *source)?;
                env.insert(*dest, value);
            }
            InstructionKind::UnaryOp { op, dest, source } => {
                let value = op.apply(self.eval(env, *source)?);
                env.insert(*dest, value);
            }
            InstructionKind::BinaryOp {
                op,
                dest,
                left,
                right,
            } => {
                let value = op.apply(self.eval(env, *left)?, self.eval(env, *right)?);
                env.insert(*dest, value);
            }
            InstructionKind::Select {
                dest,
                condition,
                if_true,
                if_false,
            } => {
                let chosen = if self.eval(env, *condition)? != 0 {
                    *if_true
                } else {
                    *if_false
                };
                let value = self.eval(env, chosen)?;
                env.insert(*dest, value);
            }
            InstructionKind::Phi { .. } => {}
            InstructionKind::Call {
                dests,
                target,
                args,
            } => {
                let callee = self
                    .module
                    .and_then(|module| module.lookup_entry(*target))
                    .ok_or(InterpError::UnknownEntry(*target))?;
                let args = args
                    .iter()
                    .map(|value| self.eval(env, *value))
                    .collect::<Result<Vec<_>, _>>()?;
                match self.execute(callee, &args)? {
                    Outcome::Returned(values) => bind_results(env, dests, &values, &callee.name)?,
                    deoptimized => return Ok(Flow::Deoptimized(deoptimized)),
                }
            }
            InstructionKind::RuntimeCall {
                dests,
                function: runtime,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|value| self.eval(env, *value))
                    .collect::<Result<Vec<_>, _>>()?;
                match self.runtime_call(*runtime, &args)? {
                    Outcome::Returned(values) => {
                        bind_results(env, dests, &values, runtime.name())?;
                    }
                    deoptimized => return Ok(Flow::Deoptimized(deoptimized)),
                }
            }
            InstructionKind::NewInstance { dest, ty } => {
                let object = self.heap.allocate(metadata, *ty)?;
                env.insert(*dest, object);
            }
            InstructionKind::Load {
                dest,
                base,
                offset,
                kind,
                ..
            } => {
                let address = self.eval(env, *base)? + *offset as u64;
                let value = self.heap.read(address, *kind)?;
                env.insert(*dest, value);
            }
            InstructionKind::Store {
                base,
                offset,
                kind,
                value,
                ..
            } => {
                let address = self.eval(env, *base)? + *offset as u64;
                let value = self.eval(env, *value)?;
                self.heap.write(address, *kind, value)?;
            }
            InstructionKind::ElementAddress {
                dest,
                array,
                index,
                scale,
            } => {
                let array = self.eval(env, *array)?;
                let index = self.eval(env, *index)? as i64;
                let length = self.heap.array_length(metadata, array)?;
                if index < 0 || index >= length as i64 {
                    return Err(HeapError::IndexOutOfBounds { index, length }.into());
                }
                let address = array + ARRAY_BASE_OFFSET as u64 + index as u64 * *scale as u64;
                env.insert(*dest, address);
            }
            InstructionKind::LoadHub { dest, object } => {
                let hub = self.heap.hub(self.eval(env, *object)?)?;
                env.insert(*dest, hub);
            }
            InstructionKind::LoadMarkWord { dest, object } => {
                let mark = self.heap.mark(self.eval(env, *object)?)?;
                env.insert(*dest, mark);
            }
            InstructionKind::IsNull { dest, value } => {
                let is_null = self.eval(env, *value)? == NULL;
                env.insert(*dest, is_null as u64);
            }
            InstructionKind::IsFlatArray { dest, array } => {
                let shape = self.heap.array_shape(metadata, self.eval(env, *array)?)?;
                env.insert(*dest, shape.flat as u64);
            }
            InstructionKind::TagReturn {
                dest,
                ty,
                oop,
                is_not_null,
            } => {
                let tagged = if self.eval(env, *is_not_null)? == 0 {
                    NULL
                } else {
                    match self.eval(env, *oop)? {
                        NULL => metadata.ty(*ty).hub | 1,
                        oop => oop,
                    }
                };
                env.insert(*dest, tagged);
            }
            InstructionKind::UntagReturn { dest, tagged } => {
                let tagged = self.eval(env, *tagged)?;
                env.insert(*dest, if tagged & 1 == 1 { NULL } else { tagged });
            }
            InstructionKind::Monitor { object, .. } => {
                let object = self.eval(env, *object)?;
                if !self.heap.has_identity(object)? {
                    return Err(InterpError::IllegalMonitorState(object));
                }
            }
            InstructionKind::InlineValue { .. } | InstructionKind::Compare { .. } => {
                return Err(InterpError::Unlowered {
                    function: function.name.clone(),
                    instruction: instr.pretty_print(0),
                });
            }
        }
        Ok(Flow::Continue)
    }

    fn runtime_call(&mut self, function: RuntimeFunction, args: &[u64]) -> Result<Outcome, InterpError> {
        let metadata = self.ctx.metadata;
        match (function, args) {
            (RuntimeFunction::IsSubstitutable, &[left, right]) => {
                let ty = self.heap.type_of(metadata, left)?;
                let snippet = self.ctx.snippets.substitutability_check(&self.ctx, ty)?;
                self.execute(&snippet, &[left, right])
            }
            (RuntimeFunction::LoadUnknownInline, &[array, index]) => {
                let (element, aggregate, null_free) = self.flat_element(array, index)?;
                let marker = element + aggregate.marker_offset(0) as u64;
                if !null_free && self.heap.read(marker, Kind::Boolean)? == 0 {
                    return Ok(Outcome::Returned(vec![NULL]));
                }
                let object = self.heap.allocate(metadata, aggregate.ty)?;
                for (index, leaf) in aggregate.fields.iter().enumerate() {
                    let bits = self
                        .heap
                        .read(element + aggregate.embedded_offset(0, index) as u64, leaf.kind)?;
                    self.heap.write(object + leaf.offset as u64, leaf.kind, bits)?;
                }
                Ok(Outcome::Returned(vec![object]))
            }
            (RuntimeFunction::StoreUnknownInline, &[array, index, value]) => {
                let (element, aggregate, null_free) = self.flat_element(array, index)?;
                if value == NULL && null_free {
                    return Ok(Outcome::Returned(vec![0]));
                }
                for (index, leaf) in aggregate.fields.iter().enumerate() {
                    let bits = if value == NULL {
                        0
                    } else {
                        self.heap.read(value + leaf.offset as u64, leaf.kind)?
                    };
                    self.heap
                        .write(element + aggregate.embedded_offset(0, index) as u64, leaf.kind, bits)?;
                }
                if !null_free {
                    let marker = element + aggregate.marker_offset(0) as u64;
                    self.heap.write(marker, Kind::Boolean, (value != NULL) as u64)?;
                }
                Ok(Outcome::Returned(vec![1]))
            }
            (function, args) => Err(InterpError::ArgumentCount {
                function: function.name().to_string(),
                expected: match function {
                    RuntimeFunction::StoreUnknownInline => 3,
                    _ => 2,
                },
                actual: args.len(),
            }),
        }
    }

    /// Address, element descriptor and nullability of a flat array element
    fn flat_element(
        &self,
        array: u64,
        index: u64,
    ) -> Result<(u64, std::sync::Arc<AggregateType>, bool), InterpError> {
        let metadata = self.ctx.metadata;
        let shape = self.heap.array_shape(metadata, array)?;
        let Some(element_ty) = shape.element.reference().filter(|_| shape.flat) else {
            return Err(HeapError::NotAnArray(array).into());
        };
        let aggregate = self.ctx.describe(element_ty).map_err(CompileError::from)?;
        let element = self.heap.element_address(metadata, array, index as i64)?;
        Ok((element, aggregate, metadata.is_null_free_element(&shape)))
    }

    /// Runtime type of a non-null object
    pub fn type_of(&self, object: u64) -> Result<TypeId, InterpError> {
        Ok(self.heap.type_of(self.ctx.metadata, object)?)
    }
}

fn bind_results(
    env: &mut FxHashMap<ValueId, u64>,
    dests: &[ValueId],
    values: &[u64],
    callee: &str,
) -> Result<(), InterpError> {
    if values.len() < dests.len() {
        return Err(InterpError::ArgumentCount {
            function: callee.to_string(),
            expected: dests.len(),
            actual: values.len(),
        });
    }
    env.extend(dests.iter().copied().zip(values.iter().copied()));
    Ok(())
}

fn block_name(function: &MirFunction, block: BasicBlockId) -> String {
    let name = function.basic_blocks[block].name.as_deref().unwrap_or("");
    format!("{}:{block:?}{name}", function.name)
}

#[cfg(test)]
mod tests {
    use flatjit_common::{CompilerConfig, Metadata};

    use super::*;
    use crate::{BinaryOp, CompilationSession, MirType};

    fn session() -> CompilationSession {
        let mut metadata = Metadata::new();
        metadata
            .identity_class("Node")
            .field("v", Kind::Long)
            .build()
            .unwrap();
        CompilationSession::new(metadata, CompilerConfig::default())
    }

    #[test]
    fn test_phi_reads_the_incoming_edge() {
        let session = session();
        let mut heap = Heap::new();
        let mut f = MirFunction::new("select");
        let flag = f.add_parameter(MirType::bool());
        let a = f.add_basic_block();
        let b = f.add_basic_block();
        let join = f.add_basic_block();
        let result = f.new_typed_value_id(MirType::long());
        f.basic_blocks[f.entry_block].set_terminator(Terminator::branch(Value::operand(flag), a, b));
        f.basic_blocks[a].set_terminator(Terminator::jump(join));
        f.basic_blocks[b].set_terminator(Terminator::jump(join));
        f.basic_blocks[join].push_phi(Instruction::phi(
            result,
            MirType::long(),
            vec![(a, Value::integer(10)), (b, Value::integer(20))],
        ));
        f.basic_blocks[join].set_terminator(Terminator::return_values(vec![Value::operand(result)]));

        let mut interp = Interpreter::new(session.context(), &mut heap);
        assert_eq!(interp.execute(&f, &[1]).unwrap(), Outcome::Returned(vec![10]));
        assert_eq!(interp.execute(&f, &[0]).unwrap(), Outcome::Returned(vec![20]));
    }

    #[test]
    fn test_monitor_on_value_without_identity_faults() {
        let mut metadata = Metadata::new();
        let point = metadata
            .value_class("Point")
            .field("x", Kind::Int)
            .build()
            .unwrap();
        let session = CompilationSession::new(metadata, CompilerConfig::default());
        let mut heap = Heap::new();
        let object = heap.allocate(session.metadata(), point).unwrap();

        let mut f = MirFunction::new("lock");
        let param = f.add_parameter(MirType::object());
        let entry = f.entry_block;
        f.basic_blocks[entry].push_instruction(Instruction::new(InstructionKind::Monitor {
            object: Value::operand(param),
            enter: true,
        }));
        f.basic_blocks[entry].set_terminator(Terminator::return_values(vec![]));

        let mut interp = Interpreter::new(session.context(), &mut heap);
        assert!(matches!(
            interp.execute(&f, &[object]),
            Err(InterpError::IllegalMonitorState(o)) if o == object
        ));
    }

    #[test]
    fn test_step_limit_stops_infinite_loops() {
        let session = session();
        let mut heap = Heap::new();
        let mut f = MirFunction::new("spin");
        let body = f.add_basic_block();
        let counter = f.new_typed_value_id(MirType::long());
        let next = f.new_typed_value_id(MirType::long());
        let entry = f.entry_block;
        f.basic_blocks[entry].set_terminator(Terminator::jump(body));
        f.basic_blocks[body].push_phi(Instruction::phi(
            counter,
            MirType::long(),
            vec![(entry, Value::integer(0)), (body, Value::operand(next))],
        ));
        f.basic_blocks[body].push_instruction(Instruction::binary_op(
            BinaryOp::Add,
            next,
            Value::operand(counter),
            Value::integer(1),
        ));
        f.basic_blocks[body].set_terminator(Terminator::jump(body));

        let mut interp = Interpreter::new(session.context(), &mut heap).with_step_limit(100);
        assert!(matches!(interp.execute(&f, &[]), Err(InterpError::StepLimit)));
    }
}
