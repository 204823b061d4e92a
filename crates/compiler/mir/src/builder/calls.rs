//! # Scalarized Calls
//!
//! Construction of method entries, call sites and returns according to the
//! method's [`ScalarizedSignature`](crate::ScalarizedSignature).
//!
//! Scalarized positions are reassembled into an `InlineValue` on entry and
//! after a call returns, so the body works with one logical value per
//! position whatever the convention. A value that started out as an
//! `InlineValue` is passed on leaf by leaf without ever being allocated.

use flatjit_common::MethodId;

use super::mir_builder::{leaf_type, zero_of};
use crate::{
    AggregateType, CallTarget, CompilationContext, CompileError, CompileResult, DeoptAction,
    DeoptReason, EntryKind, InlineNullState, InstructionKind, MirBuilder, MirType, PositionPlan,
    ScalarizedSignature, Value,
};

/// The flattened form of one value at a call boundary
struct Scalarized {
    leaves: Vec<Value>,
    is_not_null: Value,
    /// A heap instance holding the same value, or null
    oop: Value,
}

impl<'a> MirBuilder<'a> {
    /// Starts the function implementing `entry` of `method`.
    ///
    /// Returns the builder together with one logical value per parameter,
    /// receiver first.
    pub fn for_method(
        ctx: CompilationContext<'a>,
        method: MethodId,
        entry: EntryKind,
    ) -> CompileResult<(Self, Vec<Value>)> {
        let plan = ctx.plan(method)?;
        let mut builder = Self::new(ctx, format!("{}${}", plan.name, entry.suffix()));
        builder.function_mut().method = Some(method);
        builder.function_mut().entry = entry;

        let mut params = Vec::with_capacity(plan.params.len());
        for (index, position) in plan.params.iter().enumerate() {
            let value = match &position.aggregate {
                Some(aggregate) if plan.param_scalarized_in(index, entry) => {
                    let leaves = aggregate
                        .fields
                        .iter()
                        .map(|leaf| builder.add_parameter(leaf_type(leaf)))
                        .collect();
                    let null_state = (!position.null_free).then(|| InlineNullState {
                        is_not_null: builder.add_parameter(MirType::bool()),
                        oop: Value::null(),
                    });
                    builder.instr().inline_value(aggregate.ty, leaves, null_state)
                }
                _ => builder.add_parameter(position.mir_type()),
            };
            params.push(value);
        }
        Ok((builder, params))
    }

    /// Calls `method` with one logical value per parameter, receiver first.
    ///
    /// `statically_bound` marks call sites whose target is known exactly; they
    /// use the fully scalarized entry even for virtual methods.
    pub fn invoke(
        &mut self,
        method: MethodId,
        args: &[Value],
        statically_bound: bool,
    ) -> CompileResult<Option<Value>> {
        let ctx = self.ctx();
        let plan = ctx.plan(method)?;
        if args.len() != plan.params.len() {
            return Err(CompileError::ArityMismatch {
                method: plan.name.clone(),
                expected: plan.params.len(),
                actual: args.len(),
            });
        }

        let bound = statically_bound || ctx.metadata.method(method).can_be_statically_bound();
        let entry = plan.entry_for_call(bound);
        log::trace!("{}: call {} via {entry:?}", self.function().name, plan.name);

        let mut slots = Vec::new();
        for (index, (&arg, position)) in args.iter().zip(&plan.params).enumerate() {
            match &position.aggregate {
                Some(aggregate) if plan.param_scalarized_in(index, entry) => {
                    let scalarized = self.scalarize(arg, aggregate, position.null_free);
                    slots.extend(scalarized.leaves);
                    if !position.null_free {
                        slots.push(scalarized.is_not_null);
                    }
                }
                _ => slots.push(arg),
            }
        }

        let returns = return_types(&plan, entry);
        let results = self
            .instr()
            .call(CallTarget::new(method, entry), slots, &returns);

        match &plan.ret {
            None => Ok(None),
            Some(PositionPlan {
                aggregate: Some(aggregate),
                null_free,
                ..
            }) if plan.return_scalarized_in(entry) => {
                let count = aggregate.leaf_count();
                let tagged = results[0];
                let leaves = results[1..=count].to_vec();
                let is_not_null = if *null_free {
                    Value::boolean(true)
                } else {
                    results[count + 1]
                };
                let oop = self.instr().untag_return(tagged, aggregate.ty);
                Ok(Some(self.instr().inline_value(
                    aggregate.ty,
                    leaves,
                    Some(InlineNullState { is_not_null, oop }),
                )))
            }
            Some(_) => Ok(results.first().copied()),
        }
    }

    /// Returns `value` from the current function in the convention of its entry
    pub fn return_value(&mut self, value: Option<Value>) -> CompileResult<()> {
        let Some(method) = self.function().method else {
            self.ret(value.into_iter().collect());
            return Ok(());
        };
        let entry = self.function().entry;
        let plan = self.ctx().plan(method)?;

        match (&plan.ret, value) {
            (None, _) => self.ret(Vec::new()),
            (Some(_), None) => return Err(CompileError::MissingReturnValue(plan.name.clone())),
            (
                Some(PositionPlan {
                    aggregate: Some(aggregate),
                    null_free,
                    ..
                }),
                Some(value),
            ) if plan.return_scalarized_in(entry) => {
                let scalarized = self.scalarize(value, aggregate, *null_free);
                let tagged =
                    self.instr()
                        .tag_return(aggregate.ty, scalarized.oop, scalarized.is_not_null);
                let mut slots = Vec::with_capacity(aggregate.leaf_count() + 2);
                slots.push(tagged);
                slots.extend(scalarized.leaves);
                if !null_free {
                    slots.push(scalarized.is_not_null);
                }
                self.ret(slots);
            }
            (Some(_), Some(value)) => self.ret(vec![value]),
        }
        Ok(())
    }

    /// Splits `value` into its leaves for passing across a call boundary
    fn scalarize(&mut self, value: Value, aggregate: &AggregateType, null_free: bool) -> Scalarized {
        if let Some(InstructionKind::InlineValue {
            ty,
            fields,
            null_state,
            ..
        }) = value
            .as_operand()
            .and_then(|id| self.function().definition(id))
            .map(|instruction| &instruction.kind)
        {
            if *ty == aggregate.ty {
                let (is_not_null, oop) = null_state
                    .map_or((Value::boolean(true), Value::null()), |state| {
                        (state.is_not_null, state.oop)
                    });
                return Scalarized {
                    leaves: fields.clone(),
                    is_not_null,
                    oop,
                };
            }
        }

        let stamp = self.stamp(value);
        if stamp.always_null {
            if null_free {
                log::debug!("{}: null passed as a null-free value", self.function().name);
                self.guard(
                    Value::boolean(false),
                    DeoptReason::NullFreeViolation,
                    DeoptAction::None,
                );
            }
            return Scalarized {
                leaves: aggregate.fields.iter().map(|leaf| zero_of(leaf.kind)).collect(),
                is_not_null: Value::boolean(false),
                oop: Value::null(),
            };
        }

        if stamp.non_null || null_free {
            if !stamp.non_null {
                let is_null = self.instr().is_null(value);
                let non_null = self.instr().not(is_null);
                self.guard(non_null, DeoptReason::NullFreeViolation, DeoptAction::None);
            }
            return Scalarized {
                leaves: self.load_leaves(value, aggregate),
                is_not_null: Value::boolean(true),
                oop: value,
            };
        }

        let is_null = self.instr().is_null(value);
        let null_block = self.new_block("scalarize.null");
        let load_block = self.new_block("scalarize.load");
        let merge = self.new_block("scalarize.merge");
        self.branch(is_null, null_block, load_block);

        self.switch_to(load_block);
        let loaded = self.load_leaves(value, aggregate);
        self.jump(merge);

        self.switch_to(null_block);
        self.jump(merge);

        self.switch_to(merge);
        let leaves = aggregate
            .fields
            .iter()
            .zip(loaded)
            .map(|(leaf, loaded)| {
                self.phi(
                    leaf_type(leaf),
                    vec![(load_block, loaded), (null_block, zero_of(leaf.kind))],
                )
            })
            .collect();
        let is_not_null = self.phi(
            MirType::bool(),
            vec![
                (load_block, Value::boolean(true)),
                (null_block, Value::boolean(false)),
            ],
        );
        Scalarized {
            leaves,
            is_not_null,
            oop: value,
        }
    }

    fn load_leaves(&mut self, object: Value, aggregate: &AggregateType) -> Vec<Value> {
        aggregate
            .fields
            .iter()
            .map(|leaf| {
                self.instr()
                    .load(object, leaf.offset, leaf.kind, leaf.location, leaf_type(leaf))
            })
            .collect()
    }
}

/// Types of the values a call to `entry` produces
fn return_types(plan: &ScalarizedSignature, entry: EntryKind) -> Vec<MirType> {
    match &plan.ret {
        None => Vec::new(),
        Some(PositionPlan {
            aggregate: Some(aggregate),
            null_free,
            ..
        }) if plan.return_scalarized_in(entry) => {
            let mut types = Vec::with_capacity(aggregate.leaf_count() + 2);
            types.push(MirType::object());
            types.extend(aggregate.fields.iter().map(leaf_type));
            if !null_free {
                types.push(MirType::bool());
            }
            types
        }
        Some(ret) => vec![ret.mir_type()],
    }
}
