use flatjit_common::TypeId;

use super::MirPass;
use crate::{
    AggregateType, BasicBlockId, CompilationContext, CompileError, InlineNullState, Instruction,
    InstructionKind, MirFunction, MirType, RefStamp, Terminator, Value, ValueId,
};

/// Allocates every `InlineValue` that is still read once optimization is done.
///
/// The heap instance is created where the inline value is defined. A value
/// with a null state becomes a phi of three paths:
///
/// ```text
/// head:     if is_not_null then check else tail       (null)
/// check:    if is_null(oop) then alloc else tail     (oop)
/// alloc:    new + leaf stores; jump tail             (fresh instance)
/// tail:     dest = phi [...]
/// ```
///
/// `check` is omitted when the buffered oop is the null literal. Unread
/// inline values are removed. Errors are recorded and end the pass.
#[derive(Debug)]
pub struct MaterializeInlineValues<'a> {
    ctx: CompilationContext<'a>,
    errors: Vec<CompileError>,
}

struct Site {
    block: BasicBlockId,
    index: usize,
    dest: ValueId,
    ty: TypeId,
    fields: Vec<Value>,
    null_state: Option<InlineNullState>,
}

impl<'a> MaterializeInlineValues<'a> {
    pub const fn new(ctx: CompilationContext<'a>) -> Self {
        Self {
            ctx,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// The first recorded error, if any
    pub fn take_error(&mut self) -> Option<CompileError> {
        (!self.errors.is_empty()).then(|| self.errors.remove(0))
    }

    fn next_site(function: &MirFunction) -> Option<Site> {
        function
            .instructions()
            .find_map(|(block, index, instr)| match &instr.kind {
                InstructionKind::InlineValue {
                    dest,
                    ty,
                    fields,
                    null_state,
                } => Some(Site {
                    block,
                    index,
                    dest: *dest,
                    ty: *ty,
                    fields: fields.clone(),
                    null_state: *null_state,
                }),
                _ => None,
            })
    }

    fn leaf_stores(aggregate: &AggregateType, object: Value, fields: &[Value]) -> Vec<Instruction> {
        aggregate
            .fields
            .iter()
            .zip(fields)
            .map(|(leaf, value)| {
                Instruction::store(object, leaf.offset, leaf.kind, *value, leaf.location)
            })
            .collect()
    }

    /// Allocation in place of a value known to be non-null
    fn allocate_in_place(function: &mut MirFunction, site: &Site, aggregate: &AggregateType) {
        let object = Value::operand(site.dest);
        let stores = Self::leaf_stores(aggregate, object, &site.fields);
        let block = &mut function.basic_blocks[site.block];
        block.instructions[site.index] = Instruction::new(InstructionKind::NewInstance {
            dest: site.dest,
            ty: site.ty,
        })
        .with_comment(format!("materialize {}", aggregate.name));
        let at = site.index + 1;
        block.instructions.splice(at..at, stores);
    }

    fn allocate_nullable(
        function: &mut MirFunction,
        site: &Site,
        state: InlineNullState,
        aggregate: &AggregateType,
    ) {
        let head = site.block;
        let tail = function.split_block(head, site.index + 1);
        function.basic_blocks[head].instructions.pop();

        let alloc = function.add_basic_block_with_name("materialize.alloc");
        let fresh = function.new_typed_value_id(MirType::Reference(
            RefStamp::exact(site.ty).with_non_null(true),
        ));
        let alloc_block = &mut function.basic_blocks[alloc];
        alloc_block.push_instruction(Instruction::new(InstructionKind::NewInstance {
            dest: fresh,
            ty: site.ty,
        }));
        for store in Self::leaf_stores(aggregate, Value::operand(fresh), &site.fields) {
            alloc_block.push_instruction(store);
        }
        alloc_block.set_terminator(Terminator::jump(tail));

        let mut sources = vec![(head, Value::null())];
        let non_null_target = if state.oop.is_null() {
            alloc
        } else {
            let check = function.add_basic_block_with_name("materialize.buffered");
            let oop_is_null = function.new_typed_value_id(MirType::bool());
            let check_block = &mut function.basic_blocks[check];
            check_block.push_instruction(Instruction::new(InstructionKind::IsNull {
                dest: oop_is_null,
                value: state.oop,
            }));
            check_block.set_terminator(Terminator::branch(
                Value::operand(oop_is_null),
                alloc,
                tail,
            ));
            sources.push((check, state.oop));
            check
        };
        sources.push((alloc, Value::operand(fresh)));

        function.basic_blocks[head].set_terminator(Terminator::branch(
            state.is_not_null,
            non_null_target,
            tail,
        ));
        let ty = function.value_type(Value::operand(site.dest));
        function.basic_blocks[tail]
            .instructions
            .insert(0, Instruction::phi(site.dest, ty, sources));
    }

    fn materialize(&mut self, function: &mut MirFunction, site: &Site) -> Result<(), CompileError> {
        let uses = function.get_value_use_counts();
        if uses.get(&site.dest).copied().unwrap_or(0) == 0 {
            function.basic_blocks[site.block].instructions.remove(site.index);
            return Ok(());
        }

        let aggregate = self.ctx.describe(site.ty)?;
        match site.null_state {
            None => Self::allocate_in_place(function, site, &aggregate),
            Some(state) if state.is_not_null.as_const_bool() == Some(false) => {
                function.replace_all_uses(site.dest, Value::null());
                function.basic_blocks[site.block].instructions.remove(site.index);
            }
            Some(state) => Self::allocate_nullable(function, site, state, &aggregate),
        }
        log::trace!(
            "'{}': materialized {} as {:?}",
            function.name,
            aggregate.name,
            site.dest
        );
        Ok(())
    }
}

impl MirPass for MaterializeInlineValues<'_> {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;
        while let Some(site) = Self::next_site(function) {
            if let Err(error) = self.materialize(function, &site) {
                log::error!("'{}': {error}", function.name);
                self.errors.push(error);
                break;
            }
            modified = true;
        }
        modified
    }

    fn name(&self) -> &'static str {
        "MaterializeInlineValues"
    }
}
