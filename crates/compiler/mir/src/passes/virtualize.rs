use flatjit_common::UNLOCKED_MARK;
use rustc_hash::FxHashSet;

use super::MirPass;
use crate::{
    BasicBlockId, CompilationContext, InstructionKind, MirFunction, UnaryOp, Value, ValueId,
    VirtualObjectTable,
};

/// Folds operations on scalarized value objects into their leaf values.
///
/// Reading a field, the hub or the mark word of an `InlineValue` never needs
/// the heap: the leaves are at hand, the hub is that of the value class and a
/// value object has no identity bits in its mark. Null checks read the
/// not-null flag. Inline values whose flag is a literal are simplified: a
/// `false` flag is the null reference, a `true` flag with no buffered oop
/// drops the null state altogether.
///
/// Every folded instruction is removed here so the surrounding fixed point
/// observes progress only while something changes.
#[derive(Debug)]
pub struct VirtualizeInlineValues<'a> {
    ctx: CompilationContext<'a>,
}

enum Rewrite {
    /// Uses of the destination become the value; the instruction goes away
    Forward(ValueId, Value),
    /// The instruction is replaced by another
    Replace(BasicBlockId, usize, InstructionKind),
    /// Drop the null state of the inline value at this position
    StripNullState(BasicBlockId, usize),
}

impl<'a> VirtualizeInlineValues<'a> {
    pub const fn new(ctx: CompilationContext<'a>) -> Self {
        Self { ctx }
    }

    fn collect(&self, function: &MirFunction) -> Vec<Rewrite> {
        let table = VirtualObjectTable::collect(function);
        if table.is_empty() {
            return Vec::new();
        }

        let mut rewrites = Vec::new();
        for (block, index, instr) in function.instructions() {
            match &instr.kind {
                InstructionKind::Load {
                    dest,
                    base,
                    offset,
                    kind,
                    ..
                } => {
                    let Some(object) = table.get(*base) else {
                        continue;
                    };
                    let Ok(aggregate) = self.ctx.describe(object.ty) else {
                        continue;
                    };
                    if let Some(leaf) = aggregate.leaf_at(*offset, *kind) {
                        rewrites.push(Rewrite::Forward(*dest, object.fields[leaf]));
                    }
                }
                InstructionKind::IsNull { dest, value } => {
                    let Some(object) = table.get(*value) else {
                        continue;
                    };
                    if object.is_known_non_null() {
                        rewrites.push(Rewrite::Forward(*dest, Value::boolean(false)));
                    } else if object.is_known_null() {
                        rewrites.push(Rewrite::Forward(*dest, Value::boolean(true)));
                    } else {
                        rewrites.push(Rewrite::Replace(
                            block,
                            index,
                            InstructionKind::UnaryOp {
                                op: UnaryOp::Not,
                                dest: *dest,
                                source: object.is_not_null(),
                            },
                        ));
                    }
                }
                InstructionKind::LoadHub { dest, object } => {
                    if let Some(object) = table.get(*object) {
                        rewrites.push(Rewrite::Forward(*dest, Value::hub(object.ty)));
                    }
                }
                InstructionKind::LoadMarkWord { dest, object } => {
                    if table.is_virtual(*object) {
                        rewrites.push(Rewrite::Forward(
                            *dest,
                            Value::integer(UNLOCKED_MARK as i64),
                        ));
                    }
                }
                InstructionKind::InlineValue {
                    dest,
                    null_state: Some(state),
                    ..
                } => match state.is_not_null.as_const_bool() {
                    Some(false) => rewrites.push(Rewrite::Forward(*dest, Value::null())),
                    Some(true) if state.oop.is_null() => {
                        rewrites.push(Rewrite::StripNullState(block, index));
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        rewrites
    }
}

impl MirPass for VirtualizeInlineValues<'_> {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let rewrites = self.collect(function);
        if rewrites.is_empty() {
            return false;
        }

        let mut removed: FxHashSet<ValueId> = FxHashSet::default();
        for rewrite in rewrites {
            match rewrite {
                Rewrite::Forward(dest, value) => {
                    function.replace_all_uses(dest, value);
                    removed.insert(dest);
                }
                Rewrite::Replace(block, index, kind) => {
                    function.basic_blocks[block].instructions[index].kind = kind;
                }
                Rewrite::StripNullState(block, index) => {
                    if let InstructionKind::InlineValue { null_state, .. } =
                        &mut function.basic_blocks[block].instructions[index].kind
                    {
                        *null_state = None;
                    }
                }
            }
        }

        if !removed.is_empty() {
            log::trace!(
                "'{}': folded {} reads of inline values",
                function.name,
                removed.len()
            );
            for block in function.basic_blocks.iter_mut() {
                block.instructions.retain(|instr| {
                    instr
                        .destination()
                        .map_or(true, |dest| !removed.contains(&dest))
                });
            }
        }
        true
    }

    fn name(&self) -> &'static str {
        "VirtualizeInlineValues"
    }
}
