use rustc_hash::{FxHashMap, FxHashSet};

use super::MirPass;
use crate::{InstructionKind, MirFunction, Value, ValueId};

/// Copy Propagation Pass
///
/// This pass removes redundant assignments in SSA form by replacing uses of
/// copied values with their original sources. It eliminates instructions of the form:
/// `%dest = %source` by replacing all uses of `%dest` with `%source`.
///
/// ### Examples:
/// - `%2 = %1; %3 = %2 + 1` → `%3 = %1 + 1`
/// - Multiple copies: `%2 = %1; %3 = %2` → all uses of `%3` become uses of `%1`
/// - Literals: `%2 = 7; return %2` → `return 7`
///
/// Assignments that only sharpen the type of a value are propagated too; the
/// sharper type matters while building, not afterwards.
#[derive(Debug, Default)]
pub struct CopyPropagation;

impl CopyPropagation {
    /// Create a new copy propagation pass
    pub const fn new() -> Self {
        Self
    }

    /// Collect all copy instructions that can be eliminated
    /// Returns a map from destination value to ultimate source value (transitively resolved)
    fn collect_copies(&self, function: &MirFunction) -> FxHashMap<ValueId, Value> {
        let mut direct_copies = FxHashMap::default();
        for (_, _, instr) in function.instructions() {
            if let InstructionKind::Assign { dest, source } = &instr.kind {
                if *source != Value::operand(*dest) {
                    direct_copies.insert(*dest, *source);
                }
            }
        }

        direct_copies
            .keys()
            .map(|&dest| (dest, self.resolve_copy_chain(&direct_copies, dest)))
            .collect()
    }

    /// Resolve a copy chain to find the ultimate source value
    /// Handles chains like %2 -> %1 -> %0 to return %0 for %2
    fn resolve_copy_chain(&self, copies: &FxHashMap<ValueId, Value>, start: ValueId) -> Value {
        let mut visited = FxHashSet::default();
        let mut current = Value::operand(start);

        while let Some(next) = current.as_operand().and_then(|id| copies.get(&id)) {
            // Cycles only appear in unreachable code; stop at the repeat
            if !visited.insert(current) {
                break;
            }
            current = *next;
        }

        current
    }
}

impl MirPass for CopyPropagation {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let copies = self.collect_copies(function);
        if copies.is_empty() {
            return false;
        }

        for (&dest, &source) in &copies {
            function.replace_all_uses(dest, source);
        }

        for block in function.basic_blocks.iter_mut() {
            block.instructions.retain(|instr| {
                !matches!(&instr.kind, InstructionKind::Assign { dest, .. } if copies.contains_key(dest))
            });
        }

        true
    }

    fn name(&self) -> &'static str {
        "CopyPropagation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryOp, Instruction, MirType, Terminator};

    #[test]
    fn test_chain_resolves_to_original_source() {
        let mut f = MirFunction::new("chain");
        let param = f.add_parameter(MirType::long());
        let a = f.new_typed_value_id(MirType::long());
        let b = f.new_typed_value_id(MirType::long());
        let sum = f.new_typed_value_id(MirType::long());

        let block = &mut f.basic_blocks[f.entry_block];
        block.push_instruction(Instruction::assign(a, Value::operand(param)));
        block.push_instruction(Instruction::assign(b, Value::operand(a)));
        block.push_instruction(Instruction::binary_op(
            BinaryOp::Add,
            sum,
            Value::operand(b),
            Value::integer(1),
        ));
        block.set_terminator(Terminator::return_values(vec![Value::operand(sum)]));

        assert!(CopyPropagation::new().run(&mut f));
        let block = &f.basic_blocks[f.entry_block];
        assert_eq!(block.instructions.len(), 1);
        assert_eq!(
            block.instructions[0].kind,
            InstructionKind::BinaryOp {
                op: BinaryOp::Add,
                dest: sum,
                left: Value::operand(param),
                right: Value::integer(1),
            }
        );
    }

    #[test]
    fn test_literal_copy_reaches_terminator() {
        let mut f = MirFunction::new("literal");
        let a = f.new_typed_value_id(MirType::bool());
        let block = &mut f.basic_blocks[f.entry_block];
        block.push_instruction(Instruction::assign(a, Value::boolean(true)));
        block.set_terminator(Terminator::return_values(vec![Value::operand(a)]));

        assert!(CopyPropagation::new().run(&mut f));
        let block = &f.basic_blocks[f.entry_block];
        assert!(block.instructions.is_empty());
        assert_eq!(
            block.terminator,
            Terminator::return_values(vec![Value::boolean(true)])
        );
    }
}
