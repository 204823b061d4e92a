use super::MirPass;
use crate::{BasicBlockId, InstructionKind, MirFunction, Terminator};

/// Merge Blocks Pass
///
/// Folds a block into its predecessor when the predecessor ends in an
/// unconditional jump to it and is its only predecessor. Lowering leaves many
/// such chains behind once branches have been folded.
///
/// ### Before:
/// ```mir
/// bb0:
///   %1 = add %0, 1
///   jump bb1
/// bb1:
///   return %1
/// ```
///
/// ### After:
/// ```mir
/// bb0:
///   %1 = add %0, 1
///   return %1
/// ```
///
/// The emptied block is left unreachable for dead code elimination.
#[derive(Debug, Default)]
pub struct MergeBlocks;

impl MergeBlocks {
    pub const fn new() -> Self {
        Self
    }

    /// A `(predecessor, successor)` pair that can be merged
    fn find_candidate(function: &MirFunction) -> Option<(BasicBlockId, BasicBlockId)> {
        let preds = function.predecessors();
        let reachable = function.reachable_blocks();
        function.basic_blocks().find_map(|(block_id, block)| {
            let Terminator::Jump { target } = block.terminator else {
                return None;
            };
            let mergeable = target != block_id
                && target != function.entry_block
                && reachable.contains(&block_id)
                && preds.get(&target).is_some_and(|p| p.len() == 1);
            mergeable.then_some((block_id, target))
        })
    }

    fn merge(function: &mut MirFunction, pred: BasicBlockId, succ: BasicBlockId) {
        let mut moved = std::mem::take(&mut function.basic_blocks[succ].instructions);
        let terminator =
            std::mem::replace(&mut function.basic_blocks[succ].terminator, Terminator::Unreachable);

        // With a single predecessor every phi has a single operand
        for instr in &mut moved {
            if let InstructionKind::Phi { dest, sources, .. } = &instr.kind {
                let source = sources
                    .iter()
                    .find(|(block, _)| *block == pred)
                    .map(|(_, value)| *value);
                if let Some(source) = source {
                    instr.kind = InstructionKind::Assign {
                        dest: *dest,
                        source,
                    };
                }
            }
        }

        let successors = terminator.target_blocks();
        let block = &mut function.basic_blocks[pred];
        block.instructions.append(&mut moved);
        block.set_terminator(terminator);

        for successor in successors {
            for instr in &mut function.basic_blocks[successor].instructions {
                if let InstructionKind::Phi { sources, .. } = &mut instr.kind {
                    for (block, _) in sources.iter_mut() {
                        if *block == succ {
                            *block = pred;
                        }
                    }
                }
            }
        }
    }
}

impl MirPass for MergeBlocks {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;
        while let Some((pred, succ)) = Self::find_candidate(function) {
            Self::merge(function, pred, succ);
            modified = true;
        }
        modified
    }

    fn name(&self) -> &'static str {
        "MergeBlocks"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Instruction, MirType, Value};

    #[test]
    fn test_jump_chain_collapses_into_entry() {
        let mut f = MirFunction::new("chain");
        let middle = f.add_basic_block();
        let last = f.add_basic_block();
        let value = f.new_typed_value_id(MirType::long());

        f.basic_blocks[f.entry_block].set_terminator(Terminator::jump(middle));
        f.basic_blocks[middle].push_phi(Instruction::phi(
            value,
            MirType::long(),
            vec![(f.entry_block, Value::integer(3))],
        ));
        f.basic_blocks[middle].set_terminator(Terminator::jump(last));
        f.basic_blocks[last].set_terminator(Terminator::return_values(vec![Value::operand(value)]));

        assert!(MergeBlocks::new().run(&mut f));
        let entry = &f.basic_blocks[f.entry_block];
        assert_eq!(
            entry.terminator,
            Terminator::return_values(vec![Value::operand(value)])
        );
        assert_eq!(
            entry.instructions[0].kind,
            InstructionKind::Assign {
                dest: value,
                source: Value::integer(3)
            }
        );
        assert!(f.validate().is_ok());
    }

    #[test]
    fn test_block_with_two_predecessors_is_kept() {
        let mut f = MirFunction::new("diamond");
        let condition = f.add_parameter(MirType::bool());
        let a = f.add_basic_block();
        let b = f.add_basic_block();
        let join = f.add_basic_block();
        f.basic_blocks[f.entry_block].set_terminator(Terminator::branch(
            Value::operand(condition),
            a,
            b,
        ));
        f.basic_blocks[a].set_terminator(Terminator::jump(join));
        f.basic_blocks[b].set_terminator(Terminator::jump(join));
        f.basic_blocks[join].set_terminator(Terminator::return_values(vec![]));

        assert!(!MergeBlocks::new().run(&mut f));
    }
}
