use index_vec::IndexVec;
use rustc_hash::FxHashMap;

use super::MirPass;
use crate::{BasicBlockId, InstructionKind, MirFunction, Terminator};

/// Dead Code Elimination Pass
///
/// This pass:
/// - Removes unreachable basic blocks and compacts the CFG, dropping the phi
///   operands that came from them
/// - Removes dead, side-effect-free instructions whose results are no longer
///   used, iterating to a fixed point. An allocation nobody reads is dead too.
#[derive(Debug, Default)]
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    /// Create a new dead code elimination pass
    pub const fn new() -> Self {
        Self
    }

    /// Remap all basic-block targets inside a terminator according to `map`.
    /// Every target of a reachable block is reachable, so the map covers them.
    fn remap_terminator(terminator: &mut Terminator, map: &FxHashMap<BasicBlockId, BasicBlockId>) {
        match terminator {
            Terminator::Jump { target } => *target = map[&*target],
            Terminator::If {
                then_target,
                else_target,
                ..
            } => {
                *then_target = map[&*then_target];
                *else_target = map[&*else_target];
            }
            Terminator::Return { .. } | Terminator::Deoptimize(_) | Terminator::Unreachable => {}
        }
    }

    /// Remove blocks not reachable from the entry and renumber the rest.
    /// Returns true if any block was removed.
    fn remove_unreachable_blocks(&self, function: &mut MirFunction) -> bool {
        let reachable = function.reachable_blocks();
        if reachable.len() == function.basic_blocks.len() {
            return false;
        }

        let removed = function.basic_blocks.len() - reachable.len();
        let old_blocks = std::mem::take(&mut function.basic_blocks);
        let mut new_blocks: IndexVec<BasicBlockId, _> = IndexVec::new();
        let mut old_to_new: FxHashMap<BasicBlockId, BasicBlockId> = FxHashMap::default();

        for (old_id, block) in old_blocks.into_iter_enumerated() {
            if reachable.contains(&old_id) {
                old_to_new.insert(old_id, new_blocks.push(block));
            }
        }

        for block in new_blocks.iter_mut() {
            Self::remap_terminator(&mut block.terminator, &old_to_new);
            for instr in &mut block.instructions {
                if let InstructionKind::Phi { sources, .. } = &mut instr.kind {
                    sources.retain(|(pred, _)| old_to_new.contains_key(pred));
                    for (pred, _) in sources.iter_mut() {
                        *pred = old_to_new[&*pred];
                    }
                }
            }
        }

        log::trace!("'{}': removed {removed} unreachable blocks", function.name);
        function.entry_block = old_to_new[&function.entry_block];
        function.basic_blocks = new_blocks;
        true
    }

    /// Remove dead instructions (no uses, no side effects) to a fixed point.
    /// Returns true if any instructions were removed.
    fn remove_dead_instructions(&self, function: &mut MirFunction) -> bool {
        let mut changed = false;

        loop {
            let use_counts = function.get_value_use_counts();
            let mut removed_any = false;

            for block in function.basic_blocks.iter_mut() {
                let before = block.instructions.len();

                block.instructions.retain(|instr| {
                    // Preserve side-effecting operations unconditionally
                    if instr.has_side_effects() {
                        return true;
                    }
                    instr
                        .destinations()
                        .iter()
                        .any(|dest| use_counts.get(dest).copied().unwrap_or(0) > 0)
                });

                if block.instructions.len() != before {
                    removed_any = true;
                }
            }

            if !removed_any {
                break;
            }
            changed = true;
        }

        changed
    }
}

impl MirPass for DeadCodeElimination {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let removed_blocks = self.remove_unreachable_blocks(function);
        let removed_instructions = self.remove_dead_instructions(function);
        removed_blocks || removed_instructions
    }

    fn name(&self) -> &'static str {
        "DeadCodeElimination"
    }
}
