//! # SimplifyBranches Pass
//!
//! This pass simplifies control flow by folding conditional branches with constant conditions
//! and reducing complex branch patterns exposed by earlier optimization passes.

use super::MirPass;
use crate::{BasicBlockId, InstructionKind, MirFunction, Terminator};

/// SimplifyBranches Pass
///
/// ### Examples:
/// - `if true then jump A else jump B` → `jump A`
/// - `if false then jump A else jump B` → `jump B`
/// - `if 0 then jump A else jump B` → `jump B` (0 is false)
/// - `if %c then jump A else jump A` → `jump A`
///
/// The phis of a target that loses the edge drop the corresponding operand.
#[derive(Debug, Default)]
pub struct SimplifyBranches;

impl SimplifyBranches {
    /// Create a new SimplifyBranches pass
    pub const fn new() -> Self {
        Self
    }

    /// Try to simplify a conditional branch; returns the kept and dropped targets
    fn simplify_if_terminator(
        terminator: &Terminator,
    ) -> Option<(BasicBlockId, Option<BasicBlockId>)> {
        let Terminator::If {
            condition,
            then_target,
            else_target,
        } = terminator
        else {
            return None;
        };
        if then_target == else_target {
            return Some((*then_target, None));
        }
        condition.as_const_bool().map(|taken| {
            if taken {
                (*then_target, Some(*else_target))
            } else {
                (*else_target, Some(*then_target))
            }
        })
    }

    fn remove_phi_operands(function: &mut MirFunction, block: BasicBlockId, from: BasicBlockId) {
        for instr in &mut function.basic_blocks[block].instructions {
            if let InstructionKind::Phi { sources, .. } = &mut instr.kind {
                sources.retain(|(pred, _)| *pred != from);
            }
        }
    }
}

impl MirPass for SimplifyBranches {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;

        // Collect block IDs to avoid borrowing issues
        let block_ids: Vec<BasicBlockId> = function.basic_blocks.indices().collect();

        for block_id in block_ids {
            let Some((kept, dropped)) =
                Self::simplify_if_terminator(&function.basic_blocks[block_id].terminator)
            else {
                continue;
            };

            function.basic_blocks[block_id].set_terminator(Terminator::jump(kept));
            if let Some(dropped) = dropped {
                Self::remove_phi_operands(function, dropped, block_id);
            }
            modified = true;
        }

        modified
    }

    fn name(&self) -> &'static str {
        "SimplifyBranches"
    }
}
