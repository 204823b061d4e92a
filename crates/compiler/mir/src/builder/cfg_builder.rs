//! # Control Flow Graph Builder
//!
//! Block creation and termination for [`MirFunction`]s under construction.
//! Guards, null diamonds and deoptimization exits are all built from these.

use crate::{BasicBlockId, Deoptimization, MirFunction, Terminator, Value};

/// Terminates blocks of one function, positioned at a current block
pub struct CfgBuilder<'f> {
    function: &'f mut MirFunction,
    current_block_id: BasicBlockId,
}

impl<'f> CfgBuilder<'f> {
    pub const fn new(function: &'f mut MirFunction, current_block_id: BasicBlockId) -> Self {
        Self {
            function,
            current_block_id,
        }
    }

    /// Creates a block named `name`, or `block_{n}` when unnamed
    pub fn new_block(&mut self, name: Option<String>) -> BasicBlockId {
        let block_name =
            name.unwrap_or_else(|| format!("block_{}", self.function.basic_blocks.len()));
        self.function.add_basic_block_with_name(block_name)
    }

    /// Ends the current block.
    ///
    /// A block is terminated exactly once; terminating it again is a builder bug.
    pub fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.function.basic_blocks[self.current_block_id];
        debug_assert!(
            !block.is_terminated(),
            "block {:?} is already terminated",
            block.name
        );
        block.set_terminator(terminator);
    }

    pub fn terminate_with_jump(&mut self, target: BasicBlockId) {
        self.terminate(Terminator::jump(target));
    }

    pub fn terminate_with_branch(
        &mut self,
        condition: Value,
        then_target: BasicBlockId,
        else_target: BasicBlockId,
    ) {
        self.terminate(Terminator::branch(condition, then_target, else_target));
    }

    pub fn terminate_with_return(&mut self, values: Vec<Value>) {
        self.terminate(Terminator::return_values(values));
    }

    /// Leaves compiled code, resuming in the interpreter at the deopt's frame state
    pub fn terminate_with_deopt(&mut self, deopt: Deoptimization) {
        self.terminate(Terminator::deoptimize(deopt));
    }
}
