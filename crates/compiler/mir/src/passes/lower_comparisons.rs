use super::MirPass;
use crate::snippets::{LowerToSnippet, SnippetSite};
use crate::{CompileError, Instruction, InstructionKind, MirFunction, MirType};

/// Lowers every `Compare` into explicit control flow.
///
/// The block holding the comparison is split right after it. The comparison
/// expands into blocks between the head and the tail (see
/// [`LowerToSnippet`]), and its destination becomes a boolean phi at the start
/// of the tail over the edges the expansion reports.
///
/// A lowering may itself emit a `Compare` (a reference leaf of a value
/// object); the pass keeps going until none is left.
#[derive(Debug, Default)]
pub struct LowerComparisons {
    errors: Vec<CompileError>,
}

impl LowerComparisons {
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// The first recorded error, if any
    pub fn take_error(&mut self) -> Option<CompileError> {
        (!self.errors.is_empty()).then(|| self.errors.remove(0))
    }
}

impl MirPass for LowerComparisons {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;

        loop {
            let next = function
                .instructions()
                .find_map(|(block, index, instr)| match instr.kind {
                    InstructionKind::Compare {
                        dest,
                        op,
                        left,
                        right,
                    } => Some((block, index, dest, op, left, right)),
                    _ => None,
                });
            let Some((block, index, dest, op, left, right)) = next else {
                break;
            };

            let merge = function.split_block(block, index + 1);
            function.basic_blocks[block].instructions.pop();
            let site = SnippetSite {
                block,
                merge,
                left,
                right,
            };

            match op.lower(function, &site) {
                Ok(edges) => {
                    function.basic_blocks[merge]
                        .instructions
                        .insert(0, Instruction::phi(dest, MirType::bool(), edges));
                    modified = true;
                }
                Err(error) => {
                    log::error!("'{}': {error}", function.name);
                    self.errors.push(error);
                    break;
                }
            }
        }

        modified
    }

    fn name(&self) -> &'static str {
        "LowerComparisons"
    }
}
