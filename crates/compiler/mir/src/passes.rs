//! # MIR Optimization Passes
//!
//! This module implements the passes run over a function after it has been
//! built: forwarding through virtual objects, the usual scalar cleanups,
//! materialization of the value objects that still escape and the lowering of
//! reference comparisons.
//!
//! The value-object pipeline runs in three phases:
//!
//! 1. optimize to a fixed point while value objects are still virtual
//! 2. materialize every `InlineValue` that is still used, then lower every
//!    `Compare`
//! 3. clean up and validate that nothing virtual is left

pub mod constant_folding;
pub mod copy_propagation;
pub mod dead_code_elimination;
pub mod forward_stores;
pub mod lower_comparisons;
pub mod materialize;
pub mod merge_blocks;
pub mod simplify_branches;
pub mod virtualize;

pub use constant_folding::ConstantFolding;
pub use copy_propagation::CopyPropagation;
pub use dead_code_elimination::DeadCodeElimination;
pub use forward_stores::ForwardStores;
pub use lower_comparisons::LowerComparisons;
pub use materialize::MaterializeInlineValues;
pub use merge_blocks::MergeBlocks;
pub use simplify_branches::SimplifyBranches;
pub use virtualize::VirtualizeInlineValues;

use crate::{CompilationContext, InstructionKind, MirFunction, PrettyPrint};

/// A trait for MIR optimization passes
pub trait MirPass {
    /// Apply this pass to a MIR function
    /// Returns true if the function was modified
    fn run(&mut self, function: &mut MirFunction) -> bool;

    /// Get the name of this pass for debugging
    fn name(&self) -> &'static str;
}

impl<P: MirPass + ?Sized> MirPass for &mut P {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        (**self).run(function)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Runs a group of passes until none of them changes the function
pub struct FixedPoint<'a> {
    passes: PassManager<'a>,
    max_iterations: usize,
}

impl<'a> FixedPoint<'a> {
    pub const fn new(passes: PassManager<'a>, max_iterations: usize) -> Self {
        Self {
            passes,
            max_iterations,
        }
    }
}

impl MirPass for FixedPoint<'_> {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;
        for iteration in 0..self.max_iterations {
            if !self.passes.run(function) {
                log::trace!("'{}' stable after {iteration} iterations", function.name);
                return modified;
            }
            modified = true;
        }
        log::debug!(
            "'{}' still changing after {} iterations",
            function.name,
            self.max_iterations
        );
        modified
    }

    fn name(&self) -> &'static str {
        "FixedPoint"
    }
}

/// Validation Pass
///
/// Checks the structural invariants of a function. After lowering it also
/// rejects the nodes that only exist before lowering: `InlineValue` and
/// `Compare`. Failures are logged and kept for the caller to inspect.
#[derive(Debug, Default)]
pub struct Validation {
    require_lowered: bool,
    failures: Vec<String>,
}

impl Validation {
    /// Create a new validation pass
    pub const fn new() -> Self {
        Self {
            require_lowered: false,
            failures: Vec::new(),
        }
    }

    /// Validation for fully lowered functions
    pub const fn lowered() -> Self {
        Self {
            require_lowered: true,
            failures: Vec::new(),
        }
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Checks `function` without recording anything
    pub fn check(&self, function: &MirFunction) -> Result<(), String> {
        function.validate()?;
        if !self.require_lowered {
            return Ok(());
        }
        for (block, _, instruction) in function.instructions() {
            if matches!(
                instruction.kind,
                InstructionKind::InlineValue { .. } | InstructionKind::Compare { .. }
            ) {
                return Err(format!(
                    "{block:?} still contains '{}'",
                    instruction.pretty_print(0)
                ));
            }
        }
        Ok(())
    }
}

impl MirPass for Validation {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        if let Err(message) = self.check(function) {
            log::error!("MIR validation failed for '{}': {message}", function.name);
            self.failures.push(message);
        }
        false
    }

    fn name(&self) -> &'static str {
        "Validation"
    }
}

/// A pass manager that can run multiple passes in sequence
#[derive(Default)]
pub struct PassManager<'a> {
    passes: Vec<Box<dyn MirPass + 'a>>,
}

impl<'a> PassManager<'a> {
    /// Create a new pass manager
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add a pass to the manager
    pub fn add_pass<P: MirPass + 'a>(mut self, pass: P) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Run all passes on the function
    /// Returns true if any pass modified the function
    pub fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;

        for pass in &mut self.passes {
            if pass.run(function) {
                modified = true;
                log::debug!(
                    "Pass '{}' modified function '{}'",
                    pass.name(),
                    function.name
                );
            }
        }

        modified
    }

    /// Scalar cleanups that keep value objects virtual
    pub fn cleanup_pipeline() -> Self {
        Self::new()
            .add_pass(CopyPropagation::new())
            .add_pass(ConstantFolding::new())
            .add_pass(SimplifyBranches::new())
            .add_pass(DeadCodeElimination::new())
            .add_pass(MergeBlocks::new())
    }

    /// Optimizations run while value objects are still virtual
    pub fn virtual_pipeline(ctx: CompilationContext<'a>) -> Self {
        Self::new()
            .add_pass(VirtualizeInlineValues::new(ctx))
            .add_pass(ForwardStores::new())
            .add_pass(CopyPropagation::new())
            .add_pass(ConstantFolding::new())
            .add_pass(SimplifyBranches::new())
            .add_pass(DeadCodeElimination::new())
            .add_pass(MergeBlocks::new())
    }

    /// The full pipeline from freshly built to lowered MIR. Errors of the
    /// lowering passes are only logged; see [`crate::optimize_function`] for
    /// the checked variant.
    pub fn value_object_pipeline(ctx: CompilationContext<'a>) -> Self {
        Self::new()
            .add_pass(Validation::new())
            .add_pass(FixedPoint::new(Self::virtual_pipeline(ctx), MAX_ITERATIONS))
            .add_pass(MaterializeInlineValues::new(ctx))
            .add_pass(LowerComparisons::new())
            .add_pass(FixedPoint::new(Self::cleanup_pipeline(), MAX_ITERATIONS))
            .add_pass(Validation::lowered())
    }
}

/// Bound on the rounds of a fixed-point group
pub const MAX_ITERATIONS: usize = 16;

#[cfg(test)]
#[path = "passes_tests.rs"]
mod tests;
