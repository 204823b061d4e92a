//! # Comparison snippets
//!
//! Reference comparisons stay abstract (`Compare`) while the function is
//! optimized and are expanded into control flow by [`LowerComparisons`]. Each
//! [`CompareOp`] knows its own expansion through [`LowerToSnippet`].
//!
//! The runtime side of `ObjectEquals` is the `is_substitutable` routine: for
//! each value class it compares the leaves of two instances of that class. It
//! is built once per list of leaf kinds as a template whose offsets are left
//! open, and bound once per class by filling the offsets in. Both steps are
//! cached in a [`SnippetCache`].

use std::sync::Arc;

use flatjit_common::{Kind, TypeId, IDENTITY_MASK};

use crate::passes::{LowerComparisons, MirPass, PassManager};
use crate::{
    BasicBlockId, BinaryOp, CompareOp, CompilationContext, CompileError, CompileResult,
    InstrBuilder, InstructionKind, LocationIdentity, MirFunction, MirType, OnceCache,
    RuntimeFunction, Terminator, Value,
};

/// Where a comparison is being expanded.
///
/// `block` held the comparison and has no terminator yet; `merge` is the block
/// receiving the result phi.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnippetSite {
    pub block: BasicBlockId,
    pub merge: BasicBlockId,
    pub left: Value,
    pub right: Value,
}

/// Expansion of a comparison into explicit control flow
pub trait LowerToSnippet {
    /// Emits the comparison starting in `site.block` and ending in jumps to
    /// `site.merge`. Returns the incoming edges of the merge with the result
    /// each one carries.
    fn lower(
        &self,
        function: &mut MirFunction,
        site: &SnippetSite,
    ) -> CompileResult<Vec<(BasicBlockId, Value)>>;
}

impl LowerToSnippet for CompareOp {
    fn lower(
        &self,
        function: &mut MirFunction,
        site: &SnippetSite,
    ) -> CompileResult<Vec<(BasicBlockId, Value)>> {
        match *self {
            Self::PointerEquals => {
                let equal = InstrBuilder::new(function, site.block).binary(
                    BinaryOp::Eq,
                    site.left,
                    site.right,
                );
                function.basic_blocks[site.block].set_terminator(Terminator::jump(site.merge));
                Ok(vec![(site.block, equal)])
            }
            Self::ObjectEquals => Ok(lower_object_equals(function, site)),
            Self::DelayedRawCompare {
                offset: Some(offset),
                kind,
                ..
            } => {
                let mut instr = InstrBuilder::new(function, site.block);
                let ty = MirType::from_kind(kind);
                let left = instr.load(site.left, offset, kind, LocationIdentity::Any, ty);
                let right = instr.load(site.right, offset, kind, LocationIdentity::Any, ty);
                let equal = if kind == Kind::Object {
                    instr.compare(CompareOp::ObjectEquals, left, right)
                } else {
                    instr.binary(BinaryOp::BitsEq(kind), left, right)
                };
                function.basic_blocks[site.block].set_terminator(Terminator::jump(site.merge));
                Ok(vec![(site.block, equal)])
            }
            Self::DelayedRawCompare { slot, offset: None, .. } => Err(CompileError::InvalidIr {
                function: function.name.clone(),
                message: format!("leaf comparison {slot} has no bound offset"),
            }),
        }
    }
}

/// Pointer check, null check, type check, identity check, then the runtime
/// field-wise comparison.
fn lower_object_equals(
    function: &mut MirFunction,
    site: &SnippetSite,
) -> Vec<(BasicBlockId, Value)> {
    let (left, right, merge) = (site.left, site.right, site.merge);
    let null_check = function.add_basic_block_with_name("acmp.null_check");
    let hub_check = function.add_basic_block_with_name("acmp.hub_check");
    let identity_check = function.add_basic_block_with_name("acmp.identity_check");
    let runtime = function.add_basic_block_with_name("acmp.runtime");

    let same = InstrBuilder::new(function, site.block).binary(BinaryOp::Eq, left, right);
    function.basic_blocks[site.block].set_terminator(Terminator::branch(same, merge, null_check));

    let mut instr = InstrBuilder::new(function, null_check);
    let left_null = instr.is_null(left);
    let right_null = instr.is_null(right);
    let either_null = instr.binary(BinaryOp::Or, left_null, right_null);
    function.basic_blocks[null_check].set_terminator(Terminator::branch(
        either_null,
        merge,
        hub_check,
    ));

    let mut instr = InstrBuilder::new(function, hub_check);
    let left_hub = instr.load_hub(left);
    let right_hub = instr.load_hub(right);
    let same_hub = instr.binary(BinaryOp::Eq, left_hub, right_hub);
    function.basic_blocks[hub_check].set_terminator(Terminator::branch(
        same_hub,
        identity_check,
        merge,
    ));

    let mut instr = InstrBuilder::new(function, identity_check);
    let mark = instr.load_mark_word(left);
    let identity_bits = instr.binary(BinaryOp::And, mark, Value::integer(IDENTITY_MASK as i64));
    let has_identity = instr.binary(BinaryOp::Ne, identity_bits, Value::integer(0));
    function.basic_blocks[identity_check].set_terminator(Terminator::branch(
        has_identity,
        merge,
        runtime,
    ));

    let result = InstrBuilder::new(function, runtime).runtime_call(
        RuntimeFunction::IsSubstitutable,
        vec![left, right],
        &[MirType::bool()],
    );
    function.basic_blocks[runtime].set_terminator(Terminator::jump(merge));

    vec![
        (site.block, Value::boolean(true)),
        (null_check, Value::boolean(false)),
        (hub_check, Value::boolean(false)),
        (identity_check, Value::boolean(false)),
        (runtime, result[0]),
    ]
}

/// Substitutability routines, shared by all compilations of a session
#[derive(Debug, Default)]
pub struct SnippetCache {
    templates: OnceCache<Vec<Kind>, Arc<MirFunction>>,
    bound: OnceCache<TypeId, CompileResult<Arc<MirFunction>>>,
}

impl SnippetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unbound routine comparing two objects whose leaves have `kinds`
    pub fn template(&self, kinds: &[Kind]) -> Arc<MirFunction> {
        self.templates
            .get_or_init(kinds.to_vec(), || Arc::new(build_template(kinds)))
    }

    /// `is_substitutable` bound to value class `ty`: takes two non-null
    /// instances of `ty` with no identity and returns whether all leaves are
    /// substitutable
    pub fn substitutability_check(
        &self,
        ctx: &CompilationContext<'_>,
        ty: TypeId,
    ) -> CompileResult<Arc<MirFunction>> {
        self.bound
            .get_or_init(ty, || self.bind(ctx, ty).map(Arc::new))
    }

    /// Number of bound routines
    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    fn bind(&self, ctx: &CompilationContext<'_>, ty: TypeId) -> CompileResult<MirFunction> {
        let aggregate = ctx.describe(ty)?;
        let template = self.template(&aggregate.kinds());
        let mut function = MirFunction::clone(&template);
        function.name = format!("is_substitutable<{}>", aggregate.name);

        for block in function.basic_blocks.iter_mut() {
            for instr in &mut block.instructions {
                if let InstructionKind::Compare {
                    op: CompareOp::DelayedRawCompare { slot, offset, .. },
                    ..
                } = &mut instr.kind
                {
                    *offset = aggregate.fields.get(*slot).map(|leaf| leaf.offset);
                }
            }
        }

        let mut lower = LowerComparisons::new();
        lower.run(&mut function);
        if let Some(error) = lower.take_error() {
            return Err(error);
        }
        PassManager::cleanup_pipeline().run(&mut function);
        function
            .validate()
            .map_err(|message| CompileError::InvalidIr {
                function: function.name.clone(),
                message,
            })?;
        log::debug!("bound {} ({} leaves)", function.name, aggregate.leaf_count());
        Ok(function)
    }
}

fn build_template(kinds: &[Kind]) -> MirFunction {
    let mut function = MirFunction::new("is_substitutable");
    let left = Value::operand(function.add_parameter(MirType::object()));
    let right = Value::operand(function.add_parameter(MirType::object()));
    let different = function.add_basic_block_with_name("different");
    function.basic_blocks[different]
        .set_terminator(Terminator::return_values(vec![Value::boolean(false)]));

    let mut current = function.entry_block;
    for (slot, &kind) in kinds.iter().enumerate() {
        let next = function.add_basic_block();
        let equal = InstrBuilder::new(&mut function, current).compare(
            CompareOp::DelayedRawCompare {
                slot,
                kind,
                offset: None,
            },
            left,
            right,
        );
        function.basic_blocks[current].set_terminator(Terminator::branch(equal, next, different));
        current = next;
    }
    function.basic_blocks[current]
        .set_terminator(Terminator::return_values(vec![Value::boolean(true)]));
    function
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Instruction;

    #[test]
    fn test_template_is_shared_by_kind_list() {
        let cache = SnippetCache::new();
        let first = cache.template(&[Kind::Int, Kind::Int]);
        let second = cache.template(&[Kind::Int, Kind::Int]);
        let other = cache.template(&[Kind::Int, Kind::Object]);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(first.validate().is_ok());
    }

    #[test]
    fn test_unbound_leaf_compare_is_rejected() {
        let mut function = MirFunction::new("unbound");
        let left = function.add_parameter(MirType::object());
        let right = function.add_parameter(MirType::object());
        let dest = function.new_typed_value_id(MirType::bool());
        let entry = function.entry_block;
        function.basic_blocks[entry].push_instruction(Instruction::compare(
            dest,
            CompareOp::DelayedRawCompare {
                slot: 0,
                kind: Kind::Int,
                offset: None,
            },
            Value::operand(left),
            Value::operand(right),
        ));
        function.basic_blocks[entry]
            .set_terminator(Terminator::return_values(vec![Value::operand(dest)]));

        let mut lower = LowerComparisons::new();
        lower.run(&mut function);
        assert!(matches!(
            lower.take_error(),
            Some(CompileError::InvalidIr { .. })
        ));
    }

    #[test]
    fn test_object_equals_lowers_to_five_merge_edges() {
        let mut function = MirFunction::new("acmp");
        let left = function.add_parameter(MirType::object());
        let right = function.add_parameter(MirType::object());
        let dest = function.new_typed_value_id(MirType::bool());
        let entry = function.entry_block;
        function.basic_blocks[entry].push_instruction(Instruction::compare(
            dest,
            CompareOp::ObjectEquals,
            Value::operand(left),
            Value::operand(right),
        ));
        function.basic_blocks[entry]
            .set_terminator(Terminator::return_values(vec![Value::operand(dest)]));

        assert!(LowerComparisons::new().run(&mut function));
        assert!(function.validate().is_ok());
        let phi = function
            .instructions()
            .find_map(|(_, _, instr)| match &instr.kind {
                InstructionKind::Phi { dest: d, sources, .. } if *d == dest => {
                    Some(sources.len())
                }
                _ => None,
            });
        assert_eq!(phi, Some(5));
    }
}
