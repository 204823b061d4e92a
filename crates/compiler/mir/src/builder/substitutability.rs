//! # Substitutability
//!
//! IR construction for `left == right` on references that may denote value
//! objects. Two value objects are equal iff they have the same runtime type
//! and all their leaves are equal; null equals only null; an identity object
//! equals only itself.
//!
//! The builder resolves as much as it can from stamps:
//!
//! 1. the same operand on both sides is `true`
//! 2. a null literal reduces to a null check of the other side
//! 3. an identity operand makes the comparison a pointer comparison, or a
//!    both-null check when the other side is a value class
//! 4. a known value class expands into a null diamond, hub checks and one
//!    comparison per leaf, recursing into reference leaves up to
//!    `max_substitutability_depth`
//!
//! Whatever is left becomes [`CompareOp::ObjectEquals`], lowered later into
//! the runtime check. Comparison profiles add guarded speculations on top.

use flatjit_common::{OperandObservation, SiteId, TypeId, IDENTITY_MASK};

use super::mir_builder::leaf_type;
use crate::{
    BasicBlockId, BinaryOp, CompareOp, CompileResult, DeoptAction, DeoptReason,
    FieldDescriptor, MirBuilder, MirType, RefStamp, Speculation, SpeculationKind, Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    const fn null_speculation(self) -> SpeculationKind {
        match self {
            Self::Left => SpeculationKind::LeftAlwaysNull,
            Self::Right => SpeculationKind::RightAlwaysNull,
        }
    }

    const fn inline_speculation(self) -> SpeculationKind {
        match self {
            Self::Left => SpeculationKind::LeftAlwaysInline,
            Self::Right => SpeculationKind::RightAlwaysInline,
        }
    }
}

impl MirBuilder<'_> {
    /// Emits the substitutability check `left == right` and returns its
    /// boolean result. `site` selects the comparison profile, if any.
    pub fn substitutable(
        &mut self,
        left: Value,
        right: Value,
        site: Option<SiteId>,
    ) -> CompileResult<Value> {
        if let Some(result) = self.fold_statically(left, right) {
            return Ok(result);
        }

        if let Some(site) = site {
            if self.speculate_identity(left, right, site) {
                return Ok(self.instr().compare(CompareOp::PointerEquals, left, right));
            }
            let left = self.speculate_operand(left, Side::Left, site);
            let right = self.speculate_operand(right, Side::Right, site);
            return self.compare_references(left, right, 0);
        }

        self.compare_references(left, right, 0)
    }

    fn compare_references(&mut self, left: Value, right: Value, depth: usize) -> CompileResult<Value> {
        if let Some(result) = self.fold_statically(left, right) {
            return Ok(result);
        }

        let metadata = self.ctx().metadata;
        let value_type = self
            .stamp(left)
            .exact_value_type(metadata)
            .or_else(|| self.stamp(right).exact_value_type(metadata));
        match value_type {
            Some(ty) => self.compare_values(left, right, ty, depth),
            None => Ok(self.instr().compare(CompareOp::ObjectEquals, left, right)),
        }
    }

    /// Resolves the comparison from the operand stamps alone
    fn fold_statically(&mut self, left: Value, right: Value) -> Option<Value> {
        if left == right {
            return Some(Value::boolean(true));
        }

        let metadata = self.ctx().metadata;
        let (ls, rs) = (self.stamp(left), self.stamp(right));
        match (ls.always_null, rs.always_null) {
            (true, true) => return Some(Value::boolean(true)),
            (true, false) => return Some(self.null_check(right)),
            (false, true) => return Some(self.null_check(left)),
            (false, false) => {}
        }

        let (left_identity, right_identity) = (ls.has_identity(metadata), rs.has_identity(metadata));
        if left_identity || right_identity {
            let other_value = if left_identity {
                rs.exact_value_type(metadata)
            } else {
                ls.exact_value_type(metadata)
            };
            if other_value.is_some() && !(left_identity && right_identity) {
                log::trace!("acmp: identity object against a value class, only null == null");
                return Some(self.both_null(left, right));
            }
            return Some(self.instr().compare(CompareOp::PointerEquals, left, right));
        }

        if let (Some(a), Some(b)) = (ls.exact_value_type(metadata), rs.exact_value_type(metadata)) {
            if a != b {
                log::trace!("acmp: distinct value classes, only null == null");
                return Some(self.both_null(left, right));
            }
        }
        None
    }

    fn both_null(&mut self, left: Value, right: Value) -> Value {
        let left_null = self.null_check(left);
        let right_null = self.null_check(right);
        self.and(left_null, right_null)
    }

    /// Field-wise comparison of two references, at least one of which is
    /// known to be of value class `ty` when non-null
    fn compare_values(
        &mut self,
        left: Value,
        right: Value,
        ty: TypeId,
        depth: usize,
    ) -> CompileResult<Value> {
        let ctx = self.ctx();
        let aggregate = ctx.describe(ty)?;
        let merge = self.new_block("acmp.merge");
        let mut sources: Vec<(BasicBlockId, Value)> = Vec::new();

        let left_null = self.null_check(left);
        let right_null = self.null_check(right);
        let any_null = self.or(left_null, right_null);
        if any_null.as_const_bool() != Some(false) {
            let null_block = self.new_block("acmp.null");
            let non_null = self.new_block("acmp.non_null");
            self.branch(any_null, null_block, non_null);

            self.switch_to(null_block);
            let both = self.and(left_null, right_null);
            sources.push((null_block, both));
            self.jump(merge);

            self.switch_to(non_null);
        }

        for side in [left, right] {
            if self.stamp(side).exact_value_type(ctx.metadata) != Some(ty) {
                let hub = self.instr().load_hub(side);
                let same = self.instr().binary(BinaryOp::Eq, hub, Value::hub(ty));
                self.continue_or_false(same, merge, &mut sources, "acmp.hub");
            }
        }

        let count = aggregate.leaf_count();
        if count == 0 {
            sources.push((self.current_block(), Value::boolean(true)));
            self.jump(merge);
        }
        for (index, leaf) in aggregate.fields.iter().enumerate() {
            let left_leaf =
                self.instr()
                    .load(left, leaf.offset, leaf.kind, leaf.location, leaf_type(leaf));
            let right_leaf =
                self.instr()
                    .load(right, leaf.offset, leaf.kind, leaf.location, leaf_type(leaf));
            let equal = if leaf.is_reference() {
                self.compare_leaf_references(left_leaf, right_leaf, leaf, ty, depth)?
            } else {
                self.instr()
                    .binary(BinaryOp::BitsEq(leaf.kind), left_leaf, right_leaf)
            };

            if index + 1 == count {
                sources.push((self.current_block(), equal));
                self.jump(merge);
            } else {
                self.continue_or_false(equal, merge, &mut sources, "acmp.leaf");
            }
        }

        self.switch_to(merge);
        Ok(self.phi(MirType::bool(), sources))
    }

    fn compare_leaf_references(
        &mut self,
        left: Value,
        right: Value,
        leaf: &FieldDescriptor,
        enclosing: TypeId,
        depth: usize,
    ) -> CompileResult<Value> {
        let max_depth = self.ctx().config.max_substitutability_depth;
        let self_referential = leaf.declared == Some(enclosing);
        if self_referential || leaf.declared.is_none() || depth + 1 > max_depth {
            if let Some(result) = self.fold_statically(left, right) {
                return Ok(result);
            }
            log::trace!(
                "acmp: leaf {} compared at runtime (depth {depth}, self-referential: {self_referential})",
                leaf.name
            );
            return Ok(self.instr().compare(CompareOp::ObjectEquals, left, right));
        }
        self.compare_references(left, right, depth + 1)
    }

    /// Continues in a new block when `condition` holds; otherwise the result
    /// is `false`
    fn continue_or_false(
        &mut self,
        condition: Value,
        merge: BasicBlockId,
        sources: &mut Vec<(BasicBlockId, Value)>,
        name: &str,
    ) {
        if condition.as_const_bool() == Some(true) {
            return;
        }
        let next = self.new_block(name);
        sources.push((self.current_block(), Value::boolean(false)));
        self.branch(condition, next, merge);
        self.switch_to(next);
    }

    /// Guards that one operand never is a value object, as profiled
    fn speculate_identity(&mut self, left: Value, right: Value, site: SiteId) -> bool {
        let ctx = self.ctx();
        let Some(profile) = ctx.profiles.acmp(site).filter(|_| ctx.config.use_acmp_profiles) else {
            return false;
        };
        let operand = match (profile.left, profile.right) {
            (OperandObservation::AlwaysIdentity, _) => left,
            (_, OperandObservation::AlwaysIdentity) => right,
            _ => return false,
        };
        if self.stamp(operand).exact_value_type(ctx.metadata).is_some() {
            return false;
        }
        let Some(speculation) = self.allowed_speculation(site, SpeculationKind::AlwaysIdentity) else {
            return false;
        };

        let is_null = self.null_check(operand);
        let check = self.new_block("acmp.identity");
        let done = self.new_block("acmp.identity.done");
        self.branch(is_null, done, check);

        self.switch_to(check);
        let mark = self.instr().load_mark_word(operand);
        let bit = self
            .instr()
            .binary(BinaryOp::And, mark, Value::integer(IDENTITY_MASK as i64));
        let has_identity = self.instr().binary(BinaryOp::Ne, bit, Value::integer(0));
        self.guard(
            has_identity,
            DeoptReason::Speculation(speculation),
            DeoptAction::InvalidateRecompile,
        );
        self.jump(done);

        self.switch_to(done);
        true
    }

    /// Guards a profiled "always null" or "always of value class T" operand
    /// and returns the operand with the sharper stamp
    fn speculate_operand(&mut self, value: Value, side: Side, site: SiteId) -> Value {
        let ctx = self.ctx();
        let Some(profile) = ctx.profiles.acmp(site).filter(|_| ctx.config.use_acmp_profiles) else {
            return value;
        };
        let observation = match side {
            Side::Left => profile.left,
            Side::Right => profile.right,
        };
        let stamp = self.stamp(value);

        match observation {
            OperandObservation::AlwaysNull if !stamp.always_null && !stamp.non_null => {
                let Some(speculation) = self.allowed_speculation(site, side.null_speculation())
                else {
                    return value;
                };
                let is_null = self.instr().is_null(value);
                self.guard(
                    is_null,
                    DeoptReason::Speculation(speculation),
                    DeoptAction::InvalidateRecompile,
                );
                Value::null()
            }
            OperandObservation::AlwaysInline(ty) => {
                let compatible = match stamp.exact_value_type(ctx.metadata) {
                    Some(known) => known == ty && !stamp.non_null,
                    None => !stamp.always_null && stamp.may_be_value(ctx.metadata),
                };
                if !compatible {
                    return value;
                }
                let Some(speculation) = self.allowed_speculation(site, side.inline_speculation())
                else {
                    return value;
                };
                let reason = DeoptReason::Speculation(speculation);

                let is_null = self.null_check(value);
                let non_null = self.negate(is_null);
                self.guard(non_null, reason, DeoptAction::InvalidateRecompile);
                if stamp.exact_value_type(ctx.metadata) != Some(ty) {
                    let hub = self.instr().load_hub(value);
                    let same = self.instr().binary(BinaryOp::Eq, hub, Value::hub(ty));
                    self.guard(same, reason, DeoptAction::InvalidateRecompile);
                }
                self.instr().assign(
                    value,
                    MirType::Reference(RefStamp::exact(ty).with_non_null(true)),
                )
            }
            _ => value,
        }
    }

    /// The speculation, unless it already failed and the log forbids retrying
    fn allowed_speculation(&self, site: SiteId, kind: SpeculationKind) -> Option<Speculation> {
        let ctx = self.ctx();
        let speculation = Speculation {
            method: self.function().method,
            site,
            kind,
        };
        if ctx.config.use_speculation_log && !ctx.speculations.may_speculate(&speculation) {
            log::debug!(
                "{}: not repeating failed speculation {kind:?} at site {}",
                self.function().name,
                site.0
            );
            return None;
        }
        log::debug!("{}: speculating {kind:?} at site {}", self.function().name, site.0);
        Some(speculation)
    }

    fn and(&mut self, left: Value, right: Value) -> Value {
        match (left.as_const_bool(), right.as_const_bool()) {
            (Some(false), _) | (_, Some(false)) => Value::boolean(false),
            (Some(true), _) => right,
            (_, Some(true)) => left,
            _ => self.instr().binary(BinaryOp::And, left, right),
        }
    }

    fn or(&mut self, left: Value, right: Value) -> Value {
        match (left.as_const_bool(), right.as_const_bool()) {
            (Some(true), _) | (_, Some(true)) => Value::boolean(true),
            (Some(false), _) => right,
            (_, Some(false)) => left,
            _ => self.instr().binary(BinaryOp::Or, left, right),
        }
    }

    fn negate(&mut self, value: Value) -> Value {
        match value.as_const_bool() {
            Some(constant) => Value::boolean(!constant),
            None => self.instr().not(value),
        }
    }
}
