//! # Scalarization Planner
//!
//! Decides, per method, which signature positions travel as their flattened
//! leaves instead of a single reference, and synthesizes the resulting slot
//! lists for each compiled entry point.
//!
//! A method with a scalarized signature gets up to three entries:
//!
//! - [`EntryKind::Scalarized`]: every planned position is scalarized; used by
//!   statically bound call sites
//! - [`EntryKind::ScalarizedReceiverBoxed`]: like the above but the receiver
//!   is passed as a reference; used by call sites that dispatch at runtime
//! - [`EntryKind::Boxed`]: the plain reference convention; used by the
//!   interpreter and by callers that know nothing about the plan
//!
//! A scalarized return always comes back as a tagged register followed by the
//! leaves (and the not-null flag when nullable), see [`SlotRole::TaggedReturn`].

use std::sync::Arc;

use flatjit_common::{FieldType, Kind, MethodId, ParamDecl};

use crate::{
    indent_str, AggregateType, CompilationContext, CompileResult, FieldDescriptor, MirType,
    PrettyPrint, RefStamp,
};

/// A compiled entry point of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    Scalarized,
    ScalarizedReceiverBoxed,
    Boxed,
}

impl EntryKind {
    pub const ALL: [Self; 3] = [Self::Scalarized, Self::ScalarizedReceiverBoxed, Self::Boxed];

    /// Name suffix of the function implementing this entry
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Scalarized => "scalarized",
            Self::ScalarizedReceiverBoxed => "scalarized_ro",
            Self::Boxed => "boxed",
        }
    }
}

/// The callee of a call instruction: one entry of one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTarget {
    pub method: MethodId,
    pub entry: EntryKind,
}

impl CallTarget {
    pub const fn new(method: MethodId, entry: EntryKind) -> Self {
        Self { method, entry }
    }
}

/// Which part of a signature a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignaturePosition {
    /// Parameter index, receiver first
    Param(usize),
    Return,
}

/// What a calling-convention slot carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    /// A primitive position
    Primitive,
    /// A position passed as a single reference
    Reference,
    /// Leaf `n` of a scalarized position
    Leaf(usize),
    /// The not-null flag of a nullable scalarized position
    NotNull,
    /// The tagged register of a scalarized return
    TaggedReturn,
}

/// One calling-convention slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub position: SignaturePosition,
    pub role: SlotRole,
    pub kind: Kind,
}

/// Plan of one parameter or of the return value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionPlan {
    pub decl: ParamDecl,
    /// The value at this position can never be null
    pub null_free: bool,
    pub is_receiver: bool,
    /// The flattened layout when this position is scalarized
    pub aggregate: Option<Arc<AggregateType>>,
}

impl PositionPlan {
    pub const fn is_scalarized(&self) -> bool {
        self.aggregate.is_some()
    }

    /// Leaves of a scalarized position, empty otherwise
    pub fn fields(&self) -> &[FieldDescriptor] {
        self.aggregate
            .as_ref()
            .map(|aggregate| aggregate.fields.as_slice())
            .unwrap_or(&[])
    }

    /// Slots taken by the flattened form: leaves plus the not-null flag
    pub fn scalarized_slot_count(&self) -> usize {
        self.fields().len() + usize::from(!self.null_free)
    }

    /// Type of the logical value at this position
    pub const fn mir_type(&self) -> MirType {
        match self.decl.ty {
            FieldType::Primitive(kind) => MirType::Primitive(kind),
            FieldType::Reference(ty) => {
                MirType::Reference(RefStamp::of(ty).with_non_null(self.null_free))
            }
        }
    }

    fn slots(&self, position: SignaturePosition, scalarized: bool, out: &mut Vec<Slot>) {
        let slot = |role, kind| Slot {
            position,
            role,
            kind,
        };
        if !scalarized || !self.is_scalarized() {
            match self.decl.ty {
                FieldType::Primitive(kind) => out.push(slot(SlotRole::Primitive, kind)),
                FieldType::Reference(_) => out.push(slot(SlotRole::Reference, Kind::Object)),
            }
            return;
        }
        if position == SignaturePosition::Return {
            out.push(slot(SlotRole::TaggedReturn, Kind::Object));
        }
        for (index, field) in self.fields().iter().enumerate() {
            out.push(slot(SlotRole::Leaf(index), field.kind));
        }
        if !self.null_free {
            out.push(slot(SlotRole::NotNull, Kind::Boolean));
        }
    }
}

/// The scalarization plan of one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarizedSignature {
    pub method: MethodId,
    /// Qualified method name
    pub name: String,
    /// Receiver (if any) followed by the declared parameters
    pub params: Vec<PositionPlan>,
    /// `None` for void methods
    pub ret: Option<PositionPlan>,
    pub has_receiver: bool,
}

impl ScalarizedSignature {
    pub fn receiver_scalarized(&self) -> bool {
        self.has_receiver && self.params.first().is_some_and(PositionPlan::is_scalarized)
    }

    pub fn any_param_scalarized(&self) -> bool {
        self.params.iter().any(PositionPlan::is_scalarized)
    }

    pub fn return_scalarized(&self) -> bool {
        self.ret.as_ref().is_some_and(PositionPlan::is_scalarized)
    }

    /// Whether the plan differs from the boxed convention at all
    pub fn is_scalarized(&self) -> bool {
        self.any_param_scalarized() || self.return_scalarized()
    }

    /// The entries that must be compiled for this method
    pub fn entries(&self) -> Vec<EntryKind> {
        let mut entries = vec![EntryKind::Boxed];
        if self.is_scalarized() {
            entries.push(EntryKind::Scalarized);
        }
        if self.receiver_scalarized() {
            entries.push(EntryKind::ScalarizedReceiverBoxed);
        }
        entries.sort();
        entries
    }

    /// The entry a call site uses
    pub fn entry_for_call(&self, statically_bound: bool) -> EntryKind {
        if !self.is_scalarized() {
            EntryKind::Boxed
        } else if statically_bound || !self.receiver_scalarized() {
            EntryKind::Scalarized
        } else {
            EntryKind::ScalarizedReceiverBoxed
        }
    }

    /// Whether parameter `index` is passed scalarized to `entry`
    pub fn param_scalarized_in(&self, index: usize, entry: EntryKind) -> bool {
        let planned = self.params.get(index).is_some_and(PositionPlan::is_scalarized);
        match entry {
            EntryKind::Boxed => false,
            EntryKind::Scalarized => planned,
            EntryKind::ScalarizedReceiverBoxed => planned && !(self.has_receiver && index == 0),
        }
    }

    /// Whether `entry` returns its value scalarized
    pub fn return_scalarized_in(&self, entry: EntryKind) -> bool {
        entry != EntryKind::Boxed && self.return_scalarized()
    }

    /// Incoming slots of `entry`, in order
    pub fn param_slots(&self, entry: EntryKind) -> Vec<Slot> {
        let mut slots = Vec::new();
        for (index, param) in self.params.iter().enumerate() {
            param.slots(
                SignaturePosition::Param(index),
                self.param_scalarized_in(index, entry),
                &mut slots,
            );
        }
        slots
    }

    /// Slots of parameter `index` only
    pub fn slots_of_param(&self, index: usize, entry: EntryKind) -> Vec<Slot> {
        let mut slots = Vec::new();
        if let Some(param) = self.params.get(index) {
            param.slots(
                SignaturePosition::Param(index),
                self.param_scalarized_in(index, entry),
                &mut slots,
            );
        }
        slots
    }

    /// Returned slots of `entry`, in order
    pub fn return_slots(&self, entry: EntryKind) -> Vec<Slot> {
        let mut slots = Vec::new();
        if let Some(ret) = &self.ret {
            ret.slots(
                SignaturePosition::Return,
                self.return_scalarized_in(entry),
                &mut slots,
            );
        }
        slots
    }
}

/// Computes (or fetches from the cache) the scalarization plan of `method`
pub fn plan(
    ctx: &CompilationContext<'_>,
    method: MethodId,
) -> CompileResult<Arc<ScalarizedSignature>> {
    ctx.signatures
        .get_or_init(method, || compute_plan(ctx, method).map(Arc::new))
}

fn compute_plan(
    ctx: &CompilationContext<'_>,
    method: MethodId,
) -> CompileResult<ScalarizedSignature> {
    let meta = ctx.metadata.method(method);
    let name = meta.qualified_name(ctx.metadata);
    let max_slots = ctx.config.max_scalarized_slots;

    let mut params = Vec::with_capacity(meta.params.len() + 1);
    let mut used_slots = 0usize;
    for (index, decl) in meta.all_params().into_iter().enumerate() {
        let is_receiver = index == 0 && meta.receiver().is_some();
        let mut position = unscalarized(ctx, decl, is_receiver);

        if ctx.config.parameters_scalarized() {
            if let Some(aggregate) = ctx.aggregate_of(decl.ty)? {
                let count = aggregate.leaf_count() + usize::from(!position.null_free);
                if used_slots + count <= max_slots {
                    position.aggregate = Some(aggregate);
                } else {
                    log::debug!(
                        "{name}: parameter {index} not scalarized, {count} slots would exceed {max_slots}"
                    );
                }
            }
        }
        used_slots += if position.is_scalarized() {
            position.scalarized_slot_count()
        } else {
            1
        };
        params.push(position);
    }

    let ret = match meta.ret {
        None => None,
        Some(decl) => {
            let mut position = unscalarized(ctx, decl, false);
            if ctx.config.returns_scalarized() {
                if let Some(aggregate) = ctx.aggregate_of(decl.ty)? {
                    let count = 1 + aggregate.leaf_count() + usize::from(!position.null_free);
                    if count <= max_slots {
                        position.aggregate = Some(aggregate);
                    } else {
                        log::debug!(
                            "{name}: return not scalarized, {count} slots would exceed {max_slots}"
                        );
                    }
                }
            }
            Some(position)
        }
    };

    let signature = ScalarizedSignature {
        method,
        name,
        params,
        ret,
        has_receiver: meta.receiver().is_some(),
    };
    log::debug!("planned {}", signature.pretty_print(0).trim_end());
    Ok(signature)
}

fn unscalarized(ctx: &CompilationContext<'_>, decl: ParamDecl, is_receiver: bool) -> PositionPlan {
    PositionPlan {
        decl,
        null_free: ctx.metadata.is_null_free_usage(decl.ty, decl.null_free),
        is_receiver,
        aggregate: None,
    }
}

impl PrettyPrint for ScalarizedSignature {
    fn pretty_print(&self, indent: usize) -> String {
        let describe = |position: &PositionPlan| {
            let ty = position.mir_type();
            match &position.aggregate {
                None => format!("{ty}"),
                Some(aggregate) => {
                    let mut leaves: Vec<String> = aggregate
                        .fields
                        .iter()
                        .map(|field| format!("{}: {}", field.name, field.kind))
                        .collect();
                    if !position.null_free {
                        leaves.push("not_null: boolean".to_string());
                    }
                    format!("{ty} scalarized {{{}}}", leaves.join(", "))
                }
            }
        };

        let mut result = format!("{}{}\n", indent_str(indent), self.name);
        for (index, param) in self.params.iter().enumerate() {
            let label = if param.is_receiver {
                "receiver".to_string()
            } else {
                format!("param {index}")
            };
            result.push_str(&format!(
                "{}{label}: {}\n",
                indent_str(indent + 1),
                describe(param)
            ));
        }
        match &self.ret {
            Some(ret) => result.push_str(&format!(
                "{}return: {}\n",
                indent_str(indent + 1),
                describe(ret)
            )),
            None => result.push_str(&format!("{}return: void\n", indent_str(indent + 1))),
        }
        result
    }
}

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;
