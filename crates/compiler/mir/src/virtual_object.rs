//! # Virtual Objects
//!
//! Index of the `InlineValue` nodes of a function: value objects that exist
//! only as their leaf values. Passes consult it to forward field reads and
//! null checks, and materialization walks it to decide which ones still need
//! a heap instance.

use flatjit_common::TypeId;
use rustc_hash::FxHashMap;

use crate::{BasicBlockId, InlineNullState, InstructionKind, MirFunction, Value, ValueId};

/// One scalarized value object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualObject {
    pub id: ValueId,
    pub ty: TypeId,
    pub fields: Vec<Value>,
    pub null_state: Option<InlineNullState>,
    /// Where the node is defined
    pub block: BasicBlockId,
    pub index: usize,
}

impl VirtualObject {
    /// Statically known not-null: no null state, or a literal `true` flag
    pub fn is_known_non_null(&self) -> bool {
        self.null_state
            .map_or(true, |state| state.is_not_null.as_const_bool() == Some(true))
    }

    /// Statically known null
    pub fn is_known_null(&self) -> bool {
        self.null_state
            .is_some_and(|state| state.is_not_null.as_const_bool() == Some(false))
    }

    /// The not-null flag as a value
    pub fn is_not_null(&self) -> Value {
        self.null_state
            .map_or(Value::boolean(true), |state| state.is_not_null)
    }
}

/// All virtual objects of a function, keyed by their value
#[derive(Debug, Default)]
pub struct VirtualObjectTable {
    objects: FxHashMap<ValueId, VirtualObject>,
}

impl VirtualObjectTable {
    pub fn collect(function: &MirFunction) -> Self {
        let objects = function
            .instructions()
            .filter_map(|(block, index, instruction)| match &instruction.kind {
                InstructionKind::InlineValue {
                    dest,
                    ty,
                    fields,
                    null_state,
                } => Some((
                    *dest,
                    VirtualObject {
                        id: *dest,
                        ty: *ty,
                        fields: fields.clone(),
                        null_state: *null_state,
                        block,
                        index,
                    },
                )),
                _ => None,
            })
            .collect();
        Self { objects }
    }

    /// The virtual object `value` denotes, if any
    pub fn get(&self, value: Value) -> Option<&VirtualObject> {
        value.as_operand().and_then(|id| self.objects.get(&id))
    }

    pub fn is_virtual(&self, value: Value) -> bool {
        self.get(value).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Virtual objects in definition order
    pub fn iter(&self) -> impl Iterator<Item = &VirtualObject> {
        let mut objects: Vec<_> = self.objects.values().collect();
        objects.sort_by_key(|object| (object.block, object.index));
        objects.into_iter()
    }

    /// Virtual objects whose value is still read somewhere
    pub fn escaping<'t>(&'t self, function: &MirFunction) -> Vec<&'t VirtualObject> {
        let uses = function.get_value_use_counts();
        self.iter()
            .filter(|object| uses.get(&object.id).copied().unwrap_or(0) > 0)
            .collect()
    }
}
