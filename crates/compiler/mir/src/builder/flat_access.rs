//! # Flattened Field Access
//!
//! Loads and stores of fields and array elements whose declared type is a
//! value class stored inline.
//!
//! - A load produces an [`InstructionKind::InlineValue`](crate::InstructionKind)
//!   from the leaf loads (plus the null-marker load for nullable embeddings).
//!   Nothing is allocated here; a heap instance only appears if the value is
//!   later used as an object.
//! - A null-free store copies each leaf. A nullable store writes the marker and
//!   the leaves, or zeroes everything when the stored value is null.
//! - Arrays whose flat layout is only known at runtime are accessed behind an
//!   `is_flat_array` check that falls back to runtime calls.

use flatjit_common::{DeclaredField, FieldType, Kind, TypeId};

use super::mir_builder::{leaf_type, zero_of};
use crate::{
    AggregateType, CompileError, CompileResult, DeoptAction, DeoptReason, DescriptorError,
    InlineNullState, LocationIdentity, Lowered, MirBuilder, MirType, RuntimeFunction, Value,
};

/// Element storage of an array, as far as the compiler knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLayout {
    /// Elements are embedded value payloads `stride` bytes apart
    Flat {
        array: TypeId,
        element: TypeId,
        null_free: bool,
        stride: u32,
    },
    /// Elements are plain slots of `kind`
    Reference {
        array: Option<TypeId>,
        element: MirType,
        kind: Kind,
    },
    /// Either representation may show up at runtime
    Unknown {
        array: Option<TypeId>,
        element: MirType,
    },
}

impl MirBuilder<'_> {
    /// Classifies the element storage of `array` from its stamp
    pub fn array_layout(&self, array: Value) -> CompileResult<ArrayLayout> {
        let ctx = self.ctx();
        let stamp = self.stamp(array);
        let Some(ty) = stamp.ty else {
            return Ok(if ctx.config.arrays_flattened() {
                ArrayLayout::Unknown {
                    array: None,
                    element: MirType::object(),
                }
            } else {
                ArrayLayout::Reference {
                    array: None,
                    element: MirType::object(),
                    kind: Kind::Object,
                }
            });
        };

        let meta = ctx
            .metadata
            .get(ty)
            .ok_or(DescriptorError::UnknownType(ty.index()))?;
        let shape = meta
            .array_shape()
            .ok_or_else(|| CompileError::NotAnArray(meta.name.clone()))?;

        match shape.element {
            FieldType::Reference(element) if shape.flat => Ok(ArrayLayout::Flat {
                array: ty,
                element,
                null_free: ctx.metadata.is_null_free_element(&shape),
                stride: ctx.metadata.array_element_size(&shape),
            }),
            element_ty => {
                let element = MirType::from_field_type(element_ty, shape.null_free);
                let element_may_be_value = element_ty
                    .reference()
                    .is_some_and(|element| ctx.metadata.ty(element).may_be_value());
                if ctx.config.arrays_flattened() && !stamp.exact && element_may_be_value {
                    Ok(ArrayLayout::Unknown {
                        array: Some(ty),
                        element,
                    })
                } else {
                    Ok(ArrayLayout::Reference {
                        array: Some(ty),
                        element,
                        kind: element_ty.kind(),
                    })
                }
            }
        }
    }

    fn declared_field(&self, holder: TypeId, name: &str) -> CompileResult<DeclaredField> {
        let meta = self
            .ctx()
            .metadata
            .get(holder)
            .ok_or(DescriptorError::UnknownType(holder.index()))?;
        meta.field(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownField {
                ty: meta.name.clone(),
                field: name.to_string(),
            })
    }

    /// Loads field `name` of `object`, an instance of `holder`
    pub fn load_field(&mut self, object: Value, holder: TypeId, name: &str) -> CompileResult<Value> {
        let field = self.declared_field(holder, name)?;
        let location = |offset| LocationIdentity::Field { holder, offset };

        match (field.flat, field.ty) {
            (true, FieldType::Reference(inner)) => {
                let aggregate = self.ctx().describe(inner)?;
                let null_free = self
                    .ctx()
                    .metadata
                    .is_null_free_usage(field.ty, field.null_free);
                Ok(self.load_flat(object, field.offset, &aggregate, null_free, location))
            }
            (_, ty) => Ok(self.instr().load(
                object,
                field.offset,
                ty.kind(),
                location(field.offset),
                MirType::from_field_type(ty, field.null_free),
            )),
        }
    }

    /// Stores `value` into field `name` of `object`
    pub fn store_field(
        &mut self,
        object: Value,
        holder: TypeId,
        name: &str,
        value: Value,
    ) -> CompileResult<Lowered<()>> {
        let field = self.declared_field(holder, name)?;
        let location = |offset| LocationIdentity::Field { holder, offset };

        match (field.flat, field.ty) {
            (true, FieldType::Reference(inner)) => {
                let aggregate = self.ctx().describe(inner)?;
                let null_free = self
                    .ctx()
                    .metadata
                    .is_null_free_usage(field.ty, field.null_free);
                Ok(self.store_flat(object, field.offset, &aggregate, null_free, value, location))
            }
            (_, ty) => {
                self.instr()
                    .store(object, field.offset, ty.kind(), value, location(field.offset));
                Ok(Lowered::Value(()))
            }
        }
    }

    /// Loads element `index` of `array`
    pub fn load_element(&mut self, array: Value, index: Value) -> CompileResult<Value> {
        match self.array_layout(array)? {
            ArrayLayout::Flat {
                array: array_ty,
                element,
                null_free,
                stride,
            } => {
                let aggregate = self.ctx().describe(element)?;
                let address = self.instr().element_address(array, index, stride);
                Ok(self.load_flat(address, 0, &aggregate, null_free, |offset| {
                    LocationIdentity::ArrayElement {
                        array: array_ty,
                        offset,
                    }
                }))
            }
            ArrayLayout::Reference {
                array: array_ty,
                element,
                kind,
            } => Ok(self.load_reference_element(array, index, array_ty, element, kind)),
            ArrayLayout::Unknown {
                array: array_ty,
                element,
            } => {
                let is_flat = self.instr().is_flat_array(array);
                let flat_block = self.new_block("element.flat");
                let ref_block = self.new_block("element.ref");
                let merge = self.new_block("element.merge");
                self.branch(is_flat, flat_block, ref_block);

                self.switch_to(flat_block);
                let flat_value = self.instr().runtime_call(
                    RuntimeFunction::LoadUnknownInline,
                    vec![array, index],
                    &[element],
                )[0];
                self.jump(merge);

                self.switch_to(ref_block);
                let ref_value =
                    self.load_reference_element(array, index, array_ty, element, Kind::Object);
                let ref_end = self.current_block();
                self.jump(merge);

                self.switch_to(merge);
                Ok(self.phi(element, vec![(flat_block, flat_value), (ref_end, ref_value)]))
            }
        }
    }

    /// Stores `value` into element `index` of `array`
    pub fn store_element(
        &mut self,
        array: Value,
        index: Value,
        value: Value,
    ) -> CompileResult<Lowered<()>> {
        match self.array_layout(array)? {
            ArrayLayout::Flat {
                array: array_ty,
                element,
                null_free,
                stride,
            } => {
                let aggregate = self.ctx().describe(element)?;
                let address = self.instr().element_address(array, index, stride);
                Ok(self.store_flat(address, 0, &aggregate, null_free, value, |offset| {
                    LocationIdentity::ArrayElement {
                        array: array_ty,
                        offset,
                    }
                }))
            }
            ArrayLayout::Reference {
                array: array_ty,
                kind,
                ..
            } => {
                self.store_reference_element(array, index, array_ty, kind, value);
                Ok(Lowered::Value(()))
            }
            ArrayLayout::Unknown {
                array: array_ty, ..
            } => {
                let is_flat = self.instr().is_flat_array(array);
                let flat_block = self.new_block("element.flat");
                let ref_block = self.new_block("element.ref");
                let merge = self.new_block("element.merge");
                self.branch(is_flat, flat_block, ref_block);

                self.switch_to(flat_block);
                let stored = self.instr().runtime_call(
                    RuntimeFunction::StoreUnknownInline,
                    vec![array, index, value],
                    &[MirType::bool()],
                )[0];
                self.guard(stored, DeoptReason::NullFreeViolation, DeoptAction::None);
                self.jump(merge);

                self.switch_to(ref_block);
                self.store_reference_element(array, index, array_ty, Kind::Object, value);
                self.jump(merge);

                self.switch_to(merge);
                Ok(Lowered::Value(()))
            }
        }
    }

    /// A fresh, non-null value of class `ty` from its leaf values
    pub fn new_value(&mut self, ty: TypeId, fields: Vec<Value>) -> CompileResult<Value> {
        let aggregate = self.ctx().describe(ty)?;
        if fields.len() != aggregate.leaf_count() {
            return Err(CompileError::ArityMismatch {
                method: aggregate.name.clone(),
                expected: aggregate.leaf_count(),
                actual: fields.len(),
            });
        }
        Ok(self.instr().inline_value(ty, fields, None))
    }

    fn load_reference_element(
        &mut self,
        array: Value,
        index: Value,
        array_ty: Option<TypeId>,
        element: MirType,
        kind: Kind,
    ) -> Value {
        let address = self.instr().element_address(array, index, kind.byte_size());
        self.instr()
            .load(address, 0, kind, element_location(array_ty), element)
    }

    fn store_reference_element(
        &mut self,
        array: Value,
        index: Value,
        array_ty: Option<TypeId>,
        kind: Kind,
        value: Value,
    ) {
        let address = self.instr().element_address(array, index, kind.byte_size());
        self.instr()
            .store(address, 0, kind, value, element_location(array_ty));
    }

    /// Reads the embedding of `aggregate` at `base + base_offset`
    fn load_flat(
        &mut self,
        base: Value,
        base_offset: u32,
        aggregate: &AggregateType,
        null_free: bool,
        location: impl Fn(u32) -> LocationIdentity,
    ) -> Value {
        let fields = aggregate
            .fields
            .iter()
            .enumerate()
            .map(|(index, leaf)| {
                let offset = aggregate.embedded_offset(base_offset, index);
                self.instr()
                    .load(base, offset, leaf.kind, location(offset), leaf_type(leaf))
            })
            .collect();

        let null_state = if null_free {
            None
        } else {
            let marker = aggregate.marker_offset(base_offset);
            let is_not_null =
                self.instr()
                    .load(base, marker, Kind::Boolean, location(marker), MirType::bool());
            Some(InlineNullState {
                is_not_null,
                oop: Value::null(),
            })
        };
        self.instr().inline_value(aggregate.ty, fields, null_state)
    }

    /// Writes `value` into the embedding of `aggregate` at `base + base_offset`
    fn store_flat(
        &mut self,
        base: Value,
        base_offset: u32,
        aggregate: &AggregateType,
        null_free: bool,
        value: Value,
        location: impl Fn(u32) -> LocationIdentity,
    ) -> Lowered<()> {
        let stamp = self.stamp(value);

        if null_free {
            if stamp.always_null {
                log::debug!(
                    "{}: null stored into a null-free flat {}",
                    self.function().name,
                    aggregate.name
                );
                return Lowered::Deoptimized(
                    self.deoptimize(DeoptReason::NullFreeViolation, DeoptAction::None),
                );
            }
            if !stamp.non_null {
                let is_null = self.instr().is_null(value);
                let non_null = self.instr().not(is_null);
                self.guard(non_null, DeoptReason::NullFreeViolation, DeoptAction::None);
            }
            self.copy_leaves(value, base, base_offset, aggregate, &location);
            return Lowered::Value(());
        }

        if stamp.always_null {
            self.clear_flat(base, base_offset, aggregate, &location);
        } else if stamp.non_null {
            self.copy_leaves(value, base, base_offset, aggregate, &location);
            self.store_marker(base, base_offset, aggregate, true, &location);
        } else {
            let is_null = self.instr().is_null(value);
            let null_block = self.new_block("flat.null");
            let copy_block = self.new_block("flat.copy");
            let merge = self.new_block("flat.merge");
            self.branch(is_null, null_block, copy_block);

            self.switch_to(null_block);
            self.clear_flat(base, base_offset, aggregate, &location);
            self.jump(merge);

            self.switch_to(copy_block);
            self.copy_leaves(value, base, base_offset, aggregate, &location);
            self.store_marker(base, base_offset, aggregate, true, &location);
            self.jump(merge);

            self.switch_to(merge);
        }
        Lowered::Value(())
    }

    fn copy_leaves(
        &mut self,
        value: Value,
        base: Value,
        base_offset: u32,
        aggregate: &AggregateType,
        location: &impl Fn(u32) -> LocationIdentity,
    ) {
        for (index, leaf) in aggregate.fields.iter().enumerate() {
            let leaf_value =
                self.instr()
                    .load(value, leaf.offset, leaf.kind, leaf.location, leaf_type(leaf));
            let offset = aggregate.embedded_offset(base_offset, index);
            self.instr()
                .store(base, offset, leaf.kind, leaf_value, location(offset));
        }
    }

    /// Zeroes every leaf and the marker, so no stale reference survives a null
    fn clear_flat(
        &mut self,
        base: Value,
        base_offset: u32,
        aggregate: &AggregateType,
        location: &impl Fn(u32) -> LocationIdentity,
    ) {
        for (index, leaf) in aggregate.fields.iter().enumerate() {
            let offset = aggregate.embedded_offset(base_offset, index);
            self.instr()
                .store(base, offset, leaf.kind, zero_of(leaf.kind), location(offset));
        }
        self.store_marker(base, base_offset, aggregate, false, location);
    }

    fn store_marker(
        &mut self,
        base: Value,
        base_offset: u32,
        aggregate: &AggregateType,
        not_null: bool,
        location: &impl Fn(u32) -> LocationIdentity,
    ) {
        let marker = aggregate.marker_offset(base_offset);
        self.instr().store(
            base,
            marker,
            Kind::Boolean,
            Value::boolean(not_null),
            location(marker),
        );
    }
}

fn element_location(array: Option<TypeId>) -> LocationIdentity {
    array.map_or(LocationIdentity::Any, |array| LocationIdentity::ArrayElement {
        array,
        offset: 0,
    })
}
