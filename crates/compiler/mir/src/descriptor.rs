//! # Aggregate Descriptor
//!
//! Flattened layout of a value class: the ordered list of primitive and
//! reference leaves obtained by recursively inlining flat value-typed fields.
//!
//! Leaf offsets are relative to the value class's own heap layout (header
//! included), so a leaf can be read from a heap instance at `offset` and from a
//! flattened embedding at `embedding_offset + offset - HEADER_SIZE`.

use flatjit_common::{FieldType, Kind, Metadata, TypeId, HEADER_SIZE};

use crate::{DescriptorError, LocationIdentity};

/// What a leaf holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    /// A declared primitive or reference field
    Value,
    /// The not-null byte of a nested nullable flat field
    NullMarker,
}

/// One leaf of a flattened value class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Dotted path from the described class, e.g. `start.x`
    pub name: String,
    /// Byte offset within the described class's heap layout
    pub offset: u32,
    pub kind: Kind,
    /// Aliasing tag of this leaf when read from a heap instance
    pub location: LocationIdentity,
    /// Declared type of a reference leaf
    pub declared: Option<TypeId>,
    /// A reference leaf declared as never null
    pub null_free: bool,
    pub role: FieldRole,
}

impl FieldDescriptor {
    pub const fn is_reference(&self) -> bool {
        self.kind.is_object()
    }
}

/// The flattened description of one value class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateType {
    pub ty: TypeId,
    pub name: String,
    /// Leaves in declaration order, nested flat fields inlined in place
    pub fields: Vec<FieldDescriptor>,
    /// Usages of this class can never be null
    pub is_null_free: bool,
    /// Bytes of field storage after the header
    pub payload_size: u32,
}

impl AggregateType {
    pub fn leaf_count(&self) -> usize {
        self.fields.len()
    }

    /// Kinds of all leaves, in order
    pub fn kinds(&self) -> Vec<Kind> {
        self.fields.iter().map(|field| field.kind).collect()
    }

    /// Looks up a leaf by its dotted path
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDescriptor)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
    }

    /// Index of the leaf stored at `offset` with `kind`
    pub fn leaf_at(&self, offset: u32, kind: Kind) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.offset == offset && field.kind == kind)
    }

    /// Offset of leaf `index` within a flattened embedding starting at `base`
    pub fn embedded_offset(&self, base: u32, index: usize) -> u32 {
        base + self.fields[index].offset - HEADER_SIZE
    }

    /// Offset of the null marker of a nullable embedding starting at `base`
    pub const fn marker_offset(&self, base: u32) -> u32 {
        base + self.payload_size
    }
}

/// Computes the flattened description of value class `ty`.
///
/// Fails when `ty` is not a laid-out value class or when a flat field contains
/// its enclosing class, directly or transitively.
pub fn describe(metadata: &Metadata, ty: TypeId) -> Result<AggregateType, DescriptorError> {
    let meta = metadata
        .get(ty)
        .ok_or(DescriptorError::UnknownType(ty.index()))?;
    if !meta.is_value() {
        return Err(DescriptorError::NotAValueType(meta.name.clone()));
    }

    let mut fields = Vec::new();
    let mut visiting = vec![ty];
    flatten_into(metadata, ty, ty, 0, "", &mut visiting, &mut fields)?;

    Ok(AggregateType {
        ty,
        name: meta.name.clone(),
        fields,
        is_null_free: meta.null_free,
        payload_size: meta.payload_size,
    })
}

fn flatten_into(
    metadata: &Metadata,
    holder: TypeId,
    ty: TypeId,
    base: u32,
    prefix: &str,
    visiting: &mut Vec<TypeId>,
    out: &mut Vec<FieldDescriptor>,
) -> Result<(), DescriptorError> {
    let meta = metadata
        .get(ty)
        .ok_or(DescriptorError::UnknownType(ty.index()))?;
    if !meta.laid_out {
        return Err(DescriptorError::MissingLayout(meta.name.clone()));
    }

    for field in &meta.fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };
        let offset = base + field.offset;

        match (field.flat, field.ty) {
            (true, FieldType::Reference(inner)) => {
                if visiting.contains(&inner) {
                    return Err(DescriptorError::SelfReferential {
                        ty: metadata.ty(visiting[0]).name.clone(),
                        path,
                    });
                }
                let inner_meta = metadata
                    .get(inner)
                    .ok_or(DescriptorError::UnknownType(inner.index()))?;
                if !inner_meta.is_value() {
                    return Err(DescriptorError::NotAValueType(inner_meta.name.clone()));
                }

                visiting.push(inner);
                flatten_into(
                    metadata,
                    holder,
                    inner,
                    offset - HEADER_SIZE,
                    &path,
                    visiting,
                    out,
                )?;
                visiting.pop();

                if !metadata.is_null_free_usage(field.ty, field.null_free) {
                    let marker = offset + inner_meta.payload_size;
                    out.push(FieldDescriptor {
                        name: format!("{path}$not_null"),
                        offset: marker,
                        kind: Kind::Boolean,
                        location: LocationIdentity::Field {
                            holder,
                            offset: marker,
                        },
                        declared: None,
                        null_free: false,
                        role: FieldRole::NullMarker,
                    });
                }
            }
            (_, ty) => out.push(FieldDescriptor {
                name: path,
                offset,
                kind: ty.kind(),
                location: LocationIdentity::Field { holder, offset },
                declared: ty.reference(),
                null_free: field.null_free,
                role: FieldRole::Value,
            }),
        }
    }
    Ok(())
}
