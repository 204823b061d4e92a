//! # Type Metadata
//!
//! Resolved type and method metadata as handed to the compiler by the runtime.
//! The registry is plain data: it records the declared shape of each type, the
//! offsets of its instance fields and whether a field stores a value type inline
//! (flat) or behind a reference.
//!
//! ## Object layout
//!
//! ```text
//! | offset | content                                    |
//! |--------|--------------------------------------------|
//! | 0      | mark word (bit 2 set for identity objects) |
//! | 8      | hub (metadata pointer, bit 0 always clear) |
//! | 16     | first field / array length                 |
//! | 24     | first array element                        |
//! ```
//!
//! A flat field of value type `V` embeds `V`'s payload (its fields without the
//! header) at the field offset. When the usage is nullable, one null-marker byte
//! follows the payload.

use index_vec::IndexVec;
use rustc_hash::FxHashMap;

use crate::{Kind, MetaError, MethodId, MethodMeta};

index_vec::define_index_type! {
    /// Unique identifier for a type within a [`Metadata`] registry
    pub struct TypeId = u32;
}

/// Size of every object header
pub const HEADER_SIZE: u32 = 16;
/// Offset of the mark word
pub const MARK_OFFSET: u32 = 0;
/// Offset of the hub (metadata pointer)
pub const HUB_OFFSET: u32 = 8;
/// Offset of the 32-bit array length
pub const ARRAY_LENGTH_OFFSET: u32 = 16;
/// Offset of the first array element
pub const ARRAY_BASE_OFFSET: u32 = 24;
/// Address of the metadata block of the first registered type
pub const HUB_BASE: u64 = 0x7f00_0000;
/// Distance between two metadata blocks
pub const HUB_STRIDE: u64 = 0x100;

const FLAT_ALIGNMENT: u32 = 8;

/// Rounds `value` up to the next multiple of `align`
pub const fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// The declared type of a field, parameter, return value or array element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Primitive(Kind),
    Reference(TypeId),
}

impl FieldType {
    /// The slot kind used to hold a value of this type when it is not flattened
    pub const fn kind(self) -> Kind {
        match self {
            Self::Primitive(kind) => kind,
            Self::Reference(_) => Kind::Object,
        }
    }

    /// The referenced type, if this is a reference
    pub const fn reference(self) -> Option<TypeId> {
        match self {
            Self::Reference(ty) => Some(ty),
            Self::Primitive(_) => None,
        }
    }
}

/// What instances of a type look like at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    /// Concrete identity class; every instance (and subclass instance) has identity
    Identity,
    /// Abstract class or interface; instances may or may not have identity
    Abstract,
    /// Value class: final, no identity, compared by substitutability
    Value,
    /// Array type; arrays always have identity
    Array(ArrayShape),
}

/// Element layout of an array type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayShape {
    pub element: FieldType,
    /// Elements are stored inline rather than as references
    pub flat: bool,
    /// Elements can never be null
    pub null_free: bool,
}

/// One declared instance field with its resolved offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredField {
    pub name: String,
    pub ty: FieldType,
    /// Byte offset from the start of the holder's layout
    pub offset: u32,
    /// The field's value-type payload is embedded at `offset`
    pub flat: bool,
    /// The field is declared as never holding null
    pub null_free: bool,
}

/// Metadata of one type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMeta {
    pub name: String,
    pub shape: TypeShape,
    pub fields: Vec<DeclaredField>,
    /// Every usage of this value type excludes null
    pub null_free: bool,
    /// Bytes occupied by the fields after the header
    pub payload_size: u32,
    /// Total bytes of an instance, header included
    pub instance_size: u32,
    /// Metadata pointer stored in instance headers
    pub hub: u64,
    /// Field offsets have been computed
    pub laid_out: bool,
}

impl TypeMeta {
    /// Creates metadata without fields
    pub fn new(name: impl Into<String>, shape: TypeShape) -> Self {
        Self {
            name: name.into(),
            shape,
            fields: Vec::new(),
            null_free: false,
            payload_size: 0,
            instance_size: HEADER_SIZE,
            hub: 0,
            laid_out: false,
        }
    }

    /// Returns true for value classes
    pub const fn is_value(&self) -> bool {
        matches!(self.shape, TypeShape::Value)
    }

    /// Returns true if every instance of this type has identity
    pub const fn has_identity(&self) -> bool {
        matches!(self.shape, TypeShape::Identity | TypeShape::Array(_))
    }

    /// Returns true if an instance of this static type may be a value object
    pub const fn may_be_value(&self) -> bool {
        matches!(self.shape, TypeShape::Value | TypeShape::Abstract)
    }

    /// The element layout if this is an array type
    pub const fn array_shape(&self) -> Option<ArrayShape> {
        match self.shape {
            TypeShape::Array(shape) => Some(shape),
            _ => None,
        }
    }

    /// Offset of the first field
    pub const fn payload_offset(&self) -> u32 {
        HEADER_SIZE
    }

    /// Looks up a declared field by name
    pub fn field(&self, name: &str) -> Option<&DeclaredField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Registry of all resolved types and methods
#[derive(Debug, Clone)]
pub struct Metadata {
    types: IndexVec<TypeId, TypeMeta>,
    type_names: FxHashMap<String, TypeId>,
    methods: IndexVec<MethodId, MethodMeta>,
    method_names: FxHashMap<String, MethodId>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            types: IndexVec::new(),
            type_names: FxHashMap::default(),
            methods: IndexVec::new(),
            method_names: FxHashMap::default(),
        }
    }

    /// Registers raw type metadata as-is and assigns its hub.
    ///
    /// No layout validation happens here; this is the entry point for metadata
    /// produced elsewhere, which may be malformed.
    pub fn insert_type(&mut self, mut meta: TypeMeta) -> Result<TypeId, MetaError> {
        if self.type_names.contains_key(&meta.name) {
            return Err(MetaError::DuplicateType(meta.name));
        }
        let id = self.types.next_idx();
        meta.hub = HUB_BASE + HUB_STRIDE * id.index() as u64;
        self.type_names.insert(meta.name.clone(), id);
        Ok(self.types.push(meta))
    }

    /// Registers a type without fields; its layout can be provided later with
    /// [`Metadata::set_layout`]
    pub fn declare(&mut self, name: &str, shape: TypeShape) -> Result<TypeId, MetaError> {
        self.insert_type(TypeMeta::new(name, shape))
    }

    /// Overwrites the fields of a type with an externally computed layout
    pub fn set_layout(&mut self, id: TypeId, fields: Vec<DeclaredField>, payload_size: u32) {
        let meta = &mut self.types[id];
        meta.fields = fields;
        meta.payload_size = payload_size;
        meta.instance_size = align_up(HEADER_SIZE + payload_size, 8);
        meta.laid_out = true;
    }

    /// Starts defining a class whose layout is computed from its fields
    pub fn define_class(&mut self, name: &str, shape: TypeShape) -> ClassBuilder<'_> {
        ClassBuilder {
            metadata: self,
            name: name.to_string(),
            shape,
            null_free: false,
            fields: Vec::new(),
        }
    }

    /// Shorthand for a value class definition
    pub fn value_class(&mut self, name: &str) -> ClassBuilder<'_> {
        self.define_class(name, TypeShape::Value)
    }

    /// Shorthand for an identity class definition
    pub fn identity_class(&mut self, name: &str) -> ClassBuilder<'_> {
        self.define_class(name, TypeShape::Identity)
    }

    /// Returns (creating on first use) the array type with the given element layout
    pub fn array_of(
        &mut self,
        element: FieldType,
        flat: bool,
        null_free: bool,
    ) -> Result<TypeId, MetaError> {
        let element_name = self.field_type_name(element);
        if flat {
            let is_value = element
                .reference()
                .map(|ty| self.ty(ty).is_value() && self.ty(ty).laid_out)
                .unwrap_or(false);
            if !is_value {
                return Err(MetaError::InvalidArray(format!(
                    "flat arrays need a laid out value element, got '{element_name}'"
                )));
            }
        }
        let name = format!(
            "{element_name}{}[]{}",
            if null_free { "!" } else { "" },
            if flat { "#flat" } else { "" }
        );
        if let Some(&id) = self.type_names.get(&name) {
            return Ok(id);
        }
        let mut meta = TypeMeta::new(
            name,
            TypeShape::Array(ArrayShape {
                element,
                flat,
                null_free,
            }),
        );
        meta.instance_size = ARRAY_BASE_OFFSET;
        meta.laid_out = true;
        self.insert_type(meta)
    }

    /// Makes `name` resolve to an existing type
    pub fn alias(&mut self, name: &str, id: TypeId) -> Result<(), MetaError> {
        if self.type_names.contains_key(name) {
            return Err(MetaError::DuplicateType(name.to_string()));
        }
        self.type_names.insert(name.to_string(), id);
        Ok(())
    }

    /// Gets the metadata of a type
    pub fn ty(&self, id: TypeId) -> &TypeMeta {
        &self.types[id]
    }

    /// Gets the metadata of a type if the id belongs to this registry
    pub fn get(&self, id: TypeId) -> Option<&TypeMeta> {
        self.types.get(id)
    }

    /// Looks up a type by name
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.type_names.get(name).copied()
    }

    /// Looks up a type by name, failing if it does not exist
    pub fn require(&self, name: &str) -> Result<TypeId, MetaError> {
        self.lookup(name)
            .ok_or_else(|| MetaError::UnknownType(name.to_string()))
    }

    /// Returns an iterator over all types
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeMeta)> {
        self.types.iter_enumerated()
    }

    /// Maps a hub (untagged metadata pointer) back to its type
    pub fn type_of_hub(&self, hub: u64) -> Option<TypeId> {
        if hub < HUB_BASE || (hub - HUB_BASE) % HUB_STRIDE != 0 {
            return None;
        }
        let index = ((hub - HUB_BASE) / HUB_STRIDE) as usize;
        (index < self.types.len()).then(|| TypeId::new(index))
    }

    /// Whether a usage of `ty` declared with `declared_null_free` can never be null
    pub fn is_null_free_usage(&self, ty: FieldType, declared_null_free: bool) -> bool {
        match ty {
            FieldType::Primitive(_) => true,
            FieldType::Reference(id) => declared_null_free || self.ty(id).null_free,
        }
    }

    /// Bytes occupied by a flat embedding of value type `ty`, null marker included
    pub fn flat_size(&self, ty: TypeId, null_free_usage: bool) -> u32 {
        let payload = self.ty(ty).payload_size;
        if null_free_usage {
            payload
        } else {
            payload + 1
        }
    }

    /// Whether elements of an array of `shape` can never be null, either because
    /// the array is declared null-free or because its element class is
    pub fn is_null_free_element(&self, shape: &ArrayShape) -> bool {
        self.is_null_free_usage(shape.element, shape.null_free)
    }

    /// Distance between two consecutive elements of an array
    pub fn array_element_size(&self, shape: &ArrayShape) -> u32 {
        match (shape.flat, shape.element) {
            (true, FieldType::Reference(ty)) => align_up(
                self.flat_size(ty, self.is_null_free_element(shape)).max(1),
                FLAT_ALIGNMENT,
            ),
            (_, element) => element.kind().byte_size(),
        }
    }

    /// Human-readable name of a field type
    pub fn field_type_name(&self, ty: FieldType) -> String {
        match ty {
            FieldType::Primitive(kind) => kind.name().to_string(),
            FieldType::Reference(id) => self
                .get(id)
                .map(|meta| meta.name.clone())
                .unwrap_or_else(|| format!("<type {}>", id.index())),
        }
    }

    /// Resolves a field type by name: a primitive kind or a registered type
    pub fn parse_field_type(&self, name: &str) -> Result<FieldType, MetaError> {
        if let Ok(kind) = name.parse::<Kind>() {
            if !kind.is_object() {
                return Ok(FieldType::Primitive(kind));
            }
        }
        self.require(name).map(FieldType::Reference)
    }

    /// Registers a method
    pub fn add_method(&mut self, method: MethodMeta) -> Result<MethodId, MetaError> {
        let name = method.qualified_name(self);
        if self.method_names.contains_key(&name) {
            return Err(MetaError::DuplicateType(name));
        }
        let id = self.methods.push(method);
        self.method_names.insert(name, id);
        Ok(id)
    }

    /// Gets the metadata of a method
    pub fn method(&self, id: MethodId) -> &MethodMeta {
        &self.methods[id]
    }

    /// Looks up a method by its `Holder.name` qualified name
    pub fn lookup_method(&self, qualified_name: &str) -> Option<MethodId> {
        self.method_names.get(qualified_name).copied()
    }

    /// Returns an iterator over all methods
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodMeta)> {
        self.methods.iter_enumerated()
    }
}

/// A declared field before layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub flat: bool,
    pub null_free: bool,
}

impl Metadata {
    /// Computes the layout of a declared class from its fields in declaration order.
    ///
    /// Each field is aligned to its own size; flat fields are aligned to 8 bytes and
    /// must refer to an already laid out value class, so layouts built this way can
    /// never be cyclic.
    pub fn layout_class(&mut self, id: TypeId, specs: Vec<FieldSpec>) -> Result<(), MetaError> {
        let mut cursor = HEADER_SIZE;
        let mut fields = Vec::with_capacity(specs.len());

        for spec in specs {
            let (size, align) = if spec.flat {
                let Some(ty) = spec.ty.reference() else {
                    return Err(MetaError::NotFlattenable {
                        field: spec.name,
                        ty: self.field_type_name(spec.ty),
                    });
                };
                let meta = self.ty(ty);
                if !meta.is_value() {
                    return Err(MetaError::NotFlattenable {
                        field: spec.name,
                        ty: meta.name.clone(),
                    });
                }
                if !meta.laid_out {
                    return Err(MetaError::UndefinedLayout {
                        field: spec.name,
                        ty: meta.name.clone(),
                    });
                }
                let null_free_usage = self.is_null_free_usage(spec.ty, spec.null_free);
                (self.flat_size(ty, null_free_usage), FLAT_ALIGNMENT)
            } else {
                let size = spec.ty.kind().byte_size();
                (size, size)
            };

            let offset = align_up(cursor, align);
            cursor = offset + size;
            fields.push(DeclaredField {
                name: spec.name,
                ty: spec.ty,
                offset,
                flat: spec.flat,
                null_free: spec.null_free,
            });
        }

        self.set_layout(id, fields, cursor - HEADER_SIZE);
        Ok(())
    }
}

/// Fluent definition of a class, laid out on [`ClassBuilder::build`]
pub struct ClassBuilder<'m> {
    metadata: &'m mut Metadata,
    name: String,
    shape: TypeShape,
    null_free: bool,
    fields: Vec<FieldSpec>,
}

impl ClassBuilder<'_> {
    /// Marks every usage of this value class as null-free
    pub const fn null_free(mut self, null_free: bool) -> Self {
        self.null_free = null_free;
        self
    }

    /// Adds a primitive field
    pub fn field(mut self, name: &str, kind: Kind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: FieldType::Primitive(kind),
            flat: false,
            null_free: true,
        });
        self
    }

    /// Adds a reference field
    pub fn reference(mut self, name: &str, ty: TypeId, null_free: bool) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: FieldType::Reference(ty),
            flat: false,
            null_free,
        });
        self
    }

    /// Adds a field embedding the payload of value class `ty`
    pub fn flat(mut self, name: &str, ty: TypeId, null_free: bool) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: FieldType::Reference(ty),
            flat: true,
            null_free,
        });
        self
    }

    /// Registers the class and lays out its fields
    pub fn build(self) -> Result<TypeId, MetaError> {
        let mut meta = TypeMeta::new(self.name, self.shape);
        meta.null_free = self.null_free;
        let id = self.metadata.insert_type(meta)?;
        self.metadata.layout_class(id, self.fields)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_layout() {
        let mut metadata = Metadata::new();
        let point = metadata
            .value_class("Point")
            .field("x", Kind::Int)
            .field("y", Kind::Int)
            .build()
            .unwrap();

        let meta = metadata.ty(point);
        assert_eq!(meta.field("x").unwrap().offset, 16);
        assert_eq!(meta.field("y").unwrap().offset, 20);
        assert_eq!(meta.payload_size, 8);
        assert_eq!(meta.instance_size, 24);
        assert_eq!(metadata.type_of_hub(meta.hub), Some(point));
        assert_eq!(meta.hub & 1, 0);
    }

    #[test]
    fn test_nullable_flat_field_reserves_marker_byte() {
        let mut metadata = Metadata::new();
        let point = metadata
            .value_class("Point")
            .field("x", Kind::Int)
            .field("y", Kind::Int)
            .build()
            .unwrap();
        let container = metadata
            .identity_class("Container")
            .field("tag", Kind::Byte)
            .flat("p", point, false)
            .field("z", Kind::Byte)
            .build()
            .unwrap();

        let meta = metadata.ty(container);
        assert_eq!(meta.field("p").unwrap().offset, 24);
        // 8 payload bytes plus the marker at 32
        assert_eq!(meta.field("z").unwrap().offset, 33);
    }

    #[test]
    fn test_flat_field_requires_value_class() {
        let mut metadata = Metadata::new();
        let node = metadata
            .identity_class("Node")
            .field("v", Kind::Long)
            .build()
            .unwrap();
        let result = metadata.identity_class("Holder").flat("n", node, true).build();
        assert!(matches!(result, Err(MetaError::NotFlattenable { .. })));
    }

    #[test]
    fn test_array_types_are_memoized() {
        let mut metadata = Metadata::new();
        let point = metadata
            .value_class("Point")
            .field("x", Kind::Int)
            .field("y", Kind::Int)
            .build()
            .unwrap();
        let a = metadata
            .array_of(FieldType::Reference(point), true, true)
            .unwrap();
        let b = metadata
            .array_of(FieldType::Reference(point), true, true)
            .unwrap();
        assert_eq!(a, b);
        let shape = metadata.ty(a).array_shape().unwrap();
        assert_eq!(metadata.array_element_size(&shape), 8);

        let nullable = metadata
            .array_of(FieldType::Reference(point), true, false)
            .unwrap();
        let shape = metadata.ty(nullable).array_shape().unwrap();
        assert_eq!(metadata.array_element_size(&shape), 16);
    }

    #[test]
    fn test_null_free_class_has_no_marker_in_nullable_array() {
        let mut metadata = Metadata::new();
        let point = metadata
            .value_class("Point")
            .null_free(true)
            .field("x", Kind::Int)
            .field("y", Kind::Int)
            .build()
            .unwrap();
        let array = metadata
            .array_of(FieldType::Reference(point), true, false)
            .unwrap();
        let shape = metadata.ty(array).array_shape().unwrap();
        assert!(metadata.is_null_free_element(&shape));
        assert_eq!(metadata.array_element_size(&shape), 8);
    }
}
