//! # Metadata Description Format
//!
//! JSON description of types and methods, used by the command-line driver and by
//! tests that want metadata as data.
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "Point", "shape": "value", "null_free": true,
//!       "fields": [{ "name": "x", "type": "int" }, { "name": "y", "type": "int" }] },
//!     { "name": "Points", "shape": "array", "element": "Point", "flat": true }
//!   ],
//!   "methods": [
//!     { "holder": "Point", "name": "mirror", "dispatch": "static",
//!       "params": [{ "type": "Point" }], "ret": { "type": "Point" } }
//!   ]
//! }
//! ```
//!
//! Types are declared before any layout is computed, so reference fields may
//! refer to types defined later. Flat fields need their value type to appear
//! earlier in the list.

use serde::{Deserialize, Serialize};

use crate::meta::{ArrayShape, FieldSpec};
use crate::{Dispatch, FieldType, MetaError, Metadata, MethodMeta, TypeMeta, TypeShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeDescription {
    Identity,
    Abstract,
    Value,
    Array,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub flat: bool,
    #[serde(default)]
    pub null_free: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescription {
    pub name: String,
    pub shape: ShapeDescription,
    #[serde(default)]
    pub null_free: bool,
    #[serde(default)]
    pub fields: Vec<FieldDescription>,
    /// Element type name, arrays only
    #[serde(default)]
    pub element: Option<String>,
    /// Flat element storage, arrays only
    #[serde(default)]
    pub flat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescription {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub null_free: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchDescription {
    Static,
    Direct,
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescription {
    pub holder: String,
    pub name: String,
    pub dispatch: DispatchDescription,
    #[serde(default)]
    pub params: Vec<ParamDescription>,
    #[serde(default)]
    pub ret: Option<ParamDescription>,
}

/// Root of the JSON document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDescription {
    #[serde(default)]
    pub types: Vec<TypeDescription>,
    #[serde(default)]
    pub methods: Vec<MethodDescription>,
}

impl MetadataDescription {
    pub fn from_json(source: &str) -> Result<Self, MetaError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Builds a registry from the description
    pub fn build(&self) -> Result<Metadata, MetaError> {
        let mut metadata = Metadata::new();

        for desc in self.types.iter().filter(|t| t.shape != ShapeDescription::Array) {
            let shape = match desc.shape {
                ShapeDescription::Identity => TypeShape::Identity,
                ShapeDescription::Abstract => TypeShape::Abstract,
                ShapeDescription::Value | ShapeDescription::Array => TypeShape::Value,
            };
            let mut meta = TypeMeta::new(desc.name.as_str(), shape);
            meta.null_free = desc.null_free;
            metadata.insert_type(meta)?;
        }

        for desc in &self.types {
            if desc.shape == ShapeDescription::Array {
                let element_name = desc.element.as_deref().ok_or_else(|| {
                    MetaError::InvalidArray(format!("'{}' has no element type", desc.name))
                })?;
                let element = metadata.parse_field_type(element_name)?;
                let id = metadata.array_of(element, desc.flat, desc.null_free)?;
                register_alias(&mut metadata, &desc.name, id, element, desc)?;
                continue;
            }
            let id = metadata.require(&desc.name)?;
            let specs = desc
                .fields
                .iter()
                .map(|field| {
                    Ok(FieldSpec {
                        name: field.name.clone(),
                        ty: metadata.parse_field_type(&field.ty)?,
                        flat: field.flat,
                        null_free: field.null_free,
                    })
                })
                .collect::<Result<Vec<_>, MetaError>>()?;
            metadata.layout_class(id, specs)?;
        }

        for desc in &self.methods {
            let holder = metadata.require(&desc.holder)?;
            let dispatch = match desc.dispatch {
                DispatchDescription::Static => Dispatch::Static,
                DispatchDescription::Direct => Dispatch::Direct,
                DispatchDescription::Virtual => Dispatch::Virtual,
            };
            let mut method = MethodMeta::new(desc.name.as_str(), holder, dispatch);
            for param in &desc.params {
                method = method.with_param(metadata.parse_field_type(&param.ty)?, param.null_free);
            }
            if let Some(ret) = &desc.ret {
                method = method.with_return(metadata.parse_field_type(&ret.ty)?, ret.null_free);
            }
            metadata.add_method(method)?;
        }

        Ok(metadata)
    }
}

/// Array types are memoized under a canonical name; a described array whose name
/// differs from it must refer to the same shape
fn register_alias(
    metadata: &mut Metadata,
    name: &str,
    id: crate::TypeId,
    element: FieldType,
    desc: &TypeDescription,
) -> Result<(), MetaError> {
    let expected = ArrayShape {
        element,
        flat: desc.flat,
        null_free: desc.null_free,
    };
    match metadata.lookup(name) {
        Some(existing) if metadata.ty(existing).array_shape() == Some(expected) => Ok(()),
        Some(_) => Err(MetaError::DuplicateType(name.to_string())),
        None => metadata.alias(name, id),
    }
}
