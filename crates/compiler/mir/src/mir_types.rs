//! # MIR Type System
//!
//! Types of MIR values. References carry a stamp: what the compiler statically
//! knows about the referenced object (its type, whether the type is exact and
//! whether the reference can be null). The substitutability engine and the
//! flattened access layer make most of their decisions from stamps.

use flatjit_common::{FieldType, Kind, Metadata, TypeId};

/// Static knowledge about a reference value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefStamp {
    /// Declared type, `None` when nothing is known (any object)
    pub ty: Option<TypeId>,
    /// The runtime type is exactly `ty`, not a subtype or a sibling representation
    pub exact: bool,
    /// The reference is never null
    pub non_null: bool,
    /// The reference is always null
    pub always_null: bool,
}

impl RefStamp {
    /// A reference about which nothing is known
    pub const fn unknown() -> Self {
        Self {
            ty: None,
            exact: false,
            non_null: false,
            always_null: false,
        }
    }

    /// A possibly-null reference of declared type `ty`
    pub const fn of(ty: TypeId) -> Self {
        Self {
            ty: Some(ty),
            exact: false,
            non_null: false,
            always_null: false,
        }
    }

    /// A reference whose runtime type is exactly `ty`
    pub const fn exact(ty: TypeId) -> Self {
        Self {
            ty: Some(ty),
            exact: true,
            non_null: false,
            always_null: false,
        }
    }

    /// The null constant
    pub const fn null() -> Self {
        Self {
            ty: None,
            exact: false,
            non_null: false,
            always_null: true,
        }
    }

    pub const fn with_non_null(mut self, non_null: bool) -> Self {
        self.non_null = non_null;
        self
    }

    /// Whether every non-null value with this stamp has identity
    pub fn has_identity(&self, metadata: &Metadata) -> bool {
        self.ty
            .is_some_and(|ty| metadata.get(ty).is_some_and(|meta| meta.has_identity()))
    }

    /// The value class every non-null value with this stamp belongs to, if known.
    ///
    /// Value classes are final, so a value-class stamp is exact even when not
    /// marked as such.
    pub fn exact_value_type(&self, metadata: &Metadata) -> Option<TypeId> {
        self.ty
            .filter(|&ty| metadata.get(ty).is_some_and(|meta| meta.is_value()))
    }

    /// Whether a non-null value with this stamp may be a value object
    pub fn may_be_value(&self, metadata: &Metadata) -> bool {
        match self.ty {
            None => true,
            Some(ty) => metadata.get(ty).is_some_and(|meta| meta.may_be_value()),
        }
    }
}

/// A type representation for MIR values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirType {
    /// A primitive slot
    Primitive(Kind),

    /// An object reference
    Reference(RefStamp),

    /// A metadata pointer
    Hub,

    /// An interior pointer into an object (array element base)
    Address,

    /// Unit type (no value)
    Unit,

    /// Unknown type (for incomplete analysis)
    Unknown,
}

impl MirType {
    pub const fn bool() -> Self {
        Self::Primitive(Kind::Boolean)
    }

    pub const fn int() -> Self {
        Self::Primitive(Kind::Int)
    }

    pub const fn long() -> Self {
        Self::Primitive(Kind::Long)
    }

    pub const fn object() -> Self {
        Self::Reference(RefStamp::unknown())
    }

    pub const fn reference(ty: TypeId) -> Self {
        Self::Reference(RefStamp::of(ty))
    }

    pub const fn unknown() -> Self {
        Self::Unknown
    }

    /// Type of a value declared with `ty`
    pub const fn from_field_type(ty: FieldType, null_free: bool) -> Self {
        match ty {
            FieldType::Primitive(kind) => Self::Primitive(kind),
            FieldType::Reference(id) => Self::Reference(RefStamp::of(id).with_non_null(null_free)),
        }
    }

    /// Type of a slot of the given kind
    pub const fn from_kind(kind: Kind) -> Self {
        match kind {
            Kind::Object => Self::object(),
            _ => Self::Primitive(kind),
        }
    }

    /// The slot kind holding values of this type
    pub const fn kind(&self) -> Kind {
        match self {
            Self::Primitive(kind) => *kind,
            Self::Reference(_) | Self::Hub | Self::Address | Self::Unknown => Kind::Object,
            Self::Unit => Kind::Long,
        }
    }

    /// The reference stamp, if this is a reference type
    pub const fn stamp(&self) -> Option<RefStamp> {
        match self {
            Self::Reference(stamp) => Some(*stamp),
            _ => None,
        }
    }

    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }
}

impl std::fmt::Display for MirType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primitive(kind) => write!(f, "{kind}"),
            Self::Reference(stamp) => {
                match stamp.ty {
                    Some(ty) => write!(f, "ref<{}>", ty.index())?,
                    None => write!(f, "ref")?,
                }
                if stamp.non_null {
                    write!(f, "!")?;
                }
                Ok(())
            }
            Self::Hub => write!(f, "hub"),
            Self::Address => write!(f, "addr"),
            Self::Unit => write!(f, "()"),
            Self::Unknown => write!(f, "?"),
        }
    }
}
