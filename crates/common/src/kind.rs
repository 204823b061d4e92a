//! # Slot Kinds
//!
//! Every leaf of a flattened aggregate, every calling-convention slot and every
//! heap access is typed by a [`Kind`]. Values of all kinds travel as 64-bit raw
//! slot bits: integral kinds are sign- or zero-extended, `Float` occupies the low
//! 32 bits and `Object` holds an address.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MetaError;

/// Primitive kinds plus object references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object,
}

/// Canonical quiet NaN used when comparing float bits
const CANONICAL_F32_NAN: u64 = 0x7fc0_0000;
/// Canonical quiet NaN used when comparing double bits
const CANONICAL_F64_NAN: u64 = 0x7ff8_0000_0000_0000;

impl Kind {
    /// All kinds, in declaration order
    pub const ALL: [Self; 9] = [
        Self::Boolean,
        Self::Byte,
        Self::Short,
        Self::Char,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Object,
    ];

    /// Size in bytes of a value of this kind when stored in memory
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Short | Self::Char => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double | Self::Object => 8,
        }
    }

    /// Returns true for object references
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object)
    }

    /// Returns true for kinds that live in floating-point registers
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Returns true for kinds that are sign-extended when widened to a slot
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Byte | Self::Short | Self::Int | Self::Long)
    }

    /// Mask selecting the bits a value of this kind occupies in memory
    pub const fn memory_mask(self) -> u64 {
        match self.byte_size() {
            1 => 0xff,
            2 => 0xffff,
            4 => 0xffff_ffff,
            _ => u64::MAX,
        }
    }

    /// Widens raw memory bits of this kind into slot representation
    pub const fn widen(self, raw: u64) -> u64 {
        let raw = raw & self.memory_mask();
        match self {
            Self::Byte => raw as u8 as i8 as i64 as u64,
            Self::Short => raw as u16 as i16 as i64 as u64,
            Self::Int => raw as u32 as i32 as i64 as u64,
            Self::Boolean => (raw != 0) as u64,
            _ => raw,
        }
    }

    /// Narrows slot bits of this kind to the bits stored in memory
    pub const fn narrow(self, bits: u64) -> u64 {
        bits & self.memory_mask()
    }

    /// Substitutability comparison of two slot values of this kind.
    ///
    /// Integral kinds and references compare their raw bits. Floating kinds compare
    /// bit patterns after collapsing every NaN into the canonical NaN, so two NaN
    /// leaves are equal while `0.0` and `-0.0` are not.
    pub fn bits_equal(self, left: u64, right: u64) -> bool {
        match self {
            Self::Float => canonical_f32(left) == canonical_f32(right),
            Self::Double => canonical_f64(left) == canonical_f64(right),
            _ => self.narrow(left) == self.narrow(right),
        }
    }

    /// The lowercase source-level name of this kind
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Char => "char",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Object => "object",
        }
    }
}

fn canonical_f32(bits: u64) -> u64 {
    let bits = bits & 0xffff_ffff;
    if f32::from_bits(bits as u32).is_nan() {
        CANONICAL_F32_NAN
    } else {
        bits
    }
}

fn canonical_f64(bits: u64) -> u64 {
    if f64::from_bits(bits).is_nan() {
        CANONICAL_F64_NAN
    } else {
        bits
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| MetaError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_widen_sign_extends_small_kinds() {
        assert_eq!(Kind::Byte.widen(0xff), u64::MAX);
        assert_eq!(Kind::Char.widen(0xffff), 0xffff);
        assert_eq!(Kind::Int.widen(0xffff_fffe) as i64, -2);
        assert_eq!(Kind::Boolean.widen(2), 1);
    }

    #[test]
    fn test_bits_equal_collapses_nans() {
        let nan_a = f32::NAN.to_bits() as u64;
        let nan_b = (f32::NAN.to_bits() | 1) as u64;
        assert!(Kind::Float.bits_equal(nan_a, nan_b));
        assert!(!Kind::Float.bits_equal(0.0f32.to_bits() as u64, (-0.0f32).to_bits() as u64));
        assert!(Kind::Double.bits_equal(f64::NAN.to_bits(), f64::NAN.to_bits() | 3));
    }

    #[test]
    fn test_bits_equal_ignores_bits_outside_memory_width() {
        assert!(Kind::Int.bits_equal(0x1_0000_0005, 5));
        assert!(!Kind::Long.bits_equal(0x1_0000_0005, 5));
    }

    #[test]
    fn test_parse_kind_names() {
        assert_eq!("double".parse::<Kind>().unwrap(), Kind::Double);
        assert!("quad".parse::<Kind>().is_err());
    }

    proptest! {
        #[test]
        fn prop_narrow_then_widen_keeps_slot_values(value in any::<i64>()) {
            let slots = [
                (Kind::Byte, value as i8 as i64 as u64),
                (Kind::Short, value as i16 as i64 as u64),
                (Kind::Char, value as u16 as u64),
                (Kind::Int, value as i32 as i64 as u64),
                (Kind::Long, value as u64),
            ];
            for (kind, slot) in slots {
                prop_assert_eq!(kind.widen(kind.narrow(slot)), slot);
            }
        }

        #[test]
        fn prop_bits_equal_is_reflexive(bits in any::<u64>()) {
            for kind in Kind::ALL {
                prop_assert!(kind.bits_equal(bits, bits));
            }
        }
    }
}
