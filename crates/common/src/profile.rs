//! Per-site profiling data gathered by the runtime before compilation.
//!
//! Only reference comparison sites carry profiles today: for each operand the
//! profile records whether it was always null, always a value object of one type,
//! or always an identity object.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::TypeId;

/// Identifies a bytecode-level site (a comparison, call or access)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub u32);

/// What was observed for one operand of a comparison site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperandObservation {
    /// Nothing recorded
    #[default]
    Unknown,
    /// Every observed value was null
    AlwaysNull,
    /// Every observed value was a value object of this type
    AlwaysInline(TypeId),
    /// Every observed value was an identity object (or null)
    AlwaysIdentity,
    /// Observed values disagreed
    Mixed,
}

impl OperandObservation {
    /// Whether this observation allows emitting a speculative guard
    pub const fn is_speculable(self) -> bool {
        matches!(self, Self::AlwaysNull | Self::AlwaysInline(_))
    }
}

/// Profile of one reference comparison site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcmpProfile {
    pub left: OperandObservation,
    pub right: OperandObservation,
}

/// All profiles available to one compilation
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    acmp: FxHashMap<SiteId, AcmpProfile>,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acmp(&mut self, site: SiteId, profile: AcmpProfile) {
        self.acmp.insert(site, profile);
    }

    pub fn acmp(&self, site: SiteId) -> Option<AcmpProfile> {
        self.acmp.get(&site).copied()
    }
}
