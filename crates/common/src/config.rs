//! # Compiler Configuration
//!
//! Feature switches and policy knobs for the value-object layer. The
//! configuration is an immutable value threaded through every entry point;
//! there are no process-wide flags.
//!
//! ```toml
//! inline_types_enabled = true
//! max_scalarized_slots = 16
//! max_substitutability_depth = 3
//! ```

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Configuration of the value-object layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Master switch for flattening in signatures, fields and arrays
    pub inline_types_enabled: bool,
    /// Pass aggregate parameters as their leaf fields
    pub scalarize_parameters: bool,
    /// Return aggregates in registers using tagged returns
    pub scalarize_returns: bool,
    /// Allow flat array representations
    pub flatten_arrays: bool,
    /// Largest number of slots a single scalarized position may occupy
    pub max_scalarized_slots: usize,
    /// Nesting bound for compile-time field-wise comparison expansion
    pub max_substitutability_depth: usize,
    /// Use per-site comparison profiles to speculate
    pub use_acmp_profiles: bool,
    /// Skip speculations that already failed at the same site
    pub use_speculation_log: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            inline_types_enabled: true,
            scalarize_parameters: true,
            scalarize_returns: true,
            flatten_arrays: true,
            max_scalarized_slots: 16,
            max_substitutability_depth: 3,
            use_acmp_profiles: true,
            use_speculation_log: true,
        }
    }
}

impl CompilerConfig {
    /// Parses a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Configuration with every flattening feature disabled
    pub fn boxed() -> Self {
        Self {
            inline_types_enabled: false,
            ..Self::default()
        }
    }

    pub const fn parameters_scalarized(&self) -> bool {
        self.inline_types_enabled && self.scalarize_parameters
    }

    pub const fn returns_scalarized(&self) -> bool {
        self.inline_types_enabled && self.scalarize_returns
    }

    pub const fn arrays_flattened(&self) -> bool {
        self.inline_types_enabled && self.flatten_arrays
    }
}
