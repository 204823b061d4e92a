//! # MIR Builder Components
//!
//! This module contains specialized builders for different aspects of MIR construction.
//! The builders are designed to separate concerns and provide clean APIs for specific tasks.
//!
//! [`MirBuilder`] ties them together and carries the value-object operations:
//! flattened field access, substitutability checks and scalarized calls.

mod calls;
mod cfg_builder;
mod flat_access;
mod instr_builder;
mod mir_builder;
mod substitutability;

pub use cfg_builder::CfgBuilder;
pub use flat_access::ArrayLayout;
pub use instr_builder::InstrBuilder;
pub use mir_builder::MirBuilder;
