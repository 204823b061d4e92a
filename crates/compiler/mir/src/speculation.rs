//! Record of speculations that failed at runtime.
//!
//! When a guarded speculation deoptimizes with
//! [`crate::DeoptAction::InvalidateRecompile`], the runtime records it here and
//! later compilations stop emitting the same guard.

use std::sync::{PoisonError, RwLock};

use rustc_hash::FxHashSet;

use crate::Speculation;

/// Thread-safe set of failed speculations
#[derive(Debug, Default)]
pub struct SpeculationLog {
    failed: RwLock<FxHashSet<Speculation>>,
}

impl SpeculationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed speculation; returns false if it was already recorded
    pub fn record_failure(&self, speculation: Speculation) -> bool {
        log::debug!("recording failed speculation {speculation:?}");
        self.failed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(speculation)
    }

    /// Whether emitting `speculation` is still allowed
    pub fn may_speculate(&self, speculation: &Speculation) -> bool {
        !self
            .failed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(speculation)
    }

    pub fn len(&self) -> usize {
        self.failed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
