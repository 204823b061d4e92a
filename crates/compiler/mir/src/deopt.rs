//! # Deoptimization
//!
//! Deoptimization transfers control out of compiled code back to the
//! interpreter. It is not an error: IR construction reports it as
//! [`Lowered::Deoptimized`] when the current path can only deoptimize, and the
//! interpreter reports it as an outcome carrying the evaluated frame state.

use flatjit_common::{MethodId, SiteId};

use crate::{PrettyPrint, Value};

/// Which speculation a guard protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpeculationKind {
    /// Left comparison operand was profiled as always null
    LeftAlwaysNull,
    /// Right comparison operand was profiled as always null
    RightAlwaysNull,
    /// Left comparison operand was profiled as always one value class
    LeftAlwaysInline,
    /// Right comparison operand was profiled as always one value class
    RightAlwaysInline,
    /// An operand was profiled as never being a value object
    AlwaysIdentity,
}

/// Identifies one speculation of one compiled method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Speculation {
    pub method: Option<MethodId>,
    pub site: SiteId,
    pub kind: SpeculationKind,
}

/// Why compiled code gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    /// A profiled assumption did not hold
    Speculation(Speculation),
    /// Null stored into a null-free flattened slot
    NullFreeViolation,
    /// A path the compiler did not expect to reach
    Unreached,
}

/// What the runtime should do with the compiled code after deoptimizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptAction {
    /// Keep the compiled code
    None,
    /// Discard the compiled code and recompile without the failed speculation
    InvalidateRecompile,
}

/// Interpreter state needed to resume execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameState {
    /// Bytecode index to resume at
    pub bci: u32,
    /// Values of the interpreter locals at that point
    pub locals: Vec<Value>,
}

impl FrameState {
    pub const fn new(bci: u32, locals: Vec<Value>) -> Self {
        Self { bci, locals }
    }
}

/// A deoptimization point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deoptimization {
    pub reason: DeoptReason,
    pub action: DeoptAction,
    pub state: FrameState,
}

impl Deoptimization {
    /// The failed speculation, if this deoptimization guards one
    pub const fn speculation(&self) -> Option<Speculation> {
        match self.reason {
            DeoptReason::Speculation(speculation) => Some(speculation),
            _ => None,
        }
    }
}

impl PrettyPrint for Deoptimization {
    fn pretty_print(&self, _indent: usize) -> String {
        let locals = self
            .state
            .locals
            .iter()
            .map(|value| value.pretty_print(0))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "deoptimize {:?} {:?} @{} [{locals}]",
            self.reason, self.action, self.state.bci
        )
    }
}

/// Result of an IR-construction step that may end the current path in a
/// deoptimization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lowered<T> {
    /// Construction continues with this result
    Value(T),
    /// The current block now ends in an unconditional deoptimization
    Deoptimized(Deoptimization),
}

impl<T> Lowered<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lowered<U> {
        match self {
            Self::Value(value) => Lowered::Value(f(value)),
            Self::Deoptimized(deopt) => Lowered::Deoptimized(deopt),
        }
    }

    /// The value, if construction continues
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Deoptimized(_) => None,
        }
    }

    pub const fn is_deoptimized(&self) -> bool {
        matches!(self, Self::Deoptimized(_))
    }
}
