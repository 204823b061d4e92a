//! # Testing Utilities for MIR
//!
//! Helpers shared by the unit tests of this crate: a session over the
//! geometry fixture and shortcuts to run and inspect functions.

use flatjit_common::{CompilerConfig, Heap};
use flatjit_test_utils::Geometry;

use crate::{CompilationSession, InstructionKind, Interpreter, MirFunction, Outcome};

/// A session over the geometry fixture with the default configuration
pub fn geometry_session() -> (Geometry, CompilationSession) {
    geometry_session_with(CompilerConfig::default())
}

pub fn geometry_session_with(config: CompilerConfig) -> (Geometry, CompilationSession) {
    let geometry = Geometry::new();
    let session = CompilationSession::new(geometry.metadata.clone(), config);
    (geometry, session)
}

/// Runs `function` on `heap`, panicking on interpreter errors
pub fn run(
    session: &CompilationSession,
    heap: &mut Heap,
    function: &MirFunction,
    args: &[u64],
) -> Outcome {
    Interpreter::new(session.context(), heap)
        .execute(function, args)
        .unwrap_or_else(|e| panic!("executing '{}' failed: {e}", function.name))
}

/// Number of instructions matching `predicate`
pub fn count(function: &MirFunction, predicate: impl Fn(&InstructionKind) -> bool) -> usize {
    function
        .instructions()
        .filter(|(_, _, instr)| predicate(&instr.kind))
        .count()
}
