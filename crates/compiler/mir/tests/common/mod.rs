#![allow(dead_code)]

use flatjit_common::{CompilerConfig, Heap, Kind, ProfileTable, SiteId, TypeId};
use flatjit_compiler_mir::{
    optimize_function, CompilationSession, InstructionKind, Interpreter, MirBuilder, MirFunction,
    MirModule, MirType, Outcome,
};
use flatjit_test_utils::Geometry;

pub fn session() -> (Geometry, CompilationSession) {
    session_with(CompilerConfig::default())
}

pub fn session_with(config: CompilerConfig) -> (Geometry, CompilationSession) {
    flatjit_test_utils::init_tracing();
    let geometry = Geometry::new();
    let session = CompilationSession::new(geometry.metadata.clone(), config);
    (geometry, session)
}

pub fn profiled_session(profiles: ProfileTable) -> (Geometry, CompilationSession) {
    let (geometry, session) = session();
    (geometry, session.with_profiles(profiles))
}

/// `eq(left, right)` with the given parameter stamps, optimized and lowered
pub fn compile_eq(
    session: &CompilationSession,
    left: MirType,
    right: MirType,
    site: Option<SiteId>,
) -> MirFunction {
    let mut builder = MirBuilder::new(session.context(), "eq");
    let l = builder.add_parameter(left);
    let r = builder.add_parameter(right);
    let result = builder.substitutable(l, r, site).unwrap();
    builder.ret(vec![result]);
    let mut function = builder.finish();
    optimize_function(session.context(), &mut function).unwrap();
    function
}

pub fn execute(
    session: &CompilationSession,
    heap: &mut Heap,
    function: &MirFunction,
    args: &[u64],
) -> Outcome {
    Interpreter::new(session.context(), heap)
        .execute(function, args)
        .unwrap_or_else(|e| panic!("executing '{}' failed: {e}", function.name))
}

pub fn execute_in(
    session: &CompilationSession,
    module: &MirModule,
    heap: &mut Heap,
    function: &MirFunction,
    args: &[u64],
) -> Outcome {
    Interpreter::new(session.context(), heap)
        .with_module(module)
        .execute(function, args)
        .unwrap_or_else(|e| panic!("executing '{}' failed: {e}", function.name))
}

/// Single returned slot, panicking on deoptimization
pub fn returned(outcome: Outcome) -> u64 {
    match outcome {
        Outcome::Returned(values) => values[0],
        other => panic!("expected a return, got {other:?}"),
    }
}

/// Allocates an instance of `ty` and writes `values` to its declared fields
pub fn object(
    geometry: &Geometry,
    heap: &mut Heap,
    ty: TypeId,
    values: &[(&str, Kind, u64)],
) -> u64 {
    let address = heap.allocate(&geometry.metadata, ty).unwrap();
    for &(field, kind, bits) in values {
        let offset = geometry.offset(ty, field) as u64;
        heap.write(address + offset, kind, bits).unwrap();
    }
    address
}

pub fn point(geometry: &Geometry, heap: &mut Heap, x: i32, y: i32) -> u64 {
    object(
        geometry,
        heap,
        geometry.point,
        &[("x", Kind::Int, x as i64 as u64), ("y", Kind::Int, y as i64 as u64)],
    )
}

pub fn count(function: &MirFunction, predicate: impl Fn(&InstructionKind) -> bool) -> usize {
    function
        .instructions()
        .filter(|(_, _, instr)| predicate(&instr.kind))
        .count()
}
