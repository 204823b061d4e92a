//! A boxed caller calling `Point.mirror` through its scalarized entry, executed
//! on the simulated machine: unpack the argument, run a callee that swaps the
//! leaves, then decode the tagged return.

use flatjit_common::{CompilerConfig, Heap, Kind, NULL};
use flatjit_compiler_codegen::{
    call_site_adapter, encode_return, CallLayout, Location, MacroAssembler, Machine, MachineCode,
    Register,
};
use flatjit_compiler_mir::{CompilationSession, EntryKind, SlotRole};
use flatjit_test_utils::Geometry;
use proptest::prelude::*;

struct Fixture {
    geometry: Geometry,
    session: CompilationSession,
}

impl Fixture {
    fn new() -> Self {
        flatjit_test_utils::init_tracing();
        let geometry = Geometry::new();
        let session = CompilationSession::new(geometry.metadata.clone(), CompilerConfig::default());
        Self { geometry, session }
    }

    fn point(&self, heap: &mut Heap, x: i32, y: i32) -> u64 {
        let g = &self.geometry;
        let p = heap.allocate(&g.metadata, g.point).unwrap();
        let x_at = p + g.offset(g.point, "x") as u64;
        let y_at = p + g.offset(g.point, "y") as u64;
        heap.write(x_at, Kind::Int, x as i64 as u64).unwrap();
        heap.write(y_at, Kind::Int, y as i64 as u64).unwrap();
        p
    }

    fn fields(&self, heap: &Heap, p: u64) -> (i64, i64) {
        let g = &self.geometry;
        let read = |field| {
            heap.read(p + g.offset(g.point, field) as u64, Kind::Int)
                .unwrap() as i64
        };
        (read("x"), read("y"))
    }

    /// Scalarized `mirror`: swaps its leaves into the return registers
    fn mirror_callee(&self) -> MachineCode {
        let ctx = self.session.context();
        let plan = ctx.plan(self.geometry.mirror).unwrap();
        let args = CallLayout::arguments(&plan, EntryKind::Scalarized);
        let rets = CallLayout::returns(&plan, EntryKind::Scalarized).unwrap();
        let at = |layout: &CallLayout, leaf| layout.location_of(SlotRole::Leaf(leaf)).unwrap();

        let mut masm = MacroAssembler::new();
        masm.move_slot(Location::Register(Register::R10), at(&args, 0), Kind::Int);
        masm.move_slot(at(&rets, 0), at(&args, 1), Kind::Int);
        masm.move_slot(at(&rets, 1), Location::Register(Register::R10), Kind::Int);
        let ret = plan.ret.as_ref().unwrap();
        encode_return(&mut masm, ctx.metadata, ret, &rets, None).unwrap();
        masm.finish().unwrap()
    }

    /// Runs the whole call and returns the pointer the caller ends up with
    fn call(&self, heap: &mut Heap, argument: u64) -> u64 {
        let adapter = call_site_adapter(self.session.context(), self.geometry.mirror, true).unwrap();
        let (_, decode) = adapter.returns.as_ref().unwrap();
        let callee = self.mirror_callee();

        let mut machine = Machine::new(&self.geometry.metadata, heap);
        machine.set(adapter.current.locations[0], argument);
        machine.run(&adapter.arguments).unwrap();
        machine.run(&callee).unwrap();
        machine.run(decode).unwrap();
        machine.register(Register::RAX)
    }
}

#[test]
fn test_mirror_round_trip_allocates_only_the_result() {
    let fixture = Fixture::new();
    let mut heap = Heap::new();
    let p = fixture.point(&mut heap, 3, 4);

    let result = fixture.call(&mut heap, p);
    assert_ne!(result, NULL);
    assert_ne!(result, p);
    assert_eq!(fixture.fields(&heap, result), (4, 3));
    assert_eq!(fixture.fields(&heap, p), (3, 4));
    assert_eq!(heap.allocation_count(), 2);
    assert!(!heap.has_identity(result).unwrap());
}

#[test]
fn test_adapter_listing() {
    let fixture = Fixture::new();
    let adapter =
        call_site_adapter(fixture.session.context(), fixture.geometry.mirror, true).unwrap();
    let (_, decode) = adapter.returns.as_ref().unwrap();
    let listing: Vec<_> = decode.to_asm().lines().map(str::trim).map(String::from).collect();
    assert_eq!(
        listing,
        vec![
            "test rax, 0x1",
            "jz .buffered_0",
            "and rax, 0xfffffffffffffffe",
            "call allocate_instance(rax) -> rax",
            "mov dword [rax+16], rdx",
            "mov dword [rax+20], rcx",
            ".buffered_0:",
        ]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_scalarized_call_matches_boxed_semantics(x in any::<i32>(), y in any::<i32>()) {
        let fixture = Fixture::new();
        let mut heap = Heap::new();
        let p = fixture.point(&mut heap, x, y);
        let result = fixture.call(&mut heap, p);
        prop_assert_eq!(fixture.fields(&heap, result), (y as i64, x as i64));
    }
}
