use flatjit_common::{CompilerConfig, Heap, Metadata, NULL};
use flatjit_compiler_mir::{CompilationSession, EntryKind};
use flatjit_test_utils::Geometry;
use proptest::prelude::*;
use smallvec::smallvec;

use super::*;
use crate::{call_site_adapter, MachInst, Machine};

const fn reg(register: Register) -> Location {
    Location::Register(register)
}

const GENERAL: [Location; 8] = [
    reg(Register::RDI),
    reg(Register::RSI),
    reg(Register::RDX),
    reg(Register::RCX),
    reg(Register::R8),
    reg(Register::R9),
    Location::Stack(0),
    Location::Stack(8),
];

const FLOATING: [Location; 8] = [
    reg(Register::Xmm(0)),
    reg(Register::Xmm(1)),
    reg(Register::Xmm(2)),
    reg(Register::Xmm(3)),
    reg(Register::Xmm(4)),
    reg(Register::Xmm(5)),
    Location::Stack(0),
    Location::Stack(8),
];

const MIXED: [Location; 6] = [
    reg(Register::RDI),
    Location::Stack(0),
    reg(Register::RSI),
    Location::Stack(8),
    reg(Register::RDX),
    Location::Stack(16),
];

fn listing(code: &MachineCode) -> String {
    code.to_asm()
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

fn marker(index: usize) -> u64 {
    0x5eed_0000 + index as u64 * 0x101
}

fn moves(sources: &[Location], targets: &[Location], kind: Kind) -> Vec<ShuffleJob> {
    sources
        .iter()
        .zip(targets)
        .map(|(&src, &dst)| ShuffleJob::Move { src, dst, kind })
        .collect()
}

/// Runs the shuffle of `jobs` on the simulator, seeding every source with a marker
fn run_moves(jobs: &[ShuffleJob]) -> (ShuffleStats, MachineCode) {
    let mut masm = MacroAssembler::new();
    let stats = shuffle(&mut masm, jobs.to_vec()).unwrap();
    let code = masm.finish().unwrap();

    let metadata = Metadata::new();
    let mut heap = Heap::new();
    let mut machine = Machine::new(&metadata, &mut heap);
    for (index, job) in jobs.iter().enumerate() {
        machine.set(job.source(), marker(index));
    }
    machine.run(&code).unwrap();
    for (index, job) in jobs.iter().enumerate() {
        for dst in job.destinations() {
            assert_eq!(
                machine.get(dst).unwrap(),
                marker(index),
                "job {index} did not reach {dst}\n{code}"
            );
        }
    }
    assert!(stats.passes <= 2 * jobs.len());
    (stats, code)
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![vec![]];
    }
    let mut result = Vec::new();
    for rest in permutations(n - 1) {
        for at in 0..=rest.len() {
            let mut perm = rest.clone();
            perm.insert(at, n - 1);
            result.push(perm);
        }
    }
    result
}

#[test]
fn test_chain_resolves_in_one_pass() {
    let jobs = moves(
        &[reg(Register::RDI), reg(Register::RSI)],
        &[reg(Register::RSI), reg(Register::RDX)],
        Kind::Long,
    );
    let (stats, code) = run_moves(&jobs);
    assert_eq!(stats, ShuffleStats { passes: 1, spills: 0 });
    assert_eq!(code.len(), 2);
}

#[test]
fn test_swap_spills_once() {
    let jobs = moves(
        &[reg(Register::RDI), reg(Register::RSI)],
        &[reg(Register::RSI), reg(Register::RDI)],
        Kind::Int,
    );
    let (stats, code) = run_moves(&jobs);
    assert_eq!(stats, ShuffleStats { passes: 4, spills: 1 });
    insta::assert_snapshot!(listing(&code), @r"
    mov r13, rsi                     // spill
    mov rsi, rdi
    mov rdi, r13
    ");
}

#[test]
fn test_cycles_of_both_classes_use_their_own_scratch() {
    let mut jobs = moves(
        &[reg(Register::RDI), reg(Register::RSI)],
        &[reg(Register::RSI), reg(Register::RDI)],
        Kind::Long,
    );
    jobs.extend(moves(
        &[reg(Register::Xmm(0)), reg(Register::Xmm(1))],
        &[reg(Register::Xmm(1)), reg(Register::Xmm(0))],
        Kind::Double,
    ));
    let (stats, code) = run_moves(&jobs);
    assert_eq!(stats.spills, 2);
    assert_eq!(
        code.count(|inst| matches!(inst, MachInst::Mov { dst, .. } if dst.is_reserved())),
        2
    );
}

#[test]
fn test_every_permutation_of_six_locations() {
    for n in 1..=MIXED.len() {
        let sources = &MIXED[..n];
        for perm in permutations(n) {
            let targets: Vec<_> = perm.iter().map(|&i| MIXED[i]).collect();
            run_moves(&moves(sources, &targets, Kind::Long));
        }
    }
}

#[test]
fn test_unpack_reads_through_a_stack_slot_it_overwrites() {
    let geometry = Geometry::new();
    let value = geometry.offset(geometry.measure, "value");
    let count = geometry.offset(geometry.measure, "count");

    let mut heap = Heap::new();
    let measure = heap.allocate(&geometry.metadata, geometry.measure).unwrap();
    heap.write(measure + value as u64, Kind::Double, 1.5f64.to_bits())
        .unwrap();
    heap.write(measure + count as u64, Kind::Long, 7).unwrap();

    let jobs = vec![
        ShuffleJob::Unpack {
            src: reg(Register::RDI),
            fields: smallvec![
                FieldMove {
                    offset: value,
                    kind: Kind::Double,
                    dst: Location::Stack(0),
                },
                FieldMove {
                    offset: count,
                    kind: Kind::Long,
                    dst: reg(Register::RSI),
                },
            ],
            not_null: None,
        },
        ShuffleJob::Move {
            src: Location::Stack(0),
            dst: reg(Register::RDX),
            kind: Kind::Long,
        },
    ];
    let mut masm = MacroAssembler::new();
    let stats = shuffle(&mut masm, jobs).unwrap();
    let code = masm.finish().unwrap();
    assert_eq!(stats, ShuffleStats { passes: 1, spills: 0 });
    assert_eq!(
        code.count(|inst| matches!(inst, MachInst::LoadField { dst, .. } if *dst == Register::XMM14)),
        1
    );

    let mut machine = Machine::new(&geometry.metadata, &mut heap);
    machine.set(reg(Register::RDI), measure);
    machine.set(Location::Stack(0), 99);
    machine.run(&code).unwrap();
    assert_eq!(machine.get(reg(Register::RDX)).unwrap(), 99);
    assert_eq!(machine.get(Location::Stack(0)).unwrap(), 1.5f64.to_bits());
    assert_eq!(machine.get(reg(Register::RSI)).unwrap(), 7);
}

fn session() -> (Geometry, CompilationSession) {
    flatjit_test_utils::init_tracing();
    let geometry = Geometry::new();
    let session = CompilationSession::new(geometry.metadata.clone(), CompilerConfig::default());
    (geometry, session)
}

fn point(geometry: &Geometry, heap: &mut Heap, x: i32, y: i32) -> u64 {
    let p = heap.allocate(&geometry.metadata, geometry.point).unwrap();
    let at = |field| p + geometry.offset(geometry.point, field) as u64;
    heap.write(at("x"), Kind::Int, x as i64 as u64).unwrap();
    heap.write(at("y"), Kind::Int, y as i64 as u64).unwrap();
    p
}

#[test]
fn test_boxed_point_unpacks_into_its_own_register() {
    let (geometry, session) = session();
    let adapter = call_site_adapter(session.context(), geometry.mirror, true).unwrap();
    assert_eq!(adapter.expected.entry, EntryKind::Scalarized);
    assert_eq!(adapter.expected.locations, vec![reg(Register::RDI), reg(Register::RSI)]);
    insta::assert_snapshot!(listing(&adapter.arguments), @r"
    mov rsi, dword [rdi+20]
    mov rdi, dword [rdi+16]
    ");

    let mut heap = Heap::new();
    let p = point(&geometry, &mut heap, 3, -4);
    let mut machine = Machine::new(&geometry.metadata, &mut heap);
    machine.set(reg(Register::RDI), p);
    machine.run(&adapter.arguments).unwrap();
    assert_eq!(machine.register(Register::RDI), 3);
    assert_eq!(machine.register(Register::RSI) as i64, -4);
}

#[test]
fn test_nullable_position_sets_or_clears_not_null() {
    let (geometry, session) = session();
    let adapter = call_site_adapter(session.context(), geometry.identity, true).unwrap();
    insta::assert_snapshot!(listing(&adapter.arguments), @r"
    test rdi, rdi
    jz .null_0
    mov rsi, dword [rdi+20]
    mov rdi, dword [rdi+16]
    mov rdx, 0x1                     // not null
    jmp .unpacked_1
    .null_0:
    xor rdi, rdi
    xor rsi, rsi
    xor rdx, rdx
    .unpacked_1:
    ");

    let mut heap = Heap::new();
    let p = point(&geometry, &mut heap, 5, 6);
    for (arg, expected) in [(p, [5, 6, 1]), (NULL, [0, 0, 0])] {
        let mut machine = Machine::new(&geometry.metadata, &mut heap);
        machine.set_register(Register::RSI, 0xdead);
        machine.set_register(Register::RDX, 0xbeef);
        machine.set(reg(Register::RDI), arg);
        machine.run(&adapter.arguments).unwrap();
        let slots: Vec<_> = adapter
            .expected
            .locations
            .iter()
            .map(|&location| machine.get(location).unwrap())
            .collect();
        assert_eq!(slots, expected.to_vec());
    }
}

#[test]
fn test_receiver_boxed_entry_needs_no_unpacking() {
    let (geometry, session) = session();
    let ctx = session.context();

    let dynamic = call_site_adapter(ctx, geometry.translate, false).unwrap();
    assert_eq!(dynamic.expected.entry, EntryKind::ScalarizedReceiverBoxed);
    assert!(dynamic.arguments.is_empty());
    assert!(dynamic.returns.is_some());

    let direct = call_site_adapter(ctx, geometry.translate, true).unwrap();
    assert_eq!(direct.expected.entry, EntryKind::Scalarized);
    let mut heap = Heap::new();
    let p = point(&geometry, &mut heap, 10, 20);
    let mut machine = Machine::new(&geometry.metadata, &mut heap);
    machine.set(reg(Register::RDI), p);
    machine.set(reg(Register::RSI), 5);
    machine.run(&direct.arguments).unwrap();
    assert_eq!(
        [Register::RDI, Register::RSI, Register::RDX].map(|r| machine.register(r)),
        [10, 20, 5]
    );
}

#[test]
fn test_flattened_arguments_reserve_stack_once() {
    let (geometry, session) = session();
    let plan = session.context().plan(geometry.length2).unwrap();
    let current = CallLayout {
        entry: EntryKind::Boxed,
        slots: plan.param_slots(EntryKind::Boxed),
        locations: vec![Location::Stack(0)],
        stack_size: 8,
    };
    let expected = CallLayout {
        entry: EntryKind::Scalarized,
        slots: plan.param_slots(EntryKind::Scalarized),
        locations: vec![
            Location::Stack(0),
            Location::Stack(8),
            Location::Stack(16),
            reg(Register::RDI),
        ],
        stack_size: 24,
    };
    let code = unpack(&plan, &current, &expected).unwrap();
    assert_eq!(code.insts().next(), Some(&MachInst::ReserveStack(16)));
    assert_eq!(code.count(|inst| matches!(inst, MachInst::ReserveStack(_))), 1);

    let mut heap = Heap::new();
    let line = heap.allocate(&geometry.metadata, geometry.line).unwrap();
    for (leaf, field) in plan.params[0].fields().iter().enumerate() {
        heap.write(line + field.offset as u64, field.kind, leaf as u64 + 1)
            .unwrap();
    }
    let mut machine = Machine::new(&geometry.metadata, &mut heap);
    machine.set(Location::Stack(0), line);
    machine.run(&code).unwrap();

    let slots: Vec<_> = expected
        .locations
        .iter()
        .map(|&location| machine.get(location).unwrap())
        .collect();
    assert_eq!(slots, vec![1, 2, 3, 4]);
}

#[test]
fn test_scalarized_caller_cannot_feed_boxed_entry() {
    let (geometry, session) = session();
    let plan = session.context().plan(geometry.mirror).unwrap();
    let current = CallLayout::arguments(&plan, EntryKind::Scalarized);
    let expected = CallLayout::arguments(&plan, EntryKind::Boxed);
    assert!(matches!(
        unpack(&plan, &current, &expected),
        Err(CodegenError::Unsupported(_))
    ));
}

fn permutation_of(
    pool: &'static [Location],
) -> impl Strategy<Value = (Vec<Location>, Vec<Location>)> {
    (1..=pool.len())
        .prop_flat_map(move |n| proptest::sample::subsequence(pool.to_vec(), n))
        .prop_flat_map(|sources| {
            let targets = Just(sources.clone()).prop_shuffle();
            (Just(sources), targets)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_general_permutations_resolve((sources, targets) in permutation_of(&GENERAL)) {
        run_moves(&moves(&sources, &targets, Kind::Long));
    }

    #[test]
    fn prop_floating_permutations_resolve((sources, targets) in permutation_of(&FLOATING)) {
        run_moves(&moves(&sources, &targets, Kind::Double));
    }

    #[test]
    fn prop_unpacked_leaves_match_fields(x in any::<i32>(), y in any::<i32>(), null in any::<bool>()) {
        let (geometry, session) = session();
        let adapter = call_site_adapter(session.context(), geometry.identity, true).unwrap();
        let mut heap = Heap::new();
        let arg = if null { NULL } else { point(&geometry, &mut heap, x, y) };

        let mut machine = Machine::new(&geometry.metadata, &mut heap);
        machine.set(reg(Register::RDI), arg);
        machine.run(&adapter.arguments).unwrap();
        let slots: Vec<_> = adapter
            .expected
            .locations
            .iter()
            .map(|&location| machine.get(location).unwrap())
            .collect();
        let expected = if null {
            vec![0, 0, 0]
        } else {
            vec![x as i64 as u64, y as i64 as u64, 1]
        };
        prop_assert_eq!(slots, expected);
    }
}
