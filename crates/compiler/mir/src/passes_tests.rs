use flatjit_common::{Heap, Kind, NULL};

use super::*;
use crate::testing::{count, geometry_session, run};
use crate::{
    optimize_function, CompareOp, InlineNullState, Instruction, MirBuilder, MirType, Outcome,
    RefStamp, Terminator, Value,
};

#[test]
fn test_field_read_of_fresh_value_needs_no_allocation() {
    let (geometry, session) = geometry_session();
    let mut builder = MirBuilder::new(session.context(), "read_x");
    let x = builder.add_parameter(MirType::int());
    let y = builder.add_parameter(MirType::int());
    let point = builder.new_value(geometry.point, vec![x, y]).unwrap();
    let loaded = builder.load_field(point, geometry.point, "x").unwrap();
    builder.ret(vec![loaded]);
    let mut function = builder.finish();

    optimize_function(session.context(), &mut function).unwrap();

    assert_eq!(count(&function, |k| matches!(k, InstructionKind::NewInstance { .. })), 0);
    assert_eq!(count(&function, |k| matches!(k, InstructionKind::Load { .. })), 0);
    let mut heap = Heap::new();
    assert_eq!(run(&session, &mut heap, &function, &[3, 4]), Outcome::Returned(vec![3]));
    assert_eq!(heap.allocation_count(), 0);
}

#[test]
fn test_returned_value_is_materialized_once() {
    let (geometry, session) = geometry_session();
    let mut builder = MirBuilder::new(session.context(), "make");
    let x = builder.add_parameter(MirType::int());
    let y = builder.add_parameter(MirType::int());
    let point = builder.new_value(geometry.point, vec![x, y]).unwrap();
    builder.ret(vec![point]);
    let mut function = builder.finish();

    optimize_function(session.context(), &mut function).unwrap();
    assert_eq!(count(&function, |k| matches!(k, InstructionKind::NewInstance { .. })), 1);

    let mut heap = Heap::new();
    let Outcome::Returned(values) = run(&session, &mut heap, &function, &[7, (-2i64) as u64])
    else {
        panic!("unexpected deoptimization");
    };
    let object = values[0];
    assert_eq!(heap.read(object + 16, Kind::Int).unwrap(), 7);
    assert_eq!(heap.read(object + 20, Kind::Int).unwrap() as i64, -2);
    assert!(!heap.has_identity(object).unwrap());
}

#[test]
fn test_nullable_inline_value_allocates_only_when_not_null() {
    let (geometry, session) = geometry_session();
    let mut builder = MirBuilder::new(session.context(), "maybe");
    let x = builder.add_parameter(MirType::int());
    let y = builder.add_parameter(MirType::int());
    let not_null = builder.add_parameter(MirType::bool());
    let point = builder.instr().inline_value(
        geometry.point,
        vec![x, y],
        Some(InlineNullState {
            is_not_null: not_null,
            oop: Value::null(),
        }),
    );
    builder.ret(vec![point]);
    let mut function = builder.finish();

    optimize_function(session.context(), &mut function).unwrap();

    let mut heap = Heap::new();
    assert_eq!(
        run(&session, &mut heap, &function, &[1, 2, 0]),
        Outcome::Returned(vec![NULL])
    );
    assert_eq!(heap.allocation_count(), 0);

    let Outcome::Returned(values) = run(&session, &mut heap, &function, &[1, 2, 1]) else {
        panic!("unexpected deoptimization");
    };
    assert_ne!(values[0], NULL);
    assert_eq!(heap.read(values[0] + 20, Kind::Int).unwrap(), 2);
    assert_eq!(heap.allocation_count(), 1);
}

#[test]
fn test_buffered_oop_is_reused() {
    let (geometry, session) = geometry_session();
    let mut builder = MirBuilder::new(session.context(), "reuse");
    let oop = builder.add_parameter(MirType::Reference(RefStamp::exact(geometry.point)));
    let point = builder.instr().inline_value(
        geometry.point,
        vec![Value::integer(5), Value::integer(6)],
        Some(InlineNullState {
            is_not_null: Value::boolean(true),
            oop,
        }),
    );
    builder.ret(vec![point]);
    let mut function = builder.finish();
    optimize_function(session.context(), &mut function).unwrap();

    let mut heap = Heap::new();
    let existing = heap.allocate(session.metadata(), geometry.point).unwrap();
    assert_eq!(
        run(&session, &mut heap, &function, &[existing]),
        Outcome::Returned(vec![existing])
    );
    assert_eq!(heap.allocation_count(), 1);
}

#[test]
fn test_pipeline_lowers_value_comparison() {
    let (geometry, session) = geometry_session();
    let mut builder = MirBuilder::new(session.context(), "eq");
    let stamp = MirType::Reference(RefStamp::of(geometry.point));
    let left = builder.add_parameter(stamp);
    let right = builder.add_parameter(stamp);
    let equal = builder.substitutable(left, right, None).unwrap();
    builder.ret(vec![equal]);
    let mut function = builder.finish();

    let ctx = session.context();
    let mut passes = PassManager::value_object_pipeline(ctx);
    passes.run(&mut function);
    assert!(Validation::lowered().check(&function).is_ok());

    let mut heap = Heap::new();
    let point = |heap: &mut Heap, x: u64, y: u64| {
        let p = heap.allocate(session.metadata(), geometry.point).unwrap();
        heap.write(p + 16, Kind::Int, x).unwrap();
        heap.write(p + 20, Kind::Int, y).unwrap();
        p
    };
    let a = point(&mut heap, 1, 2);
    let b = point(&mut heap, 1, 2);
    let c = point(&mut heap, 2, 1);

    let mut check = |l: u64, r: u64| run(&session, &mut heap, &function, &[l, r]);
    assert_eq!(check(a, b), Outcome::Returned(vec![1]));
    assert_eq!(check(a, c), Outcome::Returned(vec![0]));
    assert_eq!(check(NULL, NULL), Outcome::Returned(vec![1]));
    assert_eq!(check(a, NULL), Outcome::Returned(vec![0]));
}

#[test]
fn test_lowered_validation_rejects_compare() {
    let mut function = MirFunction::new("unlowered");
    let left = function.add_parameter(MirType::object());
    let right = function.add_parameter(MirType::object());
    let dest = function.new_typed_value_id(MirType::bool());
    let entry = function.entry_block;
    function.basic_blocks[entry].push_instruction(Instruction::compare(
        dest,
        CompareOp::PointerEquals,
        Value::operand(left),
        Value::operand(right),
    ));
    function.basic_blocks[entry]
        .set_terminator(Terminator::return_values(vec![Value::operand(dest)]));

    assert!(Validation::new().check(&function).is_ok());
    let mut validation = Validation::lowered();
    assert!(!validation.run(&mut function));
    assert_eq!(validation.failures().len(), 1);
}

#[test]
fn test_fixed_point_reports_modification() {
    let mut function = MirFunction::new("copies");
    let param = function.add_parameter(MirType::long());
    let copy = function.new_typed_value_id(MirType::long());
    let entry = function.entry_block;
    function.basic_blocks[entry].push_instruction(Instruction::assign(copy, Value::operand(param)));
    function.basic_blocks[entry]
        .set_terminator(Terminator::return_values(vec![Value::operand(copy)]));

    let mut fixed_point = FixedPoint::new(PassManager::cleanup_pipeline(), MAX_ITERATIONS);
    assert!(fixed_point.run(&mut function));
    assert!(!fixed_point.run(&mut function));
    assert_eq!(
        function.basic_blocks[entry].terminator,
        Terminator::return_values(vec![Value::operand(param)])
    );
}
