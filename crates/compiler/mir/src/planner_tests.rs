use flatjit_common::{CompilerConfig, Kind};

use super::*;
use crate::testing::{geometry_session, geometry_session_with};

fn roles(slots: &[Slot]) -> Vec<(SlotRole, Kind)> {
    slots.iter().map(|slot| (slot.role, slot.kind)).collect()
}

#[test]
fn test_null_free_static_method_is_fully_scalarized() {
    let (geometry, session) = geometry_session();
    let plan = session.context().plan(geometry.mirror).unwrap();

    assert!(plan.any_param_scalarized());
    assert!(plan.return_scalarized());
    assert_eq!(plan.entries(), vec![EntryKind::Scalarized, EntryKind::Boxed]);
    assert_eq!(
        roles(&plan.param_slots(EntryKind::Scalarized)),
        vec![(SlotRole::Leaf(0), Kind::Int), (SlotRole::Leaf(1), Kind::Int)]
    );
    assert_eq!(
        roles(&plan.return_slots(EntryKind::Scalarized)),
        vec![
            (SlotRole::TaggedReturn, Kind::Object),
            (SlotRole::Leaf(0), Kind::Int),
            (SlotRole::Leaf(1), Kind::Int),
        ]
    );
    assert_eq!(
        roles(&plan.return_slots(EntryKind::Boxed)),
        vec![(SlotRole::Reference, Kind::Object)]
    );
}

#[test]
fn test_nullable_position_gets_a_not_null_slot() {
    let (geometry, session) = geometry_session();
    let plan = session.context().plan(geometry.identity).unwrap();

    let param = &plan.params[0];
    assert!(!param.null_free);
    assert_eq!(param.scalarized_slot_count(), 3);
    assert_eq!(
        roles(&plan.param_slots(EntryKind::Scalarized)),
        vec![
            (SlotRole::Leaf(0), Kind::Int),
            (SlotRole::Leaf(1), Kind::Int),
            (SlotRole::NotNull, Kind::Boolean),
        ]
    );
    assert_eq!(
        roles(&plan.return_slots(EntryKind::Scalarized)),
        vec![
            (SlotRole::TaggedReturn, Kind::Object),
            (SlotRole::Leaf(0), Kind::Int),
            (SlotRole::Leaf(1), Kind::Int),
            (SlotRole::NotNull, Kind::Boolean),
        ]
    );
}

#[test]
fn test_virtual_method_has_receiver_boxed_entry() {
    let (geometry, session) = geometry_session();
    let plan = session.context().plan(geometry.translate).unwrap();

    assert!(plan.has_receiver);
    assert!(plan.receiver_scalarized());
    assert_eq!(plan.entries(), EntryKind::ALL.to_vec());
    assert_eq!(plan.entry_for_call(true), EntryKind::Scalarized);
    assert_eq!(plan.entry_for_call(false), EntryKind::ScalarizedReceiverBoxed);

    assert!(!plan.param_scalarized_in(0, EntryKind::ScalarizedReceiverBoxed));
    assert!(plan.param_scalarized_in(0, EntryKind::Scalarized));
    assert_eq!(
        roles(&plan.param_slots(EntryKind::ScalarizedReceiverBoxed)),
        vec![
            (SlotRole::Reference, Kind::Object),
            (SlotRole::Primitive, Kind::Int),
        ]
    );
    assert!(plan.return_scalarized_in(EntryKind::ScalarizedReceiverBoxed));
}

#[test]
fn test_nested_null_free_aggregate_flattens_all_leaves() {
    let (geometry, session) = geometry_session();
    let plan = session.context().plan(geometry.length2).unwrap();

    let names: Vec<_> = plan.params[0]
        .fields()
        .iter()
        .map(|field| field.name.as_str())
        .collect();
    assert_eq!(names, vec!["start.x", "start.y", "end.x", "end.y"]);
    assert_eq!(plan.slots_of_param(0, EntryKind::Scalarized).len(), 4);
    assert!(!plan.return_scalarized());
}

#[test]
fn test_slot_limit_keeps_positions_boxed() {
    let config = CompilerConfig {
        max_scalarized_slots: 2,
        ..CompilerConfig::default()
    };
    let (geometry, session) = geometry_session_with(config);
    let ctx = session.context();

    // leaves plus the not-null flag do not fit
    let identity = ctx.plan(geometry.identity).unwrap();
    assert!(!identity.is_scalarized());
    assert_eq!(identity.entries(), vec![EntryKind::Boxed]);
    assert_eq!(identity.entry_for_call(true), EntryKind::Boxed);

    // the tagged register pushes the return over the limit
    let mirror = ctx.plan(geometry.mirror).unwrap();
    assert!(mirror.any_param_scalarized());
    assert!(!mirror.return_scalarized());
}

#[test]
fn test_disabled_inline_types_plan_nothing() {
    let (geometry, session) = geometry_session_with(CompilerConfig::boxed());
    let plan = session.context().plan(geometry.translate).unwrap();

    assert!(!plan.is_scalarized());
    assert_eq!(plan.entries(), vec![EntryKind::Boxed]);
    assert_eq!(
        plan.param_slots(EntryKind::Scalarized),
        plan.param_slots(EntryKind::Boxed)
    );
}

#[test]
fn test_plans_are_cached_per_method() {
    let (geometry, session) = geometry_session();
    let ctx = session.context();
    let first = ctx.plan(geometry.sum).unwrap();
    let second = ctx.plan(geometry.sum).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_pretty_print_signatures() {
    let (geometry, session) = geometry_session();
    let ctx = session.context();

    let mirror = ctx.plan(geometry.mirror).unwrap();
    insta::assert_snapshot!(mirror.pretty_print(0).trim_end(), @r"
    Point.mirror
      param 0: ref<2>! scalarized {x: int, y: int}
      return: ref<2>! scalarized {x: int, y: int}
    ");

    let identity = ctx.plan(geometry.identity).unwrap();
    insta::assert_snapshot!(identity.pretty_print(0).trim_end(), @r"
    Point.identity
      param 0: ref<2> scalarized {x: int, y: int, not_null: boolean}
      return: ref<2> scalarized {x: int, y: int, not_null: boolean}
    ");
}
