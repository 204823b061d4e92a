//! # Tagged returns
//!
//! A scalarized return leaves its leaves in the return registers and puts a
//! tag word in the first one:
//!
//! - `0` for null,
//! - an untagged heap pointer when the callee already has a buffer holding
//!   the returned value,
//! - the class hub with bit 0 set when the value only exists in registers.
//!
//! The caller allocates a buffer only in the last case.

use flatjit_common::{Kind, Metadata};
use flatjit_compiler_mir::{PositionPlan, SlotRole};

use crate::{
    CallLayout, CodegenError, CodegenResult, Location, MachInst, MacroAssembler, Register,
};

/// Bit distinguishing a hub from a heap pointer in the tag register
pub const TAG_BIT: u64 = 1;

fn tag_register(layout: &CallLayout) -> CodegenResult<Register> {
    layout
        .location_of(SlotRole::TaggedReturn)
        .and_then(Location::register)
        .ok_or_else(|| CodegenError::Unsupported("return is not scalarized".to_string()))
}

fn hub_of(metadata: &Metadata, ret: &PositionPlan) -> CodegenResult<u64> {
    let aggregate = ret
        .aggregate
        .as_ref()
        .ok_or_else(|| CodegenError::Unsupported("return is not scalarized".to_string()))?;
    Ok(metadata.ty(aggregate.ty).hub)
}

/// Callee side: writes the tag word once the leaves (and the not-null slot of
/// a nullable return) sit in `layout`.
///
/// `buffer` holds a heap pointer to an instance equal to the returned value,
/// or null when there is none.
pub fn encode_return(
    masm: &mut MacroAssembler,
    metadata: &Metadata,
    ret: &PositionPlan,
    layout: &CallLayout,
    buffer: Option<Location>,
) -> CodegenResult<()> {
    let tag = tag_register(layout)?;
    let tagged_hub = hub_of(metadata, ret)? | TAG_BIT;
    let done = masm.new_label("tagged");

    // returns never live on the stack
    let null = match layout.location_of(SlotRole::NotNull).and_then(Location::register) {
        Some(flag) => {
            let null = masm.new_label("null");
            masm.test(flag);
            masm.jz(null);
            Some(null)
        }
        None => None,
    };

    if let Some(buffer) = buffer {
        masm.move_slot(tag.into(), buffer, Kind::Object);
        masm.test(tag);
        masm.jnz(done);
    }
    masm.set_imm(tag.into(), tagged_hub);
    masm.annotate("fresh value");
    if let Some(null) = null {
        masm.jmp(done);
        masm.bind(null);
        masm.zero(tag.into());
    }
    masm.bind(done);
    Ok(())
}

/// Caller side: leaves a heap pointer (or null) for the returned value in the
/// tag register, allocating a buffer only for a fresh value
pub fn decode_return(
    masm: &mut MacroAssembler,
    ret: &PositionPlan,
    layout: &CallLayout,
) -> CodegenResult<Register> {
    let tag = tag_register(layout)?;
    let done = masm.new_label("buffered");
    masm.test_bits(tag, TAG_BIT);
    masm.jz(done);
    masm.emit(MachInst::AndImm {
        dst: tag,
        imm: !TAG_BIT,
    });
    masm.emit(MachInst::AllocateInstance { dst: tag, hub: tag });
    for (leaf, field) in ret.fields().iter().enumerate() {
        let src = layout
            .location_of(SlotRole::Leaf(leaf))
            .ok_or_else(|| CodegenError::Unsupported(format!("no location for leaf {leaf}")))?;
        masm.store_field(tag, field.offset, src, field.kind);
    }
    masm.bind(done);
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use flatjit_common::{Heap, NULL};
    use flatjit_compiler_mir::{CompilationSession, EntryKind};
    use flatjit_test_utils::Geometry;

    use super::*;
    use crate::Machine;

    fn identity_return(geometry: &Geometry) -> (PositionPlan, CallLayout) {
        let session = CompilationSession::new(geometry.metadata.clone(), Default::default());
        let plan = session.context().plan(geometry.identity).unwrap();
        let layout = CallLayout::returns(&plan, EntryKind::Scalarized).unwrap();
        (plan.ret.clone().unwrap(), layout)
    }

    fn leaves(machine: &mut Machine<'_>, layout: &CallLayout, x: i32, y: i32, not_null: u64) {
        let at = |role| layout.location_of(role).unwrap();
        machine.set(at(SlotRole::Leaf(0)), x as i64 as u64);
        machine.set(at(SlotRole::Leaf(1)), y as i64 as u64);
        machine.set(at(SlotRole::NotNull), not_null);
    }

    fn round_trip(geometry: &Geometry, heap: &mut Heap, buffer: u64, not_null: u64) -> u64 {
        let (ret, layout) = identity_return(geometry);
        let mut masm = MacroAssembler::new();
        let scratch = Location::Register(Register::RBX);
        encode_return(&mut masm, &geometry.metadata, &ret, &layout, Some(scratch)).unwrap();
        let result = decode_return(&mut masm, &ret, &layout).unwrap();
        let code = masm.finish().unwrap();

        let mut machine = Machine::new(&geometry.metadata, heap);
        leaves(&mut machine, &layout, 7, -8, not_null);
        machine.set(scratch, buffer);
        machine.run(&code).unwrap();
        machine.register(result)
    }

    #[test]
    fn test_fresh_value_is_buffered_by_the_caller() {
        let geometry = Geometry::new();
        let mut heap = Heap::new();
        let object = round_trip(&geometry, &mut heap, NULL, 1);

        assert_ne!(object, NULL);
        assert_eq!(heap.allocation_count(), 1);
        let x = geometry.offset(geometry.point, "x") as u64;
        let y = geometry.offset(geometry.point, "y") as u64;
        assert_eq!(heap.read(object + x, Kind::Int).unwrap(), 7);
        assert_eq!(heap.read(object + y, Kind::Int).unwrap() as i64, -8);
    }

    #[test]
    fn test_existing_buffer_is_passed_through() {
        let geometry = Geometry::new();
        let mut heap = Heap::new();
        let existing = heap.allocate(&geometry.metadata, geometry.point).unwrap();
        let object = round_trip(&geometry, &mut heap, existing, 1);
        assert_eq!(object, existing);
        assert_eq!(heap.allocation_count(), 1);
    }

    #[test]
    fn test_null_return_allocates_nothing() {
        let geometry = Geometry::new();
        let mut heap = Heap::new();
        let existing = heap.allocate(&geometry.metadata, geometry.point).unwrap();
        assert_eq!(round_trip(&geometry, &mut heap, existing, 0), NULL);
        assert_eq!(heap.allocation_count(), 1);
    }

    #[test]
    fn test_tag_word_of_a_fresh_value() {
        let geometry = Geometry::new();
        let (ret, layout) = identity_return(&geometry);
        let mut masm = MacroAssembler::new();
        encode_return(&mut masm, &geometry.metadata, &ret, &layout, None).unwrap();
        let code = masm.finish().unwrap();

        let mut heap = Heap::new();
        let mut machine = Machine::new(&geometry.metadata, &mut heap);
        leaves(&mut machine, &layout, 1, 2, 1);
        machine.run(&code).unwrap();
        let hub = geometry.metadata.ty(geometry.point).hub;
        assert_eq!(machine.register(Register::RAX), hub | TAG_BIT);
    }

    #[test]
    fn test_boxed_return_cannot_be_tagged() {
        let geometry = Geometry::new();
        let session = CompilationSession::new(geometry.metadata.clone(), Default::default());
        let plan = session.context().plan(geometry.identity).unwrap();
        let layout = CallLayout::returns(&plan, EntryKind::Boxed).unwrap();
        let ret = plan.ret.clone().unwrap();
        let mut masm = MacroAssembler::new();
        assert!(matches!(
            decode_return(&mut masm, &ret, &layout),
            Err(CodegenError::Unsupported(_))
        ));
    }
}
