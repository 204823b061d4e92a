//! # Calling-convention shuffle
//!
//! Moves the arguments of one call from the layout the caller produced into
//! the layout the callee's entry expects. Positions the callee takes scalarized
//! but the caller holds as a reference are unpacked: every leaf is loaded from
//! the referenced object straight into its expected location.
//!
//! Moves are resolved in passes over the positions, last position first. A
//! job runs once none of its destinations still holds an unread source. From
//! the second pass on, a pass that completes nothing spills one blocked source
//! into the spill scratch of its register class, which breaks any cycle. The
//! shuffle gives up after twice as many passes as there are jobs.

use flatjit_common::Kind;
use flatjit_compiler_mir::ScalarizedSignature;
use smallvec::SmallVec;

use crate::{
    CallLayout, CodegenError, CodegenResult, Location, MacroAssembler, MachineCode, Register,
    RegisterClass, ShuffleError,
};

/// Per-location state during one shuffle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Writeable,
    /// Holds a source some pending job has not read yet
    ReadOnly,
    /// Holds its final value
    Written,
}

/// Slot states indexed by [`Location::id`]
#[derive(Debug, Default)]
struct SlotStates(Vec<SlotState>);

impl SlotStates {
    fn get(&self, location: Location) -> SlotState {
        self.0
            .get(location.id())
            .copied()
            .unwrap_or(SlotState::Writeable)
    }

    fn set(&mut self, location: Location, state: SlotState) {
        let id = location.id();
        if id >= self.0.len() {
            self.0.resize(id + 1, SlotState::Writeable);
        }
        self.0[id] = state;
    }

    /// Releases a source that was read, unless it already holds a result
    fn release(&mut self, location: Location) {
        if self.get(location) == SlotState::ReadOnly {
            self.set(location, SlotState::Writeable);
        }
    }
}

/// One leaf of an unpacked position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMove {
    pub offset: u32,
    pub kind: Kind,
    pub dst: Location,
}

/// One unit of work of a shuffle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShuffleJob {
    /// A slot that keeps its form and only changes location
    Move {
        src: Location,
        dst: Location,
        kind: Kind,
    },
    /// A reference whose leaves the callee takes scalarized
    Unpack {
        src: Location,
        fields: SmallVec<[FieldMove; 4]>,
        /// Location of the not-null slot of a nullable position
        not_null: Option<Location>,
    },
}

impl ShuffleJob {
    pub const fn source(&self) -> Location {
        match self {
            Self::Move { src, .. } | Self::Unpack { src, .. } => *src,
        }
    }

    const fn source_kind(&self) -> Kind {
        match self {
            Self::Move { kind, .. } => *kind,
            Self::Unpack { .. } => Kind::Object,
        }
    }

    pub fn destinations(&self) -> SmallVec<[Location; 4]> {
        match self {
            Self::Move { dst, .. } => SmallVec::from_slice(&[*dst]),
            Self::Unpack {
                fields, not_null, ..
            } => fields
                .iter()
                .map(|field| field.dst)
                .chain(*not_null)
                .collect(),
        }
    }

    fn with_source(&mut self, location: Location) {
        match self {
            Self::Move { src, .. } | Self::Unpack { src, .. } => *src = location,
        }
    }
}

/// Counters of one finished shuffle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShuffleStats {
    pub passes: usize,
    pub spills: usize,
}

/// Emits `jobs` into `masm`.
///
/// Every source must be distinct from every other job's source, every
/// destination distinct from every other destination, and none of them may be
/// a reserved register.
pub fn shuffle(
    masm: &mut MacroAssembler,
    mut jobs: Vec<ShuffleJob>,
) -> Result<ShuffleStats, ShuffleError> {
    let mut states = SlotStates::default();
    for job in &jobs {
        states.set(job.source(), SlotState::ReadOnly);
    }

    let total = jobs.len();
    let budget = 2 * total;
    let mut pending = vec![true; total];
    let mut remaining = total;
    // job currently holding the spill scratch of each class
    let mut scratch_owner: [Option<usize>; 2] = [None, None];
    let mut stats = ShuffleStats::default();

    while remaining > 0 && stats.passes < budget {
        let first_pass = stats.passes == 0;
        stats.passes += 1;
        let mut completed = 0;
        let mut blocked = None;

        for index in (0..total).rev() {
            if !pending[index] {
                continue;
            }
            let job = &jobs[index];
            let source = job.source();
            let ready = job
                .destinations()
                .iter()
                .all(|&dst| dst == source || states.get(dst) == SlotState::Writeable);
            if !ready {
                let class = RegisterClass::of(job.source_kind());
                if blocked.is_none() && scratch_owner[class.index()].is_none() {
                    blocked = Some(index);
                }
                continue;
            }

            emit_job(masm, job);
            states.release(source);
            for dst in job.destinations() {
                states.set(dst, SlotState::Written);
            }
            for owner in &mut scratch_owner {
                if *owner == Some(index) {
                    *owner = None;
                }
            }
            pending[index] = false;
            remaining -= 1;
            completed += 1;
        }

        if completed > 0 || first_pass {
            continue;
        }
        let Some(index) = blocked else {
            break;
        };
        let kind = jobs[index].source_kind();
        let class = RegisterClass::of(kind);
        let source = jobs[index].source();
        let scratch = Location::Register(class.spill_scratch());
        log::debug!("shuffle: spilling {source} into {scratch}");
        masm.move_slot(scratch, source, kind);
        masm.annotate("spill");
        states.release(source);
        jobs[index].with_source(scratch);
        scratch_owner[class.index()] = Some(index);
        stats.spills += 1;
    }

    debug_assert!(
        remaining == 0,
        "shuffle left {remaining} of {total} jobs unresolved after {} passes",
        stats.passes
    );
    if remaining > 0 {
        return Err(ShuffleError::Unresolved {
            pending: remaining,
            total,
            passes: stats.passes,
        });
    }
    log::trace!(
        "shuffle: {total} jobs in {} passes, {} spills",
        stats.passes,
        stats.spills
    );
    Ok(stats)
}

fn emit_job(masm: &mut MacroAssembler, job: &ShuffleJob) {
    match job {
        ShuffleJob::Move { src, dst, kind } => masm.move_slot(*dst, *src, *kind),
        ShuffleJob::Unpack {
            src,
            fields,
            not_null,
        } => emit_unpack(masm, *src, fields, *not_null),
    }
}

/// Loads every leaf of the object referenced from `src`.
///
/// A destination that aliases the base register is written last.
fn emit_unpack(
    masm: &mut MacroAssembler,
    src: Location,
    fields: &[FieldMove],
    not_null: Option<Location>,
) {
    let base = match src {
        Location::Register(register) => register,
        Location::Stack(_) => {
            masm.move_slot(Location::Register(Register::R14), src, Kind::Object);
            Register::R14
        }
    };
    let aliases_base = |dst: Location| dst == Location::Register(base);

    let Some(not_null) = not_null else {
        load_fields(masm, base, fields, &aliases_base);
        return;
    };

    let null = masm.new_label("null");
    let done = masm.new_label("unpacked");
    masm.test(base);
    masm.jz(null);
    load_fields(masm, base, fields, &aliases_base);
    masm.set_imm(not_null, 1);
    masm.annotate("not null");
    masm.jmp(done);
    masm.bind(null);
    for field in fields {
        masm.zero(field.dst);
    }
    masm.zero(not_null);
    masm.bind(done);
}

fn load_fields(
    masm: &mut MacroAssembler,
    base: Register,
    fields: &[FieldMove],
    aliases_base: &dyn Fn(Location) -> bool,
) {
    let (last, rest): (Vec<&FieldMove>, Vec<&FieldMove>) =
        fields.iter().partition(|field| aliases_base(field.dst));
    for field in rest.into_iter().chain(last) {
        masm.load_field(field.dst, base, field.offset, field.kind);
    }
}

/// Jobs moving the arguments of a call from `current` into `expected`.
///
/// Stack locations of `current` are taken relative to the stack pointer before
/// `stack_increment` bytes were reserved.
pub fn argument_jobs(
    plan: &ScalarizedSignature,
    current: &CallLayout,
    expected: &CallLayout,
    stack_increment: u32,
) -> CodegenResult<Vec<ShuffleJob>> {
    let mut jobs = Vec::with_capacity(expected.slots.len());
    for (index, position) in plan.params.iter().enumerate() {
        let from = current.first_slot_of(index);
        let to = expected.first_slot_of(index);
        let unpacked_by_callee = plan.param_scalarized_in(index, expected.entry);
        let unpacked_by_caller = plan.param_scalarized_in(index, current.entry);

        if unpacked_by_callee && !unpacked_by_caller {
            let fields = position
                .fields()
                .iter()
                .enumerate()
                .map(|(leaf, field)| FieldMove {
                    offset: field.offset,
                    kind: field.kind,
                    dst: expected.locations[to + leaf],
                })
                .collect();
            let not_null = (!position.null_free)
                .then(|| expected.locations[to + position.fields().len()]);
            jobs.push(ShuffleJob::Unpack {
                src: current.locations[from].below(stack_increment),
                fields,
                not_null,
            });
        } else if unpacked_by_caller && !unpacked_by_callee {
            return Err(CodegenError::Unsupported(format!(
                "parameter {index} of {} must be buffered before the call",
                plan.name
            )));
        } else {
            let width = plan.slots_of_param(index, current.entry).len();
            for slot in 0..width {
                jobs.push(ShuffleJob::Move {
                    src: current.locations[from + slot].below(stack_increment),
                    dst: expected.locations[to + slot],
                    kind: expected.slots[to + slot].kind,
                });
            }
        }
    }
    Ok(jobs)
}

/// Emits the code that turns the arguments of a call laid out as `current`
/// into the layout `expected` of the callee's entry
pub fn unpack(
    plan: &ScalarizedSignature,
    current: &CallLayout,
    expected: &CallLayout,
) -> CodegenResult<MachineCode> {
    let extra = expected.stack_size.saturating_sub(current.stack_size);
    let stack_increment = extra.next_multiple_of(16);
    let jobs = argument_jobs(plan, current, expected, stack_increment)?;

    let mut masm = MacroAssembler::new();
    masm.reserve_stack(stack_increment);
    if stack_increment > 0 {
        masm.annotate("flattened arguments");
    }
    let stats = shuffle(&mut masm, jobs)?;
    log::debug!(
        "unpack {}: {:?} -> {:?} in {} passes, {} spills",
        plan.name,
        current.entry,
        expected.entry,
        stats.passes,
        stats.spills
    );
    masm.finish()
}

#[cfg(test)]
#[path = "shuffle_tests.rs"]
mod tests;
