use flatjit_common::Kind;
use rustc_hash::FxHashMap;

use super::MirPass;
use crate::{InstructionKind, LocationIdentity, MirFunction, Value, ValueId};

/// Store-to-load forwarding and redundant load elimination within a block.
///
/// A load of `(base, offset, kind)` reads the value last stored to, or loaded
/// from, the same address in the same block, unless a write that may alias it
/// happened in between. Aliasing is decided by [`LocationIdentity`]; calls,
/// runtime calls and monitor operations clobber everything.
///
/// Only full-slot kinds are forwarded from stores, since a narrower store
/// truncates the stored value.
#[derive(Debug, Default)]
pub struct ForwardStores;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Address {
    base: Value,
    offset: u32,
    kind: Kind,
}

#[derive(Debug, Clone, Copy)]
struct Known {
    value: Value,
    location: LocationIdentity,
}

impl ForwardStores {
    pub const fn new() -> Self {
        Self
    }

    fn kill_aliases(known: &mut FxHashMap<Address, Known>, location: LocationIdentity) {
        known.retain(|_, entry| !entry.location.may_alias(location));
    }
}

impl MirPass for ForwardStores {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut replacements: Vec<(ValueId, Value)> = Vec::new();

        for block in function.basic_blocks.iter() {
            let mut known: FxHashMap<Address, Known> = FxHashMap::default();

            for instr in &block.instructions {
                match &instr.kind {
                    InstructionKind::Load {
                        dest,
                        base,
                        offset,
                        kind,
                        location,
                    } => {
                        let address = Address {
                            base: *base,
                            offset: *offset,
                            kind: *kind,
                        };
                        match known.get(&address) {
                            Some(entry) => replacements.push((*dest, entry.value)),
                            None => {
                                known.insert(
                                    address,
                                    Known {
                                        value: Value::operand(*dest),
                                        location: *location,
                                    },
                                );
                            }
                        }
                    }
                    InstructionKind::Store {
                        base,
                        offset,
                        kind,
                        value,
                        location,
                    } => {
                        Self::kill_aliases(&mut known, *location);
                        if kind.byte_size() == 8 {
                            known.insert(
                                Address {
                                    base: *base,
                                    offset: *offset,
                                    kind: *kind,
                                },
                                Known {
                                    value: *value,
                                    location: *location,
                                },
                            );
                        }
                    }
                    InstructionKind::Call { .. }
                    | InstructionKind::RuntimeCall { .. }
                    | InstructionKind::Monitor { .. } => known.clear(),
                    _ => {}
                }
            }
        }

        if replacements.is_empty() {
            return false;
        }

        log::trace!(
            "'{}': forwarded {} loads",
            function.name,
            replacements.len()
        );
        for (dest, value) in &replacements {
            function.replace_all_uses(*dest, *value);
        }
        for block in function.basic_blocks.iter_mut() {
            block.instructions.retain(|instr| {
                !matches!(&instr.kind, InstructionKind::Load { dest, .. }
                    if replacements.iter().any(|(replaced, _)| replaced == dest))
            });
        }
        true
    }

    fn name(&self) -> &'static str {
        "ForwardStores"
    }
}
