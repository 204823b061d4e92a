//! # MIR Function
//!
//! This module defines the function-level MIR representation, including
//! the Control Flow Graph (CFG) of basic blocks.

use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};

use flatjit_common::MethodId;

use crate::{
    indent_str, BasicBlock, BasicBlockId, EntryKind, Instruction, InstructionKind, MirType,
    PrettyPrint, Value, ValueId,
};

/// The MIR for a single compiled entry of a method, laid out as a CFG
///
/// # Design Notes
///
/// - Basic blocks are stored in an `IndexVec` for efficient access
/// - Each function has exactly one entry block
/// - Parameters are the calling-convention slots of the entry, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirFunction {
    /// The name of the function (for debugging and linking)
    pub name: String,

    /// The method this function implements, if any
    pub method: Option<MethodId>,

    /// Which entry point of the method this function is
    pub entry: EntryKind,

    /// All basic blocks in this function, forming the CFG
    pub basic_blocks: IndexVec<BasicBlockId, BasicBlock>,

    /// The entry point of the function
    pub entry_block: BasicBlockId,

    /// One value per incoming calling-convention slot
    pub parameters: Vec<ValueId>,

    /// Type information for each value in the function
    pub value_types: FxHashMap<ValueId, MirType>,

    /// Next available value ID for generating new temporaries
    pub(crate) next_value_id: usize,
}

impl MirFunction {
    /// Creates a new empty function with the given name
    pub fn new(name: impl Into<String>) -> Self {
        let mut basic_blocks = IndexVec::new();
        let entry_block = basic_blocks.push(BasicBlock::with_name("entry"));

        Self {
            name: name.into(),
            method: None,
            entry: EntryKind::Boxed,
            basic_blocks,
            entry_block,
            parameters: Vec::new(),
            value_types: FxHashMap::default(),
            next_value_id: 0,
        }
    }

    /// Adds a new basic block and returns its ID
    pub fn add_basic_block(&mut self) -> BasicBlockId {
        self.basic_blocks.push(BasicBlock::new())
    }

    /// Adds a new basic block with a name and returns its ID
    pub fn add_basic_block_with_name(&mut self, name: impl Into<String>) -> BasicBlockId {
        self.basic_blocks.push(BasicBlock::with_name(name))
    }

    /// Generates a new unique value ID within this function
    pub fn new_value_id(&mut self) -> ValueId {
        let id = ValueId::new(self.next_value_id);
        self.next_value_id += 1;
        id
    }

    /// Generates a new unique value ID with type information
    pub fn new_typed_value_id(&mut self, mir_type: MirType) -> ValueId {
        let id = self.new_value_id();
        self.value_types.insert(id, mir_type);
        id
    }

    /// Adds a typed parameter slot
    pub fn add_parameter(&mut self, mir_type: MirType) -> ValueId {
        let id = self.new_typed_value_id(mir_type);
        self.parameters.push(id);
        id
    }

    /// Gets the type for a value ID
    pub fn get_value_type(&self, value_id: ValueId) -> Option<&MirType> {
        self.value_types.get(&value_id)
    }

    /// Gets the type of a value; literals have their natural type
    pub fn value_type(&self, value: Value) -> MirType {
        use crate::{Literal, RefStamp};
        match value {
            Value::Operand(id) => self
                .value_types
                .get(&id)
                .copied()
                .unwrap_or(MirType::Unknown),
            Value::Literal(Literal::Null) => MirType::Reference(RefStamp::null()),
            Value::Literal(Literal::Boolean(_)) => MirType::bool(),
            Value::Literal(Literal::Integer(_)) => MirType::long(),
            Value::Literal(Literal::Hub(_)) => MirType::Hub,
            Value::Literal(Literal::Unit) => MirType::Unit,
        }
    }

    /// Returns an iterator over all basic blocks
    pub fn basic_blocks(&self) -> impl Iterator<Item = (BasicBlockId, &BasicBlock)> {
        self.basic_blocks.iter_enumerated()
    }

    /// Returns the number of basic blocks in this function
    pub fn block_count(&self) -> usize {
        self.basic_blocks.len()
    }

    /// Returns an iterator over every instruction with its position
    pub fn instructions(&self) -> impl Iterator<Item = (BasicBlockId, usize, &Instruction)> {
        self.basic_blocks.iter_enumerated().flat_map(|(block_id, block)| {
            block
                .instructions
                .iter()
                .enumerate()
                .map(move |(index, instr)| (block_id, index, instr))
        })
    }

    /// Finds the instruction defining `value`
    pub fn definition(&self, value: ValueId) -> Option<&Instruction> {
        self.instructions()
            .find(|(_, _, instr)| instr.destinations().contains(&value))
            .map(|(_, _, instr)| instr)
    }

    /// Returns a map from each ValueId to its usage count in the function
    pub fn get_value_use_counts(&self) -> FxHashMap<ValueId, usize> {
        let mut counts = FxHashMap::default();
        for (_id, block) in self.basic_blocks() {
            for instruction in &block.instructions {
                for used_value in instruction.used_values() {
                    *counts.entry(used_value).or_default() += 1;
                }
            }
            for used_value in block.terminator.used_values() {
                *counts.entry(used_value).or_default() += 1;
            }
        }
        counts
    }

    /// Predecessors of every block, in block order
    pub fn predecessors(&self) -> FxHashMap<BasicBlockId, Vec<BasicBlockId>> {
        let mut preds: FxHashMap<BasicBlockId, Vec<BasicBlockId>> = FxHashMap::default();
        for (block_id, block) in self.basic_blocks() {
            for target in block.terminator.target_blocks() {
                let entry = preds.entry(target).or_default();
                if !entry.contains(&block_id) {
                    entry.push(block_id);
                }
            }
        }
        preds
    }

    /// Replaces every read of `from` with `to` throughout the function
    pub fn replace_all_uses(&mut self, from: ValueId, to: Value) {
        if to == Value::Operand(from) {
            return;
        }
        for block in self.basic_blocks.iter_mut() {
            for instruction in &mut block.instructions {
                instruction.replace_value_uses(from, to);
            }
            block.terminator.replace_value_uses(from, to);
        }
    }

    /// Splits `block` before instruction `at`.
    ///
    /// The instructions from `at` on and the terminator move to a new block; the
    /// head is left with an `Unreachable` terminator for the caller to replace.
    /// Phis in successors that named `block` as predecessor now name the tail.
    pub fn split_block(&mut self, block: BasicBlockId, at: usize) -> BasicBlockId {
        let tail_instructions = self.basic_blocks[block].instructions.split_off(at);
        let terminator = std::mem::replace(
            &mut self.basic_blocks[block].terminator,
            crate::Terminator::Unreachable,
        );
        let successors = terminator.target_blocks();

        let name = self.basic_blocks[block]
            .name
            .as_deref()
            .map(|name| format!("{name}.split"));
        let tail = self.basic_blocks.push(BasicBlock {
            name,
            instructions: tail_instructions,
            terminator,
        });

        for successor in successors {
            for instruction in &mut self.basic_blocks[successor].instructions {
                if let InstructionKind::Phi { sources, .. } = &mut instruction.kind {
                    for (pred, _) in sources.iter_mut() {
                        if *pred == block {
                            *pred = tail;
                        }
                    }
                }
            }
        }
        tail
    }

    /// Blocks reachable from the entry block
    pub fn reachable_blocks(&self) -> FxHashSet<BasicBlockId> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![self.entry_block];
        while let Some(current) = stack.pop() {
            if visited.insert(current) {
                stack.extend(self.basic_blocks[current].terminator.target_blocks());
            }
        }
        visited
    }

    /// Validates the function structure
    ///
    /// Checks:
    /// - Every reachable block is terminated and keeps its phis first
    /// - All referenced blocks exist
    /// - Phi operands name actual predecessors
    /// - Each value is defined once
    pub fn validate(&self) -> Result<(), String> {
        if self.basic_blocks.get(self.entry_block).is_none() {
            return Err(format!("Entry block {:?} does not exist", self.entry_block));
        }

        let reachable = self.reachable_blocks();
        let preds = self.predecessors();
        let mut defined: FxHashSet<ValueId> = self.parameters.iter().copied().collect();
        if defined.len() != self.parameters.len() {
            return Err("Parameters are not distinct".to_string());
        }

        for (block_id, block) in self.basic_blocks() {
            for target in block.terminator.target_blocks() {
                if self.basic_blocks.get(target).is_none() {
                    return Err(format!(
                        "Block {block_id:?} targets non-existent block {target:?}"
                    ));
                }
            }
            for instruction in &block.instructions {
                for dest in instruction.destinations() {
                    if !defined.insert(dest) {
                        return Err(format!(
                            "SSA violation: {dest:?} is defined more than once"
                        ));
                    }
                }
            }
            if !reachable.contains(&block_id) {
                continue;
            }
            block
                .validate()
                .map_err(|err| format!("Block {block_id:?} validation failed: {err}"))?;

            let block_preds = preds.get(&block_id).cloned().unwrap_or_default();
            for instruction in &block.instructions {
                if let InstructionKind::Phi { sources, dest, .. } = &instruction.kind {
                    for (source_block, _) in sources {
                        if !block_preds.contains(source_block) {
                            return Err(format!(
                                "Block {block_id:?}: phi {dest:?} has operand from {source_block:?} which is not a predecessor"
                            ));
                        }
                    }
                    for pred in &block_preds {
                        if reachable.contains(pred) && !sources.iter().any(|(b, _)| b == pred) {
                            return Err(format!(
                                "Block {block_id:?}: phi {dest:?} has no operand for predecessor {pred:?}"
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl PrettyPrint for MirFunction {
    fn pretty_print(&self, indent: usize) -> String {
        let params = self
            .parameters
            .iter()
            .map(|param| {
                let ty = self
                    .get_value_type(*param)
                    .copied()
                    .unwrap_or(MirType::Unknown);
                format!("{}: {ty}", param.pretty_print(0))
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut result = format!("{}fn {}({params}) {{\n", indent_str(indent), self.name);
        for (block_id, block) in self.basic_blocks() {
            match &block.name {
                Some(name) => result.push_str(&format!(
                    "{}{}: // {name}\n",
                    indent_str(indent + 1),
                    block_id.index()
                )),
                None => result.push_str(&format!(
                    "{}{}:\n",
                    indent_str(indent + 1),
                    block_id.index()
                )),
            }
            result.push_str(&block.pretty_print(indent + 2));
        }
        result.push_str(&format!("{}}}\n", indent_str(indent)));
        result
    }
}
