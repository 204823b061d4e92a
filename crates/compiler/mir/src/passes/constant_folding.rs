use super::MirPass;
use crate::{BinaryOp, Instruction, InstructionKind, Literal, MirFunction, Value};

/// Constant Folding Pass
///
/// This pass evaluates operations when all operands are compile-time literals,
/// replacing the instruction with a direct assignment to the computed result.
/// Copy propagation then forwards the literal to every use.
///
/// ### Examples:
/// - `3 + 4 → 7`
/// - `eq hub(2), hub(2) → true`
/// - `and %x, false → false`
/// - `is_null null → true`
/// - `phi [bb1: 5], [bb2: 5] → 5`
#[derive(Debug, Default)]
pub struct ConstantFolding;

impl ConstantFolding {
    /// Create a new constant folding pass
    pub const fn new() -> Self {
        Self
    }

    fn fold_binary(op: BinaryOp, left: Value, right: Value) -> Option<Value> {
        let (left_lit, right_lit) = (left.as_literal(), right.as_literal());

        if let (Some(Literal::Hub(a)), Some(Literal::Hub(b))) = (left_lit, right_lit) {
            return match op {
                BinaryOp::Eq => Some(Value::boolean(a == b)),
                BinaryOp::Ne => Some(Value::boolean(a != b)),
                _ => None,
            };
        }

        if let (Some(a), Some(b)) = (
            left_lit.and_then(Literal::raw_bits),
            right_lit.and_then(Literal::raw_bits),
        ) {
            let bits = op.apply(a, b);
            return Some(if op.is_comparison() {
                Value::boolean(bits != 0)
            } else {
                Value::integer(bits as i64)
            });
        }

        // Boolean identities with one literal side
        let literal_bool = |value: Value| match value.as_literal() {
            Some(Literal::Boolean(b)) => Some(b),
            _ => None,
        };
        match (op, literal_bool(left), literal_bool(right)) {
            (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => {
                Some(Value::boolean(false))
            }
            (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => {
                Some(Value::boolean(true))
            }
            (BinaryOp::And, Some(true), _) | (BinaryOp::Or, Some(false), _) => Some(right),
            (BinaryOp::And, _, Some(true)) | (BinaryOp::Or, _, Some(false)) => Some(left),
            _ if left == right && matches!(op, BinaryOp::Eq) => Some(Value::boolean(true)),
            _ => None,
        }
    }

    /// Try to fold an instruction if its result does not depend on runtime values
    fn try_fold_instruction(instr: &mut Instruction) -> bool {
        let folded = match &instr.kind {
            InstructionKind::BinaryOp {
                op,
                dest,
                left,
                right,
            } => Self::fold_binary(*op, *left, *right).map(|source| (*dest, source)),

            InstructionKind::UnaryOp { op, dest, source } => source
                .as_literal()
                .and_then(Literal::raw_bits)
                .map(|bits| {
                    let result = op.apply(bits);
                    let value = match op {
                        crate::UnaryOp::Not => Value::boolean(result != 0),
                        crate::UnaryOp::Neg => Value::integer(result as i64),
                    };
                    (*dest, value)
                }),

            InstructionKind::Select {
                dest,
                condition,
                if_true,
                if_false,
            } => condition
                .as_const_bool()
                .map(|condition| (*dest, if condition { *if_true } else { *if_false })),

            InstructionKind::IsNull { dest, value } => match value.as_literal() {
                Some(Literal::Null) => Some((*dest, Value::boolean(true))),
                Some(Literal::Hub(_)) => Some((*dest, Value::boolean(false))),
                _ => None,
            },

            InstructionKind::Phi { dest, sources, .. } => {
                let mut values = sources
                    .iter()
                    .map(|(_, value)| *value)
                    .filter(|value| *value != Value::operand(*dest));
                match values.next() {
                    Some(first) if values.all(|value| value == first) => Some((*dest, first)),
                    _ => None,
                }
            }

            _ => None,
        };

        match folded {
            Some((dest, source)) => {
                instr.kind = InstructionKind::Assign { dest, source };
                true
            }
            None => false,
        }
    }
}

impl MirPass for ConstantFolding {
    fn run(&mut self, function: &mut MirFunction) -> bool {
        let mut modified = false;

        for block in function.basic_blocks.iter_mut() {
            let phis = block.phi_count();
            let mut folded_phis = Vec::new();

            for (index, instr) in block.instructions.iter_mut().enumerate() {
                if Self::try_fold_instruction(instr) {
                    modified = true;
                    if index < phis {
                        folded_phis.push(index);
                    }
                }
            }

            // A folded phi is an assignment now and must move behind the
            // remaining phis
            if !folded_phis.is_empty() {
                let mut moved = Vec::with_capacity(folded_phis.len());
                for &index in folded_phis.iter().rev() {
                    moved.push(block.instructions.remove(index));
                }
                let insert_at = block.phi_count();
                for instr in moved.into_iter().rev() {
                    block.instructions.insert(insert_at, instr);
                }
            }
        }

        modified
    }

    fn name(&self) -> &'static str {
        "ConstantFolding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MirType, Terminator};

    #[test]
    fn test_fold_literal_arithmetic_and_comparison() {
        let mut f = MirFunction::new("fold");
        let sum = f.new_typed_value_id(MirType::long());
        let cmp = f.new_typed_value_id(MirType::bool());

        let block = &mut f.basic_blocks[f.entry_block];
        block.push_instruction(Instruction::binary_op(
            BinaryOp::Add,
            sum,
            Value::integer(3),
            Value::integer(4),
        ));
        block.push_instruction(Instruction::binary_op(
            BinaryOp::Eq,
            cmp,
            Value::integer(7),
            Value::integer(7),
        ));
        block.set_terminator(Terminator::return_values(vec![
            Value::operand(sum),
            Value::operand(cmp),
        ]));

        assert!(ConstantFolding::new().run(&mut f));
        let block = &f.basic_blocks[f.entry_block];
        assert_eq!(
            block.instructions[0].kind,
            InstructionKind::Assign {
                dest: sum,
                source: Value::integer(7)
            }
        );
        assert_eq!(
            block.instructions[1].kind,
            InstructionKind::Assign {
                dest: cmp,
                source: Value::boolean(true)
            }
        );
    }

    #[test]
    fn test_and_with_false_folds_without_other_operand() {
        let mut f = MirFunction::new("and_false");
        let param = f.add_parameter(MirType::bool());
        let result = f.new_typed_value_id(MirType::bool());

        let block = &mut f.basic_blocks[f.entry_block];
        block.push_instruction(Instruction::binary_op(
            BinaryOp::And,
            result,
            Value::operand(param),
            Value::boolean(false),
        ));
        block.set_terminator(Terminator::return_values(vec![Value::operand(result)]));

        assert!(ConstantFolding::new().run(&mut f));
        assert_eq!(
            f.basic_blocks[f.entry_block].instructions[0].kind,
            InstructionKind::Assign {
                dest: result,
                source: Value::boolean(false)
            }
        );
    }

    #[test]
    fn test_nothing_to_fold_reports_unmodified() {
        let mut f = MirFunction::new("unchanged");
        let param = f.add_parameter(MirType::long());
        let result = f.new_typed_value_id(MirType::long());
        let block = &mut f.basic_blocks[f.entry_block];
        block.push_instruction(Instruction::binary_op(
            BinaryOp::Add,
            result,
            Value::operand(param),
            Value::integer(1),
        ));
        block.set_terminator(Terminator::return_values(vec![Value::operand(result)]));

        assert!(!ConstantFolding::new().run(&mut f));
    }
}
