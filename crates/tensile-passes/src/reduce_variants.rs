//! Stage 4: reduce overlapping operator variants to canonical form.
//!
//! The imported op set carries three kinds of overlap, all table-driven
//! through [`VariantTable`]:
//!
//!   * in-place variants (`add_`, `mul_`, `relu_`) compute like their
//!     canonical op but write the result into operand 0's storage;
//!   * scalar overloads (`add.scalar`) take a scalar right-hand side
//!     where the canonical op wants a tensor;
//!   * value-semantic ops applied to reference tensors, which compute a
//!     fresh value but were typed over mutable storage by the importer.
//!
//! Each is rewritten in terms of the canonical op over value tensors,
//! with `to_value` / `from_value` bridges at the seams and an explicit
//! `overwrite` where the variant mutated storage:
//!
//! ```text
//!   %r = add_(%x, %y)            %xv = to_value %x
//!                          =>    %s  = add %xv, %y
//!                                overwrite %s, %x        uses of %r -> %x
//! ```
//!
//! Afterwards no variant opcodes remain and every arithmetic op is typed
//! over value tensors; the mutation maximizer only has the bridge ops
//! left to resolve.

use tensile_core::ir::{Function, OpKind, Opcode, Program};
use tensile_core::{BlockId, Diagnostic, OpId, Type};
use tensile_rules::{VariantForm, VariantTable};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReduceVariantsStats {
    pub variants_reduced: usize,
    pub bridges_inserted: usize,
}

#[derive(Debug)]
pub struct ReduceVariantsOutput {
    pub program: Program,
    pub stats: ReduceVariantsStats,
}

pub struct OperatorVariantReducer<'a> {
    program: Program,
    table: &'a VariantTable,
}

impl<'a> OperatorVariantReducer<'a> {
    pub fn new(program: Program, table: &'a VariantTable) -> OperatorVariantReducer<'a> {
        OperatorVariantReducer { program, table }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<ReduceVariantsOutput, Diagnostic> {
        let mut stats = ReduceVariantsStats::default();
        let ids: Vec<_> = self.program.func_ids().collect();
        for id in ids {
            let func = self.program.function_mut(id);
            let ops: Vec<(BlockId, OpId)> = func
                .blocks
                .iter()
                .enumerate()
                .flat_map(|(b, block)| {
                    block.ops.iter().map(move |&op| (BlockId::new(b as u32), op))
                })
                .collect();
            for (block, op) in ops {
                let kind = func.op(op).kind.clone();
                if let Some(rule) = self.table.lookup(kind.opcode()) {
                    let canonical = rule.canonical.clone();
                    stats.bridges_inserted += match rule.form {
                        VariantForm::InPlace => reduce_in_place(func, block, op, canonical)?,
                        VariantForm::ScalarOverload => {
                            reduce_scalar_overload(func, block, op, canonical)?
                        }
                    };
                    stats.variants_reduced += 1;
                } else if is_tensor_compute(kind.opcode()) {
                    stats.bridges_inserted += normalize_references(func, block, op)?;
                }
            }
        }
        Ok(ReduceVariantsOutput { program: self.program, stats })
    }
}

/// Ops that compute a fresh tensor from their operands. These are the
/// ops worth retyping over value tensors; bridge ops and terminators
/// keep their reference operands on purpose.
fn is_tensor_compute(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        Add | Sub | Mul | Div | Neg | Relu | Exp | Matmul | Transpose | Sum | Linear
            | Softmax | Mean | Square
    )
}

/// `%r = op_(%x, ...)` becomes canonical-over-values plus an explicit
/// `overwrite` into `%x`'s storage. `%r` was an alias of `%x`, so its
/// uses simply become `%x`.
fn reduce_in_place(
    func: &mut Function,
    block: BlockId,
    op: OpId,
    canonical: OpKind,
) -> Result<usize, Diagnostic> {
    let operation = func.op(op);
    let loc = operation.loc;
    let operands = operation.operands.clone();
    let result = operation.result(0);
    let Some(&receiver) = operands.first() else {
        return Err(Diagnostic::internal(loc, &func.name, "in-place operator with no receiver"));
    };
    if !func.value(receiver).ty.is_ref_tensor() {
        return Err(Diagnostic::aliasing(
            loc,
            &func.name,
            format!("`{}` mutates a value-typed operand", func.op(op).kind.opcode()),
        ));
    }
    let Some(meta) = func.value(result).ty.tensor_meta().cloned() else {
        return Err(Diagnostic::internal(loc, &func.name, "in-place operator with a non-tensor result"));
    };

    let Some(mut index) = func.op_index(block, op) else {
        return Err(Diagnostic::internal(loc, &func.name, "operation left its block during rewriting"));
    };
    let mut bridges = 0;
    let mut value_operands = Vec::with_capacity(operands.len());
    for &operand in &operands {
        value_operands.push(match func.value(operand).ty.clone() {
            Type::Tensor(operand_meta) => {
                let bridge = func.insert_op(
                    block,
                    index,
                    OpKind::ToValue,
                    vec![operand],
                    vec![Type::ValueTensor(operand_meta)],
                    loc,
                );
                index += 1;
                bridges += 1;
                func.op(bridge).result(0)
            }
            _ => operand,
        });
    }

    let computed = func.insert_op(
        block,
        index,
        canonical,
        value_operands,
        vec![Type::ValueTensor(meta)],
        loc,
    );
    let value = func.op(computed).result(0);
    func.insert_op(block, index + 1, OpKind::Overwrite, vec![value, receiver], vec![], loc);
    func.replace_all_uses(result, receiver);
    func.erase_op(op);
    Ok(bridges)
}

/// `%r = add.scalar(%t, %s)` becomes `scalar_tensor` + the canonical op.
/// The variant op is rewritten in place so `%r` keeps its identity.
fn reduce_scalar_overload(
    func: &mut Function,
    block: BlockId,
    op: OpId,
    canonical: OpKind,
) -> Result<usize, Diagnostic> {
    let operation = func.op(op);
    let loc = operation.loc;
    let operands = operation.operands.clone();
    let [tensor, scalar] = operands[..] else {
        return Err(Diagnostic::internal(loc, &func.name, "scalar overload expects two operands"));
    };

    let Some(mut index) = func.op_index(block, op) else {
        return Err(Diagnostic::internal(loc, &func.name, "operation left its block during rewriting"));
    };
    let mut bridges = 0;
    let tensor = match func.value(tensor).ty.clone() {
        Type::Tensor(meta) => {
            let bridge = func.insert_op(
                block,
                index,
                OpKind::ToValue,
                vec![tensor],
                vec![Type::ValueTensor(meta)],
                loc,
            );
            index += 1;
            bridges += 1;
            func.op(bridge).result(0)
        }
        _ => tensor,
    };

    let Some(dtype) = func.value(scalar).ty.scalar_dtype() else {
        return Err(Diagnostic::type_conflict(
            loc,
            &func.name,
            "scalar operand has no tensor element type",
        ));
    };
    let promoted = func.insert_op(
        block,
        index,
        OpKind::ScalarTensor,
        vec![scalar],
        vec![Type::vtensor(&[], dtype)],
        loc,
    );
    let promoted = func.op(promoted).result(0);

    func.op_mut(op).kind = canonical;
    func.op_mut(op).operands = vec![tensor, promoted];
    if detach_reference_result(func, block, op)? {
        bridges += 1;
    }
    Ok(bridges)
}

/// Retype a value-semantic op over value tensors, bridging reference
/// operands with `to_value` and a reference result with `from_value`.
fn normalize_references(
    func: &mut Function,
    block: BlockId,
    op: OpId,
) -> Result<usize, Diagnostic> {
    let loc = func.op(op).loc;
    let operands = func.op(op).operands.clone();
    let mut bridges = 0;
    for (i, operand) in operands.into_iter().enumerate() {
        let Type::Tensor(meta) = func.value(operand).ty.clone() else {
            continue;
        };
        let Some(index) = func.op_index(block, op) else {
            return Err(Diagnostic::internal(loc, &func.name, "operation left its block during rewriting"));
        };
        let bridge = func.insert_op(
            block,
            index,
            OpKind::ToValue,
            vec![operand],
            vec![Type::ValueTensor(meta)],
            loc,
        );
        func.op_mut(op).operands[i] = func.op(bridge).result(0);
        bridges += 1;
    }
    if detach_reference_result(func, block, op)? {
        bridges += 1;
    }
    Ok(bridges)
}

/// When `op`'s result is reference-typed, retype it as a value tensor
/// and reintroduce the reference through a trailing `from_value`.
fn detach_reference_result(
    func: &mut Function,
    block: BlockId,
    op: OpId,
) -> Result<bool, Diagnostic> {
    let Some(&result) = func.op(op).results.first() else {
        return Ok(false);
    };
    let Type::Tensor(meta) = func.value(result).ty.clone() else {
        return Ok(false);
    };
    let loc = func.op(op).loc;
    let users = func.uses(result);
    func.value_mut(result).ty = Type::ValueTensor(meta.clone());
    let Some(index) = func.op_index(block, op) else {
        return Err(Diagnostic::internal(loc, &func.name, "operation left its block during rewriting"));
    };
    let bridge = func.insert_op(
        block,
        index + 1,
        OpKind::FromValue,
        vec![result],
        vec![Type::Tensor(meta)],
        loc,
    );
    let reference = func.op(bridge).result(0);
    for (user, i) in users {
        func.op_mut(user).operands[i] = reference;
    }
    Ok(true)
}
