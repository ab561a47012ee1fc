//! Stage 8: restore the return convention of public functions.
//!
//! Refinement narrows `Function::results` everywhere it can prove
//! something, public entry points included. Callers outside the
//! program still hold the originally declared types, so each public
//! function gets its commitment back: every returned value whose type
//! moved is widened in place,
//!
//! ```text
//!   return %y : vtensor<[2,3],f32>      declared vtensor<*,?>
//!     =>
//!   %w = value_cast %y : vtensor<*,?>
//!   return %w
//! ```
//!
//! with `value_cast` when only tensor meta differs and `derefine` for
//! any other widening. Private functions keep their narrowed results;
//! internal call sites already agreed on them during refinement.

use tensile_core::ir::{OpKind, Opcode, Program};
use tensile_core::{BlockId, Diagnostic, FuncId};

#[derive(Debug, Default, Clone, Copy)]
pub struct PublicReturnStats {
    pub casts_inserted: usize,
    pub functions_restored: usize,
}

pub struct PublicReturnOutput {
    pub program: Program,
    pub stats: PublicReturnStats,
}

pub struct PublicReturnRefiner {
    program: Program,
}

impl PublicReturnRefiner {
    pub fn new(program: Program) -> PublicReturnRefiner {
        PublicReturnRefiner { program }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<PublicReturnOutput, Diagnostic> {
        let mut stats = PublicReturnStats::default();
        let ids: Vec<FuncId> = self.program.func_ids().collect();
        for f in ids {
            if !self.program.function(f).is_public() {
                continue;
            }
            let declared = self.program.function(f).declared_results.clone();
            let func = self.program.function_mut(f);
            for b in 0..func.blocks.len() {
                let block = BlockId::new(b as u32);
                let Some(&ret) = func.blocks[block.index()].ops.last() else { continue };
                if func.op(ret).kind.opcode() != Opcode::Return {
                    continue;
                }
                for (i, declared_ty) in declared.iter().enumerate() {
                    let Some(&returned) = func.op(ret).operands.get(i) else { continue };
                    let ty = func.value(returned).ty.clone();
                    if ty == *declared_ty {
                        continue;
                    }
                    let loc = func.op(ret).loc;
                    let Some(index) = func.op_index(block, ret) else {
                        return Err(Diagnostic::internal(
                            loc,
                            &func.name,
                            "return left its block during rewriting",
                        ));
                    };
                    let kind = match declared_ty.tensor_meta() {
                        Some(meta) if ty.is_value_tensor() && declared_ty.is_value_tensor() => {
                            OpKind::ValueCast(meta.clone())
                        }
                        _ => OpKind::Derefine(declared_ty.clone()),
                    };
                    let widen = func.insert_op(
                        block,
                        index,
                        kind,
                        vec![returned],
                        vec![declared_ty.clone()],
                        loc,
                    );
                    let widened = func.op(widen).result(0);
                    func.op_mut(ret).operands[i] = widened;
                    stats.casts_inserted += 1;
                }
            }
            if func.results != declared {
                func.results = declared;
                stats.functions_restored += 1;
            }
        }
        Ok(PublicReturnOutput { program: self.program, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensile_core::ir::{FuncBuilder, Function, Visibility};
    use tensile_core::{ConstValue, DType, SourceLoc, TensorLit, Type};

    fn loc() -> SourceLoc {
        SourceLoc::unknown()
    }

    fn lit(dims: &[i64]) -> ConstValue {
        ConstValue::Tensor(TensorLit::splat(dims, DType::F32, 1.0))
    }

    fn unknown() -> Type {
        Type::vtensor_unknown()
    }

    fn opcodes(func: &Function) -> Vec<Opcode> {
        func.blocks
            .iter()
            .flat_map(|b| b.ops.iter().map(|&op| func.op(op).kind.opcode()))
            .collect()
    }

    /// A public function whose result narrowed to `refined` while the
    /// declared type stayed `declared`.
    fn narrowed_function(visibility: Visibility, declared: Type, refined: Type) -> Program {
        let mut fb = FuncBuilder::new("f", visibility, loc());
        fb.results(vec![declared]);
        let x = fb.constant(lit(&[2]), loc());
        let r = fb.op1(OpKind::Relu, vec![x], refined.clone(), loc());
        fb.ret(vec![r], loc());
        let mut func = fb.finish();
        func.results = vec![refined];
        let mut program = Program::new();
        program.add_function(func);
        program
    }

    #[test]
    fn refined_results_are_widened_back() {
        let program =
            narrowed_function(Visibility::Public, unknown(), Type::vtensor(&[2], DType::F32));
        let out = PublicReturnRefiner::new(program).run().unwrap();
        assert_eq!(out.stats.casts_inserted, 1);
        assert_eq!(out.stats.functions_restored, 1);

        let func = &out.program.functions[0];
        assert_eq!(opcodes(func), vec![
            Opcode::Const,
            Opcode::Relu,
            Opcode::ValueCast,
            Opcode::Return
        ]);
        assert_eq!(func.results, vec![unknown()]);
        let cast = func.blocks[0].ops[2];
        let ret = func.blocks[0].ops[3];
        assert_eq!(func.value(func.op(cast).result(0)).ty, unknown());
        assert_eq!(func.op(ret).operand(0), func.op(cast).result(0));
    }

    #[test]
    fn matching_results_pass_through() {
        let concrete = Type::vtensor(&[2], DType::F32);
        let program = narrowed_function(Visibility::Public, concrete.clone(), concrete);
        let out = PublicReturnRefiner::new(program).run().unwrap();
        assert_eq!(out.stats.casts_inserted, 0);
        assert_eq!(out.stats.functions_restored, 0);
        let func = &out.program.functions[0];
        assert_eq!(opcodes(func), vec![Opcode::Const, Opcode::Relu, Opcode::Return]);
    }

    #[test]
    fn private_functions_keep_refined_results() {
        let refined = Type::vtensor(&[2], DType::F32);
        let program = narrowed_function(Visibility::Private, unknown(), refined.clone());
        let out = PublicReturnRefiner::new(program).run().unwrap();
        assert_eq!(out.stats.casts_inserted, 0);
        assert_eq!(out.stats.functions_restored, 0);
        assert_eq!(out.program.functions[0].results, vec![refined]);
    }

    #[test]
    fn class_changes_widen_with_derefine() {
        let declared = Type::optional(unknown());
        let refined = Type::vtensor(&[2], DType::F32);
        let program = narrowed_function(Visibility::Public, declared.clone(), refined);
        let out = PublicReturnRefiner::new(program).run().unwrap();
        assert_eq!(out.stats.casts_inserted, 1);

        let func = &out.program.functions[0];
        let widen = func.blocks[0].ops[2];
        assert_eq!(func.op(widen).kind, OpKind::Derefine(declared.clone()));
        assert_eq!(func.value(func.op(widen).result(0)).ty, declared);
        assert_eq!(func.results, vec![declared]);
    }

    #[test]
    fn second_run_is_identity() {
        let program =
            narrowed_function(Visibility::Public, unknown(), Type::vtensor(&[2], DType::F32));
        let first = PublicReturnRefiner::new(program).run().unwrap();
        let second = PublicReturnRefiner::new(first.program).run().unwrap();
        assert_eq!(second.stats.casts_inserted, 0);
        assert_eq!(second.stats.functions_restored, 0);
    }
}
