//! Stage 6: decompose composite operators.
//!
//! Composites (`linear`, `softmax`, `mean`, `square`) carry no more
//! information than a handful of primitives; backends that do not
//! implement them directly want the expansion instead. The pass is
//! driven by a [`DecompositionRegistry`]: for each composite it selects
//! the first rule whose legality predicate accepts the concrete operand
//! types and splices in the template, a drop-in with the composite's own
//! result type. Spliced output is re-scanned, so rules may expand into
//! other composites.
//!
//! The allow set narrows which opcodes are attempted at all; the deny
//! set names opcodes that must not survive. A composite left without a
//! legal rule is retained; if it is also denied, the configured policy
//! decides between aborting and a warning.

use crate::analysis::Worklist;
use rustc_hash::FxHashSet;
use tensile_core::ir::{Function, Opcode, Program};
use tensile_core::{BlockId, Diagnostic, DiagnosticKind, OpId, Type, ValueId};
use tensile_rules::{DecompositionRegistry, Expansion, TemplateInput};

/// What happens to a denylisted composite with no legal rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Abort the pipeline with a decomposition error.
    #[default]
    Fatal,
    /// Keep the op and report a warning.
    Warn,
}

#[derive(Debug, Clone, Default)]
pub struct DecomposeConfig {
    /// Opcodes to attempt; `None` attempts every composite.
    pub allow: Option<FxHashSet<Opcode>>,
    /// Opcodes that must not survive the pass.
    pub deny: FxHashSet<Opcode>,
    pub policy: MissPolicy,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DecomposeStats {
    pub ops_decomposed: usize,
    pub ops_retained: usize,
}

#[derive(Debug)]
pub struct DecomposeOutput {
    pub program: Program,
    pub stats: DecomposeStats,
    pub warnings: Vec<Diagnostic>,
}

pub struct CompositeDecomposer<'a> {
    program: Program,
    registry: &'a DecompositionRegistry,
    config: DecomposeConfig,
}

impl<'a> CompositeDecomposer<'a> {
    pub fn new(
        program: Program,
        registry: &'a DecompositionRegistry,
        config: DecomposeConfig,
    ) -> CompositeDecomposer<'a> {
        CompositeDecomposer { program, registry, config }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<DecomposeOutput, Diagnostic> {
        let mut stats = DecomposeStats::default();
        let mut warnings = Vec::new();
        let ids: Vec<_> = self.program.func_ids().collect();
        for id in ids {
            let func = self.program.function_mut(id);
            decompose_function(func, self.registry, &self.config, &mut stats, &mut warnings)?;
        }
        Ok(DecomposeOutput { program: self.program, stats, warnings })
    }
}

fn decompose_function(
    func: &mut Function,
    registry: &DecompositionRegistry,
    config: &DecomposeConfig,
    stats: &mut DecomposeStats,
    warnings: &mut Vec<Diagnostic>,
) -> Result<(), Diagnostic> {
    let mut worklist: Worklist<(BlockId, OpId)> = Worklist::seeded(
        func.blocks.iter().enumerate().flat_map(|(b, block)| {
            block.ops.iter().map(move |&op| (BlockId::new(b as u32), op))
        }),
    );
    while let Some((block, op)) = worklist.pop() {
        let Some(index) = func.op_index(block, op) else {
            continue;
        };
        let kind = func.op(op).kind.clone();
        if !kind.is_composite() {
            continue;
        }
        let opcode = kind.opcode();
        let loc = func.op(op).loc;

        let attempted = config.allow.as_ref().is_none_or(|set| set.contains(&opcode));
        let selected = if attempted {
            let operand_types: Vec<Type> = func
                .op(op)
                .operands
                .iter()
                .map(|&v| func.value(v).ty.clone())
                .collect();
            let [result] = func.op(op).results[..] else {
                return Err(Diagnostic::internal(
                    loc,
                    &func.name,
                    format!("`{opcode}` does not have exactly one result"),
                ));
            };
            let result_ty = func.value(result).ty.clone();
            registry.select(&kind, &operand_types, &result_ty).map(|(_, ex)| (result, ex))
        } else {
            None
        };

        match selected {
            Some((result, expansion)) => {
                let spliced = splice(func, block, op, index, &expansion)?;
                let replacement =
                    resolve_template_value(func, op, &expansion.result, &spliced, loc)?;
                func.replace_all_uses(result, replacement);
                func.erase_op(op);
                for new_op in spliced {
                    worklist.push((block, new_op));
                }
                stats.ops_decomposed += 1;
            }
            None if config.deny.contains(&opcode) => match config.policy {
                MissPolicy::Fatal => {
                    return Err(Diagnostic::decomposition(
                        loc,
                        &func.name,
                        format!("no legal decomposition for denylisted `{opcode}`"),
                    ));
                }
                MissPolicy::Warn => {
                    warnings.push(Diagnostic::warning(
                        DiagnosticKind::Decomposition,
                        loc,
                        &func.name,
                        format!("no legal decomposition for denylisted `{opcode}`; op retained"),
                    ));
                    stats.ops_retained += 1;
                }
            },
            None => {
                stats.ops_retained += 1;
            }
        }
    }
    Ok(())
}

/// Insert the template's ops ahead of the composite, in template order.
fn splice(
    func: &mut Function,
    block: BlockId,
    composite: OpId,
    index: usize,
    expansion: &Expansion,
) -> Result<Vec<OpId>, Diagnostic> {
    let loc = func.op(composite).loc;
    let mut spliced = Vec::with_capacity(expansion.ops.len());
    for (i, template_op) in expansion.ops.iter().enumerate() {
        let mut operands = Vec::with_capacity(template_op.inputs.len());
        for input in &template_op.inputs {
            operands.push(resolve_template_value(func, composite, input, &spliced, loc)?);
        }
        let new_op = func.insert_op(
            block,
            index + i,
            template_op.kind.clone(),
            operands,
            vec![template_op.result_ty.clone()],
            loc,
        );
        spliced.push(new_op);
    }
    Ok(spliced)
}

fn resolve_template_value(
    func: &Function,
    composite: OpId,
    input: &TemplateInput,
    spliced: &[OpId],
    loc: tensile_core::SourceLoc,
) -> Result<ValueId, Diagnostic> {
    match input {
        TemplateInput::Operand(n) => {
            let Some(&operand) = func.op(composite).operands.get(*n) else {
                return Err(Diagnostic::internal(
                    loc,
                    &func.name,
                    format!("decomposition template names operand {n} that does not exist"),
                ));
            };
            Ok(operand)
        }
        TemplateInput::Emitted(n) => {
            let Some(&op) = spliced.get(*n) else {
                return Err(Diagnostic::internal(
                    loc,
                    &func.name,
                    format!("decomposition template uses emitted op {n} before it exists"),
                ));
            };
            Ok(func.op(op).result(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensile_core::ir::{verify_program, FuncBuilder, OpKind, VerifyConfig, Visibility};
    use tensile_core::{ConstValue, DType, SourceLoc, TensorLit};
    use tensile_rules::{DecomposeRule, ExpansionBuilder};

    fn loc() -> SourceLoc {
        SourceLoc::unknown()
    }

    fn vt(dims: &[i64]) -> Type {
        Type::vtensor(dims, DType::F32)
    }

    fn lit(dims: &[i64]) -> ConstValue {
        ConstValue::Tensor(TensorLit::splat(dims, DType::F32, 1.0))
    }

    fn int_lit(dims: &[i64]) -> ConstValue {
        ConstValue::Tensor(TensorLit::splat(dims, DType::I64, 1.0))
    }

    fn single_op_program(kind: OpKind, input: ConstValue, result: Type) -> Program {
        let mut fb = FuncBuilder::new("f", Visibility::Public, loc());
        fb.results(vec![result.clone()]);
        let x = fb.constant(input, loc());
        let y = fb.op1(kind, vec![x], result, loc());
        fb.ret(vec![y], loc());
        let mut program = Program::new();
        program.add_function(fb.finish());
        program
    }

    fn opcodes(func: &Function) -> Vec<Opcode> {
        func.blocks
            .iter()
            .flat_map(|b| b.ops.iter().map(|&op| func.op(op).kind.opcode()))
            .collect()
    }

    #[test]
    fn square_is_spliced_into_mul() {
        let program = single_op_program(OpKind::Square, lit(&[2]), vt(&[2]));
        let registry = DecompositionRegistry::with_defaults();
        let out = CompositeDecomposer::new(program, &registry, DecomposeConfig::default())
            .run()
            .unwrap();
        assert_eq!(out.stats.ops_decomposed, 1);
        assert_eq!(out.stats.ops_retained, 0);
        assert!(out.warnings.is_empty());

        let func = &out.program.functions[0];
        assert_eq!(opcodes(func), vec![Opcode::Const, Opcode::Mul, Opcode::Return]);
        let mul = func.blocks[0].ops[1];
        let ret = func.blocks[0].ops[2];
        assert_eq!(func.op(ret).operand(0), func.op(mul).result(0));

        let mut program = out.program;
        program.compact().unwrap();
        verify_program(&program, &VerifyConfig::primitive_only()).unwrap();
    }

    #[test]
    fn expansion_output_is_rescanned() {
        // square -> mean -> relu, through two custom rules.
        let mut registry = DecompositionRegistry::empty();
        registry
            .register(Opcode::Square, DecomposeRule {
                name: "square-to-mean",
                legal: |_, _| true,
                expand: |_, operands, result| {
                    let mut ex = ExpansionBuilder::new();
                    let _ = operands;
                    let m = ex.emit(
                        OpKind::Mean { dim: None },
                        vec![TemplateInput::Operand(0)],
                        result.clone(),
                    );
                    Some(ex.finish(m))
                },
            })
            .unwrap();
        registry
            .register(Opcode::Mean, DecomposeRule {
                name: "mean-to-relu",
                legal: |_, _| true,
                expand: |_, _, result| {
                    let mut ex = ExpansionBuilder::new();
                    let r = ex.emit(OpKind::Relu, vec![TemplateInput::Operand(0)], result.clone());
                    Some(ex.finish(r))
                },
            })
            .unwrap();

        let program = single_op_program(OpKind::Square, lit(&[2]), vt(&[2]));
        let out = CompositeDecomposer::new(program, &registry, DecomposeConfig::default())
            .run()
            .unwrap();
        assert_eq!(out.stats.ops_decomposed, 2);
        let func = &out.program.functions[0];
        assert_eq!(opcodes(func), vec![Opcode::Const, Opcode::Relu, Opcode::Return]);
    }

    #[test]
    fn denylisted_miss_is_fatal_by_default() {
        // Integer softmax has no legal rule.
        let program = single_op_program(
            OpKind::Softmax { dim: 0 },
            int_lit(&[2]),
            Type::vtensor(&[2], DType::I64),
        );
        let registry = DecompositionRegistry::with_defaults();
        let config = DecomposeConfig {
            deny: FxHashSet::from_iter([Opcode::Softmax]),
            ..DecomposeConfig::default()
        };
        let err = CompositeDecomposer::new(program, &registry, config).run().unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Decomposition);
        assert!(err.message.contains("no legal decomposition"));
    }

    #[test]
    fn denylisted_miss_can_downgrade_to_warning() {
        let program = single_op_program(
            OpKind::Softmax { dim: 0 },
            int_lit(&[2]),
            Type::vtensor(&[2], DType::I64),
        );
        let registry = DecompositionRegistry::with_defaults();
        let config = DecomposeConfig {
            deny: FxHashSet::from_iter([Opcode::Softmax]),
            policy: MissPolicy::Warn,
            ..DecomposeConfig::default()
        };
        let out = CompositeDecomposer::new(program, &registry, config).run().unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(!out.warnings[0].is_fatal());
        assert_eq!(out.stats.ops_retained, 1);
        let func = &out.program.functions[0];
        assert!(opcodes(func).contains(&Opcode::Softmax));
    }

    #[test]
    fn misses_off_the_denylist_are_retained_silently() {
        let program = single_op_program(
            OpKind::Softmax { dim: 0 },
            int_lit(&[2]),
            Type::vtensor(&[2], DType::I64),
        );
        let registry = DecompositionRegistry::with_defaults();
        let out = CompositeDecomposer::new(program, &registry, DecomposeConfig::default())
            .run()
            .unwrap();
        assert!(out.warnings.is_empty());
        assert_eq!(out.stats.ops_retained, 1);
    }

    #[test]
    fn allow_set_limits_what_is_attempted() {
        let mut fb = FuncBuilder::new("f", Visibility::Public, loc());
        fb.results(vec![vt(&[2]), Type::vtensor(&[], DType::F32)]);
        let x = fb.constant(lit(&[2]), loc());
        let squared = fb.op1(OpKind::Square, vec![x], vt(&[2]), loc());
        let averaged = fb.op1(
            OpKind::Mean { dim: None },
            vec![x],
            Type::vtensor(&[], DType::F32),
            loc(),
        );
        fb.ret(vec![squared, averaged], loc());
        let mut program = Program::new();
        program.add_function(fb.finish());

        let registry = DecompositionRegistry::with_defaults();
        let config = DecomposeConfig {
            allow: Some(FxHashSet::from_iter([Opcode::Square])),
            ..DecomposeConfig::default()
        };
        let out = CompositeDecomposer::new(program, &registry, config).run().unwrap();
        assert_eq!(out.stats.ops_decomposed, 1);
        assert_eq!(out.stats.ops_retained, 1);
        let func = &out.program.functions[0];
        let kinds = opcodes(func);
        assert!(kinds.contains(&Opcode::Mean));
        assert!(!kinds.contains(&Opcode::Square));
    }
}
