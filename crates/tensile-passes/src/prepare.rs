//! Stage 1: normalize freshly imported IR.
//!
//! Three jobs, all prerequisites of the flattener:
//!
//! - devirtualize `call_method` into direct `call`s through the object
//!   hierarchy, keeping the receiver as operand 0
//! - fold `unchecked_narrow(derefine(x))` back to `x` when the narrow
//!   target is exactly `x`'s type, so importer round-trips don't survive
//!   into later stages
//! - reject object values that escape anywhere other than a receiver
//!   position, since the flattener cannot rewrite such uses

use tensile_core::ir::{OpKind, OpTraits, Program, ValueDef};
use tensile_core::{Diagnostic, OpId, Type};

#[derive(Debug, Default, Clone, Copy)]
pub struct PrepareStats {
    pub calls_devirtualized: usize,
    pub casts_folded: usize,
}

#[derive(Debug)]
pub struct PrepareOutput {
    pub program: Program,
    pub stats: PrepareStats,
}

pub struct GraphPreparer {
    program: Program,
}

impl GraphPreparer {
    pub fn new(program: Program) -> GraphPreparer {
        GraphPreparer { program }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<PrepareOutput, Diagnostic> {
        self.check_hierarchy_presence()?;
        let calls_devirtualized = self.devirtualize()?;
        self.validate_object_uses()?;
        let casts_folded = self.fold_redundant_casts();
        Ok(PrepareOutput {
            program: self.program,
            stats: PrepareStats { calls_devirtualized, casts_folded },
        })
    }

    /// Structural ops are meaningless without a hierarchy to resolve them.
    fn check_hierarchy_presence(&self) -> Result<(), Diagnostic> {
        if self.program.hierarchy.is_some() {
            return Ok(());
        }
        for id in self.program.func_ids() {
            let func = self.program.function(id);
            for block in &func.blocks {
                for &op in &block.ops {
                    let operation = func.op(op);
                    if operation.kind.traits().contains(OpTraits::STRUCTURAL) {
                        return Err(Diagnostic::structural(
                            operation.loc,
                            &func.name,
                            format!(
                                "`{}` in a program without an object hierarchy",
                                operation.kind.opcode()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrite every `call_method` into a `call` of the function the
    /// receiver's class binds under that name.
    fn devirtualize(&mut self) -> Result<usize, Diagnostic> {
        let Some(graph) = self.program.hierarchy.clone() else {
            return Ok(0);
        };
        let func_names: Vec<String> =
            self.program.functions.iter().map(|f| f.name.clone()).collect();

        let mut count = 0;
        for id in self.program.func_ids() {
            let func = self.program.function_mut(id);
            let ops: Vec<OpId> =
                func.blocks.iter().flat_map(|b| b.ops.iter().copied()).collect();
            for op in ops {
                let OpKind::CallMethod(method_name) = &func.op(op).kind else {
                    continue;
                };
                let method_name = method_name.clone();
                let loc = func.op(op).loc;
                let Some(&receiver) = func.op(op).operands.first() else {
                    return Err(Diagnostic::structural(
                        loc,
                        &func.name,
                        format!("`{method_name}` method call without a receiver"),
                    ));
                };
                let Type::Class(class_name) = &func.value(receiver).ty else {
                    return Err(Diagnostic::structural(
                        loc,
                        &func.name,
                        format!("`{method_name}` receiver is not an object"),
                    ));
                };
                let Some(class_id) = graph.find_class(class_name) else {
                    return Err(Diagnostic::structural(
                        loc,
                        &func.name,
                        format!("receiver names unknown class `{class_name}`"),
                    ));
                };
                let Some(method) = graph.class(class_id).method(&method_name) else {
                    return Err(Diagnostic::structural(
                        loc,
                        &func.name,
                        format!("class `{class_name}` has no method `{method_name}`"),
                    ));
                };
                let Some(callee) = func_names.get(method.func.index()).cloned() else {
                    return Err(Diagnostic::structural(
                        loc,
                        &func.name,
                        format!("method `{method_name}` refers to a missing function"),
                    ));
                };
                func.op_mut(op).kind = OpKind::Call(callee);
                count += 1;
            }
        }
        Ok(count)
    }

    /// Every use of a class-typed value must be the receiver of a slot
    /// access or a (devirtualized) call.
    fn validate_object_uses(&self) -> Result<(), Diagnostic> {
        for id in self.program.func_ids() {
            let func = self.program.function(id);
            for block in &func.blocks {
                for &op in &block.ops {
                    let operation = func.op(op);
                    for (i, &operand) in operation.operands.iter().enumerate() {
                        if !func.value(operand).ty.contains_class() {
                            continue;
                        }
                        let receiver = i == 0
                            && matches!(
                                operation.kind,
                                OpKind::GetSlot(_) | OpKind::SetSlot(_) | OpKind::Call(_)
                            );
                        if !receiver {
                            return Err(Diagnostic::structural(
                                operation.loc,
                                &func.name,
                                format!(
                                    "object value escapes as operand {i} of `{}`",
                                    operation.kind.opcode()
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove `unchecked_narrow(derefine(x))` round trips whose narrow
    /// target is exactly `x`'s type. The `derefine` is kept while other
    /// users remain.
    fn fold_redundant_casts(&mut self) -> usize {
        let mut count = 0;
        for id in self.program.func_ids() {
            let func = self.program.function_mut(id);
            let ops: Vec<OpId> =
                func.blocks.iter().flat_map(|b| b.ops.iter().copied()).collect();
            for op in ops {
                let OpKind::UncheckedNarrow(target) = &func.op(op).kind else {
                    continue;
                };
                let target = target.clone();
                let derefined = func.op(op).operand(0);
                let ValueDef::OpResult { op: def_op, .. } = func.value(derefined).def else {
                    continue;
                };
                if !matches!(func.op(def_op).kind, OpKind::Derefine(_)) {
                    continue;
                }
                let source = func.op(def_op).operand(0);
                if func.value(source).ty != target {
                    continue;
                }
                let narrowed = func.op(op).result(0);
                func.replace_all_uses(narrowed, source);
                func.erase_op(op);
                if func.uses(derefined).is_empty() {
                    func.erase_op(def_op);
                }
                count += 1;
            }
        }
        count
    }
}
