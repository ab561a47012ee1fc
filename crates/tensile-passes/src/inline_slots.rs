//! Stage 3: inline provably constant global slots.
//!
//! A slot's contents are constant when it is frozen, or when it is mutable
//! but nothing in the whole program ever writes it. Writes come in two
//! shapes: a direct `global.set`, or a mutation through the alias web of a
//! `global.get` (a `ref_cast` chain ending at an in-place operand). Any
//! call to a function outside the program defeats the whole-program
//! argument, so with unresolved callees only frozen slots qualify.
//!
//! Qualifying reads become `const`; qualifying `global.get`s become
//! `const` + `from_value`, since their users expect storage they can hold
//! a reference to. The slots themselves are then deleted.

use crate::analysis::{AliasClasses, CallGraph};
use rustc_hash::{FxHashMap, FxHashSet};
use tensile_core::ir::{OpKind, Program};
use tensile_core::{BlockId, ConstValue, Diagnostic, OpId, SymbolHash, ValueId};

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineSlotsStats {
    pub slots_inlined: usize,
    pub reads_replaced: usize,
    pub slots_kept: usize,
}

pub struct InlineSlotsOutput {
    pub program: Program,
    pub stats: InlineSlotsStats,
}

pub struct SlotInliner {
    program: Program,
}

impl SlotInliner {
    pub fn new(program: Program) -> SlotInliner {
        SlotInliner { program }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<InlineSlotsOutput, Diagnostic> {
        let has_unresolved = CallGraph::build(&self.program).has_unresolved_callees();
        let written = self.written_symbols();

        let inlined: FxHashMap<SymbolHash, ConstValue> = self
            .program
            .globals
            .iter()
            .filter(|slot| {
                !slot.mutable || (!has_unresolved && !written.contains(&slot.symbol))
            })
            .map(|slot| (slot.symbol, slot.initializer.clone()))
            .collect();

        if inlined.is_empty() {
            let slots_kept = self.program.globals.len();
            return Ok(InlineSlotsOutput {
                program: self.program,
                stats: InlineSlotsStats { slots_kept, ..InlineSlotsStats::default() },
            });
        }

        let reads_replaced = self.replace_reads(&inlined)?;
        let before = self.program.globals.len();
        self.program.globals.retain(|slot| !inlined.contains_key(&slot.symbol));
        let stats = InlineSlotsStats {
            slots_inlined: before - self.program.globals.len(),
            reads_replaced,
            slots_kept: self.program.globals.len(),
        };
        Ok(InlineSlotsOutput { program: self.program, stats })
    }

    /// Symbols some function may write: `global.set` targets plus slots
    /// whose `global.get` alias web reaches a mutated operand position.
    fn written_symbols(&self) -> FxHashSet<SymbolHash> {
        let mut written = FxHashSet::default();
        for id in self.program.func_ids() {
            let func = self.program.function(id);
            let mut alias = AliasClasses::new(func.values.len());
            let mut rep_of_symbol: FxHashMap<SymbolHash, ValueId> = FxHashMap::default();

            for block in &func.blocks {
                for &op in &block.ops {
                    let operation = func.op(op);
                    match &operation.kind {
                        OpKind::GlobalSet(symbol) => {
                            written.insert(*symbol);
                        }
                        OpKind::GlobalGet(symbol) => {
                            // Gets of one symbol name the same storage.
                            let result = operation.result(0);
                            match rep_of_symbol.get(symbol) {
                                Some(&previous) => alias.union(result, previous),
                                None => {
                                    rep_of_symbol.insert(*symbol, result);
                                }
                            }
                        }
                        _ => {}
                    }
                    if let Some(i) = operation.kind.aliased_operand() {
                        alias.union(operation.operand(i), operation.result(0));
                    }
                }
            }

            let mut mutated: FxHashSet<u32> = FxHashSet::default();
            for block in &func.blocks {
                for &op in &block.ops {
                    if let Some(i) = func.op(op).kind.mutated_operand() {
                        mutated.insert(alias.find(func.op(op).operand(i)));
                    }
                }
            }
            for (symbol, rep) in rep_of_symbol {
                if mutated.contains(&alias.find(rep)) {
                    written.insert(symbol);
                }
            }
        }
        written
    }

    fn replace_reads(
        &mut self,
        inlined: &FxHashMap<SymbolHash, ConstValue>,
    ) -> Result<usize, Diagnostic> {
        let mut count = 0;
        for id in self.program.func_ids() {
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
                match func.op(op).kind.clone() {
                    OpKind::GlobalRead(symbol) => {
                        let Some(init) = inlined.get(&symbol) else {
                            continue;
                        };
                        func.op_mut(op).kind = OpKind::Const(init.clone());
                        count += 1;
                    }
                    OpKind::GlobalGet(symbol) => {
                        let Some(init) = inlined.get(&symbol) else {
                            continue;
                        };
                        let loc = func.op(op).loc;
                        let Some(index) = func.op_index(block, op) else {
                            return Err(Diagnostic::internal(
                                loc,
                                &func.name,
                                "operation left its block during rewriting",
                            ));
                        };
                        let materialized = func.insert_op(
                            block,
                            index,
                            OpKind::Const(init.clone()),
                            vec![],
                            vec![init.ty()],
                            loc,
                        );
                        let value = func.op(materialized).result(0);
                        func.op_mut(op).kind = OpKind::FromValue;
                        func.op_mut(op).operands = vec![value];
                        count += 1;
                    }
                    _ => {}
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensile_core::ir::{FuncBuilder, GlobalSlot, Visibility};
    use tensile_core::{DType, SourceLoc, TensorLit, Type};

    fn loc() -> SourceLoc {
        SourceLoc::unknown()
    }

    fn slot(name: &str, mutable: bool) -> GlobalSlot {
        GlobalSlot {
            name: name.into(),
            symbol: SymbolHash::slot(name),
            ty: Type::vtensor(&[2], DType::F32),
            initializer: ConstValue::Tensor(TensorLit::splat(&[2], DType::F32, 1.0)),
            mutable,
            loc: loc(),
        }
    }

    #[test]
    fn frozen_slot_reads_become_constants() {
        let mut program = Program::new();
        program.add_slot(slot("w", false));
        let symbol = SymbolHash::slot("w");

        let mut fb = FuncBuilder::new("f", Visibility::Public, loc());
        fb.results(vec![Type::vtensor(&[2], DType::F32)]);
        let w = fb.op1(
            OpKind::GlobalRead(symbol),
            vec![],
            Type::vtensor(&[2], DType::F32),
            loc(),
        );
        fb.ret(vec![w], loc());
        program.add_function(fb.finish());

        let out = SlotInliner::new(program).run().unwrap();
        assert_eq!(out.stats.slots_inlined, 1);
        assert_eq!(out.stats.reads_replaced, 1);
        assert!(out.program.globals.is_empty());
        let f = &out.program.functions[0];
        let first = f.blocks[0].ops[0];
        assert!(matches!(f.op(first).kind, OpKind::Const(_)));
    }

    #[test]
    fn written_mutable_slot_is_kept() {
        let mut program = Program::new();
        program.add_slot(slot("acc", true));
        let symbol = SymbolHash::slot("acc");

        let mut fb = FuncBuilder::new("f", Visibility::Public, loc());
        let x = fb.param(Type::vtensor(&[2], DType::F32));
        fb.results(vec![Type::vtensor(&[2], DType::F32)]);
        let current = fb.op1(
            OpKind::GlobalRead(symbol),
            vec![],
            Type::vtensor(&[2], DType::F32),
            loc(),
        );
        fb.op(OpKind::GlobalSet(symbol), vec![x], vec![], loc());
        fb.ret(vec![current], loc());
        program.add_function(fb.finish());

        let out = SlotInliner::new(program).run().unwrap();
        assert_eq!(out.stats.slots_inlined, 0);
        assert_eq!(out.stats.slots_kept, 1);
        let f = &out.program.functions[0];
        let first = f.blocks[0].ops[0];
        assert!(matches!(f.op(first).kind, OpKind::GlobalRead(_)));
    }

    #[test]
    fn mutation_through_alias_web_pins_the_slot() {
        let mut program = Program::new();
        program.add_slot(slot("acc", true));
        let symbol = SymbolHash::slot("acc");
        let ref_ty = Type::Tensor(tensile_core::TensorMeta::concrete(&[2], DType::F32));

        let mut fb = FuncBuilder::new("f", Visibility::Public, loc());
        fb.results(vec![]);
        let handle = fb.op1(OpKind::GlobalGet(symbol), vec![], ref_ty.clone(), loc());
        // relu_ mutates its operand through the alias.
        let _mutated = fb.op1(OpKind::ReluInPlace, vec![handle], ref_ty, loc());
        fb.ret(vec![], loc());
        program.add_function(fb.finish());

        let out = SlotInliner::new(program).run().unwrap();
        assert_eq!(out.stats.slots_inlined, 0);
        assert_eq!(out.stats.slots_kept, 1);
    }

    #[test]
    fn unwritten_mutable_slot_is_inlined() {
        let mut program = Program::new();
        program.add_slot(slot("w", true));
        let symbol = SymbolHash::slot("w");
        let ref_ty = Type::Tensor(tensile_core::TensorMeta::concrete(&[2], DType::F32));

        let mut fb = FuncBuilder::new("f", Visibility::Public, loc());
        fb.results(vec![Type::vtensor(&[2], DType::F32)]);
        let handle = fb.op1(OpKind::GlobalGet(symbol), vec![], ref_ty, loc());
        let snapshot = fb.op1(
            OpKind::ToValue,
            vec![handle],
            Type::vtensor(&[2], DType::F32),
            loc(),
        );
        fb.ret(vec![snapshot], loc());
        program.add_function(fb.finish());

        let out = SlotInliner::new(program).run().unwrap();
        assert_eq!(out.stats.slots_inlined, 1);
        let f = &out.program.functions[0];
        // const feeding a from_value: the reference user keeps storage.
        let kinds: Vec<_> = f.blocks[0].ops.iter().map(|&op| f.op(op).kind.opcode()).collect();
        assert_eq!(
            kinds,
            vec![
                tensile_core::ir::Opcode::Const,
                tensile_core::ir::Opcode::FromValue,
                tensile_core::ir::Opcode::ToValue,
                tensile_core::ir::Opcode::Return,
            ]
        );
    }

    #[test]
    fn unresolved_callee_pins_mutable_slots_only() {
        let mut program = Program::new();
        program.add_slot(slot("frozen", false));
        program.add_slot(slot("mutable", true));

        let mut fb = FuncBuilder::new("f", Visibility::Public, loc());
        fb.results(vec![Type::vtensor(&[2], DType::F32)]);
        let w = fb.op1(
            OpKind::GlobalRead(SymbolHash::slot("frozen")),
            vec![],
            Type::vtensor(&[2], DType::F32),
            loc(),
        );
        fb.op(OpKind::Call("external_helper".into()), vec![], vec![], loc());
        fb.ret(vec![w], loc());
        program.add_function(fb.finish());

        let out = SlotInliner::new(program).run().unwrap();
        assert_eq!(out.stats.slots_inlined, 1);
        assert_eq!(out.stats.slots_kept, 1);
        assert_eq!(out.program.globals[0].name, "mutable");
    }
}
