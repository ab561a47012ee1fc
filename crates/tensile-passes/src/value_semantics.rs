//! Stage 5: maximize value semantics.
//!
//! After variant reduction the only reference-tensor traffic left is the
//! bridge ops: `global.get`, `from_value`, `clone`, `ref_cast`, `to_value`
//! and `overwrite`. Reference values never cross block, call or return
//! boundaries, so each block can be resolved on its own.
//!
//! Within a block, values that may name the same storage form an alias
//! web (union-find over `ref_cast` edges; `global.get`s of one slot name
//! one storage). Each web has a root, either fresh storage made by
//! `from_value`/`clone` or a global slot, and the pass tracks the web's
//! current contents through a forward walk:
//!
//! ```text
//!   %t = from_value %v        web: fresh, current = %v
//!   overwrite %w, %t          web: current = %w
//!   %r = to_value %t          uses of %r -> %w
//! ```
//!
//! A `to_value` of a global-rooted web with unknown contents materializes
//! one `global.read`; that read is the only copy the rewrite ever pays
//! for. An `overwrite` into a global-rooted web becomes a `global.set`.
//! Calls may write any slot, so they throw away cached global contents.
//!
//! Every bridge op is then erased. Anything else still touching a
//! reference tensor is an aliasing pattern the pass cannot express and
//! is rejected.

use crate::analysis::{AliasClasses, StorageRoot};
use rustc_hash::FxHashMap;
use tensile_core::ir::{Function, OpKind, Program};
use tensile_core::{BlockId, Diagnostic, OpId, SymbolHash, Type, ValueId};

#[derive(Debug, Default, Clone, Copy)]
pub struct ValueSemanticsStats {
    pub webs_resolved: usize,
    pub reads_forwarded: usize,
    pub copies_inserted: usize,
    pub global_stores: usize,
}

#[derive(Debug)]
pub struct ValueSemanticsOutput {
    pub program: Program,
    pub stats: ValueSemanticsStats,
}

#[derive(Clone, Copy)]
struct Web {
    root: StorageRoot,
    current: Option<ValueId>,
}

pub struct ValueSemanticsMaximizer {
    program: Program,
}

impl ValueSemanticsMaximizer {
    pub fn new(program: Program) -> ValueSemanticsMaximizer {
        ValueSemanticsMaximizer { program }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<ValueSemanticsOutput, Diagnostic> {
        let slot_types: FxHashMap<SymbolHash, Type> = self
            .program
            .globals
            .iter()
            .map(|slot| (slot.symbol, slot.ty.clone()))
            .collect();
        let mut stats = ValueSemanticsStats::default();
        let ids: Vec<_> = self.program.func_ids().collect();
        for id in ids {
            let func = self.program.function_mut(id);
            for b in 0..func.blocks.len() {
                resolve_block(func, BlockId::new(b as u32), &slot_types, &mut stats)?;
            }
            reject_residual_references(func)?;
        }
        Ok(ValueSemanticsOutput { program: self.program, stats })
    }
}

fn resolve_block(
    func: &mut Function,
    block: BlockId,
    slot_types: &FxHashMap<SymbolHash, Type>,
    stats: &mut ValueSemanticsStats,
) -> Result<(), Diagnostic> {
    let ops: Vec<OpId> = func.blocks[block.index()].ops.clone();

    // Web discovery.
    let mut alias = AliasClasses::new(func.values.len());
    let mut seeds: Vec<ValueId> = Vec::new();
    let mut wrapped: FxHashMap<OpId, ValueId> = FxHashMap::default();
    let mut first_get: FxHashMap<SymbolHash, ValueId> = FxHashMap::default();
    for &op in &ops {
        let operation = func.op(op);
        match &operation.kind {
            OpKind::GlobalGet(symbol) => {
                let result = operation.result(0);
                alias.set_root(result, StorageRoot::Global(*symbol));
                match first_get.get(symbol) {
                    Some(&previous) => alias.union(result, previous),
                    None => {
                        first_get.insert(*symbol, result);
                    }
                }
                seeds.push(result);
            }
            OpKind::FromValue => {
                let result = operation.result(0);
                alias.set_root(result, StorageRoot::Fresh(op));
                wrapped.insert(op, operation.operand(0));
                seeds.push(result);
            }
            OpKind::TensorClone => {
                let result = operation.result(0);
                alias.set_root(result, StorageRoot::Fresh(op));
                seeds.push(result);
            }
            OpKind::RefCast(_) => {
                alias.union(operation.operand(0), operation.result(0));
            }
            _ => {}
        }
    }
    let mut webs: FxHashMap<u32, Web> = FxHashMap::default();
    for seed in seeds {
        let Some(root) = alias.storage_root(seed) else {
            continue;
        };
        let current = match root {
            StorageRoot::Fresh(op) => wrapped.get(&op).copied(),
            StorageRoot::Global(_) => None,
        };
        webs.insert(alias.find(seed), Web { root, current });
    }

    // Forward walk, replacing reads and stores as they come.
    let mut dead: Vec<OpId> = Vec::new();
    for &op in &ops {
        match func.op(op).kind.clone() {
            OpKind::ToValue => {
                let source = func.op(op).operand(0);
                let rep = alias.find(source);
                if !webs.contains_key(&rep) {
                    continue;
                }
                let loc = func.op(op).loc;
                let value = read_current(func, block, op, &mut webs, rep, slot_types, stats)?;
                let result = func.op(op).result(0);
                let declared = func.value(result).ty.clone();
                let forwarded = if func.value(value).ty.is_refinement_of(&declared) {
                    value
                } else {
                    // Forwarding must not change the type the rest of the
                    // function was built against.
                    let Type::ValueTensor(meta) = declared else {
                        return Err(Diagnostic::internal(
                            loc,
                            &func.name,
                            "`to_value` with a non-tensor result",
                        ));
                    };
                    let Some(index) = func.op_index(block, op) else {
                        return Err(Diagnostic::internal(
                            loc,
                            &func.name,
                            "operation left its block during rewriting",
                        ));
                    };
                    let cast = func.insert_op(
                        block,
                        index,
                        OpKind::ValueCast(meta.clone()),
                        vec![value],
                        vec![Type::ValueTensor(meta)],
                        loc,
                    );
                    func.op(cast).result(0)
                };
                func.replace_all_uses(result, forwarded);
                dead.push(op);
                stats.reads_forwarded += 1;
            }
            OpKind::Overwrite => {
                let stored = func.op(op).operand(0);
                let target = func.op(op).operand(1);
                let rep = alias.find(target);
                let Some(web) = webs.get(&rep).copied() else {
                    continue;
                };
                match web.root {
                    StorageRoot::Fresh(_) => {
                        if let Some(w) = webs.get_mut(&rep) {
                            w.current = Some(stored);
                        }
                        dead.push(op);
                    }
                    StorageRoot::Global(symbol) => {
                        let loc = func.op(op).loc;
                        let Some(slot_ty) = slot_types.get(&symbol) else {
                            return Err(Diagnostic::aliasing(
                                loc,
                                &func.name,
                                format!("store through an alias of unknown slot {symbol}"),
                            ));
                        };
                        let stored = if func.value(stored).ty.is_refinement_of(slot_ty) {
                            stored
                        } else {
                            let Some(meta) = slot_ty.tensor_meta().cloned() else {
                                return Err(Diagnostic::internal(
                                    loc,
                                    &func.name,
                                    "aliased slot is not tensor-typed",
                                ));
                            };
                            let Some(index) = func.op_index(block, op) else {
                                return Err(Diagnostic::internal(
                                    loc,
                                    &func.name,
                                    "operation left its block during rewriting",
                                ));
                            };
                            let cast = func.insert_op(
                                block,
                                index,
                                OpKind::ValueCast(meta),
                                vec![stored],
                                vec![slot_ty.clone()],
                                loc,
                            );
                            func.op(cast).result(0)
                        };
                        func.op_mut(op).kind = OpKind::GlobalSet(symbol);
                        func.op_mut(op).operands = vec![stored];
                        if let Some(w) = webs.get_mut(&rep) {
                            w.current = Some(stored);
                        }
                        stats.global_stores += 1;
                    }
                }
            }
            OpKind::TensorClone => {
                let source = func.op(op).operand(0);
                let source_rep = alias.find(source);
                if webs.contains_key(&source_rep) {
                    let snapshot =
                        read_current(func, block, op, &mut webs, source_rep, slot_types, stats)?;
                    let rep = alias.find(func.op(op).result(0));
                    if let Some(w) = webs.get_mut(&rep) {
                        w.current = Some(snapshot);
                    }
                    dead.push(op);
                }
            }
            OpKind::GlobalGet(_) | OpKind::FromValue | OpKind::RefCast(_) => {
                dead.push(op);
            }
            OpKind::GlobalSet(symbol) => {
                let stored = func.op(op).operand(0);
                for web in webs.values_mut() {
                    if web.root == StorageRoot::Global(symbol) {
                        web.current = Some(stored);
                    }
                }
            }
            OpKind::GlobalRead(symbol) => {
                let value = func.op(op).result(0);
                for web in webs.values_mut() {
                    if web.root == StorageRoot::Global(symbol) && web.current.is_none() {
                        web.current = Some(value);
                    }
                }
            }
            OpKind::Call(_) => {
                // The callee may store to any slot.
                for web in webs.values_mut() {
                    if matches!(web.root, StorageRoot::Global(_)) {
                        web.current = None;
                    }
                }
            }
            _ => {}
        }
    }

    for op in dead {
        func.erase_op(op);
    }
    stats.webs_resolved += webs.len();
    Ok(())
}

/// The value a web currently holds, materializing one `global.read` in
/// front of `before` when a global-rooted web's contents are unknown.
fn read_current(
    func: &mut Function,
    block: BlockId,
    before: OpId,
    webs: &mut FxHashMap<u32, Web>,
    rep: u32,
    slot_types: &FxHashMap<SymbolHash, Type>,
    stats: &mut ValueSemanticsStats,
) -> Result<ValueId, Diagnostic> {
    let loc = func.op(before).loc;
    let Some(web) = webs.get(&rep).copied() else {
        return Err(Diagnostic::internal(loc, &func.name, "read from an unseeded alias web"));
    };
    if let Some(value) = web.current {
        return Ok(value);
    }
    let StorageRoot::Global(symbol) = web.root else {
        return Err(Diagnostic::internal(
            loc,
            &func.name,
            "alias web read before its storage was written",
        ));
    };
    let Some(slot_ty) = slot_types.get(&symbol) else {
        return Err(Diagnostic::aliasing(
            loc,
            &func.name,
            format!("read through an alias of unknown slot {symbol}"),
        ));
    };
    let Some(index) = func.op_index(block, before) else {
        return Err(Diagnostic::internal(
            loc,
            &func.name,
            "operation left its block during rewriting",
        ));
    };
    let read = func.insert_op(
        block,
        index,
        OpKind::GlobalRead(symbol),
        vec![],
        vec![slot_ty.clone()],
        loc,
    );
    let value = func.op(read).result(0);
    if let Some(w) = webs.get_mut(&rep) {
        w.current = Some(value);
    }
    stats.copies_inserted += 1;
    Ok(value)
}

/// Any surviving reference-tensor use is an aliasing pattern outside
/// the bridge-op vocabulary.
fn reject_residual_references(func: &Function) -> Result<(), Diagnostic> {
    for block in &func.blocks {
        for &op in &block.ops {
            let operation = func.op(op);
            for &operand in &operation.operands {
                if func.value(operand).ty.is_ref_tensor() {
                    return Err(Diagnostic::aliasing(
                        operation.loc,
                        &func.name,
                        format!("`{}` still consumes a reference tensor", operation.kind.opcode()),
                    ));
                }
            }
            for &result in &operation.results {
                if func.value(result).ty.is_ref_tensor() {
                    return Err(Diagnostic::aliasing(
                        operation.loc,
                        &func.name,
                        format!("`{}` still produces a reference tensor", operation.kind.opcode()),
                    ));
                }
            }
        }
    }
    Ok(())
}
