//! Stage 9: flatten the public calling convention.
//!
//! Public signatures are the external contract, and the external world
//! speaks flat positional values: no tuples, no optionals. This pass
//! rewrites every `Public` function, and every internal call site of one,
//! to that contract. An optional becomes a bool presence flag followed by
//! its payload; a tuple contributes its elements in order; both unfold
//! recursively. The aggregates the body still consumes are rebuilt from
//! the flat leaves on entry, and taken apart again at each return.
//!
//! ```text
//! pub fn scale(%0: ((vtensor<[2],f32>, f32?))) -> f32?
//!
//!     |  flatten
//!     v
//!
//! pub fn scale(%a: vtensor<[2],f32>, %flag: bool, %pay: f32) -> bool, f32
//!   entry:
//!     %opt = optional.pack %flag, %pay
//!     %0   = tuple.pack %a, %opt
//!     ...
//!     %f = optional.flag %r
//!     %p = optional.payload %r
//!     return %f, %p
//! ```
//!
//! Types with no stable external form (`Union`, residual `Class`,
//! reference `Tensor`) cannot cross the boundary and abort with a
//! `Convention` diagnostic naming the function. Private functions keep
//! their aggregate signatures. Where refinement sharpened a call result
//! below the callee's declared type, the rebuilt aggregate is narrowed
//! back with `unchecked_narrow` so the caller's refined expectations
//! survive the rewrite. A second run finds only flat public signatures
//! and changes nothing.

use rustc_hash::{FxHashMap, FxHashSet};
use tensile_core::ir::{Function, OpKind, Opcode, Program};
use tensile_core::{BlockId, Diagnostic, FuncId, OpId, SourceLoc, Type, ValueId};

#[derive(Debug, Default, Clone, Copy)]
pub struct CallingConventionStats {
    pub params_flattened: usize,
    pub results_flattened: usize,
    pub calls_rewritten: usize,
}

#[derive(Debug)]
pub struct CallingConventionOutput {
    pub program: Program,
    pub stats: CallingConventionStats,
}

pub struct CallingConventionAdjuster {
    program: Program,
}

impl CallingConventionAdjuster {
    pub fn new(program: Program) -> CallingConventionAdjuster {
        CallingConventionAdjuster { program }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<CallingConventionOutput, Diagnostic> {
        let mut stats = CallingConventionStats::default();
        let ids: Vec<FuncId> = self.program.func_ids().collect();

        // Call sites are rewritten against the signatures the callees had
        // before this pass touched them.
        let mut old_signatures: FxHashMap<String, (Vec<Type>, Vec<Type>)> = FxHashMap::default();
        for &f in &ids {
            let func = self.program.function(f);
            if func.is_public() {
                let signature = (func.param_types(), func.declared_results.clone());
                old_signatures.insert(func.name.clone(), signature);
            }
        }

        let mut rewritten: FxHashSet<String> = FxHashSet::default();
        for &f in &ids {
            if !self.program.function(f).is_public() {
                continue;
            }
            let params_changed = self.flatten_params(f, &mut stats)?;
            let results_changed = self.flatten_results(f, &mut stats)?;
            if params_changed || results_changed {
                rewritten.insert(self.program.function(f).name.clone());
            }
        }

        if !rewritten.is_empty() {
            for &f in &ids {
                self.rewrite_calls(f, &rewritten, &old_signatures, &mut stats)?;
            }
        }

        Ok(CallingConventionOutput { program: self.program, stats })
    }

    /// Rebuild the entry block's parameter list from the flat leaf types,
    /// reconstructing each original aggregate at the top of the block.
    fn flatten_params(
        &mut self,
        f: FuncId,
        stats: &mut CallingConventionStats,
    ) -> Result<bool, Diagnostic> {
        let func = self.program.function_mut(f);
        let name = func.name.clone();
        let loc = func.loc;
        let old: Vec<(ValueId, Type)> =
            func.params().iter().map(|&p| (p, func.value(p).ty.clone())).collect();

        let mut plans = Vec::with_capacity(old.len());
        let mut any = false;
        for (_, ty) in &old {
            let mut leaves = Vec::new();
            flatten_type(&name, ty, &mut leaves, loc)?;
            any |= leaves.len() != 1 || leaves[0] != *ty;
            plans.push(leaves);
        }
        if !any {
            return Ok(false);
        }

        func.blocks[BlockId::ENTRY.index()].params.clear();
        let mut replacements = Vec::with_capacity(old.len());
        for plan in &plans {
            let leaves: Vec<ValueId> =
                plan.iter().map(|ty| func.add_block_param(BlockId::ENTRY, ty.clone())).collect();
            replacements.push(leaves);
        }

        let mut insert_at = 0usize;
        for (i, (old_value, ty)) in old.iter().enumerate() {
            if plans[i].len() == 1 && plans[i][0] == *ty {
                func.replace_all_uses(*old_value, replacements[i][0]);
                continue;
            }
            let mut cursor = 0usize;
            let rebuilt = build_value(
                func,
                &name,
                BlockId::ENTRY,
                &mut insert_at,
                ty,
                &replacements[i],
                &mut cursor,
                loc,
            )?;
            func.replace_all_uses(*old_value, rebuilt);
            stats.params_flattened += 1;
        }
        Ok(true)
    }

    /// Flatten the declared result list and destructure every return's
    /// operands down to the matching leaves.
    fn flatten_results(
        &mut self,
        f: FuncId,
        stats: &mut CallingConventionStats,
    ) -> Result<bool, Diagnostic> {
        let func = self.program.function_mut(f);
        let name = func.name.clone();
        let loc = func.loc;
        let declared = func.declared_results.clone();

        let mut flattened = Vec::new();
        let mut expanded = 0usize;
        for ty in &declared {
            let mut leaves = Vec::new();
            flatten_type(&name, ty, &mut leaves, loc)?;
            if leaves.len() != 1 || leaves[0] != *ty {
                expanded += 1;
            }
            flattened.extend(leaves);
        }
        if expanded == 0 {
            return Ok(false);
        }

        for b in 0..func.blocks.len() {
            let block = BlockId::new(b as u32);
            let Some(&ret) = func.blocks[block.index()].ops.last() else { continue };
            if func.op(ret).kind.opcode() != Opcode::Return {
                continue;
            }
            let operands = func.op(ret).operands.clone();
            let ret_loc = func.op(ret).loc;
            let Some(mut insert_at) = func.op_index(block, ret) else {
                return Err(Diagnostic::internal(loc, &name, "return left its block during rewriting"));
            };
            let mut new_operands = Vec::with_capacity(flattened.len());
            for (operand, ty) in operands.iter().zip(&declared) {
                destructure_value(func, block, &mut insert_at, *operand, ty, &mut new_operands, ret_loc);
            }
            func.op_mut(ret).operands = new_operands;
        }

        func.results = flattened.clone();
        func.declared_results = flattened;
        stats.results_flattened += expanded;
        Ok(true)
    }

    /// Rewrite every call to a flattened public function: arguments are
    /// destructured by the callee's old parameter types, and the old
    /// aggregate results are rebuilt from the new call's flat leaves.
    fn rewrite_calls(
        &mut self,
        f: FuncId,
        rewritten: &FxHashSet<String>,
        old_signatures: &FxHashMap<String, (Vec<Type>, Vec<Type>)>,
        stats: &mut CallingConventionStats,
    ) -> Result<(), Diagnostic> {
        let func = self.program.function_mut(f);
        let name = func.name.clone();

        let mut sites: Vec<(BlockId, OpId, String)> = Vec::new();
        for (b, block) in func.blocks.iter().enumerate() {
            for &op in &block.ops {
                if let OpKind::Call(callee) = &func.op(op).kind {
                    if rewritten.contains(callee) {
                        sites.push((BlockId::new(b as u32), op, callee.clone()));
                    }
                }
            }
        }

        for (block, site, callee) in sites {
            let call_loc = func.op(site).loc;
            let operands = func.op(site).operands.clone();
            let old_values = func.op(site).results.clone();
            let Some((old_params, old_results)) = old_signatures.get(&callee) else {
                return Err(Diagnostic::internal(
                    call_loc,
                    &name,
                    format!("call to `{callee}` has no recorded signature"),
                ));
            };
            if operands.len() != old_params.len() || old_values.len() != old_results.len() {
                return Err(Diagnostic::internal(
                    call_loc,
                    &name,
                    format!("call to `{callee}` does not match its recorded signature"),
                ));
            }
            let Some(mut insert_at) = func.op_index(block, site) else {
                return Err(Diagnostic::internal(call_loc, &name, "call left its block during rewriting"));
            };

            let mut new_operands = Vec::new();
            for (operand, param) in operands.iter().zip(old_params) {
                destructure_value(func, block, &mut insert_at, *operand, param, &mut new_operands, call_loc);
            }
            let mut new_result_tys = Vec::new();
            for ty in old_results {
                flatten_type(&callee, ty, &mut new_result_tys, call_loc)?;
            }
            let call = func.insert_op(
                block,
                insert_at,
                OpKind::Call(callee.clone()),
                new_operands,
                new_result_tys,
                call_loc,
            );
            insert_at += 1;
            let leaves = func.op(call).results.clone();

            let mut cursor = 0usize;
            for (old_value, ty) in old_values.iter().zip(old_results) {
                let rebuilt =
                    build_value(func, &name, block, &mut insert_at, ty, &leaves, &mut cursor, call_loc)?;
                // Refinement may have left this value sharper than the
                // rebuilt aggregate; narrow back so its users still see
                // the type they were refined against.
                let narrow = func.value(*old_value).ty.clone();
                let replacement = if func.value(rebuilt).ty != narrow {
                    let bridge = func.insert_op(
                        block,
                        insert_at,
                        OpKind::UncheckedNarrow(narrow.clone()),
                        vec![rebuilt],
                        vec![narrow],
                        call_loc,
                    );
                    insert_at += 1;
                    func.op(bridge).result(0)
                } else {
                    rebuilt
                };
                func.replace_all_uses(*old_value, replacement);
            }
            func.erase_op(site);
            stats.calls_rewritten += 1;
        }
        Ok(())
    }
}

/// The flat external form of `ty`, appended to `out`. Optionals contribute
/// their presence flag before the payload, matching `optional.pack`'s
/// operand order.
fn flatten_type(name: &str, ty: &Type, out: &mut Vec<Type>, loc: SourceLoc) -> Result<(), Diagnostic> {
    match ty {
        Type::Optional(inner) => {
            out.push(Type::Bool);
            flatten_type(name, inner, out, loc)
        }
        Type::Tuple(elems) => {
            for elem in elems {
                flatten_type(name, elem, out, loc)?;
            }
            Ok(())
        }
        Type::Tensor(_) | Type::Union(_) | Type::Class(_) => Err(Diagnostic::convention(
            loc,
            name,
            format!("`{ty}` cannot cross the public boundary"),
        )),
        _ => {
            out.push(ty.clone());
            Ok(())
        }
    }
}

/// Rebuild an aggregate of type `ty` from `leaves`, consuming them in
/// flattening order. Pack ops are inserted in dependency order at
/// `insert_at`.
fn build_value(
    func: &mut Function,
    name: &str,
    block: BlockId,
    insert_at: &mut usize,
    ty: &Type,
    leaves: &[ValueId],
    cursor: &mut usize,
    loc: SourceLoc,
) -> Result<ValueId, Diagnostic> {
    match ty {
        Type::Optional(inner) => {
            let flag = take_leaf(name, leaves, cursor, loc)?;
            let payload = build_value(func, name, block, insert_at, inner, leaves, cursor, loc)?;
            let pack = func.insert_op(
                block,
                *insert_at,
                OpKind::OptionalPack,
                vec![flag, payload],
                vec![ty.clone()],
                loc,
            );
            *insert_at += 1;
            Ok(func.op(pack).result(0))
        }
        Type::Tuple(elems) => {
            let mut parts = Vec::with_capacity(elems.len());
            for elem in elems {
                parts.push(build_value(func, name, block, insert_at, elem, leaves, cursor, loc)?);
            }
            let pack =
                func.insert_op(block, *insert_at, OpKind::TuplePack, parts, vec![ty.clone()], loc);
            *insert_at += 1;
            Ok(func.op(pack).result(0))
        }
        _ => take_leaf(name, leaves, cursor, loc),
    }
}

fn take_leaf(
    name: &str,
    leaves: &[ValueId],
    cursor: &mut usize,
    loc: SourceLoc,
) -> Result<ValueId, Diagnostic> {
    let Some(&leaf) = leaves.get(*cursor) else {
        return Err(Diagnostic::internal(loc, name, "flattened value ran out of leaves"));
    };
    *cursor += 1;
    Ok(leaf)
}

/// Take a value of type `ty` apart into its flat leaves, pushing them onto
/// `out` in flattening order. A value whose own class was subsumed into an
/// optional is wrapped with `derefine` first so the unpack ops see the
/// class they expect.
fn destructure_value(
    func: &mut Function,
    block: BlockId,
    insert_at: &mut usize,
    mut value: ValueId,
    ty: &Type,
    out: &mut Vec<ValueId>,
    loc: SourceLoc,
) {
    if matches!(ty, Type::Optional(_)) && !matches!(func.value(value).ty, Type::Optional(_)) {
        let wrap = func.insert_op(
            block,
            *insert_at,
            OpKind::Derefine(ty.clone()),
            vec![value],
            vec![ty.clone()],
            loc,
        );
        *insert_at += 1;
        value = func.op(wrap).result(0);
    }
    match ty {
        Type::Optional(inner) => {
            let flag =
                func.insert_op(block, *insert_at, OpKind::OptionalFlag, vec![value], vec![Type::Bool], loc);
            *insert_at += 1;
            out.push(func.op(flag).result(0));
            let payload = func.insert_op(
                block,
                *insert_at,
                OpKind::OptionalPayload,
                vec![value],
                vec![(**inner).clone()],
                loc,
            );
            *insert_at += 1;
            let payload = func.op(payload).result(0);
            destructure_value(func, block, insert_at, payload, inner, out, loc);
        }
        Type::Tuple(elems) => {
            let unpack =
                func.insert_op(block, *insert_at, OpKind::TupleUnpack, vec![value], elems.clone(), loc);
            *insert_at += 1;
            let parts = func.op(unpack).results.clone();
            for (part, elem) in parts.into_iter().zip(elems) {
                destructure_value(func, block, insert_at, part, elem, out, loc);
            }
        }
        _ => out.push(value),
    }
}
