//! Stage 7: refine imprecise types to the most precise provable ones.
//!
//! A monotone worklist solver over the information lattice. Every op
//! contributes transfer rules; narrowing a value re-queues its def op
//! and its users until nothing changes:
//!
//! ```text
//!   %w = const dense<..> : vtensor<[4,5],f32>
//!   %y = matmul %x, %w         %x <- vtensor<[?,4],?>
//!                              %y <- vtensor<[?,5],?>
//! ```
//!
//! Narrowing never crosses three barriers: entry parameters of public
//! functions (the committed ABI), `derefine` results (deliberate
//! imprecision) and `unchecked_narrow` results (trusted assertions).
//! A barriered value is still checked against the incoming type, so a
//! genuine contradiction surfaces as a diagnostic either way.
//!
//! Function boundaries join instead of guessing: a private parameter
//! takes the join of every call site, a result type the join of every
//! return site, a slot type the join of its initializer and every
//! store. Block parameters do the same over their incoming edges. The
//! lattice only ever moves down, so the solve terminates.

use crate::analysis::Worklist;
use rustc_hash::{FxHashMap, FxHashSet};
use tensile_core::ir::{OpKind, Opcode, Program, ValueDef};
use tensile_core::{
    lattice, BlockId, Diagnostic, Dim, FuncId, OpId, Shape, SourceLoc, SymbolHash, TensorMeta,
    Type, ValueId,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct RefineTypesStats {
    /// Values, function results and slot types narrowed at least once.
    pub values_refined: usize,
    /// Worklist items processed before the fixpoint.
    pub iterations: usize,
}

#[derive(Debug)]
pub struct RefineTypesOutput {
    pub program: Program,
    pub stats: RefineTypesStats,
}

pub struct TypeRefiner {
    program: Program,
    by_name: FxHashMap<String, FuncId>,
    /// Per function, user ops of each value, indexed by value number.
    uses: FxHashMap<FuncId, Vec<Vec<OpId>>>,
    returns: FxHashMap<FuncId, Vec<OpId>>,
    /// Keyed by callee.
    call_sites: FxHashMap<FuncId, Vec<(FuncId, OpId)>>,
    reads: FxHashMap<SymbolHash, Vec<(FuncId, OpId)>>,
    writes: FxHashMap<SymbolHash, Vec<(FuncId, OpId)>>,
    /// Functions whose entry block has an in-edge; their parameters mix
    /// call arguments with branch arguments, so call joins stay out.
    entry_branched: FxHashSet<FuncId>,
    worklist: Worklist<(FuncId, OpId)>,
    stats: RefineTypesStats,
}

impl TypeRefiner {
    pub fn new(program: Program) -> TypeRefiner {
        TypeRefiner {
            program,
            by_name: FxHashMap::default(),
            uses: FxHashMap::default(),
            returns: FxHashMap::default(),
            call_sites: FxHashMap::default(),
            reads: FxHashMap::default(),
            writes: FxHashMap::default(),
            entry_branched: FxHashSet::default(),
            worklist: Worklist::new(),
            stats: RefineTypesStats::default(),
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<RefineTypesOutput, Diagnostic> {
        self.index();
        while let Some((f, op)) = self.worklist.pop() {
            self.stats.iterations += 1;
            self.transfer(f, op)?;
        }
        Ok(RefineTypesOutput { program: self.program, stats: self.stats })
    }

    /// Build the dependency indexes and seed the worklist with every op.
    /// The op and value arenas stay frozen for the whole solve, so the
    /// indexes are built exactly once.
    fn index(&mut self) {
        let ids: Vec<FuncId> = self.program.func_ids().collect();
        for &f in &ids {
            self.by_name.insert(self.program.function(f).name.clone(), f);
        }
        for f in ids {
            let func = self.program.function(f);
            let mut uses: Vec<Vec<OpId>> = vec![Vec::new(); func.values.len()];
            let mut returns = Vec::new();
            for block in &func.blocks {
                for &op in &block.ops {
                    let operation = func.op(op);
                    for &operand in &operation.operands {
                        uses[operand.index()].push(op);
                    }
                    match &operation.kind {
                        OpKind::Return => returns.push(op),
                        OpKind::GlobalRead(symbol) => {
                            self.reads.entry(*symbol).or_default().push((f, op));
                        }
                        OpKind::GlobalSet(symbol) => {
                            self.writes.entry(*symbol).or_default().push((f, op));
                        }
                        OpKind::Call(name) => {
                            if let Some(&callee) = self.by_name.get(name) {
                                self.call_sites.entry(callee).or_default().push((f, op));
                            }
                        }
                        OpKind::Br { target } => {
                            if *target == BlockId::ENTRY {
                                self.entry_branched.insert(f);
                            }
                        }
                        OpKind::CondBr { on_true, on_false, .. } => {
                            if *on_true == BlockId::ENTRY || *on_false == BlockId::ENTRY {
                                self.entry_branched.insert(f);
                            }
                        }
                        _ => {}
                    }
                    self.worklist.push((f, op));
                }
            }
            self.uses.insert(f, uses);
            self.returns.insert(f, returns);
        }
    }

    fn transfer(&mut self, f: FuncId, op: OpId) -> Result<(), Diagnostic> {
        let (kind, operands, results, loc) = {
            let operation = self.program.function(f).op(op);
            // A const's type is exactly its literal's; skip cloning the
            // literal itself.
            if let OpKind::Const(value) = &operation.kind {
                let target = value.ty();
                let result = operation.result(0);
                let loc = operation.loc;
                return self.narrow_value(f, result, &target, loc);
            }
            (
                operation.kind.clone(),
                operation.operands.clone(),
                operation.results.clone(),
                operation.loc,
            )
        };
        let opcode = kind.opcode();
        match kind {
            OpKind::GlobalRead(symbol) => {
                let [result] = results[..] else { return Ok(()) };
                let Some(slot) = self.program.find_slot(symbol) else { return Ok(()) };
                let target = self.program.slot(slot).ty.clone();
                self.narrow_value(f, result, &target, loc)?;
            }
            OpKind::GlobalSet(symbol) => self.narrow_slot(symbol, loc)?,
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => {
                let [a, b] = operands[..] else { return Ok(()) };
                let [result] = results[..] else { return Ok(()) };
                let (Some(ma), Some(mb)) = (self.meta_of(f, a), self.meta_of(f, b)) else {
                    return Ok(());
                };
                let Some(shape) = ma.shape.broadcast(&mb.shape) else {
                    return Err(self.conflict(
                        f,
                        loc,
                        format!(
                            "`{opcode}` operand shapes {} and {} cannot broadcast",
                            ma.shape, mb.shape
                        ),
                    ));
                };
                let dtype = match (ma.dtype, mb.dtype) {
                    (Some(x), Some(y)) => Some(x.promote(y)),
                    _ => None,
                };
                self.narrow_value(f, result, &Type::ValueTensor(TensorMeta { shape, dtype }), loc)?;
            }
            OpKind::Neg | OpKind::Relu | OpKind::Exp | OpKind::Square | OpKind::Softmax { .. } => {
                let [x] = operands[..] else { return Ok(()) };
                let [result] = results[..] else { return Ok(()) };
                if let Some(meta) = self.meta_of(f, x) {
                    self.narrow_value(f, result, &Type::ValueTensor(meta), loc)?;
                }
            }
            OpKind::Matmul => self.transfer_matmul(f, &operands, &results, loc)?,
            OpKind::Transpose { dim0, dim1 } => {
                self.transfer_transpose(f, &operands, &results, dim0, dim1, loc)?;
            }
            OpKind::Sum { dim, keepdim } => {
                let [x] = operands[..] else { return Ok(()) };
                let [result] = results[..] else { return Ok(()) };
                if let Some(meta) = self.meta_of(f, x) {
                    if let Some(target) = self.reduce_meta(f, &meta, dim, keepdim, loc)? {
                        self.narrow_value(f, result, &Type::ValueTensor(target), loc)?;
                    }
                }
            }
            OpKind::Mean { dim } => {
                let [x] = operands[..] else { return Ok(()) };
                let [result] = results[..] else { return Ok(()) };
                if let Some(meta) = self.meta_of(f, x) {
                    if let Some(target) = self.reduce_meta(f, &meta, dim, false, loc)? {
                        self.narrow_value(f, result, &Type::ValueTensor(target), loc)?;
                    }
                }
            }
            OpKind::Linear => {
                let (x, w, bias) = match operands[..] {
                    [x, w] => (x, w, None),
                    [x, w, b] => (x, w, Some(b)),
                    _ => return Ok(()),
                };
                let [result] = results[..] else { return Ok(()) };
                let (Some(mi), Some(mw)) = (self.meta_of(f, x), self.meta_of(f, w)) else {
                    return Ok(());
                };
                let (Shape::Ranked(di), Shape::Ranked(dw)) = (&mi.shape, &mw.shape) else {
                    return Ok(());
                };
                if dw.len() != 2 || di.is_empty() {
                    return Ok(());
                }
                let Some(&last) = di.last() else { return Ok(()) };
                if last.narrow(dw[1]).is_none() {
                    return Err(self.conflict(
                        f,
                        loc,
                        "linear input features disagree with the weight".to_string(),
                    ));
                }
                let mut dims = di.clone();
                if let Some(slot) = dims.last_mut() {
                    *slot = dw[0];
                }
                let mut dtype = match (mi.dtype, mw.dtype) {
                    (Some(a), Some(b)) => Some(a.promote(b)),
                    _ => None,
                };
                if let Some(b) = bias {
                    dtype = match (dtype, self.meta_of(f, b).and_then(|m| m.dtype)) {
                        (Some(a), Some(c)) => Some(a.promote(c)),
                        _ => None,
                    };
                }
                self.narrow_value(
                    f,
                    result,
                    &Type::ValueTensor(TensorMeta { shape: Shape::Ranked(dims), dtype }),
                    loc,
                )?;
            }
            OpKind::ScalarTensor => {
                let [x] = operands[..] else { return Ok(()) };
                let [result] = results[..] else { return Ok(()) };
                if let Some(dtype) = self.value_ty(f, x).scalar_dtype() {
                    let target = Type::ValueTensor(TensorMeta::concrete(&[], dtype));
                    self.narrow_value(f, result, &target, loc)?;
                }
            }
            OpKind::TuplePack => {
                let [result] = results[..] else { return Ok(()) };
                let tys: Vec<Type> = operands.iter().map(|&v| self.value_ty(f, v)).collect();
                self.narrow_value(f, result, &Type::Tuple(tys), loc)?;
            }
            OpKind::TupleUnpack => {
                let [x] = operands[..] else { return Ok(()) };
                if let Type::Tuple(elems) = self.value_ty(f, x) {
                    for (&result, ty) in results.iter().zip(&elems) {
                        self.narrow_value(f, result, ty, loc)?;
                    }
                }
            }
            OpKind::OptionalPack => {
                let [_present, payload] = operands[..] else { return Ok(()) };
                let [result] = results[..] else { return Ok(()) };
                let target = Type::optional(self.value_ty(f, payload));
                self.narrow_value(f, result, &target, loc)?;
            }
            OpKind::OptionalFlag => {
                let [result] = results[..] else { return Ok(()) };
                self.narrow_value(f, result, &Type::Bool, loc)?;
            }
            OpKind::OptionalPayload => {
                let [x] = operands[..] else { return Ok(()) };
                let [result] = results[..] else { return Ok(()) };
                let target = match self.value_ty(f, x) {
                    Type::Optional(inner) => *inner,
                    other => other,
                };
                self.narrow_value(f, result, &target, loc)?;
            }
            OpKind::Call(name) => self.transfer_call(f, &name, &results, loc)?,
            OpKind::Return => self.transfer_return(f, loc)?,
            OpKind::Br { target } => self.refine_block_params(f, target, loc)?,
            OpKind::CondBr { on_true, on_false, .. } => {
                self.refine_block_params(f, on_true, loc)?;
                self.refine_block_params(f, on_false, loc)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Matmul is the one primitive with real backward flow: both
    /// operands and the result are rank-2, and the three shapes share
    /// dims as `[n,k] x [k,m] -> [n,m]`.
    fn transfer_matmul(
        &mut self,
        f: FuncId,
        operands: &[ValueId],
        results: &[ValueId],
        loc: SourceLoc,
    ) -> Result<(), Diagnostic> {
        let &[a, b] = operands else { return Ok(()) };
        let &[result] = results else { return Ok(()) };
        let rank2 = Type::ValueTensor(TensorMeta::of_rank(2));
        self.narrow_value(f, a, &rank2, loc)?;
        self.narrow_value(f, b, &rank2, loc)?;
        self.narrow_value(f, result, &rank2, loc)?;

        // Barriered values may still be unranked; treat their dims as
        // unknown rather than forcing them.
        let dim_at = |meta: &Option<TensorMeta>, i: usize| {
            meta.as_ref().and_then(|m| m.shape.dim(i)).unwrap_or(Dim::Unknown)
        };
        let (ma, mb, mr) = (self.meta_of(f, a), self.meta_of(f, b), self.meta_of(f, result));
        let Some(k) = dim_at(&ma, 1).narrow(dim_at(&mb, 0)) else {
            return Err(self.conflict(f, loc, "matmul inner dimensions disagree".to_string()));
        };
        let Some(n) = dim_at(&ma, 0).narrow(dim_at(&mr, 0)) else {
            return Err(self.conflict(
                f,
                loc,
                "matmul result rows disagree with the left operand".to_string(),
            ));
        };
        let Some(m) = dim_at(&mb, 1).narrow(dim_at(&mr, 1)) else {
            return Err(self.conflict(
                f,
                loc,
                "matmul result columns disagree with the right operand".to_string(),
            ));
        };
        let dtype = match (ma.and_then(|m| m.dtype), mb.and_then(|m| m.dtype)) {
            (Some(x), Some(y)) => Some(x.promote(y)),
            _ => None,
        };
        let shaped = |dims: Vec<Dim>, dtype| {
            Type::ValueTensor(TensorMeta { shape: Shape::Ranked(dims), dtype })
        };
        self.narrow_value(f, a, &shaped(vec![n, k], None), loc)?;
        self.narrow_value(f, b, &shaped(vec![k, m], None), loc)?;
        self.narrow_value(f, result, &shaped(vec![n, m], dtype), loc)?;
        Ok(())
    }

    /// Transpose is its own inverse, so the swapped meta flows both
    /// ways.
    fn transfer_transpose(
        &mut self,
        f: FuncId,
        operands: &[ValueId],
        results: &[ValueId],
        dim0: i64,
        dim1: i64,
        loc: SourceLoc,
    ) -> Result<(), Diagnostic> {
        let &[x] = operands else { return Ok(()) };
        let &[result] = results else { return Ok(()) };
        if let Some(meta) = self.meta_of(f, x) {
            if let Some(target) = self.swap_meta(f, &meta, dim0, dim1, loc)? {
                self.narrow_value(f, result, &Type::ValueTensor(target), loc)?;
            }
        }
        if let Some(meta) = self.meta_of(f, result) {
            if let Some(target) = self.swap_meta(f, &meta, dim0, dim1, loc)? {
                self.narrow_value(f, x, &Type::ValueTensor(target), loc)?;
            }
        }
        Ok(())
    }

    fn swap_meta(
        &self,
        f: FuncId,
        meta: &TensorMeta,
        dim0: i64,
        dim1: i64,
        loc: SourceLoc,
    ) -> Result<Option<TensorMeta>, Diagnostic> {
        let Shape::Ranked(dims) = &meta.shape else {
            // Rank unknown: only the dtype carries over.
            return Ok(meta
                .dtype
                .map(|d| TensorMeta { shape: Shape::Unranked, dtype: Some(d) }));
        };
        let (Some(i), Some(j)) = (resolve_dim(dim0, dims.len()), resolve_dim(dim1, dims.len()))
        else {
            return Err(self.conflict(
                f,
                loc,
                format!("transpose dims ({dim0}, {dim1}) are out of range for rank {}", dims.len()),
            ));
        };
        let mut swapped = dims.clone();
        swapped.swap(i, j);
        Ok(Some(TensorMeta { shape: Shape::Ranked(swapped), dtype: meta.dtype }))
    }

    /// Result meta of a reduction over `dim`. `dim = None` collapses to
    /// a scalar whatever `keepdim` says.
    fn reduce_meta(
        &self,
        f: FuncId,
        meta: &TensorMeta,
        dim: Option<i64>,
        keepdim: bool,
        loc: SourceLoc,
    ) -> Result<Option<TensorMeta>, Diagnostic> {
        let Some(d) = dim else {
            return Ok(Some(TensorMeta { shape: Shape::Ranked(Vec::new()), dtype: meta.dtype }));
        };
        let Shape::Ranked(dims) = &meta.shape else {
            return Ok(meta
                .dtype
                .map(|dt| TensorMeta { shape: Shape::Unranked, dtype: Some(dt) }));
        };
        let Some(i) = resolve_dim(d, dims.len()) else {
            return Err(self.conflict(
                f,
                loc,
                format!("reduction dim {d} is out of range for rank {}", dims.len()),
            ));
        };
        let mut out = dims.clone();
        if keepdim {
            out[i] = Dim::Fixed(1);
        } else {
            out.remove(i);
        }
        Ok(Some(TensorMeta { shape: Shape::Ranked(out), dtype: meta.dtype }))
    }

    fn transfer_call(
        &mut self,
        f: FuncId,
        callee_name: &str,
        results: &[ValueId],
        loc: SourceLoc,
    ) -> Result<(), Diagnostic> {
        let Some(callee) = self.by_name.get(callee_name).copied() else {
            // External callee: nothing is known about it.
            return Ok(());
        };
        let result_tys = self.program.function(callee).results.clone();
        for (&result, ty) in results.iter().zip(&result_tys) {
            self.narrow_value(f, result, ty, loc)?;
        }
        let callee_func = self.program.function(callee);
        if callee_func.is_public() || self.entry_branched.contains(&callee) {
            return Ok(());
        }
        let params = callee_func.params().to_vec();
        let sites = self.call_sites.get(&callee).cloned().unwrap_or_default();
        for (j, &param) in params.iter().enumerate() {
            let mut joined: Option<Type> = None;
            for &(site_func, site_op) in &sites {
                let Some(&arg) = self.program.function(site_func).op(site_op).operands.get(j)
                else {
                    continue;
                };
                let ty = self.program.function(site_func).value(arg).ty.clone();
                joined = Some(match joined {
                    Some(acc) => lattice::join(&acc, &ty),
                    None => ty,
                });
            }
            if let Some(target) = joined {
                self.narrow_value(callee, param, &target, loc)?;
            }
        }
        Ok(())
    }

    /// Narrow `f`'s result types by the join over all its return sites,
    /// and wake its callers when something moves.
    fn transfer_return(&mut self, f: FuncId, loc: SourceLoc) -> Result<(), Diagnostic> {
        let sites = self.returns.get(&f).cloned().unwrap_or_default();
        for i in 0..self.program.function(f).results.len() {
            let mut joined: Option<Type> = None;
            for &site in &sites {
                let Some(&v) = self.program.function(f).op(site).operands.get(i) else {
                    continue;
                };
                let ty = self.program.function(f).value(v).ty.clone();
                joined = Some(match joined {
                    Some(acc) => lattice::join(&acc, &ty),
                    None => ty,
                });
            }
            let Some(target) = joined else { continue };
            let current = self.program.function(f).results[i].clone();
            let Some(narrowed) = lattice::narrow(&current, &target) else {
                return Err(self.conflict(
                    f,
                    loc,
                    format!("returned value cannot reconcile `{current}` with `{target}`"),
                ));
            };
            if narrowed != current {
                self.program.function_mut(f).results[i] = narrowed;
                self.stats.values_refined += 1;
                let callers = self.call_sites.get(&f).cloned().unwrap_or_default();
                for site in callers {
                    self.worklist.push(site);
                }
            }
        }
        Ok(())
    }

    /// Narrow a slot by the join of its initializer and every stored
    /// value, then wake the reads.
    fn narrow_slot(&mut self, symbol: SymbolHash, loc: SourceLoc) -> Result<(), Diagnostic> {
        let Some(slot_id) = self.program.find_slot(symbol) else { return Ok(()) };
        let mut joined = self.program.slot(slot_id).initializer.ty();
        let writes = self.writes.get(&symbol).cloned().unwrap_or_default();
        for (wf, wop) in writes {
            let Some(&stored) = self.program.function(wf).op(wop).operands.first() else {
                continue;
            };
            let ty = self.program.function(wf).value(stored).ty.clone();
            joined = lattice::join(&joined, &ty);
        }
        let current = self.program.slot(slot_id).ty.clone();
        let Some(narrowed) = lattice::narrow(&current, &joined) else {
            let name = self.program.slot(slot_id).name.clone();
            return Err(Diagnostic::type_conflict(
                loc,
                &name,
                format!("stored values `{joined}` contradict the slot type `{current}`"),
            ));
        };
        if narrowed != current {
            self.program.globals[slot_id.index()].ty = narrowed;
            self.stats.values_refined += 1;
            if let Some(sites) = self.reads.get(&symbol) {
                for &site in sites {
                    self.worklist.push(site);
                }
            }
        }
        Ok(())
    }

    /// Narrow `block`'s parameters by the join over every incoming
    /// edge's arguments. Entry blocks take their values from calls, not
    /// branches, and are handled at call sites.
    fn refine_block_params(
        &mut self,
        f: FuncId,
        block: BlockId,
        loc: SourceLoc,
    ) -> Result<(), Diagnostic> {
        if block == BlockId::ENTRY {
            return Ok(());
        }
        let params = self.program.function(f).blocks[block.index()].params.clone();
        if params.is_empty() {
            return Ok(());
        }
        let mut edges: Vec<Vec<ValueId>> = Vec::new();
        {
            let func = self.program.function(f);
            for source in 0..func.blocks.len() {
                let Some(term) = func.terminator(BlockId::new(source as u32)) else { continue };
                match &term.kind {
                    OpKind::Br { target } if *target == block => {
                        edges.push(term.operands.clone());
                    }
                    OpKind::CondBr { on_true, on_false, true_args } => {
                        let split = 1 + *true_args as usize;
                        if *on_true == block {
                            edges.push(term.operands.get(1..split).unwrap_or_default().to_vec());
                        }
                        if *on_false == block {
                            edges.push(term.operands.get(split..).unwrap_or_default().to_vec());
                        }
                    }
                    _ => {}
                }
            }
        }
        for (i, &param) in params.iter().enumerate() {
            let mut joined: Option<Type> = None;
            for edge in &edges {
                let Some(&arg) = edge.get(i) else { continue };
                let ty = self.program.function(f).value(arg).ty.clone();
                joined = Some(match joined {
                    Some(acc) => lattice::join(&acc, &ty),
                    None => ty,
                });
            }
            if let Some(target) = joined {
                self.narrow_value(f, param, &target, loc)?;
            }
        }
        Ok(())
    }

    /// Narrow one value toward `target`. Barriered values are checked
    /// but never rewritten. On change, the def op and every user go
    /// back on the worklist, and a `value_cast` def keeps its attribute
    /// in step with its result type.
    fn narrow_value(
        &mut self,
        f: FuncId,
        value: ValueId,
        target: &Type,
        loc: SourceLoc,
    ) -> Result<(), Diagnostic> {
        let (current, def, frozen) = {
            let func = self.program.function(f);
            let info = func.value(value);
            let frozen = match info.def {
                ValueDef::OpResult { op, .. } => matches!(
                    func.op(op).kind.opcode(),
                    Opcode::Derefine | Opcode::UncheckedNarrow
                ),
                ValueDef::BlockParam { block, .. } => {
                    block == BlockId::ENTRY && func.is_public()
                }
            };
            (info.ty.clone(), info.def, frozen)
        };
        let Some(narrowed) = lattice::narrow(&current, target) else {
            return Err(self.conflict(f, loc, format!("cannot reconcile `{current}` with `{target}`")));
        };
        if frozen || narrowed == current {
            return Ok(());
        }
        self.program.function_mut(f).value_mut(value).ty = narrowed.clone();
        self.stats.values_refined += 1;
        if let ValueDef::OpResult { op, .. } = def {
            if let OpKind::ValueCast(_) = &self.program.function(f).op(op).kind {
                if let Some(meta) = narrowed.tensor_meta().cloned() {
                    self.program.function_mut(f).op_mut(op).kind = OpKind::ValueCast(meta);
                }
            }
            self.worklist.push((f, op));
        }
        for &user in &self.uses[&f][value.index()] {
            self.worklist.push((f, user));
        }
        Ok(())
    }

    fn conflict(&self, f: FuncId, loc: SourceLoc, message: String) -> Diagnostic {
        Diagnostic::type_conflict(loc, &self.program.function(f).name, message)
    }

    fn value_ty(&self, f: FuncId, value: ValueId) -> Type {
        self.program.function(f).value(value).ty.clone()
    }

    fn meta_of(&self, f: FuncId, value: ValueId) -> Option<TensorMeta> {
        self.program.function(f).value(value).ty.tensor_meta().cloned()
    }
}

/// Resolve a possibly-negative dim index against a known rank.
fn resolve_dim(dim: i64, rank: usize) -> Option<usize> {
    let resolved = if dim < 0 { dim + rank as i64 } else { dim };
    usize::try_from(resolved).ok().filter(|&i| i < rank)
}
