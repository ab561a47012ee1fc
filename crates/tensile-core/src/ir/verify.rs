//! Inter-stage IR validation.
//!
//! Every stage hands its output to [`verify_program`] before the driver
//! commits it. The structural rules (terminator placement, dominance,
//! arity, branch/call/return agreement, the reference-tensor locality
//! contract) hold at every stage; [`VerifyConfig`] switches off the op
//! groups and types that earlier stages are still allowed to contain.

use crate::error::Diagnostic;
use crate::ids::{BlockId, OpId, ValueId};
use crate::ir::dom::DomTree;
use crate::ir::op::{OpKind, OpTraits, Opcode};
use crate::ir::program::{Function, GlobalSlot, Operation, Program, ValueDef};
use crate::loc::SourceLoc;
use crate::symbol::SymbolHash;
use crate::types::Type;
use rustc_hash::{FxHashMap, FxHashSet};

/// What the IR may still contain at the stage being verified.
#[derive(Debug, Clone, Copy)]
pub struct VerifyConfig {
    /// Object graph, `Class` types, and `get_slot`/`set_slot`/`call_method`.
    pub allow_structural: bool,
    /// `Tensor`-typed values and the reference/copy/mutation ops.
    pub allow_ref_tensors: bool,
    /// Non-canonical operator variants.
    pub allow_variants: bool,
    /// Composite operators. Stays on in the driver: allowlisted composites
    /// may legitimately survive decomposition.
    pub allow_composites: bool,
}

impl VerifyConfig {
    /// Freshly imported IR: everything is still legal.
    pub fn imported() -> VerifyConfig {
        VerifyConfig {
            allow_structural: true,
            allow_ref_tensors: true,
            allow_variants: true,
            allow_composites: true,
        }
    }

    /// After the flattener: the object graph is gone.
    pub fn flattened() -> VerifyConfig {
        VerifyConfig { allow_structural: false, ..VerifyConfig::imported() }
    }

    /// After the variant reducer.
    pub fn reduced() -> VerifyConfig {
        VerifyConfig { allow_variants: false, ..VerifyConfig::flattened() }
    }

    /// After the value-semantics maximizer.
    pub fn value_semantic() -> VerifyConfig {
        VerifyConfig { allow_ref_tensors: false, ..VerifyConfig::reduced() }
    }

    /// Everything decomposed; used by tests that demand a primitive-only
    /// output, not by the driver.
    pub fn primitive_only() -> VerifyConfig {
        VerifyConfig { allow_composites: false, ..VerifyConfig::value_semantic() }
    }
}

/// Validate a whole program against the stage's rules. Fails fast with a
/// `Verify` diagnostic naming the offending function or slot.
pub fn verify_program(program: &Program, config: &VerifyConfig) -> Result<(), Diagnostic> {
    verify_globals(program, config)?;
    verify_hierarchy(program, config)?;
    for id in program.func_ids() {
        FunctionVerifier::new(program, program.function(id), config)?.run()?;
    }
    Ok(())
}

fn verify_globals(program: &Program, _config: &VerifyConfig) -> Result<(), Diagnostic> {
    let mut seen: FxHashSet<SymbolHash> = FxHashSet::default();
    for slot in &program.globals {
        if !seen.insert(slot.symbol) {
            return Err(Diagnostic::verify(
                slot.loc,
                &slot.name,
                "duplicate global slot symbol",
            ));
        }
        if slot.ty.contains_ref_tensor() || slot.ty.contains_class() {
            return Err(Diagnostic::verify(
                slot.loc,
                &slot.name,
                "global slot type must be value-typed",
            ));
        }
        if !slot.initializer.ty().is_refinement_of(&slot.ty) {
            return Err(Diagnostic::verify(
                slot.loc,
                &slot.name,
                "initializer does not refine the slot type",
            ));
        }
    }
    Ok(())
}

fn verify_hierarchy(program: &Program, config: &VerifyConfig) -> Result<(), Diagnostic> {
    let Some(graph) = &program.hierarchy else {
        return Ok(());
    };
    if !config.allow_structural {
        return Err(Diagnostic::verify(
            SourceLoc::unknown(),
            "program",
            "object graph survived past the flattener",
        ));
    }
    if graph.root.index() >= graph.classes.len() {
        return Err(Diagnostic::verify(
            SourceLoc::unknown(),
            "program",
            "hierarchy root is not a declared class",
        ));
    }
    for id in graph.class_ids() {
        let class = graph.class(id);
        for slot in &class.slots {
            if let Some(child) = slot.submodule_class()
                && graph.find_class(child).is_none()
            {
                return Err(Diagnostic::verify(
                    slot.loc,
                    &class.name,
                    format!("submodule slot `{}` names unknown class `{child}`", slot.name),
                ));
            }
        }
        for method in &class.methods {
            if method.func.index() >= program.functions.len() {
                return Err(Diagnostic::verify(
                    method.loc,
                    &class.name,
                    format!("method `{}` refers to a missing function", method.name),
                ));
            }
        }
    }
    Ok(())
}

struct FunctionVerifier<'a> {
    program: &'a Program,
    func: &'a Function,
    config: &'a VerifyConfig,
    dom: DomTree,
    /// Block and in-block position of every live op.
    positions: FxHashMap<OpId, (BlockId, usize)>,
}

impl<'a> FunctionVerifier<'a> {
    fn new(
        program: &'a Program,
        func: &'a Function,
        config: &'a VerifyConfig,
    ) -> Result<FunctionVerifier<'a>, Diagnostic> {
        if func.blocks.is_empty() {
            return Err(Diagnostic::verify(func.loc, &func.name, "function has no blocks"));
        }
        let mut positions = FxHashMap::default();
        for (b, block) in func.blocks.iter().enumerate() {
            for (i, &op) in block.ops.iter().enumerate() {
                if op.index() >= func.ops.len() {
                    return Err(Diagnostic::verify(
                        func.loc,
                        &func.name,
                        "block lists an op outside the arena",
                    ));
                }
                if positions.insert(op, (BlockId::new(b as u32), i)).is_some() {
                    return Err(Diagnostic::verify(
                        func.loc,
                        &func.name,
                        "op appears in more than one block",
                    ));
                }
            }
        }
        Ok(FunctionVerifier { program, func, config, dom: DomTree::build(func), positions })
    }

    fn run(&self) -> Result<(), Diagnostic> {
        self.check_signature()?;
        for (b, _) in self.func.blocks.iter().enumerate() {
            self.check_block(BlockId::new(b as u32))?;
        }
        Ok(())
    }

    fn fail(&self, loc: SourceLoc, message: impl Into<String>) -> Diagnostic {
        Diagnostic::verify(loc, &self.func.name, message)
    }

    fn value_ty(&self, value: ValueId) -> Result<&Type, Diagnostic> {
        if value.index() >= self.func.values.len() {
            return Err(self.fail(self.func.loc, "operand refers outside the value arena"));
        }
        Ok(&self.func.value(value).ty)
    }

    fn check_type_allowed(&self, ty: &Type, loc: SourceLoc, what: &str) -> Result<(), Diagnostic> {
        if !self.config.allow_structural && ty.contains_class() {
            return Err(self.fail(loc, format!("{what} carries a class type after flattening")));
        }
        if !self.config.allow_ref_tensors && ty.contains_ref_tensor() {
            return Err(self.fail(
                loc,
                format!("{what} carries a reference tensor after value-semantics maximization"),
            ));
        }
        Ok(())
    }

    fn check_signature(&self) -> Result<(), Diagnostic> {
        for ty in self.func.results.iter().chain(&self.func.declared_results) {
            if ty.contains_ref_tensor() {
                return Err(self.fail(self.func.loc, "reference tensor in function results"));
            }
            self.check_type_allowed(ty, self.func.loc, "function result")?;
        }
        for &param in self.func.params() {
            let ty = self.value_ty(param)?;
            if ty.contains_ref_tensor() {
                return Err(self.fail(self.func.loc, "reference tensor in function parameters"));
            }
            self.check_type_allowed(ty, self.func.loc, "function parameter")?;
        }
        Ok(())
    }

    fn check_block(&self, block: BlockId) -> Result<(), Diagnostic> {
        let b = self.func.block(block);
        for (i, &param) in b.params.iter().enumerate() {
            let ty = self.value_ty(param)?;
            if ty.contains_ref_tensor() {
                return Err(self.fail(
                    self.func.loc,
                    format!("reference tensor as parameter {i} of {block}"),
                ));
            }
            let def = self.func.value(param).def;
            if def != (ValueDef::BlockParam { block, index: i as u32 }) {
                return Err(self.fail(self.func.loc, "block parameter definition out of sync"));
            }
        }
        if b.ops.is_empty() {
            return Err(self.fail(self.func.loc, format!("{block} is empty")));
        }
        let last = *b.ops.last().unwrap();
        for (i, &op) in b.ops.iter().enumerate() {
            let operation = self.func.op(op);
            let is_last = op == last && i + 1 == b.ops.len();
            if operation.kind.is_terminator() != is_last {
                return Err(self.fail(
                    operation.loc,
                    format!("`{}` must be the final op of {block}", operation.kind.opcode()),
                ));
            }
            self.check_op(block, i, op, operation)?;
        }
        Ok(())
    }

    fn check_op(
        &self,
        block: BlockId,
        position: usize,
        op: OpId,
        operation: &Operation,
    ) -> Result<(), Diagnostic> {
        self.check_stage_legality(operation)?;
        self.check_defs(op, operation)?;
        if self.dom.is_reachable(block) {
            for &operand in &operation.operands {
                self.check_dominance(block, position, operand, operation)?;
            }
        }
        for &operand in &operation.operands {
            self.value_ty(operand)?;
        }
        self.check_arity(operation)?;
        self.check_types(operation)
    }

    fn check_stage_legality(&self, operation: &Operation) -> Result<(), Diagnostic> {
        let opcode = operation.kind.opcode();
        let traits = opcode.traits();
        let banned = (!self.config.allow_structural && traits.contains(OpTraits::STRUCTURAL))
            || (!self.config.allow_variants && traits.contains(OpTraits::VARIANT))
            || (!self.config.allow_composites && traits.contains(OpTraits::COMPOSITE))
            || (!self.config.allow_ref_tensors
                && matches!(
                    opcode,
                    Opcode::GlobalGet
                        | Opcode::ToValue
                        | Opcode::FromValue
                        | Opcode::TensorClone
                        | Opcode::Overwrite
                        | Opcode::RefCast
                ));
        if banned {
            return Err(self.fail(
                operation.loc,
                format!("`{opcode}` is not legal at this stage"),
            ));
        }
        Ok(())
    }

    /// Each result value must point back at this op.
    fn check_defs(&self, op: OpId, operation: &Operation) -> Result<(), Diagnostic> {
        for (i, &result) in operation.results.iter().enumerate() {
            if result.index() >= self.func.values.len() {
                return Err(self.fail(operation.loc, "result refers outside the value arena"));
            }
            let def = self.func.value(result).def;
            if def != (ValueDef::OpResult { op, index: i as u32 }) {
                return Err(self.fail(operation.loc, "op result definition out of sync"));
            }
            self.check_type_allowed(&self.func.value(result).ty, operation.loc, "op result")?;
        }
        Ok(())
    }

    fn check_dominance(
        &self,
        block: BlockId,
        position: usize,
        operand: ValueId,
        operation: &Operation,
    ) -> Result<(), Diagnostic> {
        if operand.index() >= self.func.values.len() {
            return Err(self.fail(operation.loc, "operand refers outside the value arena"));
        }
        let ok = match self.func.value(operand).def {
            ValueDef::BlockParam { block: def_block, .. } => self.dom.dominates(def_block, block),
            ValueDef::OpResult { op: def_op, .. } => match self.positions.get(&def_op) {
                None => false,
                Some(&(def_block, def_pos)) => {
                    if def_block == block {
                        def_pos < position
                    } else {
                        self.dom.dominates(def_block, block)
                    }
                }
            },
        };
        if ok {
            Ok(())
        } else {
            Err(self.fail(
                operation.loc,
                format!("operand {operand} of `{}` is not dominated by its definition",
                    operation.kind.opcode()),
            ))
        }
    }

    /// Fixed operand/result counts per opcode; `None` means variable.
    fn expected_arity(kind: &OpKind) -> (Option<usize>, Option<usize>) {
        use OpKind::*;
        match kind {
            Const(_) => (Some(0), Some(1)),
            GetSlot(_) => (Some(1), Some(1)),
            SetSlot(_) => (Some(2), Some(0)),
            CallMethod(_) | Call(_) => (None, None),
            GlobalGet(_) | GlobalRead(_) => (Some(0), Some(1)),
            GlobalSet(_) => (Some(1), Some(0)),
            ToValue | FromValue | TensorClone => (Some(1), Some(1)),
            Overwrite => (Some(2), Some(0)),
            RefCast(_) | ValueCast(_) | Derefine(_) | UncheckedNarrow(_) => (Some(1), Some(1)),
            TuplePack => (None, Some(1)),
            TupleUnpack => (Some(1), None),
            OptionalPack => (Some(2), Some(1)),
            OptionalFlag | OptionalPayload => (Some(1), Some(1)),
            Add | Sub | Mul | Div | Matmul => (Some(2), Some(1)),
            Neg | Relu | Exp | Transpose { .. } | Sum { .. } | ScalarTensor => (Some(1), Some(1)),
            Linear => (Some(3), Some(1)),
            Softmax { .. } | Mean { .. } | Square => (Some(1), Some(1)),
            AddInPlace | MulInPlace | AddScalar => (Some(2), Some(1)),
            ReluInPlace => (Some(1), Some(1)),
            Return => (None, Some(0)),
            Br { .. } => (None, Some(0)),
            CondBr { .. } => (None, Some(0)),
        }
    }

    fn check_arity(&self, operation: &Operation) -> Result<(), Diagnostic> {
        let (operands, results) = Self::expected_arity(&operation.kind);
        if let Some(n) = operands
            && operation.operands.len() != n
        {
            return Err(self.fail(
                operation.loc,
                format!(
                    "`{}` expects {n} operand(s), got {}",
                    operation.kind.opcode(),
                    operation.operands.len()
                ),
            ));
        }
        if let Some(n) = results
            && operation.results.len() != n
        {
            return Err(self.fail(
                operation.loc,
                format!(
                    "`{}` produces {n} result(s), got {}",
                    operation.kind.opcode(),
                    operation.results.len()
                ),
            ));
        }
        Ok(())
    }

    /// Resolve the slot a global op names, or fail.
    fn resolve_slot(
        &self,
        symbol: SymbolHash,
        operation: &Operation,
    ) -> Result<&'a GlobalSlot, Diagnostic> {
        let Some(id) = self.program.find_slot(symbol) else {
            return Err(self.fail(
                operation.loc,
                format!("`{}` names an unknown global slot", operation.kind.opcode()),
            ));
        };
        Ok(self.program.slot(id))
    }

    fn check_types(&self, operation: &Operation) -> Result<(), Diagnostic> {
        match &operation.kind {
            OpKind::GlobalGet(symbol) => {
                let slot = self.resolve_slot(*symbol, operation)?;
                let result = self.value_ty(operation.result(0))?;
                let (Type::Tensor(result_meta), Type::ValueTensor(slot_meta)) = (result, &slot.ty)
                else {
                    return Err(self.fail(
                        operation.loc,
                        "`global.get` requires a tensor slot and a reference-tensor result",
                    ));
                };
                if !result_meta.refines(slot_meta) && !slot_meta.refines(result_meta) {
                    return Err(self.fail(
                        operation.loc,
                        "`global.get` result type is unrelated to the slot type",
                    ));
                }
            }
            OpKind::GlobalRead(symbol) => {
                let slot = self.resolve_slot(*symbol, operation)?;
                let result = self.value_ty(operation.result(0))?;
                if !result.is_refinement_of(&slot.ty) && !slot.ty.is_refinement_of(result) {
                    return Err(self.fail(
                        operation.loc,
                        "`global.read` result type is unrelated to the slot type",
                    ));
                }
            }
            OpKind::GlobalSet(symbol) => {
                let slot = self.resolve_slot(*symbol, operation)?;
                if !slot.mutable {
                    return Err(self.fail(
                        operation.loc,
                        format!("store to frozen slot `{}`", slot.name),
                    ));
                }
                if !self.value_ty(operation.operand(0))?.is_refinement_of(&slot.ty) {
                    return Err(self.fail(
                        operation.loc,
                        "`global.set` operand does not refine the slot type",
                    ));
                }
            }
            OpKind::ToValue => {
                let operand = self.value_ty(operation.operand(0))?;
                if !operand.is_ref_tensor() && !operand.is_value_tensor() {
                    return Err(self.fail(operation.loc, "`to_value` expects a tensor operand"));
                }
                self.expect_value_tensor(operation, operation.result(0), "result")?;
            }
            OpKind::FromValue => {
                self.expect_value_tensor(operation, operation.operand(0), "operand")?;
                self.expect_ref_tensor(operation, operation.result(0), "result")?;
            }
            OpKind::TensorClone => {
                self.expect_ref_tensor(operation, operation.operand(0), "operand")?;
                self.expect_ref_tensor(operation, operation.result(0), "result")?;
            }
            OpKind::Overwrite => {
                self.expect_value_tensor(operation, operation.operand(0), "value operand")?;
                self.expect_ref_tensor(operation, operation.operand(1), "target operand")?;
            }
            OpKind::RefCast(meta) => {
                self.expect_ref_tensor(operation, operation.operand(0), "operand")?;
                let result = self.value_ty(operation.result(0))?;
                if *result != Type::Tensor(meta.clone()) {
                    return Err(self.fail(operation.loc, "`ref_cast` result type mismatch"));
                }
            }
            OpKind::ValueCast(meta) => {
                self.expect_value_tensor(operation, operation.operand(0), "operand")?;
                let result = self.value_ty(operation.result(0))?;
                if *result != Type::ValueTensor(meta.clone()) {
                    return Err(self.fail(operation.loc, "`value_cast` result type mismatch"));
                }
            }
            OpKind::Derefine(target) => {
                let operand = self.value_ty(operation.operand(0))?;
                let result = self.value_ty(operation.result(0))?;
                if result != target {
                    return Err(self.fail(operation.loc, "`derefine` result type mismatch"));
                }
                if !operand.is_refinement_of(target) {
                    return Err(self.fail(
                        operation.loc,
                        "`derefine` operand does not refine the target type",
                    ));
                }
            }
            OpKind::UncheckedNarrow(target) => {
                let operand = self.value_ty(operation.operand(0))?;
                let result = self.value_ty(operation.result(0))?;
                if result != target {
                    return Err(self.fail(operation.loc, "`unchecked_narrow` result type mismatch"));
                }
                if !target.is_refinement_of(operand) {
                    return Err(self.fail(
                        operation.loc,
                        "`unchecked_narrow` target does not refine the operand type",
                    ));
                }
            }
            OpKind::Call(callee) => self.check_call(operation, callee)?,
            OpKind::Return => self.check_return(operation)?,
            OpKind::Br { target } => {
                self.check_branch_args(operation, *target, &operation.operands)?;
            }
            OpKind::CondBr { on_true, on_false, true_args } => {
                if operation.operands.is_empty() {
                    return Err(self.fail(operation.loc, "`cond_br` is missing its condition"));
                }
                if *self.value_ty(operation.operand(0))? != Type::Bool {
                    return Err(self.fail(operation.loc, "`cond_br` condition must be bool"));
                }
                let args = &operation.operands[1..];
                let split = *true_args as usize;
                if split > args.len() {
                    return Err(self.fail(operation.loc, "`cond_br` true-edge arity overflow"));
                }
                self.check_branch_args(operation, *on_true, &args[..split])?;
                self.check_branch_args(operation, *on_false, &args[split..])?;
            }
            _ => {}
        }
        Ok(())
    }

    fn expect_value_tensor(
        &self,
        operation: &Operation,
        value: ValueId,
        what: &str,
    ) -> Result<(), Diagnostic> {
        if !self.value_ty(value)?.is_value_tensor() {
            return Err(self.fail(
                operation.loc,
                format!("`{}` {what} must be a value tensor", operation.kind.opcode()),
            ));
        }
        Ok(())
    }

    fn expect_ref_tensor(
        &self,
        operation: &Operation,
        value: ValueId,
        what: &str,
    ) -> Result<(), Diagnostic> {
        if !self.value_ty(value)?.is_ref_tensor() {
            return Err(self.fail(
                operation.loc,
                format!("`{}` {what} must be a reference tensor", operation.kind.opcode()),
            ));
        }
        Ok(())
    }

    fn check_call(&self, operation: &Operation, callee: &str) -> Result<(), Diagnostic> {
        for &operand in &operation.operands {
            if self.value_ty(operand)?.contains_ref_tensor() {
                return Err(self.fail(
                    operation.loc,
                    "reference tensor passed across a call boundary",
                ));
            }
        }
        // Callees outside the program are external; nothing to check.
        let Some(id) = self.program.find_function(callee) else {
            return Ok(());
        };
        let target = self.program.function(id);
        let params = target.param_types();
        if operation.operands.len() != params.len() {
            return Err(self.fail(
                operation.loc,
                format!(
                    "call to `{callee}` passes {} argument(s), expected {}",
                    operation.operands.len(),
                    params.len()
                ),
            ));
        }
        for (&operand, param) in operation.operands.iter().zip(&params) {
            if !self.value_ty(operand)?.is_refinement_of(param) {
                return Err(self.fail(
                    operation.loc,
                    format!("call argument does not refine `{callee}` parameter type"),
                ));
            }
        }
        if operation.results.len() != target.results.len() {
            return Err(self.fail(
                operation.loc,
                format!(
                    "call to `{callee}` binds {} result(s), expected {}",
                    operation.results.len(),
                    target.results.len()
                ),
            ));
        }
        for (&result, ty) in operation.results.iter().zip(&target.results) {
            // Refinement may have narrowed the call result below the callee's
            // declared type, or the callee may since have been widened back.
            // Only unrelated types are an error.
            let result_ty = self.value_ty(result)?;
            if !ty.is_refinement_of(result_ty) && !result_ty.is_refinement_of(ty) {
                return Err(self.fail(
                    operation.loc,
                    format!("call result type is unrelated to `{callee}` results"),
                ));
            }
        }
        Ok(())
    }

    fn check_return(&self, operation: &Operation) -> Result<(), Diagnostic> {
        if operation.operands.len() != self.func.results.len() {
            return Err(self.fail(
                operation.loc,
                format!(
                    "`return` yields {} value(s), function declares {}",
                    operation.operands.len(),
                    self.func.results.len()
                ),
            ));
        }
        for (&operand, expected) in operation.operands.iter().zip(&self.func.results) {
            let ty = self.value_ty(operand)?;
            if ty.contains_ref_tensor() {
                return Err(self.fail(operation.loc, "reference tensor returned from a function"));
            }
            if !ty.is_refinement_of(expected) {
                return Err(self.fail(
                    operation.loc,
                    "`return` operand does not refine the declared result type",
                ));
            }
        }
        Ok(())
    }

    fn check_branch_args(
        &self,
        operation: &Operation,
        target: BlockId,
        args: &[ValueId],
    ) -> Result<(), Diagnostic> {
        if target.index() >= self.func.blocks.len() {
            return Err(self.fail(operation.loc, "branch to a block outside the function"));
        }
        let params = &self.func.block(target).params;
        if args.len() != params.len() {
            return Err(self.fail(
                operation.loc,
                format!(
                    "branch to {target} passes {} argument(s), block takes {}",
                    args.len(),
                    params.len()
                ),
            ));
        }
        for (&arg, &param) in args.iter().zip(params) {
            let arg_ty = self.value_ty(arg)?;
            if arg_ty.contains_ref_tensor() {
                return Err(self.fail(operation.loc, "reference tensor passed as branch argument"));
            }
            if !arg_ty.is_refinement_of(self.value_ty(param)?) {
                return Err(self.fail(
                    operation.loc,
                    format!("branch argument does not refine the {target} parameter type"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ConstValue;
    use crate::dtype::DType;
    use crate::ir::builder::FuncBuilder;
    use crate::ir::program::{GlobalSlot, Visibility};

    fn well_formed() -> Program {
        let mut fb = FuncBuilder::new("forward", Visibility::Public, SourceLoc::unknown());
        let x = fb.param(Type::vtensor_unknown());
        fb.results(vec![Type::vtensor_unknown()]);
        let y = fb.op1(OpKind::Relu, vec![x], Type::vtensor_unknown(), SourceLoc::unknown());
        fb.ret(vec![y], SourceLoc::unknown());
        let mut program = Program::new();
        program.add_function(fb.finish());
        program
    }

    #[test]
    fn accepts_well_formed() {
        verify_program(&well_formed(), &VerifyConfig::value_semantic()).unwrap();
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut program = well_formed();
        let f = program.function_mut(crate::ids::FuncId::new(0));
        let ret = *f.block(BlockId::ENTRY).ops.last().unwrap();
        f.erase_op(ret);
        let err = verify_program(&program, &VerifyConfig::value_semantic()).unwrap_err();
        assert!(err.message.contains("final op"));
    }

    #[test]
    fn rejects_use_before_def() {
        let mut fb = FuncBuilder::new("f", Visibility::Private, SourceLoc::unknown());
        fb.results(vec![Type::vtensor_unknown()]);
        let x = fb.op1(
            OpKind::Const(ConstValue::float(1.0)),
            vec![],
            Type::Float,
            SourceLoc::unknown(),
        );
        let t = fb.op1(OpKind::ScalarTensor, vec![x], Type::vtensor_unknown(), SourceLoc::unknown());
        fb.ret(vec![t], SourceLoc::unknown());
        let mut program = Program::new();
        program.add_function(fb.finish());
        // Swap the first two ops so the use precedes the definition.
        let f = program.function_mut(crate::ids::FuncId::new(0));
        f.block_mut(BlockId::ENTRY).ops.swap(0, 1);
        let err = verify_program(&program, &VerifyConfig::value_semantic()).unwrap_err();
        assert!(err.message.contains("dominated"));
    }

    #[test]
    fn rejects_ref_tensor_in_params_even_when_allowed() {
        let mut fb = FuncBuilder::new("f", Visibility::Private, SourceLoc::unknown());
        fb.param(Type::tensor_unknown());
        fb.results(vec![]);
        fb.ret(vec![], SourceLoc::unknown());
        let mut program = Program::new();
        program.add_function(fb.finish());
        let err = verify_program(&program, &VerifyConfig::imported()).unwrap_err();
        assert!(err.message.contains("function parameters"));
    }

    #[test]
    fn stage_gates_variants_and_structural_ops() {
        let mut fb = FuncBuilder::new("f", Visibility::Private, SourceLoc::unknown());
        let x = fb.param(Type::vtensor_unknown());
        fb.results(vec![Type::vtensor_unknown()]);
        let v = fb.op1(OpKind::AddScalar, vec![x, x], Type::vtensor_unknown(), SourceLoc::unknown());
        fb.ret(vec![v], SourceLoc::unknown());
        let mut program = Program::new();
        program.add_function(fb.finish());

        verify_program(&program, &VerifyConfig::flattened()).unwrap();
        let err = verify_program(&program, &VerifyConfig::reduced()).unwrap_err();
        assert!(err.message.contains("not legal"));
    }

    #[test]
    fn rejects_store_to_frozen_slot() {
        let mut program = Program::new();
        let symbol = SymbolHash::slot("w");
        program.add_slot(GlobalSlot {
            name: "w".into(),
            symbol,
            ty: Type::vtensor(&[2], DType::F32),
            initializer: ConstValue::Tensor(
                crate::constant::TensorLit::splat(&[2], DType::F32, 0.0),
            ),
            mutable: false,
            loc: SourceLoc::unknown(),
        });
        let mut fb = FuncBuilder::new("f", Visibility::Private, SourceLoc::unknown());
        let x = fb.param(Type::vtensor(&[2], DType::F32));
        fb.results(vec![]);
        fb.op(OpKind::GlobalSet(symbol), vec![x], vec![], SourceLoc::unknown());
        fb.ret(vec![], SourceLoc::unknown());
        program.add_function(fb.finish());
        let err = verify_program(&program, &VerifyConfig::flattened()).unwrap_err();
        assert!(err.message.contains("frozen"));
    }

    #[test]
    fn rejects_store_of_unrelated_type() {
        let mut program = Program::new();
        let symbol = SymbolHash::slot("w");
        program.add_slot(GlobalSlot {
            name: "w".into(),
            symbol,
            ty: Type::vtensor(&[2], DType::F32),
            initializer: ConstValue::Tensor(
                crate::constant::TensorLit::splat(&[2], DType::F32, 0.0),
            ),
            mutable: true,
            loc: SourceLoc::unknown(),
        });
        let mut fb = FuncBuilder::new("f", Visibility::Private, SourceLoc::unknown());
        let x = fb.param(Type::vtensor(&[3], DType::F32));
        fb.results(vec![]);
        fb.op(OpKind::GlobalSet(symbol), vec![x], vec![], SourceLoc::unknown());
        fb.ret(vec![], SourceLoc::unknown());
        program.add_function(fb.finish());
        let err = verify_program(&program, &VerifyConfig::flattened()).unwrap_err();
        assert!(err.message.contains("refine the slot type"));
    }

    #[test]
    fn rejects_branch_arity_mismatch() {
        let mut fb = FuncBuilder::new("f", Visibility::Private, SourceLoc::unknown());
        let x = fb.param(Type::vtensor_unknown());
        fb.results(vec![]);
        let next = fb.add_block();
        fb.block_param(next, Type::vtensor_unknown());
        fb.br(next, vec![x, x], SourceLoc::unknown());
        fb.switch_to(next);
        fb.ret(vec![], SourceLoc::unknown());
        let mut program = Program::new();
        program.add_function(fb.finish());
        let err = verify_program(&program, &VerifyConfig::value_semantic()).unwrap_err();
        assert!(err.message.contains("argument"));
    }
}
