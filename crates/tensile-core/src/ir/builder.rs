//! Construction helpers for programs and function bodies.
//!
//! The importer (and the test suite) builds IR through these rather than
//! poking arenas directly, so every value gets a definition record and
//! every block keeps its terminator last.
//!
//! # Example
//!
//! ```
//! use tensile_core::ir::{FuncBuilder, OpKind, Visibility};
//! use tensile_core::{SourceLoc, Type};
//!
//! let mut fb = FuncBuilder::new("double", Visibility::Public, SourceLoc::unknown());
//! let x = fb.param(Type::vtensor_unknown());
//! fb.results(vec![Type::vtensor_unknown()]);
//! let two = fb.op1(
//!     OpKind::Add,
//!     vec![x, x],
//!     Type::vtensor_unknown(),
//!     SourceLoc::unknown(),
//! );
//! fb.ret(vec![two], SourceLoc::unknown());
//! let function = fb.finish();
//! assert_eq!(function.params().len(), 1);
//! ```

use crate::constant::ConstValue;
use crate::hierarchy::{ClassDecl, MethodDecl, ObjectGraph, SlotDecl};
use crate::ids::{BlockId, ClassId, FuncId, ValueId};
use crate::ir::op::OpKind;
use crate::ir::program::{Function, Program, Visibility};
use crate::loc::SourceLoc;
use crate::types::{TensorMeta, Type};

/// Builds one function, tracking the current insertion block.
pub struct FuncBuilder {
    func: Function,
    current: BlockId,
}

impl FuncBuilder {
    pub fn new(name: impl Into<String>, visibility: Visibility, loc: SourceLoc) -> FuncBuilder {
        FuncBuilder { func: Function::new(name, visibility, loc), current: BlockId::ENTRY }
    }

    /// Add a function parameter (an entry-block parameter).
    pub fn param(&mut self, ty: Type) -> ValueId {
        self.func.add_block_param(BlockId::ENTRY, ty)
    }

    /// Declare the result types. Also records them as the external
    /// commitment the public-return stage restores.
    pub fn results(&mut self, types: Vec<Type>) {
        self.func.results = types.clone();
        self.func.declared_results = types;
    }

    /// Create a new block and return its id without switching to it.
    pub fn add_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    /// Add a parameter to a non-entry block.
    pub fn block_param(&mut self, block: BlockId, ty: Type) -> ValueId {
        self.func.add_block_param(block, ty)
    }

    /// Switch the insertion point.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Emit an op at the current insertion point.
    pub fn op(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        loc: SourceLoc,
    ) -> Vec<ValueId> {
        let op = self.func.append_op(self.current, kind, operands, result_types, loc);
        self.func.op(op).results.clone()
    }

    /// Emit a single-result op.
    pub fn op1(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_type: Type,
        loc: SourceLoc,
    ) -> ValueId {
        self.op(kind, operands, vec![result_type], loc)[0]
    }

    /// Emit a constant; the result type follows the value.
    pub fn constant(&mut self, value: ConstValue, loc: SourceLoc) -> ValueId {
        let ty = value.ty();
        self.op1(OpKind::Const(value), vec![], ty, loc)
    }

    pub fn ret(&mut self, operands: Vec<ValueId>, loc: SourceLoc) {
        self.op(OpKind::Return, operands, vec![], loc);
    }

    pub fn br(&mut self, target: BlockId, args: Vec<ValueId>, loc: SourceLoc) {
        self.op(OpKind::Br { target }, args, vec![], loc);
    }

    pub fn cond_br(
        &mut self,
        cond: ValueId,
        on_true: BlockId,
        true_args: Vec<ValueId>,
        on_false: BlockId,
        false_args: Vec<ValueId>,
        loc: SourceLoc,
    ) {
        let true_count = true_args.len() as u32;
        let mut operands = vec![cond];
        operands.extend(true_args);
        operands.extend(false_args);
        self.op(
            OpKind::CondBr { on_true, on_false, true_args: true_count },
            operands,
            vec![],
            loc,
        );
    }

    pub fn finish(self) -> Function {
        self.func
    }
}

/// Builds a whole program: functions plus the optional object hierarchy.
#[derive(Default)]
pub struct ProgramBuilder {
    program: Program,
    classes: Vec<ClassDecl>,
    root: Option<ClassId>,
}

impl ProgramBuilder {
    pub fn new() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    pub fn add_function(&mut self, function: Function) -> FuncId {
        self.program.add_function(function)
    }

    pub fn declare_class(&mut self, name: impl Into<String>, loc: SourceLoc) -> ClassId {
        let id = ClassId::new(self.classes.len() as u32);
        self.classes.push(ClassDecl::new(name, loc));
        id
    }

    pub fn add_data_slot(
        &mut self,
        class: ClassId,
        name: impl Into<String>,
        ty: Type,
        initializer: ConstValue,
        mutable: bool,
        loc: SourceLoc,
    ) {
        self.classes[class.index()].slots.push(SlotDecl {
            name: name.into(),
            ty,
            initializer: Some(initializer),
            mutable,
            loc,
        });
    }

    pub fn add_submodule_slot(
        &mut self,
        class: ClassId,
        name: impl Into<String>,
        child_class: impl Into<String>,
        loc: SourceLoc,
    ) {
        self.classes[class.index()].slots.push(SlotDecl {
            name: name.into(),
            ty: Type::Class(child_class.into()),
            initializer: None,
            mutable: false,
            loc,
        });
    }

    pub fn add_method(
        &mut self,
        class: ClassId,
        name: impl Into<String>,
        func: FuncId,
        exported: bool,
        arg_refinements: Vec<Option<TensorMeta>>,
        loc: SourceLoc,
    ) {
        self.classes[class.index()].methods.push(MethodDecl {
            name: name.into(),
            func,
            exported,
            arg_refinements,
            loc,
        });
    }

    /// Mark the root of the instantiation tree.
    pub fn set_root(&mut self, class: ClassId) {
        self.root = Some(class);
    }

    /// Assemble the program. A hierarchy is attached when classes were
    /// declared; the root defaults to the first class.
    pub fn finish(mut self) -> Program {
        if !self.classes.is_empty() {
            let root = self.root.unwrap_or(ClassId::new(0));
            self.program.hierarchy = Some(ObjectGraph { classes: self.classes, root });
        }
        self.program
    }
}
