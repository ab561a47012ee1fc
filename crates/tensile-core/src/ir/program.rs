//! Program, function, and block arenas.
//!
//! All IR entities live in flat `Vec` arenas referenced by typed indices;
//! nothing in the IR is pointer-linked. Passes clone the incoming program,
//! rewrite the clone through the utilities here, and hand back the new
//! arena, leaving the input untouched on failure.
//!
//! ```text
//! Program
//!   ├── GlobalSlot*            (SlotId)
//!   ├── ObjectGraph?           (only before the flattener)
//!   └── Function*              (FuncId)
//!         ├── Block*           (BlockId; block 0 is the entry)
//!         │     ├── params: ValueId*
//!         │     └── ops:    OpId*        (terminator last)
//!         ├── values: ValueInfo*         (ValueId)
//!         └── ops:    Operation*         (OpId)
//! ```

use crate::constant::ConstValue;
use crate::error::Diagnostic;
use crate::hierarchy::ObjectGraph;
use crate::ids::{BlockId, FuncId, OpId, SlotId, ValueId};
use crate::ir::op::OpKind;
use crate::loc::SourceLoc;
use crate::symbol::SymbolHash;
use crate::types::Type;

/// Where a value is defined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueDef {
    /// The `index`-th parameter of `block`.
    BlockParam { block: BlockId, index: u32 },
    /// The `index`-th result of `op`.
    OpResult { op: OpId, index: u32 },
}

/// Type and definition site of an SSA value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub ty: Type,
    pub def: ValueDef,
}

/// One operation instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    pub loc: SourceLoc,
}

impl Operation {
    /// Operand at `index`; panics on out-of-range (verifier-checked IR).
    #[inline]
    pub fn operand(&self, index: usize) -> ValueId {
        self.operands[index]
    }

    /// Result at `index`.
    #[inline]
    pub fn result(&self, index: usize) -> ValueId {
        self.results[index]
    }
}

/// A basic block: parameters (the SSA join mechanism) plus ordered ops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub params: Vec<ValueId>,
    pub ops: Vec<OpId>,
}

/// Whether external callers may invoke a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// A function body.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub symbol: SymbolHash,
    pub visibility: Visibility,
    /// Current result types; narrowed by refinement for private functions.
    pub results: Vec<Type>,
    /// Result types the external calling convention committed to. Captured
    /// at construction and never narrowed.
    pub declared_results: Vec<Type>,
    pub blocks: Vec<Block>,
    pub values: Vec<ValueInfo>,
    pub ops: Vec<Operation>,
    pub loc: SourceLoc,
}

impl Function {
    /// An empty function with its entry block.
    pub fn new(name: impl Into<String>, visibility: Visibility, loc: SourceLoc) -> Function {
        let name = name.into();
        Function {
            symbol: SymbolHash::function(&name),
            name,
            visibility,
            results: Vec::new(),
            declared_results: Vec::new(),
            blocks: vec![Block::default()],
            values: Vec::new(),
            ops: Vec::new(),
            loc,
        }
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    #[inline]
    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.index()]
    }

    #[inline]
    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueInfo {
        &mut self.values[id.index()]
    }

    #[inline]
    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.index()]
    }

    #[inline]
    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id.index()]
    }

    /// Entry-block parameter values, i.e. the function's parameters.
    pub fn params(&self) -> &[ValueId] {
        &self.blocks[0].params
    }

    /// Types of the function's parameters.
    pub fn param_types(&self) -> Vec<Type> {
        self.params().iter().map(|&v| self.value(v).ty.clone()).collect()
    }

    /// Append a new basic block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Add a parameter to a block, allocating its value.
    pub fn add_block_param(&mut self, block: BlockId, ty: Type) -> ValueId {
        let index = self.blocks[block.index()].params.len() as u32;
        let value = self.new_value(ty, ValueDef::BlockParam { block, index });
        self.blocks[block.index()].params.push(value);
        value
    }

    /// Allocate a value in the arena.
    pub fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId::new(self.values.len() as u32);
        self.values.push(ValueInfo { ty, def });
        id
    }

    /// Create an op with fresh result values and insert it at `index`
    /// within `block`'s op list.
    pub fn insert_op(
        &mut self,
        block: BlockId,
        index: usize,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        loc: SourceLoc,
    ) -> OpId {
        let op = OpId::new(self.ops.len() as u32);
        let results = result_types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| self.new_value(ty, ValueDef::OpResult { op, index: i as u32 }))
            .collect();
        self.ops.push(Operation { kind, operands, results, loc });
        self.blocks[block.index()].ops.insert(index, op);
        op
    }

    /// Create an op at the end of `block`.
    pub fn append_op(
        &mut self,
        block: BlockId,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        loc: SourceLoc,
    ) -> OpId {
        let index = self.blocks[block.index()].ops.len();
        self.insert_op(block, index, kind, operands, result_types, loc)
    }

    /// Position of `op` within `block`'s op list.
    pub fn op_index(&self, block: BlockId, op: OpId) -> Option<usize> {
        self.blocks[block.index()].ops.iter().position(|&o| o == op)
    }

    /// The block containing `op`.
    pub fn block_of(&self, op: OpId) -> Option<BlockId> {
        for (i, block) in self.blocks.iter().enumerate() {
            if block.ops.contains(&op) {
                return Some(BlockId::new(i as u32));
            }
        }
        None
    }

    /// Remove `op` from its block. The arena slot stays behind until the
    /// next [`compact`](Self::compact); its operand list is cleared so the
    /// dead slot holds no uses.
    pub fn erase_op(&mut self, op: OpId) {
        for block in &mut self.blocks {
            block.ops.retain(|&o| o != op);
        }
        self.ops[op.index()].operands.clear();
    }

    /// Rewrite every use of `old` to `new` across all live ops.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        let live: Vec<OpId> = self.blocks.iter().flat_map(|b| b.ops.iter().copied()).collect();
        for op in live {
            for operand in &mut self.ops[op.index()].operands {
                if *operand == old {
                    *operand = new;
                }
            }
        }
    }

    /// All (op, operand-index) uses of a value, in block order.
    pub fn uses(&self, value: ValueId) -> Vec<(OpId, usize)> {
        let mut out = Vec::new();
        for block in &self.blocks {
            for &op in &block.ops {
                for (i, &operand) in self.ops[op.index()].operands.iter().enumerate() {
                    if operand == value {
                        out.push((op, i));
                    }
                }
            }
        }
        out
    }

    /// The terminator of a block, when present and last.
    pub fn terminator(&self, block: BlockId) -> Option<&Operation> {
        let last = *self.blocks[block.index()].ops.last()?;
        let op = self.op(last);
        op.kind.is_terminator().then_some(op)
    }

    /// Successor blocks, read off the terminator.
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        match self.terminator(block).map(|t| &t.kind) {
            Some(OpKind::Br { target }) => vec![*target],
            Some(OpKind::CondBr { on_true, on_false, .. }) => vec![*on_true, *on_false],
            _ => Vec::new(),
        }
    }

    /// Drop dead arena slots and renumber ops and values in block order.
    ///
    /// Run after every pass so that structurally equal programs get equal
    /// arenas regardless of the rewrite order that produced them. Fails if
    /// a live op still references an erased value.
    pub fn compact(&mut self) -> Result<(), Diagnostic> {
        let mut op_map = vec![u32::MAX; self.ops.len()];
        let mut value_map = vec![u32::MAX; self.values.len()];
        let mut new_ops: Vec<Operation> = Vec::new();
        let mut new_values: Vec<ValueInfo> = Vec::new();

        // Block params first, then op results in block order.
        for (b, block) in self.blocks.iter().enumerate() {
            for (i, &param) in block.params.iter().enumerate() {
                value_map[param.index()] = new_values.len() as u32;
                let mut info = self.values[param.index()].clone();
                info.def = ValueDef::BlockParam { block: BlockId::new(b as u32), index: i as u32 };
                new_values.push(info);
            }
        }
        for block in &self.blocks {
            for &old_op in &block.ops {
                let new_op = OpId::new(new_ops.len() as u32);
                op_map[old_op.index()] = new_op.index() as u32;
                let mut op = self.ops[old_op.index()].clone();
                for (i, &result) in op.results.iter().enumerate() {
                    value_map[result.index()] = new_values.len() as u32;
                    let mut info = self.values[result.index()].clone();
                    info.def = ValueDef::OpResult { op: new_op, index: i as u32 };
                    new_values.push(info);
                }
                op.results = op
                    .results
                    .iter()
                    .map(|r| ValueId::new(value_map[r.index()]))
                    .collect();
                new_ops.push(op);
            }
        }

        // Remap operands and block lists now that every live def is known.
        for op in &mut new_ops {
            for operand in &mut op.operands {
                let mapped = value_map[operand.index()];
                if mapped == u32::MAX {
                    return Err(Diagnostic::internal(
                        self.loc,
                        &self.name,
                        "live operation references an erased value",
                    ));
                }
                *operand = ValueId::new(mapped);
            }
        }
        for block in &mut self.blocks {
            for param in &mut block.params {
                *param = ValueId::new(value_map[param.index()]);
            }
            for op in &mut block.ops {
                *op = OpId::new(op_map[op.index()]);
            }
        }

        self.ops = new_ops;
        self.values = new_values;
        Ok(())
    }
}

/// A named global storage cell created by the flattener.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSlot {
    /// Dotted instance path, e.g. `sub.weight`.
    pub name: String,
    pub symbol: SymbolHash,
    pub ty: Type,
    pub initializer: ConstValue,
    /// Whether the program may write the slot after initialization.
    pub mutable: bool,
    pub loc: SourceLoc,
}

/// A whole program: the unit every pass consumes and produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
    pub globals: Vec<GlobalSlot>,
    /// Present until the flattener replaces it with global slots.
    pub hierarchy: Option<ObjectGraph>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    #[inline]
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    #[inline]
    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    pub fn add_function(&mut self, function: Function) -> FuncId {
        let id = FuncId::new(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId::new(i as u32))
    }

    pub fn func_ids(&self) -> impl Iterator<Item = FuncId> + use<> {
        (0..self.functions.len() as u32).map(FuncId::new)
    }

    #[inline]
    pub fn slot(&self, id: SlotId) -> &GlobalSlot {
        &self.globals[id.index()]
    }

    pub fn add_slot(&mut self, slot: GlobalSlot) -> SlotId {
        let id = SlotId::new(self.globals.len() as u32);
        self.globals.push(slot);
        id
    }

    pub fn find_slot(&self, symbol: SymbolHash) -> Option<SlotId> {
        self.globals
            .iter()
            .position(|s| s.symbol == symbol)
            .map(|i| SlotId::new(i as u32))
    }

    /// Compact every function's arenas.
    pub fn compact(&mut self) -> Result<(), Diagnostic> {
        for function in &mut self.functions {
            function.compact()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::BlockId;

    fn sample_function() -> Function {
        let mut f = Function::new("f", Visibility::Private, SourceLoc::unknown());
        let x = f.add_block_param(BlockId::ENTRY, Type::vtensor_unknown());
        let add = f.append_op(
            BlockId::ENTRY,
            OpKind::Add,
            vec![x, x],
            vec![Type::vtensor_unknown()],
            SourceLoc::unknown(),
        );
        let sum = f.op(add).result(0);
        f.results = vec![Type::vtensor_unknown()];
        f.declared_results = f.results.clone();
        f.append_op(BlockId::ENTRY, OpKind::Return, vec![sum], vec![], SourceLoc::unknown());
        f
    }

    #[test]
    fn build_and_inspect() {
        let f = sample_function();
        assert_eq!(f.params().len(), 1);
        assert_eq!(f.block(BlockId::ENTRY).ops.len(), 2);
        assert!(f.terminator(BlockId::ENTRY).is_some());
        assert!(f.successors(BlockId::ENTRY).is_empty());
    }

    #[test]
    fn replace_uses_and_erase() {
        let mut f = sample_function();
        let x = f.params()[0];
        let neg = f.insert_op(
            BlockId::ENTRY,
            0,
            OpKind::Neg,
            vec![x],
            vec![Type::vtensor_unknown()],
            SourceLoc::unknown(),
        );
        let negged = f.op(neg).result(0);
        // Point the add at the negated value instead of the raw param.
        let add = f.block(BlockId::ENTRY).ops[1];
        f.op_mut(add).operands = vec![negged, negged];
        assert_eq!(f.uses(negged).len(), 2);

        f.replace_all_uses(negged, x);
        assert!(f.uses(negged).is_empty());
        f.erase_op(neg);
        assert_eq!(f.block(BlockId::ENTRY).ops.len(), 2);
    }

    #[test]
    fn compact_renumbers_and_drops_dead() {
        let mut f = sample_function();
        let x = f.params()[0];
        let dead = f.insert_op(
            BlockId::ENTRY,
            0,
            OpKind::Neg,
            vec![x],
            vec![Type::vtensor_unknown()],
            SourceLoc::unknown(),
        );
        f.erase_op(dead);
        let ops_before = f.block(BlockId::ENTRY).ops.len();
        f.compact().unwrap();
        assert_eq!(f.block(BlockId::ENTRY).ops.len(), ops_before);
        // Arena now holds exactly the live ops, numbered in block order.
        assert_eq!(f.ops.len(), ops_before);
        for (i, &op) in f.block(BlockId::ENTRY).ops.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
    }

    #[test]
    fn compact_rejects_dangling_uses() {
        let mut f = sample_function();
        let x = f.params()[0];
        let neg = f.insert_op(
            BlockId::ENTRY,
            0,
            OpKind::Neg,
            vec![x],
            vec![Type::vtensor_unknown()],
            SourceLoc::unknown(),
        );
        let negged = f.op(neg).result(0);
        let add = f.block(BlockId::ENTRY).ops[1];
        f.op_mut(add).operands = vec![negged, negged];
        f.erase_op(neg);
        assert!(f.compact().is_err());
    }

    #[test]
    fn program_lookup() {
        let mut p = Program::new();
        let id = p.add_function(sample_function());
        assert_eq!(p.find_function("f"), Some(id));
        assert_eq!(p.find_function("g"), None);
    }
}
