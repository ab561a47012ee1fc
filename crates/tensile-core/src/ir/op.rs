//! The operation set.
//!
//! [`OpKind`] is the closed set of operations the pipeline understands,
//! attributes included. [`Opcode`] is its payload-free mirror, used as the
//! key for rule registries, allow/deny sets, and trait lookups.
//!
//! Operations are grouped by lifetime:
//!
//! ```text
//! structural   get_slot/set_slot/call_method   die at the flattener
//! reference    global.get, to_value, from_value, tensor.clone,
//!              overwrite, ref_cast                die at the maximizer
//! variants     add_/mul_/relu_/add.scalar         die at the reducer
//! composites   linear/softmax/mean/square         die at the decomposer
//! primitives   everything else                    survive to the output
//! ```

use crate::constant::ConstValue;
use crate::ids::BlockId;
use crate::symbol::SymbolHash;
use crate::types::{TensorMeta, Type};
use bitflags::bitflags;
use std::fmt;

/// An operation kind together with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Materialize a constant. No operands, one result.
    Const(ConstValue),

    // === Object graph (only before the flattener) ===
    /// Read a named slot of an object. `(obj) -> value`.
    GetSlot(String),
    /// Write a named slot of an object. `(obj, value) -> ()`.
    SetSlot(String),
    /// Invoke a method by name on an object. `(obj, args..) -> results..`.
    CallMethod(String),

    // === Global slots (after the flattener) ===
    /// Reference to the storage currently held by a slot. `() -> tensor`.
    GlobalGet(SymbolHash),
    /// Value snapshot of a slot's contents. `() -> vtensor`.
    GlobalRead(SymbolHash),
    /// Store a value into a slot. `(vtensor) -> ()`.
    GlobalSet(SymbolHash),

    // === Copies and casts ===
    /// Snapshot the current contents of mutable storage.
    /// `(tensor|vtensor) -> vtensor`.
    ToValue,
    /// Fresh mutable storage initialized with a value. `(vtensor) -> tensor`.
    FromValue,
    /// Fresh mutable storage copying existing storage. `(tensor) -> tensor`.
    TensorClone,
    /// Mutate storage to hold a value. `(vtensor value, tensor target) -> ()`.
    Overwrite,
    /// Static-info cast on a reference tensor; the result aliases the
    /// operand's storage. `(tensor) -> tensor`.
    RefCast(TensorMeta),
    /// Static-info cast on a value. `(vtensor) -> vtensor`.
    ValueCast(TensorMeta),
    /// Widen a value into an optional or union. `(T) -> wider`.
    Derefine(Type),
    /// Importer-trusted narrowing out of an optional or union.
    /// `(wider) -> T`.
    UncheckedNarrow(Type),

    // === Aggregate encoding ===
    /// `(e0, .., en) -> tuple`.
    TuplePack,
    /// `(tuple) -> (e0, .., en)`.
    TupleUnpack,
    /// `(present: bool, payload: T) -> optional<T>`.
    OptionalPack,
    /// `(optional<T>) -> bool`.
    OptionalFlag,
    /// `(optional<T>) -> T`; unspecified payload when absent.
    OptionalPayload,

    // === Primitive computation (value semantics) ===
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Relu,
    Exp,
    /// `([n,k], [k,m]) -> [n,m]`.
    Matmul,
    /// Swap two dimensions.
    Transpose { dim0: i64, dim1: i64 },
    /// Reduce one dimension (`dim: Some`) or all (`dim: None`).
    Sum { dim: Option<i64>, keepdim: bool },
    /// Build a 0-d tensor from a scalar. `(int|float|bool) -> vtensor`.
    ScalarTensor,

    // === Composite operators (decomposable) ===
    /// `(input [*,in], weight [out,in], bias optional<[out]>) -> [*,out]`.
    Linear,
    Softmax { dim: i64 },
    Mean { dim: Option<i64> },
    Square,

    // === Operator variants (reduced to canonical form) ===
    /// In-place add: mutates operand 0 and returns it.
    AddInPlace,
    /// In-place multiply: mutates operand 0 and returns it.
    MulInPlace,
    /// In-place relu: mutates operand 0 and returns it.
    ReluInPlace,
    /// Overload of `add` taking a scalar right-hand side.
    AddScalar,

    // === Calls and terminators ===
    /// Direct call by qualified name.
    Call(String),
    Return,
    Br { target: BlockId },
    /// `(cond, true_args.., false_args..)`; `true_args` counts how many
    /// operands after the condition belong to the true edge.
    CondBr { on_true: BlockId, on_false: BlockId, true_args: u32 },
}

/// Payload-free operation code.
///
/// Registry keys and configuration sets use this instead of [`OpKind`] so
/// that `add` with different attributes is still one table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Const,
    GetSlot,
    SetSlot,
    CallMethod,
    GlobalGet,
    GlobalRead,
    GlobalSet,
    ToValue,
    FromValue,
    TensorClone,
    Overwrite,
    RefCast,
    ValueCast,
    Derefine,
    UncheckedNarrow,
    TuplePack,
    TupleUnpack,
    OptionalPack,
    OptionalFlag,
    OptionalPayload,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Relu,
    Exp,
    Matmul,
    Transpose,
    Sum,
    ScalarTensor,
    Linear,
    Softmax,
    Mean,
    Square,
    AddInPlace,
    MulInPlace,
    ReluInPlace,
    AddScalar,
    Call,
    Return,
    Br,
    CondBr,
}

bitflags! {
    /// Static properties of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpTraits: u16 {
        /// Results are independent values; no operand storage is observed
        /// after the op executes.
        const VALUE_SEMANTICS = 1 << 0;
        /// The result aliases pre-existing storage (operand 0, or the
        /// named slot for `global.get`).
        const REFERENCE_SEMANTICS = 1 << 1;
        /// Writes to storage reachable from an operand.
        const MUTATES_STORAGE = 1 << 2;
        /// Decomposable composite operator.
        const COMPOSITE = 1 << 3;
        /// Non-canonical member of an operator family.
        const VARIANT = 1 << 4;
        /// Ends a block.
        const TERMINATOR = 1 << 5;
        /// Legal only while the object graph is still present.
        const STRUCTURAL = 1 << 6;
    }
}

impl Opcode {
    /// Printer name, also used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Const => "const",
            Opcode::GetSlot => "get_slot",
            Opcode::SetSlot => "set_slot",
            Opcode::CallMethod => "call_method",
            Opcode::GlobalGet => "global.get",
            Opcode::GlobalRead => "global.read",
            Opcode::GlobalSet => "global.set",
            Opcode::ToValue => "to_value",
            Opcode::FromValue => "from_value",
            Opcode::TensorClone => "tensor.clone",
            Opcode::Overwrite => "overwrite",
            Opcode::RefCast => "ref_cast",
            Opcode::ValueCast => "value_cast",
            Opcode::Derefine => "derefine",
            Opcode::UncheckedNarrow => "unchecked_narrow",
            Opcode::TuplePack => "tuple.pack",
            Opcode::TupleUnpack => "tuple.unpack",
            Opcode::OptionalPack => "optional.pack",
            Opcode::OptionalFlag => "optional.flag",
            Opcode::OptionalPayload => "optional.payload",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Neg => "neg",
            Opcode::Relu => "relu",
            Opcode::Exp => "exp",
            Opcode::Matmul => "matmul",
            Opcode::Transpose => "transpose",
            Opcode::Sum => "sum",
            Opcode::ScalarTensor => "scalar_tensor",
            Opcode::Linear => "linear",
            Opcode::Softmax => "softmax",
            Opcode::Mean => "mean",
            Opcode::Square => "square",
            Opcode::AddInPlace => "add_",
            Opcode::MulInPlace => "mul_",
            Opcode::ReluInPlace => "relu_",
            Opcode::AddScalar => "add.scalar",
            Opcode::Call => "call",
            Opcode::Return => "return",
            Opcode::Br => "br",
            Opcode::CondBr => "cond_br",
        }
    }

    /// Static traits of this opcode.
    pub fn traits(self) -> OpTraits {
        use Opcode::*;
        match self {
            GetSlot | SetSlot | CallMethod => OpTraits::STRUCTURAL,
            GlobalGet => OpTraits::REFERENCE_SEMANTICS,
            GlobalRead => OpTraits::VALUE_SEMANTICS,
            GlobalSet => OpTraits::MUTATES_STORAGE,
            ToValue => OpTraits::VALUE_SEMANTICS,
            FromValue | TensorClone => OpTraits::empty(),
            Overwrite => OpTraits::MUTATES_STORAGE,
            RefCast => OpTraits::REFERENCE_SEMANTICS,
            ValueCast | Derefine | UncheckedNarrow => OpTraits::VALUE_SEMANTICS,
            TuplePack | TupleUnpack | OptionalPack | OptionalFlag
            | OptionalPayload => OpTraits::VALUE_SEMANTICS,
            Const | ScalarTensor => OpTraits::VALUE_SEMANTICS,
            Add | Sub | Mul | Div | Neg | Relu | Exp | Matmul | Transpose
            | Sum => OpTraits::VALUE_SEMANTICS,
            Linear | Softmax | Mean | Square => {
                OpTraits::VALUE_SEMANTICS | OpTraits::COMPOSITE
            }
            AddInPlace | MulInPlace | ReluInPlace => {
                OpTraits::VARIANT
                    | OpTraits::MUTATES_STORAGE
                    | OpTraits::REFERENCE_SEMANTICS
            }
            AddScalar => OpTraits::VARIANT | OpTraits::VALUE_SEMANTICS,
            Call => OpTraits::VALUE_SEMANTICS,
            Return | Br | CondBr => OpTraits::TERMINATOR,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl OpKind {
    /// The payload-free code of this operation.
    pub fn opcode(&self) -> Opcode {
        match self {
            OpKind::Const(_) => Opcode::Const,
            OpKind::GetSlot(_) => Opcode::GetSlot,
            OpKind::SetSlot(_) => Opcode::SetSlot,
            OpKind::CallMethod(_) => Opcode::CallMethod,
            OpKind::GlobalGet(_) => Opcode::GlobalGet,
            OpKind::GlobalRead(_) => Opcode::GlobalRead,
            OpKind::GlobalSet(_) => Opcode::GlobalSet,
            OpKind::ToValue => Opcode::ToValue,
            OpKind::FromValue => Opcode::FromValue,
            OpKind::TensorClone => Opcode::TensorClone,
            OpKind::Overwrite => Opcode::Overwrite,
            OpKind::RefCast(_) => Opcode::RefCast,
            OpKind::ValueCast(_) => Opcode::ValueCast,
            OpKind::Derefine(_) => Opcode::Derefine,
            OpKind::UncheckedNarrow(_) => Opcode::UncheckedNarrow,
            OpKind::TuplePack => Opcode::TuplePack,
            OpKind::TupleUnpack => Opcode::TupleUnpack,
            OpKind::OptionalPack => Opcode::OptionalPack,
            OpKind::OptionalFlag => Opcode::OptionalFlag,
            OpKind::OptionalPayload => Opcode::OptionalPayload,
            OpKind::Add => Opcode::Add,
            OpKind::Sub => Opcode::Sub,
            OpKind::Mul => Opcode::Mul,
            OpKind::Div => Opcode::Div,
            OpKind::Neg => Opcode::Neg,
            OpKind::Relu => Opcode::Relu,
            OpKind::Exp => Opcode::Exp,
            OpKind::Matmul => Opcode::Matmul,
            OpKind::Transpose { .. } => Opcode::Transpose,
            OpKind::Sum { .. } => Opcode::Sum,
            OpKind::ScalarTensor => Opcode::ScalarTensor,
            OpKind::Linear => Opcode::Linear,
            OpKind::Softmax { .. } => Opcode::Softmax,
            OpKind::Mean { .. } => Opcode::Mean,
            OpKind::Square => Opcode::Square,
            OpKind::AddInPlace => Opcode::AddInPlace,
            OpKind::MulInPlace => Opcode::MulInPlace,
            OpKind::ReluInPlace => Opcode::ReluInPlace,
            OpKind::AddScalar => Opcode::AddScalar,
            OpKind::Call(_) => Opcode::Call,
            OpKind::Return => Opcode::Return,
            OpKind::Br { .. } => Opcode::Br,
            OpKind::CondBr { .. } => Opcode::CondBr,
        }
    }

    /// Static traits of this operation.
    #[inline]
    pub fn traits(&self) -> OpTraits {
        self.opcode().traits()
    }

    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.traits().contains(OpTraits::TERMINATOR)
    }

    #[inline]
    pub fn is_composite(&self) -> bool {
        self.traits().contains(OpTraits::COMPOSITE)
    }

    #[inline]
    pub fn is_variant(&self) -> bool {
        self.traits().contains(OpTraits::VARIANT)
    }

    /// Index of the operand whose storage this operation writes, if any.
    pub fn mutated_operand(&self) -> Option<usize> {
        match self {
            OpKind::AddInPlace | OpKind::MulInPlace | OpKind::ReluInPlace => Some(0),
            OpKind::Overwrite => Some(1),
            _ => None,
        }
    }

    /// Index of the operand the result aliases, if any.
    pub fn aliased_operand(&self) -> Option<usize> {
        match self {
            OpKind::RefCast(_) => Some(0),
            OpKind::AddInPlace | OpKind::MulInPlace | OpKind::ReluInPlace => Some(0),
            _ => None,
        }
    }
}
