//! Shared fixtures for the pipeline suite: the scenario programs the
//! integration tests drive end to end, and a small reference evaluator
//! used to check that lowering preserves computed values.
//!
//! The evaluator works on `f64` throughout and deliberately covers both
//! composite ops and their expansions, so the same input can be run
//! before and after the pipeline and compared numerically.

use rustc_hash::FxHashMap;
use tensile::prelude::*;
use tensile_core::{BlockId, FuncId, SymbolHash, TensorMeta, ValueId};

pub fn loc() -> SourceLoc {
    SourceLoc::unknown()
}

pub fn vt(dims: &[i64]) -> Type {
    Type::vtensor(dims, DType::F32)
}

pub fn splat(dims: &[i64], value: f64) -> ConstValue {
    ConstValue::Tensor(TensorLit::splat(dims, DType::F32, value))
}

/// A literal whose elements count up from `offset` in steps of `step`,
/// so transposes and reductions cannot cancel out unnoticed.
pub fn counting(dims: &[i64], offset: f64, step: f64) -> ConstValue {
    let count: i64 = dims.iter().product();
    let values = (0..count).map(|i| offset + step * i as f64).collect();
    let lit = TensorLit::new(dims.to_vec(), DType::F32, values)
        .unwrap_or_else(|| panic!("literal shape {dims:?} does not match its element count"));
    ConstValue::Tensor(lit)
}

/// Opcodes of the entry block, in order.
pub fn opcodes(func: &tensile_core::ir::Function) -> Vec<Opcode> {
    func.blocks[0].ops.iter().map(|&op| func.op(op).kind.opcode()).collect()
}

/// How many ops with this opcode the whole program contains.
pub fn count_ops(program: &Program, opcode: Opcode) -> usize {
    program
        .functions
        .iter()
        .map(|f| {
            f.blocks
                .iter()
                .flat_map(|b| &b.ops)
                .filter(|&&op| f.op(op).kind.opcode() == opcode)
                .count()
        })
        .sum()
}

/// Panics if any object machinery survived: class-typed values,
/// slot accesses, method calls, or reference-tensor values.
pub fn assert_object_free(program: &Program) {
    assert!(program.hierarchy.is_none(), "object hierarchy survived the pipeline");
    for func in &program.functions {
        for value in &func.values {
            assert!(
                !value.ty.contains_class(),
                "class-typed value survived in `{}`",
                func.name
            );
            assert!(
                !value.ty.contains_ref_tensor(),
                "reference tensor survived in `{}`",
                func.name
            );
        }
        for block in &func.blocks {
            for &op in &block.ops {
                let kind = &func.op(op).kind;
                assert!(
                    !matches!(
                        kind,
                        OpKind::GetSlot(_)
                            | OpKind::SetSlot(_)
                            | OpKind::CallMethod(_)
                            | OpKind::GlobalGet(_)
                    ),
                    "`{}` survived in `{}`",
                    kind.opcode(),
                    func.name
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario programs
// ---------------------------------------------------------------------------

/// `Root { bias, sub: Child { weight } }` where both slots are mutable
/// and written, so flattening must keep two global slots alive.
///
/// `forward(x) = x * weight + bias` goes through a virtual method call
/// the preparer has to resolve; `step(f)` rescales both slots through
/// `set_slot`.
pub fn two_class_tree() -> Program {
    let mut pb = ProgramBuilder::new();
    let child_ty = Type::Class("Child".into());
    let root_ty = Type::Class("Root".into());

    let mut gain = FuncBuilder::new("Child::forward", Visibility::Private, loc());
    let child_self = gain.param(child_ty.clone());
    let x = gain.param(vt(&[4]));
    gain.results(vec![vt(&[4])]);
    let w = gain.op1(OpKind::GetSlot("weight".into()), vec![child_self], vt(&[4]), loc());
    let y = gain.op1(OpKind::Mul, vec![x, w], vt(&[4]), loc());
    gain.ret(vec![y], loc());
    let gain_id = pb.add_function(gain.finish());

    let mut scale = FuncBuilder::new("Child::scale", Visibility::Private, loc());
    let child_self = scale.param(child_ty.clone());
    let f = scale.param(vt(&[4]));
    scale.results(vec![]);
    let w = scale.op1(OpKind::GetSlot("weight".into()), vec![child_self], vt(&[4]), loc());
    let scaled = scale.op1(OpKind::Mul, vec![w, f], vt(&[4]), loc());
    scale.op(OpKind::SetSlot("weight".into()), vec![child_self, scaled], vec![], loc());
    scale.ret(vec![], loc());
    let scale_id = pb.add_function(scale.finish());

    let mut fwd = FuncBuilder::new("Root::forward", Visibility::Private, loc());
    let root_self = fwd.param(root_ty.clone());
    let x = fwd.param(vt(&[4]));
    fwd.results(vec![vt(&[4])]);
    let sub = fwd.op1(OpKind::GetSlot("sub".into()), vec![root_self], child_ty.clone(), loc());
    let mid = fwd.op1(OpKind::CallMethod("forward".into()), vec![sub, x], vt(&[4]), loc());
    let bias = fwd.op1(OpKind::GetSlot("bias".into()), vec![root_self], vt(&[4]), loc());
    let out = fwd.op1(OpKind::Add, vec![mid, bias], vt(&[4]), loc());
    fwd.ret(vec![out], loc());
    let fwd_id = pb.add_function(fwd.finish());

    let mut step = FuncBuilder::new("Root::step", Visibility::Private, loc());
    let root_self = step.param(root_ty);
    let f = step.param(vt(&[4]));
    step.results(vec![]);
    let sub = step.op1(OpKind::GetSlot("sub".into()), vec![root_self], child_ty, loc());
    step.op(OpKind::Call("Child::scale".into()), vec![sub, f], vec![], loc());
    let b = step.op1(OpKind::GetSlot("bias".into()), vec![root_self], vt(&[4]), loc());
    let nb = step.op1(OpKind::Mul, vec![b, f], vt(&[4]), loc());
    step.op(OpKind::SetSlot("bias".into()), vec![root_self, nb], vec![], loc());
    step.ret(vec![], loc());
    let step_id = pb.add_function(step.finish());

    let child = pb.declare_class("Child", loc());
    pb.add_data_slot(child, "weight", vt(&[4]), splat(&[4], 2.0), true, loc());
    pb.add_method(child, "forward", gain_id, false, vec![], loc());
    pb.add_method(child, "scale", scale_id, false, vec![], loc());

    let root = pb.declare_class("Root", loc());
    pb.add_data_slot(root, "bias", vt(&[4]), splat(&[4], 1.0), true, loc());
    pb.add_submodule_slot(root, "sub", "Child", loc());
    pb.add_method(root, "forward", fwd_id, true, vec![], loc());
    pb.add_method(root, "step", step_id, true, vec![], loc());
    pb.set_root(root);
    pb.finish()
}

/// A single mutable slot mutated through a reference chain. The read
/// before the in-place add and the read after must see different
/// contents, and resolving the chain should cost exactly one storage
/// read.
pub fn aliased_accumulator() -> Program {
    let mut pb = ProgramBuilder::new();

    let mut step = FuncBuilder::new("Acc::step", Visibility::Private, loc());
    let acc_self = step.param(Type::Class("Acc".into()));
    step.results(vec![vt(&[2]), vt(&[2])]);
    let handle = step.op1(
        OpKind::GetSlot("total".into()),
        vec![acc_self],
        Type::Tensor(TensorMeta::concrete(&[2], DType::F32)),
        loc(),
    );
    let before = step.op1(OpKind::ToValue, vec![handle], vt(&[2]), loc());
    let delta = step.constant(splat(&[2], 3.0), loc());
    let bumped = step.op1(
        OpKind::AddInPlace,
        vec![handle, delta],
        Type::Tensor(TensorMeta::concrete(&[2], DType::F32)),
        loc(),
    );
    let after = step.op1(OpKind::ToValue, vec![bumped], vt(&[2]), loc());
    step.ret(vec![before, after], loc());
    let step_id = pb.add_function(step.finish());

    let acc = pb.declare_class("Acc", loc());
    pb.add_data_slot(acc, "total", vt(&[2]), splat(&[2], 1.0), true, loc());
    pb.add_method(acc, "step", step_id, true, vec![], loc());
    pb.set_root(acc);
    pb.finish()
}

/// A concrete public entry calling a helper declared with unknown
/// tensor types; refinement must narrow the helper end to end while the
/// public signature stays as declared.
pub fn refinement_chain() -> Program {
    let mut program = Program::new();

    let mut helper = FuncBuilder::new("helper", Visibility::Private, loc());
    let x = helper.param(Type::vtensor_unknown());
    helper.results(vec![Type::vtensor_unknown()]);
    let y = helper.op1(OpKind::Relu, vec![x], Type::vtensor_unknown(), loc());
    helper.ret(vec![y], loc());
    program.add_function(helper.finish());

    let mut fwd = FuncBuilder::new("forward", Visibility::Public, loc());
    let x = fwd.param(vt(&[2, 3]));
    fwd.results(vec![Type::vtensor_unknown()]);
    let y = fwd.op1(OpKind::Call("helper".into()), vec![x], Type::vtensor_unknown(), loc());
    fwd.ret(vec![y], loc());
    program.add_function(fwd.finish());

    program
}

/// One `softmax` whose operand never becomes precise enough for a legal
/// expansion.
pub fn opaque_softmax() -> Program {
    let mut program = Program::new();
    let mut fb = FuncBuilder::new("forward", Visibility::Public, loc());
    let x = fb.param(Type::vtensor_unknown());
    fb.results(vec![Type::vtensor_unknown()]);
    let y = fb.op1(OpKind::Softmax { dim: 1 }, vec![x], Type::vtensor_unknown(), loc());
    fb.ret(vec![y], loc());
    program.add_function(fb.finish());
    program
}

/// `forward(x) = linear(x, w, b)` with everything concrete, the shape
/// the decomposer rewrites into transpose, matmul and add.
pub fn linear_classifier() -> Program {
    let mut program = Program::new();
    let mut fb = FuncBuilder::new("forward", Visibility::Public, loc());
    let x = fb.param(vt(&[2, 4]));
    fb.results(vec![vt(&[2, 3])]);
    let w = fb.constant(counting(&[3, 4], -0.5, 0.25), loc());
    let b = fb.constant(counting(&[3], 0.5, 1.0), loc());
    let y = fb.op1(OpKind::Linear, vec![x, w, b], vt(&[2, 3]), loc());
    fb.ret(vec![y], loc());
    program.add_function(fb.finish());
    program
}

/// Softmax, square and a full mean over one concrete input, covering
/// every default decomposition that needs broadcasting.
pub fn statistics_head() -> Program {
    let mut program = Program::new();
    let mut fb = FuncBuilder::new("forward", Visibility::Public, loc());
    let x = fb.param(vt(&[2, 3]));
    fb.results(vec![vt(&[2, 3]), vt(&[])]);
    let sm = fb.op1(OpKind::Softmax { dim: 1 }, vec![x], vt(&[2, 3]), loc());
    let sq = fb.op1(OpKind::Square, vec![x], vt(&[2, 3]), loc());
    let m = fb.op1(OpKind::Mean { dim: None }, vec![sq], vt(&[]), loc());
    fb.ret(vec![sm, m], loc());
    program.add_function(fb.finish());
    program
}

/// A public function with an optional second result, so the boundary
/// pass has an aggregate to flatten.
pub fn optional_head() -> Program {
    let mut program = Program::new();
    let opt = Type::optional(Type::Float);
    let mut fb = FuncBuilder::new("forward", Visibility::Public, loc());
    let x = fb.param(vt(&[2]));
    fb.results(vec![vt(&[2]), opt.clone()]);
    let y = fb.op1(OpKind::Relu, vec![x], vt(&[2]), loc());
    let c = fb.constant(ConstValue::float(2.5), loc());
    let o = fb.op1(OpKind::Derefine(opt.clone()), vec![c], opt, loc());
    fb.ret(vec![y, o], loc());
    program.add_function(fb.finish());
    program
}

// ---------------------------------------------------------------------------
// Reference evaluator
// ---------------------------------------------------------------------------

/// A dense row-major tensor; rank 0 is a scalar with one element.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dims: Vec<i64>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn new(dims: &[i64], data: Vec<f64>) -> Tensor {
        let count: i64 = dims.iter().product();
        assert_eq!(count as usize, data.len(), "tensor {dims:?} wants {count} elements");
        Tensor { dims: dims.to_vec(), data }
    }

    pub fn splat(dims: &[i64], value: f64) -> Tensor {
        let count: i64 = dims.iter().product();
        Tensor { dims: dims.to_vec(), data: vec![value; count.max(0) as usize] }
    }

    pub fn scalar(value: f64) -> Tensor {
        Tensor { dims: Vec::new(), data: vec![value] }
    }

    fn strides(&self) -> Vec<i64> {
        let mut strides = vec![1i64; self.dims.len()];
        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    fn get(&self, coords: &[i64]) -> f64 {
        let strides = self.strides();
        let mut flat = 0i64;
        for (i, &c) in coords.iter().enumerate() {
            flat += c * strides[i];
        }
        self.data[flat as usize]
    }

    /// Element at `coords` of the broadcast result shape; own axes are
    /// right-aligned and size-1 axes repeat.
    fn get_broadcast(&self, coords: &[i64]) -> f64 {
        let skip = coords.len() - self.dims.len();
        let own: Vec<i64> = self
            .dims
            .iter()
            .enumerate()
            .map(|(i, &d)| if d == 1 { 0 } else { coords[skip + i] })
            .collect();
        self.get(&own)
    }
}

fn broadcast_dims(a: &[i64], b: &[i64]) -> Vec<i64> {
    let rank = a.len().max(b.len());
    let mut out = vec![0i64; rank];
    for i in 0..rank {
        let da = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let db = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        out[i] = if da == db {
            da
        } else if da == 1 {
            db
        } else if db == 1 {
            da
        } else {
            panic!("cannot broadcast {a:?} against {b:?}")
        };
    }
    out
}

fn decode(mut flat: i64, dims: &[i64]) -> Vec<i64> {
    let mut coords = vec![0i64; dims.len()];
    for i in (0..dims.len()).rev() {
        coords[i] = flat % dims[i];
        flat /= dims[i];
    }
    coords
}

fn binary(a: &Tensor, b: &Tensor, f: impl Fn(f64, f64) -> f64) -> Tensor {
    let dims = broadcast_dims(&a.dims, &b.dims);
    let count: i64 = dims.iter().product();
    let mut data = Vec::with_capacity(count as usize);
    for flat in 0..count {
        let coords = decode(flat, &dims);
        data.push(f(a.get_broadcast(&coords), b.get_broadcast(&coords)));
    }
    Tensor { dims, data }
}

fn unary(a: &Tensor, f: impl Fn(f64) -> f64) -> Tensor {
    Tensor { dims: a.dims.clone(), data: a.data.iter().map(|&v| f(v)).collect() }
}

fn matmul(a: &Tensor, b: &Tensor) -> Tensor {
    let [n, k] = a.dims[..] else { panic!("matmul lhs is not rank 2") };
    let [k2, m] = b.dims[..] else { panic!("matmul rhs is not rank 2") };
    assert_eq!(k, k2, "matmul inner dimensions disagree");
    let mut data = Vec::with_capacity((n * m) as usize);
    for i in 0..n {
        for j in 0..m {
            let mut acc = 0.0;
            for p in 0..k {
                acc += a.get(&[i, p]) * b.get(&[p, j]);
            }
            data.push(acc);
        }
    }
    Tensor { dims: vec![n, m], data }
}

fn transpose(a: &Tensor, dim0: i64, dim1: i64) -> Tensor {
    let rank = a.dims.len() as i64;
    let norm = |d: i64| if d < 0 { (d + rank) as usize } else { d as usize };
    let (d0, d1) = (norm(dim0), norm(dim1));
    let mut dims = a.dims.clone();
    dims.swap(d0, d1);
    let count: i64 = dims.iter().product();
    let mut data = Vec::with_capacity(count as usize);
    for flat in 0..count {
        let mut coords = decode(flat, &dims);
        coords.swap(d0, d1);
        data.push(a.get(&coords));
    }
    Tensor { dims, data }
}

fn reduce_sum(a: &Tensor, dim: Option<i64>, keepdim: bool) -> Tensor {
    match dim {
        None => {
            let total: f64 = a.data.iter().sum();
            let dims = if keepdim { vec![1; a.dims.len()] } else { Vec::new() };
            Tensor { dims, data: vec![total] }
        }
        Some(d) => {
            let rank = a.dims.len() as i64;
            let d = if d < 0 { (d + rank) as usize } else { d as usize };
            let extent = a.dims[d];
            let mut dims = a.dims.clone();
            if keepdim {
                dims[d] = 1;
            } else {
                dims.remove(d);
            }
            let count: i64 = dims.iter().product();
            let mut data = Vec::with_capacity(count as usize);
            for flat in 0..count {
                let out = decode(flat, &dims);
                let mut acc = 0.0;
                for k in 0..extent {
                    let mut coords = out.clone();
                    if keepdim {
                        coords[d] = k;
                    } else {
                        coords.insert(d, k);
                    }
                    acc += a.get(&coords);
                }
                data.push(acc);
            }
            Tensor { dims, data }
        }
    }
}

/// Runtime value of the reference evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Optional { present: bool, payload: Box<Value> },
    Tuple(Vec<Value>),
}

fn as_tensor(value: &Value) -> &Tensor {
    match value {
        Value::Tensor(t) => t,
        other => panic!("expected a tensor, got {other:?}"),
    }
}

fn as_scalar(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        other => panic!("expected a scalar, got {other:?}"),
    }
}

fn const_value(value: &ConstValue) -> Value {
    match value {
        ConstValue::Int(v) => Value::Int(*v),
        ConstValue::Float(v) => Value::Float(v.0),
        ConstValue::Bool(v) => Value::Bool(*v),
        ConstValue::None => Value::None,
        ConstValue::Tensor(lit) => Value::Tensor(Tensor {
            dims: lit.dims.clone(),
            data: lit.values.iter().map(|v| v.0).collect(),
        }),
    }
}

/// Walks the IR directly; globals are seeded from slot initializers and
/// persist across calls, so stateful entry points can be replayed.
pub struct Evaluator<'a> {
    program: &'a Program,
    globals: FxHashMap<SymbolHash, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(program: &'a Program) -> Evaluator<'a> {
        let globals = program
            .globals
            .iter()
            .map(|slot| (slot.symbol, const_value(&slot.initializer)))
            .collect();
        Evaluator { program, globals }
    }

    pub fn call(&mut self, name: &str, args: &[Value]) -> Vec<Value> {
        let id = self
            .program
            .find_function(name)
            .unwrap_or_else(|| panic!("no function named `{name}`"));
        self.invoke(id, args.to_vec())
    }

    fn invoke(&mut self, id: FuncId, args: Vec<Value>) -> Vec<Value> {
        let func = self.program.function(id);
        let mut env: FxHashMap<ValueId, Value> = FxHashMap::default();
        let mut block = BlockId::ENTRY;
        let mut incoming = args;
        'blocks: loop {
            let blk = &func.blocks[block.index()];
            assert_eq!(
                blk.params.len(),
                incoming.len(),
                "branch arity mismatch in `{}`",
                func.name
            );
            for (&param, value) in blk.params.iter().zip(std::mem::take(&mut incoming)) {
                env.insert(param, value);
            }
            for &op in &blk.ops {
                let operation = func.op(op);
                match &operation.kind {
                    OpKind::Return => {
                        return operation.operands.iter().map(|v| env[v].clone()).collect();
                    }
                    OpKind::Br { target } => {
                        incoming = operation.operands.iter().map(|v| env[v].clone()).collect();
                        block = *target;
                        continue 'blocks;
                    }
                    OpKind::CondBr { on_true, on_false, true_args } => {
                        let Value::Bool(flag) = env[&operation.operands[0]] else {
                            panic!("condition is not a bool in `{}`", func.name)
                        };
                        let rest = &operation.operands[1..];
                        let (true_ops, false_ops) = rest.split_at(*true_args as usize);
                        let chosen = if flag { true_ops } else { false_ops };
                        incoming = chosen.iter().map(|v| env[v].clone()).collect();
                        block = if flag { *on_true } else { *on_false };
                        continue 'blocks;
                    }
                    kind => {
                        let args: Vec<Value> =
                            operation.operands.iter().map(|v| env[v].clone()).collect();
                        let results = self.eval(kind, &args);
                        assert_eq!(
                            results.len(),
                            operation.results.len(),
                            "`{}` produced the wrong number of results",
                            kind.opcode()
                        );
                        for (&r, value) in operation.results.iter().zip(results) {
                            env.insert(r, value);
                        }
                    }
                }
            }
            panic!("block without terminator in `{}`", func.name);
        }
    }

    fn eval(&mut self, kind: &OpKind, args: &[Value]) -> Vec<Value> {
        match kind {
            OpKind::Const(value) => vec![const_value(value)],
            OpKind::GlobalRead(symbol) => {
                let value = self
                    .globals
                    .get(symbol)
                    .unwrap_or_else(|| panic!("read of a global with no value"));
                vec![value.clone()]
            }
            OpKind::GlobalSet(symbol) => {
                self.globals.insert(*symbol, args[0].clone());
                vec![]
            }
            OpKind::Call(callee) => {
                let id = self
                    .program
                    .find_function(callee)
                    .unwrap_or_else(|| panic!("call to unknown function `{callee}`"));
                self.invoke(id, args.to_vec())
            }
            OpKind::ValueCast(_) => vec![args[0].clone()],
            OpKind::Derefine(ty) => {
                let value = args[0].clone();
                if matches!(ty, Type::Optional(_)) {
                    vec![match value {
                        Value::Optional { .. } => value,
                        Value::None => {
                            Value::Optional { present: false, payload: Box::new(Value::None) }
                        }
                        payload => Value::Optional { present: true, payload: Box::new(payload) },
                    }]
                } else {
                    vec![value]
                }
            }
            OpKind::UncheckedNarrow(ty) => {
                let value = args[0].clone();
                match value {
                    Value::Optional { payload, .. } if !matches!(ty, Type::Optional(_)) => {
                        vec![*payload]
                    }
                    other => vec![other],
                }
            }
            OpKind::TuplePack => vec![Value::Tuple(args.to_vec())],
            OpKind::TupleUnpack => match &args[0] {
                Value::Tuple(parts) => parts.clone(),
                other => panic!("tuple.unpack of {other:?}"),
            },
            OpKind::OptionalPack => {
                let Value::Bool(present) = args[0] else {
                    panic!("optional.pack flag is not a bool")
                };
                vec![Value::Optional { present, payload: Box::new(args[1].clone()) }]
            }
            OpKind::OptionalFlag => match &args[0] {
                Value::Optional { present, .. } => vec![Value::Bool(*present)],
                other => panic!("optional.flag of {other:?}"),
            },
            OpKind::OptionalPayload => match &args[0] {
                Value::Optional { payload, .. } => vec![(**payload).clone()],
                other => panic!("optional.payload of {other:?}"),
            },
            OpKind::Add => vec![Value::Tensor(binary(
                as_tensor(&args[0]),
                as_tensor(&args[1]),
                |a, b| a + b,
            ))],
            OpKind::Sub => vec![Value::Tensor(binary(
                as_tensor(&args[0]),
                as_tensor(&args[1]),
                |a, b| a - b,
            ))],
            OpKind::Mul => vec![Value::Tensor(binary(
                as_tensor(&args[0]),
                as_tensor(&args[1]),
                |a, b| a * b,
            ))],
            OpKind::Div => vec![Value::Tensor(binary(
                as_tensor(&args[0]),
                as_tensor(&args[1]),
                |a, b| a / b,
            ))],
            OpKind::AddScalar => {
                let s = as_scalar(&args[1]);
                vec![Value::Tensor(unary(as_tensor(&args[0]), |v| v + s))]
            }
            OpKind::Neg => vec![Value::Tensor(unary(as_tensor(&args[0]), |v| -v))],
            OpKind::Relu => vec![Value::Tensor(unary(as_tensor(&args[0]), |v| v.max(0.0)))],
            OpKind::Exp => vec![Value::Tensor(unary(as_tensor(&args[0]), f64::exp))],
            OpKind::Square => vec![Value::Tensor(unary(as_tensor(&args[0]), |v| v * v))],
            OpKind::Matmul => {
                vec![Value::Tensor(matmul(as_tensor(&args[0]), as_tensor(&args[1])))]
            }
            OpKind::Transpose { dim0, dim1 } => {
                vec![Value::Tensor(transpose(as_tensor(&args[0]), *dim0, *dim1))]
            }
            OpKind::Sum { dim, keepdim } => {
                vec![Value::Tensor(reduce_sum(as_tensor(&args[0]), *dim, *keepdim))]
            }
            OpKind::Mean { dim } => {
                let input = as_tensor(&args[0]);
                let sum = reduce_sum(input, *dim, false);
                let count = match dim {
                    None => input.data.len() as f64,
                    Some(d) => {
                        let rank = input.dims.len() as i64;
                        let d = if *d < 0 { (*d + rank) as usize } else { *d as usize };
                        input.dims[d] as f64
                    }
                };
                vec![Value::Tensor(unary(&sum, |v| v / count))]
            }
            OpKind::ScalarTensor => {
                vec![Value::Tensor(Tensor::scalar(as_scalar(&args[0])))]
            }
            OpKind::Linear => {
                let x = as_tensor(&args[0]);
                let w = as_tensor(&args[1]);
                let y = matmul(x, &transpose(w, 0, 1));
                let y = match &args[2] {
                    Value::None => y,
                    Value::Optional { present: false, .. } => y,
                    Value::Optional { present: true, payload } => {
                        binary(&y, as_tensor(payload), |a, b| a + b)
                    }
                    bias => binary(&y, as_tensor(bias), |a, b| a + b),
                };
                vec![Value::Tensor(y)]
            }
            OpKind::Softmax { dim } => {
                let e = unary(as_tensor(&args[0]), f64::exp);
                let s = reduce_sum(&e, Some(*dim), true);
                vec![Value::Tensor(binary(&e, &s, |a, b| a / b))]
            }
            other => panic!("reference evaluator does not implement `{}`", other.opcode()),
        }
    }
}

/// Structural equality with a small tolerance on floating point leaves.
pub fn assert_close(actual: &Value, expected: &Value) {
    const TOLERANCE: f64 = 1e-6;
    let close = |a: f64, b: f64| (a - b).abs() <= TOLERANCE * (1.0 + b.abs());
    match (actual, expected) {
        (Value::Tensor(a), Value::Tensor(b)) => {
            assert_eq!(a.dims, b.dims, "tensor shapes differ");
            for (&x, &y) in a.data.iter().zip(&b.data) {
                assert!(close(x, y), "tensor elements differ: {x} vs {y}");
            }
        }
        (Value::Float(a), Value::Float(b)) => {
            assert!(close(*a, *b), "floats differ: {a} vs {b}");
        }
        (Value::Optional { present: pa, payload: a }, Value::Optional { present: pb, payload: b }) => {
            assert_eq!(pa, pb, "optional presence differs");
            if *pa {
                assert_close(a, b);
            }
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            assert_eq!(a.len(), b.len(), "tuple lengths differ");
            for (x, y) in a.iter().zip(b) {
                assert_close(x, y);
            }
        }
        (a, b) => assert_eq!(a, b),
    }
}
