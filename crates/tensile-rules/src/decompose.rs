//! The decomposition-rule registry.
//!
//! Each composite opcode owns an ordered list of rules. A rule is a
//! legality predicate over the concrete operand types plus an expansion
//! template; the decomposer splices the template of the first rule whose
//! predicate matches. Templates are drop-in replacements: the designated
//! result carries the composite's own result type, so every existing use
//! keeps verifying.

use crate::RuleError;
use rustc_hash::FxHashMap;
use tensile_core::ir::{OpKind, OpTraits, Opcode};
use tensile_core::{ConstValue, Dim, Shape, TensorMeta, Type};

/// A value reference inside an expansion template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateInput {
    /// The n-th operand of the composite being replaced.
    Operand(usize),
    /// The single result of the n-th op emitted by this template.
    Emitted(usize),
}

/// One op of an expansion template. Template ops are single-result.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOp {
    pub kind: OpKind,
    pub inputs: Vec<TemplateInput>,
    pub result_ty: Type,
}

/// A completed template: the ops to splice, in order, and which value
/// replaces the composite's result.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub ops: Vec<TemplateOp>,
    pub result: TemplateInput,
}

/// Accumulates template ops; [`finish`](Self::finish) picks the result.
#[derive(Default)]
pub struct ExpansionBuilder {
    ops: Vec<TemplateOp>,
}

impl ExpansionBuilder {
    pub fn new() -> ExpansionBuilder {
        ExpansionBuilder::default()
    }

    pub fn emit(&mut self, kind: OpKind, inputs: Vec<TemplateInput>, result_ty: Type) -> TemplateInput {
        self.ops.push(TemplateOp { kind, inputs, result_ty });
        TemplateInput::Emitted(self.ops.len() - 1)
    }

    pub fn finish(self, result: TemplateInput) -> Expansion {
        Expansion { ops: self.ops, result }
    }
}

/// One registered decomposition.
#[derive(Clone)]
pub struct DecomposeRule {
    pub name: &'static str,
    /// Whether the operand types carry enough static information for the
    /// expansion to be a faithful replacement.
    pub legal: fn(&OpKind, &[Type]) -> bool,
    /// Build the template. Receives the composite's attributes, operand
    /// types, and result type; returns `None` when the types turn out to
    /// be insufficient after all, which the decomposer treats as a
    /// non-match.
    pub expand: fn(&OpKind, &[Type], &Type) -> Option<Expansion>,
}

impl std::fmt::Debug for DecomposeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecomposeRule").field("name", &self.name).finish()
    }
}

/// Composite opcode -> ordered rule list.
#[derive(Debug, Default)]
pub struct DecompositionRegistry {
    rules: FxHashMap<Opcode, Vec<DecomposeRule>>,
}

impl DecompositionRegistry {
    pub fn empty() -> DecompositionRegistry {
        DecompositionRegistry::default()
    }

    /// The built-in rules: `linear`, `softmax`, `mean`, `square`.
    pub fn with_defaults() -> DecompositionRegistry {
        let mut registry = DecompositionRegistry::empty();
        let defaults: [(Opcode, DecomposeRule); 4] = [
            (Opcode::Linear, DecomposeRule {
                name: "linear-to-matmul",
                legal: linear_legal,
                expand: linear_expand,
            }),
            (Opcode::Softmax, DecomposeRule {
                name: "softmax-to-exp-sum-div",
                legal: softmax_legal,
                expand: softmax_expand,
            }),
            (Opcode::Mean, DecomposeRule {
                name: "mean-to-sum-div",
                legal: mean_legal,
                expand: mean_expand,
            }),
            (Opcode::Square, DecomposeRule {
                name: "square-to-mul",
                legal: |_, _| true,
                expand: square_expand,
            }),
        ];
        for (opcode, rule) in defaults {
            // The built-in rows satisfy every register() check.
            let _ = registry.register(opcode, rule);
        }
        registry
    }

    /// Append a rule for `opcode`. Later rules are tried after earlier
    /// ones. Rejects non-composite opcodes and duplicate rule names.
    pub fn register(&mut self, opcode: Opcode, rule: DecomposeRule) -> Result<(), RuleError> {
        if !opcode.traits().contains(OpTraits::COMPOSITE) {
            return Err(RuleError::NotComposite(opcode));
        }
        let list = self.rules.entry(opcode).or_default();
        if list.iter().any(|r| r.name == rule.name) {
            return Err(RuleError::DuplicateName(rule.name));
        }
        list.push(rule);
        Ok(())
    }

    pub fn rules(&self, opcode: Opcode) -> &[DecomposeRule] {
        self.rules.get(&opcode).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_rules(&self, opcode: Opcode) -> bool {
        !self.rules(opcode).is_empty()
    }

    /// First rule whose predicate matches and whose template builds.
    pub fn select(
        &self,
        kind: &OpKind,
        operand_types: &[Type],
        result_ty: &Type,
    ) -> Option<(&'static str, Expansion)> {
        for rule in self.rules(kind.opcode()) {
            if (rule.legal)(kind, operand_types)
                && let Some(expansion) = (rule.expand)(kind, operand_types, result_ty)
            {
                return Some((rule.name, expansion));
            }
        }
        None
    }
}

// === Built-in rules ===

fn value_meta(ty: &Type) -> Option<&TensorMeta> {
    match ty {
        Type::ValueTensor(meta) => Some(meta),
        _ => None,
    }
}

fn known_float(meta: &TensorMeta) -> bool {
    meta.dtype.is_some_and(|d| d.is_float())
}

/// Ranked intermediate with the given dims and the operand's dtype.
fn intermediate(shape: Shape, dtype: Option<tensile_core::DType>) -> Type {
    Type::ValueTensor(TensorMeta { shape, dtype })
}

/// Legal when the input and weight are rank-2 and bias presence is
/// statically known (a tensor or `none`, not an optional).
fn linear_legal(_kind: &OpKind, operands: &[Type]) -> bool {
    let [input, weight, bias] = operands else {
        return false;
    };
    let rank2 = |ty: &Type| value_meta(ty).and_then(|m| m.shape.rank()) == Some(2);
    rank2(input)
        && rank2(weight)
        && match bias {
            Type::None => true,
            Type::ValueTensor(_) => true,
            _ => false,
        }
}

/// `linear(x, w, b)` -> `add(matmul(x, transpose(w)), b)`; the add is
/// dropped when the bias is statically absent.
fn linear_expand(_kind: &OpKind, operands: &[Type], result_ty: &Type) -> Option<Expansion> {
    let input = value_meta(&operands[0])?;
    let weight = value_meta(&operands[1])?;
    let w_out = weight.shape.dim(0)?;
    let w_in = weight.shape.dim(1)?;

    let mut ex = ExpansionBuilder::new();
    let wt = ex.emit(
        OpKind::Transpose { dim0: 0, dim1: 1 },
        vec![TemplateInput::Operand(1)],
        intermediate(Shape::Ranked(vec![w_in, w_out]), weight.dtype),
    );
    let mm_shape = Shape::Ranked(vec![input.shape.dim(0)?, w_out]);
    let mm_dtype = match (input.dtype, weight.dtype) {
        (Some(a), Some(b)) => Some(a.promote(b)),
        _ => None,
    };
    let bias_present = !matches!(operands[2], Type::None);
    if bias_present {
        let mm = ex.emit(
            OpKind::Matmul,
            vec![TemplateInput::Operand(0), wt],
            intermediate(mm_shape, mm_dtype),
        );
        let out = ex.emit(OpKind::Add, vec![mm, TemplateInput::Operand(2)], result_ty.clone());
        Some(ex.finish(out))
    } else {
        let mm = ex.emit(
            OpKind::Matmul,
            vec![TemplateInput::Operand(0), wt],
            result_ty.clone(),
        );
        Some(ex.finish(mm))
    }
}

/// Legal for a known floating dtype with the reduction dim in range
/// whenever the rank is known.
fn softmax_legal(kind: &OpKind, operands: &[Type]) -> bool {
    let OpKind::Softmax { dim } = kind else {
        return false;
    };
    let [input] = operands else {
        return false;
    };
    let Some(meta) = value_meta(input) else {
        return false;
    };
    known_float(meta)
        && *dim >= 0
        && meta.shape.rank().is_none_or(|rank| (*dim as usize) < rank)
}

/// `softmax[d](x)` -> `div(exp(x), sum[d,keepdim](exp(x)))`.
fn softmax_expand(kind: &OpKind, operands: &[Type], result_ty: &Type) -> Option<Expansion> {
    let OpKind::Softmax { dim } = kind else {
        return None;
    };
    let meta = value_meta(&operands[0])?;
    let sum_shape = match &meta.shape {
        Shape::Unranked => Shape::Unranked,
        Shape::Ranked(dims) => {
            let mut dims = dims.clone();
            *dims.get_mut(*dim as usize)? = Dim::Fixed(1);
            Shape::Ranked(dims)
        }
    };

    let mut ex = ExpansionBuilder::new();
    let exp = ex.emit(OpKind::Exp, vec![TemplateInput::Operand(0)], operands[0].clone());
    let total = ex.emit(
        OpKind::Sum { dim: Some(*dim), keepdim: true },
        vec![exp],
        intermediate(sum_shape, meta.dtype),
    );
    let out = ex.emit(OpKind::Div, vec![exp, total], result_ty.clone());
    Some(ex.finish(out))
}

/// Legal when the reduced element count is statically concrete and the
/// dtype is a known float.
fn mean_legal(kind: &OpKind, operands: &[Type]) -> bool {
    let OpKind::Mean { dim } = kind else {
        return false;
    };
    let [input] = operands else {
        return false;
    };
    let Some(meta) = value_meta(input) else {
        return false;
    };
    if !known_float(meta) {
        return false;
    }
    match dim {
        Some(d) => *d >= 0 && matches!(meta.shape.dim(*d as usize), Some(Dim::Fixed(_))),
        None => meta.shape.num_elements().is_some(),
    }
}

/// `mean(x)` -> `div(sum(x), scalar_tensor(count))`.
fn mean_expand(kind: &OpKind, operands: &[Type], result_ty: &Type) -> Option<Expansion> {
    let OpKind::Mean { dim } = kind else {
        return None;
    };
    let meta = value_meta(&operands[0])?;
    let (count, sum_shape) = match dim {
        Some(d) => {
            let Some(Dim::Fixed(extent)) = meta.shape.dim(*d as usize) else {
                return None;
            };
            let Shape::Ranked(dims) = &meta.shape else {
                return None;
            };
            let mut reduced = dims.clone();
            reduced.remove(*d as usize);
            (extent, Shape::Ranked(reduced))
        }
        None => (meta.shape.num_elements()?, Shape::scalar()),
    };

    let mut ex = ExpansionBuilder::new();
    let total = ex.emit(
        OpKind::Sum { dim: *dim, keepdim: false },
        vec![TemplateInput::Operand(0)],
        intermediate(sum_shape, meta.dtype),
    );
    let count = ex.emit(OpKind::Const(ConstValue::float(count as f64)), vec![], Type::Float);
    let divisor = ex.emit(
        OpKind::ScalarTensor,
        vec![count],
        intermediate(Shape::scalar(), meta.dtype),
    );
    let out = ex.emit(OpKind::Div, vec![total, divisor], result_ty.clone());
    Some(ex.finish(out))
}

/// `square(x)` -> `mul(x, x)`.
fn square_expand(_kind: &OpKind, _operands: &[Type], result_ty: &Type) -> Option<Expansion> {
    let mut ex = ExpansionBuilder::new();
    let out = ex.emit(
        OpKind::Mul,
        vec![TemplateInput::Operand(0), TemplateInput::Operand(0)],
        result_ty.clone(),
    );
    Some(ex.finish(out))
}
