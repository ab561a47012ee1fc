//! Constant values.
//!
//! Constants appear as slot initializers and as `const` operation payloads.
//! They derive `Eq`/`Hash` (floats via [`OrderedFloat`]) so whole programs
//! compare structurally, which the pipeline's idempotence checks and the
//! slot inliner's initializer reuse rely on.

use crate::dtype::DType;
use crate::shape::Shape;
use crate::types::{TensorMeta, Type};
use ordered_float::OrderedFloat;
use std::fmt;

/// A dense tensor literal.
///
/// Elements are stored uniformly as `f64` regardless of dtype; the dtype
/// field records the intended element type. Integer dtypes therefore carry
/// exact values only up to 2^53, which covers every initializer the
/// importer produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorLit {
    pub dims: Vec<i64>,
    pub dtype: DType,
    pub values: Vec<OrderedFloat<f64>>,
}

impl TensorLit {
    /// Build a literal, checking that the element count matches the dims.
    pub fn new(dims: Vec<i64>, dtype: DType, values: Vec<f64>) -> Option<TensorLit> {
        let expected: i64 = dims.iter().product();
        if expected != values.len() as i64 {
            return None;
        }
        Some(TensorLit {
            dims,
            dtype,
            values: values.into_iter().map(OrderedFloat).collect(),
        })
    }

    /// A literal filled with one repeated value.
    pub fn splat(dims: &[i64], dtype: DType, value: f64) -> TensorLit {
        let count: i64 = dims.iter().product();
        TensorLit {
            dims: dims.to_vec(),
            dtype,
            values: vec![OrderedFloat(value); count.max(0) as usize],
        }
    }

    /// The exact tensor meta this literal materializes.
    pub fn meta(&self) -> TensorMeta {
        TensorMeta {
            shape: Shape::concrete(&self.dims),
            dtype: Some(self.dtype),
        }
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Int(i64),
    Float(OrderedFloat<f64>),
    Bool(bool),
    None,
    Tensor(TensorLit),
}

impl ConstValue {
    /// Convenience constructor for float constants.
    pub fn float(v: f64) -> ConstValue {
        ConstValue::Float(OrderedFloat(v))
    }

    /// The type a `const` op producing this value has.
    ///
    /// Tensor literals materialize as immutable values with fully concrete
    /// meta; scalar constants map onto the scalar types.
    pub fn ty(&self) -> Type {
        match self {
            ConstValue::Int(_) => Type::Int,
            ConstValue::Float(_) => Type::Float,
            ConstValue::Bool(_) => Type::Bool,
            ConstValue::None => Type::None,
            ConstValue::Tensor(lit) => Type::ValueTensor(lit.meta()),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{}", v),
            ConstValue::Float(v) => write!(f, "{}", v.0),
            ConstValue::Bool(v) => write!(f, "{}", v),
            ConstValue::None => write!(f, "none"),
            ConstValue::Tensor(lit) => {
                write!(f, "dense<{}x{}>", lit.values.len(), lit.dtype)
            }
        }
    }
}
