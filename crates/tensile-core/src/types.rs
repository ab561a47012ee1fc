//! The IR type system.
//!
//! Two tensor flavors carry the value/reference distinction that the
//! middle of the pipeline revolves around:
//!
//! - [`Type::Tensor`] is a handle to mutable storage. Operations tagged
//!   with reference semantics may alias it; `overwrite` mutates it.
//! - [`Type::ValueTensor`] is an immutable value. Everything after the
//!   value-semantics stage uses this flavor exclusively.
//!
//! Both carry a [`TensorMeta`] with independently-unknown shape and dtype.
//! The remaining variants cover scalars, optionality, unions, tuples, and
//! (before flattening only) class instances.

use crate::dtype::DType;
use crate::shape::Shape;
use std::fmt;

/// Shape and element-type knowledge about a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorMeta {
    pub shape: Shape,
    /// `None` means the element type is not statically known.
    pub dtype: Option<DType>,
}

impl TensorMeta {
    /// Nothing known: unranked shape, unknown dtype.
    pub fn unknown() -> TensorMeta {
        TensorMeta { shape: Shape::Unranked, dtype: None }
    }

    /// Known rank, unknown dims and dtype.
    pub fn of_rank(rank: usize) -> TensorMeta {
        TensorMeta { shape: Shape::unknown_of_rank(rank), dtype: None }
    }

    /// Fully concrete meta.
    pub fn concrete(dims: &[i64], dtype: DType) -> TensorMeta {
        TensorMeta { shape: Shape::concrete(dims), dtype: Some(dtype) }
    }

    /// Whether shape and dtype are both fully known.
    pub fn is_concrete(&self) -> bool {
        self.shape.is_concrete() && self.dtype.is_some()
    }

    /// Information-combining merge; `None` on contradiction.
    pub fn narrow(&self, other: &TensorMeta) -> Option<TensorMeta> {
        let shape = self.shape.narrow(&other.shape)?;
        let dtype = match (self.dtype, other.dtype) {
            (Some(a), Some(b)) if a != b => return None,
            (Some(a), _) | (_, Some(a)) => Some(a),
            (None, None) => None,
        };
        Some(TensorMeta { shape, dtype })
    }

    /// Least-specific common meta.
    pub fn join(&self, other: &TensorMeta) -> TensorMeta {
        TensorMeta {
            shape: self.shape.join(&other.shape),
            dtype: match (self.dtype, other.dtype) {
                (Some(a), Some(b)) if a == b => Some(a),
                _ => None,
            },
        }
    }

    /// Whether `self` carries at least as much information as `other`.
    pub fn refines(&self, other: &TensorMeta) -> bool {
        let dtype_ok = match (self.dtype, other.dtype) {
            (_, None) => true,
            (Some(a), Some(b)) => a == b,
            (None, Some(_)) => false,
        };
        dtype_ok && self.shape.refines(&other.shape)
    }
}

impl fmt::Display for TensorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dtype {
            Some(d) => write!(f, "{},{}", self.shape, d),
            None => write!(f, "{},?", self.shape),
        }
    }
}

/// The type of an IR value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    /// Reference-semantic tensor: a handle to mutable storage.
    Tensor(TensorMeta),
    /// Value-semantic tensor: an immutable snapshot.
    ValueTensor(TensorMeta),
    /// 64-bit integer scalar.
    Int,
    /// 64-bit float scalar.
    Float,
    /// Boolean scalar.
    Bool,
    /// The unit "absent" value.
    None,
    /// A value that is either the payload or absent.
    Optional(Box<Type>),
    /// One of a known, closed set of alternatives.
    Union(Vec<Type>),
    /// A fixed-arity aggregate.
    Tuple(Vec<Type>),
    /// An object instance. Only exists before the flattener runs.
    Class(String),
}

impl Type {
    /// A reference tensor with nothing known about it.
    pub fn tensor_unknown() -> Type {
        Type::Tensor(TensorMeta::unknown())
    }

    /// A value tensor with nothing known about it.
    pub fn vtensor_unknown() -> Type {
        Type::ValueTensor(TensorMeta::unknown())
    }

    /// A fully concrete value tensor.
    pub fn vtensor(dims: &[i64], dtype: DType) -> Type {
        Type::ValueTensor(TensorMeta::concrete(dims, dtype))
    }

    /// An optional wrapping of `payload`.
    pub fn optional(payload: Type) -> Type {
        Type::Optional(Box::new(payload))
    }

    /// Canonical union constructor: flattens nested unions, sorts and
    /// deduplicates alternatives, and collapses singleton sets.
    pub fn union_of(alternatives: Vec<Type>) -> Type {
        let mut flat = Vec::new();
        for alt in alternatives {
            match alt {
                Type::Union(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        flat.sort();
        flat.dedup();
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            Type::Union(flat)
        }
    }

    /// The tensor meta, for either tensor flavor.
    pub fn tensor_meta(&self) -> Option<&TensorMeta> {
        match self {
            Type::Tensor(meta) | Type::ValueTensor(meta) => Some(meta),
            _ => None,
        }
    }

    /// Whether this is the reference-semantic tensor flavor.
    pub fn is_ref_tensor(&self) -> bool {
        matches!(self, Type::Tensor(_))
    }

    /// Whether this is the value-semantic tensor flavor.
    pub fn is_value_tensor(&self) -> bool {
        matches!(self, Type::ValueTensor(_))
    }

    /// Whether any class type occurs anywhere in this type.
    pub fn contains_class(&self) -> bool {
        match self {
            Type::Class(_) => true,
            Type::Optional(inner) => inner.contains_class(),
            Type::Union(alts) => alts.iter().any(Type::contains_class),
            Type::Tuple(elems) => elems.iter().any(Type::contains_class),
            _ => false,
        }
    }

    /// Whether any reference tensor occurs anywhere in this type.
    pub fn contains_ref_tensor(&self) -> bool {
        match self {
            Type::Tensor(_) => true,
            Type::Optional(inner) => inner.contains_ref_tensor(),
            Type::Union(alts) => alts.iter().any(Type::contains_ref_tensor),
            Type::Tuple(elems) => elems.iter().any(Type::contains_ref_tensor),
            _ => false,
        }
    }

    /// The dtype a scalar of this type materializes as.
    pub fn scalar_dtype(&self) -> Option<DType> {
        match self {
            Type::Int => Some(DType::I64),
            Type::Float => Some(DType::F64),
            Type::Bool => Some(DType::Bool),
            _ => None,
        }
    }

    /// Static subtyping along the information order: a value of type
    /// `self` may flow wherever `other` is expected.
    ///
    /// Covers tensor-meta refinement, definite-present (`T` refines
    /// `Optional<T>`), definite-absent (`None` refines `Optional<T>`),
    /// union membership, and pointwise tuple/optional refinement.
    pub fn is_refinement_of(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Type::Tensor(a), Type::Tensor(b)) => a.refines(b),
            (Type::ValueTensor(a), Type::ValueTensor(b)) => a.refines(b),
            (Type::Optional(a), Type::Optional(b)) => a.is_refinement_of(b),
            (Type::None, Type::Optional(_)) => true,
            (t, Type::Optional(payload)) => t.is_refinement_of(payload),
            (Type::Union(smaller), Type::Union(_)) => {
                smaller.iter().all(|alt| alt.is_refinement_of(other))
            }
            (t, Type::Union(alts)) => alts.iter().any(|alt| t.is_refinement_of(alt)),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.is_refinement_of(y))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(meta) => write!(f, "tensor<{}>", meta),
            Type::ValueTensor(meta) => write!(f, "vtensor<{}>", meta),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::None => write!(f, "none"),
            Type::Optional(inner) => write!(f, "optional<{}>", inner),
            Type::Union(alts) => {
                write!(f, "union<")?;
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", alt)?;
                }
                write!(f, ">")
            }
            Type::Tuple(elems) => {
                write!(f, "tuple<")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ">")
            }
            Type::Class(name) => write!(f, "class<{}>", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_narrow_and_join() {
        let unknown = TensorMeta::unknown();
        let ranked = TensorMeta::of_rank(2);
        let concrete = TensorMeta::concrete(&[2, 3], DType::F32);

        assert_eq!(unknown.narrow(&concrete), Some(concrete.clone()));
        assert_eq!(ranked.narrow(&concrete), Some(concrete.clone()));
        assert_eq!(concrete.join(&unknown), unknown);

        let other_dtype = TensorMeta::concrete(&[2, 3], DType::I64);
        assert_eq!(concrete.narrow(&other_dtype), None);
    }

    #[test]
    fn refinement_of_optionals() {
        let payload = Type::vtensor(&[4], DType::F32);
        let opt = Type::optional(Type::vtensor_unknown());

        assert!(payload.is_refinement_of(&opt));
        assert!(Type::None.is_refinement_of(&opt));
        assert!(!Type::Int.is_refinement_of(&opt));
        assert!(opt.is_refinement_of(&opt));
    }

    #[test]
    fn refinement_of_unions() {
        let u = Type::union_of(vec![Type::Int, Type::Float]);
        assert!(Type::Int.is_refinement_of(&u));
        assert!(!Type::Bool.is_refinement_of(&u));

        let narrower = Type::union_of(vec![Type::Int]);
        assert!(narrower.is_refinement_of(&u));
    }

    #[test]
    fn union_canonicalization() {
        let a = Type::union_of(vec![Type::Float, Type::Int, Type::Int]);
        let b = Type::union_of(vec![Type::Int, Type::Float]);
        assert_eq!(a, b);
        assert_eq!(Type::union_of(vec![Type::Int]), Type::Int);
    }

    #[test]
    fn tensor_flavors_do_not_cross() {
        let meta = TensorMeta::unknown();
        let r = Type::Tensor(meta.clone());
        let v = Type::ValueTensor(meta);
        assert!(!r.is_refinement_of(&v));
        assert!(!v.is_refinement_of(&r));
    }

    #[test]
    fn class_detection() {
        let t = Type::Tuple(vec![Type::Int, Type::optional(Type::Class("Root".into()))]);
        assert!(t.contains_class());
        assert!(!Type::vtensor_unknown().contains_class());
    }

    #[test]
    fn display() {
        assert_eq!(
            format!("{}", Type::vtensor(&[2, 3], DType::F32)),
            "vtensor<[2,3],f32>"
        );
        assert_eq!(format!("{}", Type::tensor_unknown()), "tensor<*,?>");
        assert_eq!(
            format!("{}", Type::optional(Type::Int)),
            "optional<int>"
        );
    }
}
