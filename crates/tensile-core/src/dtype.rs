//! Tensor element types and promotion.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// Element type of a tensor.
///
/// The numeric discriminants are stable and ordered so that promotion can
/// be decided by comparing `(category, width)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DType {
    Bool = 0,
    I32 = 1,
    I64 = 2,
    F32 = 3,
    F64 = 4,
}

/// Promotion category, coarser than the element type.
///
/// Promotion never moves down a category: combining any integer with any
/// float yields a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DTypeCategory {
    Bool,
    Int,
    Float,
}

impl DType {
    /// The promotion category of this element type.
    pub fn category(self) -> DTypeCategory {
        match self {
            DType::Bool => DTypeCategory::Bool,
            DType::I32 | DType::I64 => DTypeCategory::Int,
            DType::F32 | DType::F64 => DTypeCategory::Float,
        }
    }

    /// Bit width of one element.
    pub fn bit_width(self) -> u32 {
        match self {
            DType::Bool => 1,
            DType::I32 | DType::F32 => 32,
            DType::I64 | DType::F64 => 64,
        }
    }

    /// Whether this is a floating-point element type.
    #[inline]
    pub fn is_float(self) -> bool {
        self.category() == DTypeCategory::Float
    }

    /// Combine two element types under the standard promotion rule:
    /// higher category wins; within a category the wider type wins.
    pub fn promote(self, other: DType) -> DType {
        let key = |d: DType| (d.category(), d.bit_width());
        if key(other) > key(self) { other } else { self }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Bool => "bool",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}
