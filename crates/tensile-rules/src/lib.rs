//! Tensile rules crate.
//!
//! The closed rule registries driving the rewrite passes:
//! - The operator-variant table (variant -> canonical form + relationship)
//! - The decomposition registry (legality predicate + expansion template
//!   per composite opcode)
//!
//! Both ship with the built-in rule set and accept additional rows; the
//! passes themselves contain no per-operator knowledge.
//!
//! # Example
//!
//! ```
//! use tensile_rules::{DecompositionRegistry, VariantTable};
//! use tensile_core::ir::{OpKind, Opcode};
//! use tensile_core::Type;
//!
//! let variants = VariantTable::with_defaults();
//! assert!(variants.lookup(Opcode::AddInPlace).is_some());
//!
//! let rules = DecompositionRegistry::with_defaults();
//! let picked = rules.select(
//!     &OpKind::Square,
//!     &[Type::vtensor_unknown()],
//!     &Type::vtensor_unknown(),
//! );
//! assert!(picked.is_some());
//! ```

use thiserror::Error;

// Operator-variant table
pub mod variants;

// Decomposition registry
pub mod decompose;

/// Rejected registry modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("`{0}` already has a variant rule")]
    Duplicate(tensile_core::ir::Opcode),
    #[error("`{0}` is not a variant opcode")]
    NotVariant(tensile_core::ir::Opcode),
    #[error("canonical form `{0}` is itself a variant")]
    VariantCanonical(tensile_core::ir::Opcode),
    #[error("`{0}` is not a composite opcode")]
    NotComposite(tensile_core::ir::Opcode),
    #[error("a decomposition rule named `{0}` already exists for this opcode")]
    DuplicateName(&'static str),
}

pub use decompose::{
    DecomposeRule, DecompositionRegistry, Expansion, ExpansionBuilder, TemplateInput, TemplateOp,
};
pub use variants::{VariantForm, VariantRule, VariantTable};
