//! The operator-variant table.
//!
//! Each non-canonical member of an operator family maps to its canonical
//! form plus the relationship between the two. The variant reducer is
//! entirely table-driven; adding a variant means adding a row here, not
//! touching the pass.

use crate::RuleError;
use rustc_hash::FxHashMap;
use tensile_core::ir::{OpKind, Opcode};

/// How a variant relates to its canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantForm {
    /// Mutates operand 0 with the canonical result and returns the
    /// mutated storage.
    InPlace,
    /// Same computation with a scalar right-hand side; the scalar is
    /// promoted to a 0-d tensor.
    ScalarOverload,
}

/// One row of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRule {
    pub variant: Opcode,
    /// Canonical replacement. Carries no attributes for every canonical
    /// family in the table.
    pub canonical: OpKind,
    pub form: VariantForm,
}

/// Variant opcode -> rule.
#[derive(Debug, Default)]
pub struct VariantTable {
    rules: FxHashMap<Opcode, VariantRule>,
}

impl VariantTable {
    pub fn empty() -> VariantTable {
        VariantTable::default()
    }

    /// The built-in operator families.
    pub fn with_defaults() -> VariantTable {
        let mut table = VariantTable::empty();
        for (variant, canonical, form) in [
            (Opcode::AddInPlace, OpKind::Add, VariantForm::InPlace),
            (Opcode::MulInPlace, OpKind::Mul, VariantForm::InPlace),
            (Opcode::ReluInPlace, OpKind::Relu, VariantForm::InPlace),
            (Opcode::AddScalar, OpKind::Add, VariantForm::ScalarOverload),
        ] {
            // The built-in rows satisfy every register() check.
            let _ = table.register(VariantRule { variant, canonical, form });
        }
        table
    }

    /// Add a row. Rejects rows for opcodes that are not variants, rows
    /// whose canonical form is itself a variant, and duplicates.
    pub fn register(&mut self, rule: VariantRule) -> Result<(), RuleError> {
        if !rule.variant.traits().contains(tensile_core::ir::OpTraits::VARIANT) {
            return Err(RuleError::NotVariant(rule.variant));
        }
        let canonical = rule.canonical.opcode();
        if canonical.traits().contains(tensile_core::ir::OpTraits::VARIANT) {
            return Err(RuleError::VariantCanonical(canonical));
        }
        if self.rules.contains_key(&rule.variant) {
            return Err(RuleError::Duplicate(rule.variant));
        }
        self.rules.insert(rule.variant, rule);
        Ok(())
    }

    pub fn lookup(&self, opcode: Opcode) -> Option<&VariantRule> {
        self.rules.get(&opcode)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
