//! Tensile passes crate.
//!
//! The nine pipeline stages, each a self-contained rewrite that consumes a
//! `Program` and returns a new one together with stats, or the first fatal
//! [`Diagnostic`](tensile_core::Diagnostic):
//!
//! 1. [`GraphPreparer`] devirtualizes method calls and folds importer
//!    cast round-trips
//! 2. [`ObjectGraphFlattener`] lowers the object tree to global slots
//! 3. [`SlotInliner`] replaces reads of frozen slots with constants
//! 4. [`OperatorVariantReducer`] canonicalizes overlapping operator
//!    variants
//! 5. [`ValueSemanticsMaximizer`] rewrites reference tensors to value
//!    tensors
//! 6. [`CompositeDecomposer`] expands composite operators into primitive
//!    sequences
//! 7. [`TypeRefiner`] propagates shapes and dtypes to a fixpoint
//! 8. [`PublicReturnRefiner`] restores declared result types at the
//!    public boundary
//! 9. [`CallingConventionAdjuster`] flattens public signatures and their
//!    call sites
//!
//! Stage order matters: each pass assumes the invariants its predecessors
//! established, and the driver in the `tensile` crate verifies them
//! between stages.
//!
//! # Example
//!
//! ```
//! use tensile_core::ir::{FuncBuilder, OpKind, Program, Visibility};
//! use tensile_core::{SourceLoc, Type};
//! use tensile_passes::GraphPreparer;
//!
//! let mut fb = FuncBuilder::new("forward", Visibility::Public, SourceLoc::unknown());
//! let x = fb.param(Type::tensor_unknown());
//! fb.results(vec![Type::tensor_unknown()]);
//! let y = fb.op1(OpKind::Relu, vec![x], Type::tensor_unknown(), SourceLoc::unknown());
//! fb.ret(vec![y], SourceLoc::unknown());
//! let mut program = Program::new();
//! program.add_function(fb.finish());
//!
//! let out = GraphPreparer::new(program).run().unwrap();
//! assert_eq!(out.stats.calls_devirtualized, 0);
//! ```

// Shared analyses
pub mod analysis;

// The stages, in pipeline order
pub mod prepare;
pub mod globalize;
pub mod inline_slots;
pub mod reduce_variants;
pub mod value_semantics;
pub mod decompose;
pub mod refine_types;
pub mod public_return;
pub mod calling_convention;

pub use calling_convention::{
    CallingConventionAdjuster, CallingConventionOutput, CallingConventionStats,
};
pub use decompose::{
    CompositeDecomposer, DecomposeConfig, DecomposeOutput, DecomposeStats, MissPolicy,
};
pub use globalize::{GlobalizeOutput, GlobalizeStats, ObjectGraphFlattener};
pub use inline_slots::{InlineSlotsOutput, InlineSlotsStats, SlotInliner};
pub use prepare::{GraphPreparer, PrepareOutput, PrepareStats};
pub use public_return::{PublicReturnOutput, PublicReturnRefiner, PublicReturnStats};
pub use reduce_variants::{OperatorVariantReducer, ReduceVariantsOutput, ReduceVariantsStats};
pub use refine_types::{RefineTypesOutput, RefineTypesStats, TypeRefiner};
pub use value_semantics::{ValueSemanticsMaximizer, ValueSemanticsOutput, ValueSemanticsStats};
