//! Tensile: a whole-program lowering pipeline for tensor object programs.
//!
//! The input is a nested, stateful program: a tree of singly-instantiated
//! objects holding mutable tensor slots and methods, with reference
//! semantics, in-place operator variants, composite operators, and mostly
//! unknown shapes. The output is the same program as a flat, purely
//! functional, alias-free IR: global slots instead of objects, value
//! tensors instead of references, a canonical primitive operator set, and
//! maximally refined static types behind unchanged public signatures.
//!
//! Nine passes run in a fixed order, each verified before it is committed:
//!
//! | stage | pass | effect |
//! |---|---|---|
//! | 1 | prepare | devirtualize method calls, fold importer casts |
//! | 2 | globalize | object tree becomes global slots + free functions |
//! | 3 | inline_slots | provably constant slots become constants |
//! | 4 | reduce_variants | operator families collapse to canonical forms |
//! | 5 | value_semantics | aliasing and mutation compile away |
//! | 6 | decompose | composites expand into primitives |
//! | 7 | refine_types | shapes and dtypes propagate to a fixpoint |
//! | 8 | public_return | declared public result types are restored |
//! | 9 | calling_convention | public signatures flatten to the external contract |
//!
//! The IR model lives in [`tensile_core`], the rewrite rule registries in
//! [`tensile_rules`], and the passes themselves in [`tensile_passes`]; this
//! crate adds the driver, its configuration, and aggregated statistics.
//!
//! # Example
//!
//! ```
//! use tensile::prelude::*;
//!
//! // Net { weight } with one exported method: forward(x) = relu(x * weight).
//! let loc = SourceLoc::unknown();
//! let mut pb = ProgramBuilder::new();
//!
//! let mut fb = FuncBuilder::new("Net::forward", Visibility::Private, loc);
//! let this = fb.param(Type::Class("Net".into()));
//! let x = fb.param(Type::vtensor(&[4], DType::F32));
//! fb.results(vec![Type::vtensor_unknown()]);
//! let w = fb.op1(
//!     OpKind::GetSlot("weight".into()),
//!     vec![this],
//!     Type::vtensor(&[4], DType::F32),
//!     loc,
//! );
//! let p = fb.op1(OpKind::Mul, vec![x, w], Type::vtensor_unknown(), loc);
//! let y = fb.op1(OpKind::Relu, vec![p], Type::vtensor_unknown(), loc);
//! fb.ret(vec![y], loc);
//! let forward = pb.add_function(fb.finish());
//!
//! let net = pb.declare_class("Net", loc);
//! pb.add_data_slot(
//!     net,
//!     "weight",
//!     Type::vtensor(&[4], DType::F32),
//!     ConstValue::Tensor(TensorLit::splat(&[4], DType::F32, 0.5)),
//!     false,
//!     loc,
//! );
//! pb.add_method(net, "forward", forward, true, vec![], loc);
//! pb.set_root(net);
//!
//! let out = Pipeline::new().run(pb.finish()).unwrap();
//! assert!(out.program.hierarchy.is_none());
//! // The frozen weight was inlined; no global state remains.
//! assert!(out.program.globals.is_empty());
//! let f = out.program.find_function("forward").unwrap();
//! assert!(out.program.function(f).is_public());
//! ```

pub mod options;
pub mod pipeline;

pub use options::PipelineOptions;
pub use pipeline::{Pipeline, PipelineError, PipelineOutput, PipelineStats};
pub use tensile_passes::MissPolicy;

pub mod prelude {
    pub use crate::options::PipelineOptions;
    pub use crate::pipeline::{Pipeline, PipelineError, PipelineOutput, PipelineStats};
    pub use tensile_core::ir::{
        FuncBuilder, OpKind, Opcode, Program, ProgramBuilder, VerifyConfig, Visibility,
        verify_program,
    };
    pub use tensile_core::{
        ConstValue, DType, Diagnostic, DiagnosticKind, Severity, SourceLoc, TensorLit, Type,
    };
    pub use tensile_passes::MissPolicy;
    pub use tensile_rules::{DecompositionRegistry, VariantTable};
}
