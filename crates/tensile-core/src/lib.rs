//! Tensile core crate.
//!
//! The IR data model shared by every pipeline stage. It includes:
//! - Source locations and typed arena ids
//! - Deterministic symbol hashing for qualified names
//! - Element dtypes, shapes, tensor metadata, and the type lattice
//! - Structurally comparable constants
//! - The object hierarchy description consumed by the flattener
//! - The operation set, program/function/block arenas, and the builder
//! - The stage verifier and the textual printer
//! - Diagnostics carried by every stage result
//!
//! # Example
//!
//! ```
//! use tensile_core::ir::{FuncBuilder, OpKind, Program, VerifyConfig, Visibility, verify_program};
//! use tensile_core::{SourceLoc, Type};
//!
//! let mut fb = FuncBuilder::new("forward", Visibility::Public, SourceLoc::unknown());
//! let x = fb.param(Type::vtensor_unknown());
//! fb.results(vec![Type::vtensor_unknown()]);
//! let y = fb.op1(OpKind::Relu, vec![x], Type::vtensor_unknown(), SourceLoc::unknown());
//! fb.ret(vec![y], SourceLoc::unknown());
//!
//! let mut program = Program::new();
//! program.add_function(fb.finish());
//! assert!(verify_program(&program, &VerifyConfig::imported()).is_ok());
//! println!("{program}");
//! ```

// Source locations
pub mod loc;

// Typed arena indices
pub mod ids;

// Qualified-name hashing
pub mod symbol;

// Element types and shapes
pub mod dtype;
pub mod shape;

// Value types and the information lattice
pub mod lattice;
pub mod types;

// Structural constants
pub mod constant;

// Object hierarchy (input side of the flattener)
pub mod hierarchy;

// Diagnostics
pub mod error;

// Operations, arenas, builder, verifier, printer
pub mod ir;

// Re-export commonly used types at crate root
pub use constant::{ConstValue, TensorLit};
pub use dtype::{DType, DTypeCategory};
pub use error::{Diagnostic, DiagnosticKind, Severity};
pub use hierarchy::{ClassDecl, MethodDecl, ObjectGraph, SlotDecl};
pub use ids::{BlockId, ClassId, FuncId, OpId, SlotId, ValueId};
pub use lattice::{join, narrow};
pub use loc::SourceLoc;
pub use shape::{Dim, Shape};
pub use symbol::SymbolHash;
pub use types::{TensorMeta, Type};
