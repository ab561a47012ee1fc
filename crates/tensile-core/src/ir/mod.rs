//! The IR: operations, arenas, construction, validation, printing.

pub mod builder;
pub mod display;
pub mod dom;
pub mod op;
pub mod program;
pub mod verify;

pub use builder::{FuncBuilder, ProgramBuilder};
pub use dom::DomTree;
pub use op::{OpKind, OpTraits, Opcode};
pub use program::{
    Block, Function, GlobalSlot, Operation, Program, ValueDef, ValueInfo, Visibility,
};
pub use verify::{VerifyConfig, verify_program};
