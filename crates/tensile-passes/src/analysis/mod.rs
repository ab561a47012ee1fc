//! Analyses shared by the passes.

pub mod alias;
pub mod callgraph;
pub mod worklist;

pub use alias::{AliasClasses, StorageRoot};
pub use callgraph::CallGraph;
pub use worklist::Worklist;
