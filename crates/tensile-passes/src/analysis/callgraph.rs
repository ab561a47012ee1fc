//! Call graph over a program's functions.
//!
//! Edges follow `call` operations by callee name. Calls whose name resolves
//! to no function in the program are recorded as unresolved; passes that
//! reason about whole-program effects (the slot inliner in particular) must
//! degrade conservatively when any exist.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::FxHashMap;
use tensile_core::ids::{FuncId, OpId};
use tensile_core::ir::{OpKind, Program};

#[derive(Debug)]
pub struct CallGraph {
    graph: DiGraph<FuncId, ()>,
    nodes: FxHashMap<FuncId, NodeIndex>,
    /// Callee -> (caller, call op) for every resolved call site.
    call_sites: FxHashMap<FuncId, Vec<(FuncId, OpId)>>,
    /// Callee names that resolve to no function in the program.
    unresolved: Vec<String>,
}

impl CallGraph {
    pub fn build(program: &Program) -> CallGraph {
        let mut graph = DiGraph::new();
        let mut nodes = FxHashMap::default();
        for func_id in program.func_ids() {
            nodes.insert(func_id, graph.add_node(func_id));
        }

        let mut call_sites: FxHashMap<FuncId, Vec<(FuncId, OpId)>> = FxHashMap::default();
        let mut unresolved = Vec::new();
        for caller in program.func_ids() {
            let func = program.function(caller);
            for block in &func.blocks {
                for &op_id in &block.ops {
                    let OpKind::Call(name) = &func.op(op_id).kind else {
                        continue;
                    };
                    match program.find_function(name) {
                        Some(callee) => {
                            graph.update_edge(nodes[&caller], nodes[&callee], ());
                            call_sites.entry(callee).or_default().push((caller, op_id));
                        }
                        None => unresolved.push(name.clone()),
                    }
                }
            }
        }

        CallGraph { graph, nodes, call_sites, unresolved }
    }

    pub fn callees_of(&self, func: FuncId) -> impl Iterator<Item = FuncId> + use<'_> {
        self.graph
            .neighbors_directed(self.nodes[&func], Direction::Outgoing)
            .map(|n| self.graph[n])
    }

    pub fn callers_of(&self, func: FuncId) -> impl Iterator<Item = FuncId> + use<'_> {
        self.graph
            .neighbors_directed(self.nodes[&func], Direction::Incoming)
            .map(|n| self.graph[n])
    }

    /// Every resolved call site targeting `func`, as (caller, call op) pairs.
    pub fn call_sites_of(&self, func: FuncId) -> &[(FuncId, OpId)] {
        self.call_sites.get(&func).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_unresolved_callees(&self) -> bool {
        !self.unresolved.is_empty()
    }

    pub fn unresolved_callees(&self) -> &[String] {
        &self.unresolved
    }

    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }
}
