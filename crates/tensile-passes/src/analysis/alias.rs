//! Alias classes over reference-tensor values.
//!
//! A class is the set of values that may name the same storage, built by
//! union-find over reference-semantics edges (`ref_cast` results, in-place
//! variant results, repeated `global.get`s of one slot). The result
//! over-approximates: merging two classes is always sound, splitting never
//! happens.

use rustc_hash::FxHashMap;
use tensile_core::ids::{OpId, ValueId};
use tensile_core::symbol::SymbolHash;

/// Where a class's storage comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageRoot {
    /// Storage created inside the block, by `from_value` or `clone`.
    Fresh(OpId),
    /// Storage named by a global slot.
    Global(SymbolHash),
}

/// Union-find over the value arena of one function.
#[derive(Debug)]
pub struct AliasClasses {
    parent: Vec<u32>,
    roots: FxHashMap<u32, StorageRoot>,
}

impl AliasClasses {
    pub fn new(num_values: usize) -> AliasClasses {
        AliasClasses {
            parent: (0..num_values as u32).collect(),
            roots: FxHashMap::default(),
        }
    }

    /// Representative of `value`'s class, with path halving.
    pub fn find(&mut self, value: ValueId) -> u32 {
        let mut v = value.index() as u32;
        while self.parent[v as usize] != v {
            let grandparent = self.parent[self.parent[v as usize] as usize];
            self.parent[v as usize] = grandparent;
            v = grandparent;
        }
        v
    }

    /// Merge the classes of `a` and `b`. A storage root attached to either
    /// side survives the merge.
    pub fn union(&mut self, a: ValueId, b: ValueId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let root = self.roots.remove(&ra).or_else(|| self.roots.remove(&rb));
        self.parent[ra as usize] = rb;
        if let Some(root) = root {
            self.roots.insert(rb, root);
        }
    }

    /// Attach the storage origin of `value`'s class. Callers establish at
    /// most one origin per class; a second attach overwrites.
    pub fn set_root(&mut self, value: ValueId, root: StorageRoot) {
        let rep = self.find(value);
        self.roots.insert(rep, root);
    }

    pub fn storage_root(&mut self, value: ValueId) -> Option<StorageRoot> {
        let rep = self.find(value);
        self.roots.get(&rep).copied()
    }

    pub fn same_class(&mut self, a: ValueId, b: ValueId) -> bool {
        self.find(a) == self.find(b)
    }
}
