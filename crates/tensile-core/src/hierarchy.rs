//! The object hierarchy attached to an imported program.
//!
//! Programs arrive as a tree of class instances: a root object whose slots
//! hold tensors, scalars, or child objects, and whose methods are the
//! functions of the program. The flattener consumes this description and
//! replaces it with global slots; afterwards `Program::hierarchy` is
//! `None` and nothing here is referenced again.
//!
//! Export flags and per-argument refinements mirror the annotation layer
//! of the source framework: methods are private unless exported, and an
//! exported method may guarantee shapes/dtypes for its tensor arguments,
//! which seed type refinement once the method becomes a public function.

use crate::constant::ConstValue;
use crate::ids::{ClassId, FuncId};
use crate::loc::SourceLoc;
use crate::symbol::SymbolHash;
use crate::types::{TensorMeta, Type};

/// One slot of a class: a data field or a child object.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotDecl {
    pub name: String,
    /// `Type::Class(..)` marks a submodule edge; anything else is data.
    pub ty: Type,
    /// Required for data slots; submodule slots carry none.
    pub initializer: Option<ConstValue>,
    /// Whether the program may overwrite the slot after initialization.
    pub mutable: bool,
    pub loc: SourceLoc,
}

impl SlotDecl {
    /// Whether this slot holds a child object rather than data.
    pub fn is_submodule(&self) -> bool {
        matches!(self.ty, Type::Class(_))
    }

    /// The class name of a submodule slot.
    pub fn submodule_class(&self) -> Option<&str> {
        match &self.ty {
            Type::Class(name) => Some(name),
            _ => None,
        }
    }
}

/// A method bound to a class. The function takes `self` as operand 0.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub func: FuncId,
    /// Externally callable after flattening. Off by default.
    pub exported: bool,
    /// Per-argument guarantees for the non-self parameters, in order.
    /// Empty means unannotated; otherwise one entry per non-self
    /// parameter, `Some` carrying the promised tensor meta.
    pub arg_refinements: Vec<Option<TensorMeta>>,
    pub loc: SourceLoc,
}

/// A class declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub symbol: SymbolHash,
    pub slots: Vec<SlotDecl>,
    pub methods: Vec<MethodDecl>,
    pub loc: SourceLoc,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>, loc: SourceLoc) -> ClassDecl {
        let name = name.into();
        ClassDecl {
            symbol: SymbolHash::class(&name),
            name,
            slots: Vec::new(),
            methods: Vec::new(),
            loc,
        }
    }

    pub fn slot(&self, name: &str) -> Option<&SlotDecl> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Slots holding data (everything that becomes a global).
    pub fn data_slots(&self) -> impl Iterator<Item = &SlotDecl> {
        self.slots.iter().filter(|s| !s.is_submodule())
    }

    /// Slots holding child objects.
    pub fn submodule_slots(&self) -> impl Iterator<Item = &SlotDecl> {
        self.slots.iter().filter(|s| s.is_submodule())
    }
}

/// The class table plus the root of the single instantiation tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectGraph {
    pub classes: Vec<ClassDecl>,
    pub root: ClassId,
}

impl ObjectGraph {
    #[inline]
    pub fn class(&self, id: ClassId) -> &ClassDecl {
        &self.classes[id.index()]
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(|i| ClassId::new(i as u32))
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + use<> {
        (0..self.classes.len() as u32).map(ClassId::new)
    }

    /// The class owning a given method function, if any.
    pub fn owner_of(&self, func: FuncId) -> Option<(ClassId, &MethodDecl)> {
        for id in self.class_ids() {
            if let Some(m) = self.class(id).methods.iter().find(|m| m.func == func) {
                return Some((id, m));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    fn sample_graph() -> ObjectGraph {
        let mut child = ClassDecl::new("Child", SourceLoc::unknown());
        child.slots.push(SlotDecl {
            name: "weight".into(),
            ty: Type::vtensor(&[4], DType::F32),
            initializer: Some(ConstValue::float(0.0)),
            mutable: true,
            loc: SourceLoc::unknown(),
        });
        let mut root = ClassDecl::new("Root", SourceLoc::unknown());
        root.slots.push(SlotDecl {
            name: "sub".into(),
            ty: Type::Class("Child".into()),
            initializer: None,
            mutable: false,
            loc: SourceLoc::unknown(),
        });
        ObjectGraph { classes: vec![root, child], root: ClassId::new(0) }
    }

    #[test]
    fn class_lookup() {
        let graph = sample_graph();
        let child = graph.find_class("Child").unwrap();
        assert_eq!(graph.class(child).name, "Child");
        assert!(graph.find_class("Missing").is_none());
    }

    #[test]
    fn slot_classification() {
        let graph = sample_graph();
        let root = graph.class(graph.root);
        let sub = root.slot("sub").unwrap();
        assert!(sub.is_submodule());
        assert_eq!(sub.submodule_class(), Some("Child"));
        assert_eq!(root.data_slots().count(), 0);
        assert_eq!(root.submodule_slots().count(), 1);

        let child = graph.class(graph.find_class("Child").unwrap());
        assert_eq!(child.data_slots().count(), 1);
    }
}
