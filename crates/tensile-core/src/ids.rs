//! Identifier types for IR arenas.
//!
//! The IR never links entities with pointers; everything lives in flat
//! arenas owned by [`Program`](crate::ir::Program) or
//! [`Function`](crate::ir::Function) and is referenced by one of these
//! typed indices. Indices are only meaningful relative to the arena they
//! were allocated from.

use std::fmt;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Create an ID with the given arena index.
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Get the underlying arena index.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                Self::new(index)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

arena_id! {
    /// Identifies a function in a program's function arena.
    FuncId, "fn"
}

arena_id! {
    /// Identifies a basic block within a function. Block 0 is the entry.
    BlockId, "bb"
}

arena_id! {
    /// Identifies an operation within a function's op arena.
    OpId, "op"
}

arena_id! {
    /// Identifies an SSA value within a function. Every value has exactly
    /// one definition: a block parameter or an operation result.
    ValueId, "%"
}

arena_id! {
    /// Identifies a global storage slot in a program.
    SlotId, "slot"
}

arena_id! {
    /// Identifies a class declaration in the object hierarchy.
    ClassId, "class"
}

impl BlockId {
    /// The entry block of any function.
    pub const ENTRY: BlockId = BlockId::new(0);
}
