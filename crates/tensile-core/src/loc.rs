//! Source location tracking for diagnostics.
//!
//! Provides [`SourceLoc`] to track where an imported operation, slot, or
//! class declaration originated, so every diagnostic can point back at the
//! offending entity without rerunning an analysis.

use std::fmt;

/// A position in the imported source program.
///
/// The importer records the line:column of the construct each IR entity was
/// derived from. Locations survive every rewrite: an operation produced by
/// expanding or canonicalizing another inherits its location.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceLoc {
    /// Line number (1-indexed; 0 means unknown).
    pub line: u32,
    /// Column number (1-indexed, byte-based).
    pub col: u32,
}

impl SourceLoc {
    /// Create a location from a line and column.
    #[inline]
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// A location for entities with no source counterpart (synthesized ops,
    /// builder-made test programs).
    #[inline]
    pub const fn unknown() -> Self {
        Self { line: 0, col: 0 }
    }

    /// Whether this location carries real position information.
    #[inline]
    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Debug for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}:{}", self.line, self.col)
        } else {
            write!(f, "<unknown>")
        }
    }
}
