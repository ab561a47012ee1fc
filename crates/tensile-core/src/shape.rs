//! Tensor shapes with partial knowledge.
//!
//! A shape is either unranked (nothing known) or ranked with each
//! dimension independently unknown or fixed. The refinement passes only
//! ever move shapes toward more information; the merge helpers here are
//! the primitives they use.

use std::fmt;

/// A single dimension extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dim {
    /// Extent not statically known.
    Unknown,
    /// Statically known extent.
    Fixed(i64),
}

impl Dim {
    /// Information-combining merge: fails on contradictory fixed extents.
    pub fn narrow(self, other: Dim) -> Option<Dim> {
        match (self, other) {
            (Dim::Unknown, d) | (d, Dim::Unknown) => Some(d),
            (Dim::Fixed(a), Dim::Fixed(b)) if a == b => Some(Dim::Fixed(a)),
            _ => None,
        }
    }

    /// Least-specific common extent.
    pub fn join(self, other: Dim) -> Dim {
        match (self, other) {
            (Dim::Fixed(a), Dim::Fixed(b)) if a == b => Dim::Fixed(a),
            _ => Dim::Unknown,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Unknown => write!(f, "?"),
            Dim::Fixed(n) => write!(f, "{}", n),
        }
    }
}

/// A tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Shape {
    /// Rank unknown.
    Unranked,
    /// Rank known; individual dims may still be unknown.
    Ranked(Vec<Dim>),
}

impl Shape {
    /// The 0-dimensional (scalar tensor) shape.
    pub fn scalar() -> Shape {
        Shape::Ranked(Vec::new())
    }

    /// A ranked shape with every dimension unknown.
    pub fn unknown_of_rank(rank: usize) -> Shape {
        Shape::Ranked(vec![Dim::Unknown; rank])
    }

    /// A fully concrete shape.
    pub fn concrete(dims: &[i64]) -> Shape {
        Shape::Ranked(dims.iter().map(|&d| Dim::Fixed(d)).collect())
    }

    /// Rank, when known.
    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims.len()),
        }
    }

    /// Whether rank and every dimension are statically known.
    pub fn is_concrete(&self) -> bool {
        match self {
            Shape::Unranked => false,
            Shape::Ranked(dims) => dims.iter().all(|d| matches!(d, Dim::Fixed(_))),
        }
    }

    /// Total element count, when the shape is concrete.
    pub fn num_elements(&self) -> Option<i64> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => {
                let mut n: i64 = 1;
                for d in dims {
                    match d {
                        Dim::Fixed(e) => n = n.checked_mul(*e)?,
                        Dim::Unknown => return None,
                    }
                }
                Some(n)
            }
        }
    }

    /// The statically known extent of one dimension, if any.
    pub fn dim(&self, index: usize) -> Option<Dim> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => dims.get(index).copied(),
        }
    }

    /// Information-combining merge. `None` signals a contradiction
    /// (rank clash or incompatible fixed extents).
    pub fn narrow(&self, other: &Shape) -> Option<Shape> {
        match (self, other) {
            (Shape::Unranked, s) | (s, Shape::Unranked) => Some(s.clone()),
            (Shape::Ranked(a), Shape::Ranked(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                let dims = a
                    .iter()
                    .zip(b)
                    .map(|(&x, &y)| x.narrow(y))
                    .collect::<Option<Vec<_>>>()?;
                Some(Shape::Ranked(dims))
            }
        }
    }

    /// Least-specific common shape, used at control-flow merges.
    pub fn join(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Shape::Ranked(a), Shape::Ranked(b)) if a.len() == b.len() => {
                Shape::Ranked(a.iter().zip(b).map(|(&x, &y)| x.join(y)).collect())
            }
            _ => Shape::Unranked,
        }
    }

    /// Whether `self` carries at least as much information as `other`.
    pub fn refines(&self, other: &Shape) -> bool {
        match (self, other) {
            (_, Shape::Unranked) => true,
            (Shape::Unranked, Shape::Ranked(_)) => false,
            (Shape::Ranked(a), Shape::Ranked(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| match (x, y) {
                        (_, Dim::Unknown) => true,
                        (Dim::Fixed(m), Dim::Fixed(n)) => m == n,
                        (Dim::Unknown, Dim::Fixed(_)) => false,
                    })
            }
        }
    }

    /// Elementwise-broadcast result shape, aligning trailing dimensions.
    ///
    /// `None` signals statically impossible broadcasting (two fixed,
    /// unequal, non-1 extents). An unknown extent broadcasts against a
    /// fixed one by assuming the program is valid: a fixed extent other
    /// than 1 wins; a fixed 1 leaves the result unknown.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let (a, b) = match (self, other) {
            (Shape::Ranked(a), Shape::Ranked(b)) => (a, b),
            _ => return Some(Shape::Unranked),
        };
        let rank = a.len().max(b.len());
        let mut dims = vec![Dim::Unknown; rank];
        for i in 0..rank {
            // Align from the trailing end; missing leading dims act as 1.
            let x = i
                .checked_sub(rank - a.len())
                .map(|j| a[j])
                .unwrap_or(Dim::Fixed(1));
            let y = i
                .checked_sub(rank - b.len())
                .map(|j| b[j])
                .unwrap_or(Dim::Fixed(1));
            dims[i] = match (x, y) {
                (Dim::Fixed(m), Dim::Fixed(n)) => {
                    if m == n {
                        Dim::Fixed(m)
                    } else if m == 1 {
                        Dim::Fixed(n)
                    } else if n == 1 {
                        Dim::Fixed(m)
                    } else {
                        return None;
                    }
                }
                (Dim::Unknown, Dim::Fixed(n)) | (Dim::Fixed(n), Dim::Unknown) => {
                    if n == 1 {
                        Dim::Unknown
                    } else {
                        Dim::Fixed(n)
                    }
                }
                (Dim::Unknown, Dim::Unknown) => Dim::Unknown,
            };
        }
        Some(Shape::Ranked(dims))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Unranked => write!(f, "*"),
            Shape::Ranked(dims) => {
                write!(f, "[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_gains_information() {
        let unranked = Shape::Unranked;
        let ranked = Shape::unknown_of_rank(2);
        let concrete = Shape::concrete(&[2, 3]);

        assert_eq!(unranked.narrow(&ranked), Some(ranked.clone()));
        assert_eq!(ranked.narrow(&concrete), Some(concrete.clone()));
        assert_eq!(concrete.narrow(&concrete), Some(concrete));
    }

    #[test]
    fn narrow_detects_contradictions() {
        assert_eq!(
            Shape::concrete(&[2, 3]).narrow(&Shape::concrete(&[2, 4])),
            None
        );
        assert_eq!(
            Shape::unknown_of_rank(2).narrow(&Shape::unknown_of_rank(3)),
            None
        );
    }

    #[test]
    fn join_loses_information() {
        let a = Shape::concrete(&[2, 3]);
        let b = Shape::concrete(&[2, 4]);
        assert_eq!(
            a.join(&b),
            Shape::Ranked(vec![Dim::Fixed(2), Dim::Unknown])
        );
        assert_eq!(a.join(&Shape::unknown_of_rank(3)), Shape::Unranked);
    }

    #[test]
    fn refines_is_an_order() {
        let concrete = Shape::concrete(&[4]);
        let ranked = Shape::unknown_of_rank(1);
        assert!(concrete.refines(&ranked));
        assert!(concrete.refines(&Shape::Unranked));
        assert!(!ranked.refines(&concrete));
        assert!(concrete.refines(&concrete));
    }

    #[test]
    fn broadcast_trailing_alignment() {
        let a = Shape::concrete(&[4, 1]);
        let b = Shape::concrete(&[3]);
        assert_eq!(a.broadcast(&b), Some(Shape::concrete(&[4, 3])));
    }

    #[test]
    fn broadcast_mismatch() {
        let a = Shape::concrete(&[2]);
        let b = Shape::concrete(&[3]);
        assert_eq!(a.broadcast(&b), None);
    }

    #[test]
    fn broadcast_with_unknown() {
        let a = Shape::Ranked(vec![Dim::Unknown]);
        let b = Shape::concrete(&[5]);
        assert_eq!(a.broadcast(&b), Some(Shape::concrete(&[5])));

        let one = Shape::concrete(&[1]);
        assert_eq!(a.broadcast(&one), Some(Shape::Ranked(vec![Dim::Unknown])));
    }

    #[test]
    fn element_count() {
        assert_eq!(Shape::concrete(&[2, 3]).num_elements(), Some(6));
        assert_eq!(Shape::scalar().num_elements(), Some(1));
        assert_eq!(Shape::unknown_of_rank(1).num_elements(), None);
        assert_eq!(Shape::Unranked.num_elements(), None);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Shape::Unranked), "*");
        assert_eq!(format!("{}", Shape::concrete(&[2, 3])), "[2,3]");
        assert_eq!(
            format!("{}", Shape::Ranked(vec![Dim::Fixed(2), Dim::Unknown])),
            "[2,?]"
        );
    }
}
