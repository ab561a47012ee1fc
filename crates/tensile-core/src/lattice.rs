//! The refinement lattice over [`Type`].
//!
//! Two directions, both used by the type refiner:
//!
//! - [`narrow`] combines compatible information and moves *down* the
//!   lattice. It fails (returns `None`) on contradictions such as a rank
//!   clash, a dtype clash, or a scalar kind mismatch, which the refiner
//!   reports as a type conflict.
//! - [`join`] computes the least-specific common ancestor and moves *up*.
//!   It never fails; at worst the result is a union of the inputs. Used at
//!   control-flow merges, multi-caller parameters, and slot write sets.
//!
//! Every stored type only ever moves down via `narrow`, and the lattice
//! has finite height (rank and union membership are bounded by the
//! program), so fixpoint iteration terminates.

use crate::types::Type;

/// Combine the information of two compatible types.
///
/// Returns `None` when the types contradict each other. The result always
/// refines both inputs. Narrowing an optional with a definitely-present
/// payload (or with `None`) resolves the optional-ness.
pub fn narrow(current: &Type, incoming: &Type) -> Option<Type> {
    if current == incoming {
        return Some(current.clone());
    }
    match (current, incoming) {
        (Type::Tensor(a), Type::Tensor(b)) => a.narrow(b).map(Type::Tensor),
        (Type::ValueTensor(a), Type::ValueTensor(b)) => {
            a.narrow(b).map(Type::ValueTensor)
        }

        // Optional-ness: `None` proves absence, any non-optional payload
        // proves presence, optional-vs-optional stays unknown.
        (Type::Optional(a), Type::Optional(b)) => {
            narrow(a, b).map(Type::optional)
        }
        (Type::Optional(_), Type::None) | (Type::None, Type::Optional(_)) => {
            Some(Type::None)
        }
        (Type::Optional(payload), present) | (present, Type::Optional(payload)) => {
            narrow(payload, present)
        }

        // Union membership only shrinks: keep the alternatives that stay
        // compatible with the incoming information.
        (Type::Union(alts), other) | (other, Type::Union(alts)) => {
            let kept: Vec<Type> =
                alts.iter().filter_map(|alt| narrow(alt, other)).collect();
            if kept.is_empty() {
                None
            } else {
                Some(Type::union_of(kept))
            }
        }

        (Type::Tuple(a), Type::Tuple(b)) => {
            if a.len() != b.len() {
                return None;
            }
            let elems = a
                .iter()
                .zip(b)
                .map(|(x, y)| narrow(x, y))
                .collect::<Option<Vec<_>>>()?;
            Some(Type::Tuple(elems))
        }

        _ => None,
    }
}

/// Least-specific common ancestor of two types.
///
/// Both inputs refine the result. Mixed optional-ness widens into an
/// optional; otherwise-unrelated types widen into a union.
pub fn join(a: &Type, b: &Type) -> Type {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (Type::Tensor(x), Type::Tensor(y)) => Type::Tensor(x.join(y)),
        (Type::ValueTensor(x), Type::ValueTensor(y)) => {
            Type::ValueTensor(x.join(y))
        }

        (Type::Optional(x), Type::Optional(y)) => Type::optional(join(x, y)),
        (Type::None, Type::Optional(y)) | (Type::Optional(y), Type::None) => {
            Type::optional((**y).clone())
        }
        (Type::None, other) | (other, Type::None) => {
            Type::optional(other.clone())
        }
        (Type::Optional(payload), present) | (present, Type::Optional(payload)) => {
            Type::optional(join(payload, present))
        }

        (Type::Tuple(x), Type::Tuple(y)) if x.len() == y.len() => {
            Type::Tuple(x.iter().zip(y).map(|(e, f)| join(e, f)).collect())
        }

        _ => Type::union_of(vec![a.clone(), b.clone()]),
    }
}
