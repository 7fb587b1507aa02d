//! Abelian symmetry groups used to grade block-sparse tensors.
//!
//! A [`Symmetry`] is a marker type naming a group; its [`Charge`][Symmetry::Charge]
//! values label quantum-number sectors. Charges combine under
//! [`fuse`][Symmetry::fuse], which for all groups here is commutative and
//! associative, with [`identity`][Symmetry::identity] as the neutral element and
//! [`inverse`][Symmetry::inverse] giving the dual sector.
//!
//! ```
//! use dmrg_core::symmetry::{ Symmetry, U1 };
//!
//! let up: i32 = 1;
//! let down: i32 = -1;
//! assert_eq!(U1::fuse(up, down), U1::identity());
//! assert_eq!(U1::inverse(up), down);
//! ```

use std::{ fmt::Debug, hash::Hash };
use serde::{ Serialize, de::DeserializeOwned };

/// Describes an abelian symmetry group.
pub trait Symmetry:
    Copy + Clone + Debug + Default + PartialEq + Eq + Send + Sync + 'static
{
    /// Symmetry label of a sector.
    ///
    /// Charges are totally ordered so that indices can be kept sorted and
    /// searched in *O*(log *n*).
    type Charge:
        Copy + Debug + Ord + Hash + Send + Sync + Serialize + DeserializeOwned
        + 'static;

    /// Return the neutral charge.
    fn identity() -> Self::Charge;

    /// Combine two charges.
    fn fuse(a: Self::Charge, b: Self::Charge) -> Self::Charge;

    /// Return the charge that fuses with `a` to the identity.
    fn inverse(a: Self::Charge) -> Self::Charge;

    /// Return `a` fused with the inverse of `b`.
    fn difference(a: Self::Charge, b: Self::Charge) -> Self::Charge {
        Self::fuse(a, Self::inverse(b))
    }

    /// Fuse an arbitrary number of charges, returning the identity for an
    /// empty sequence.
    fn fuse_all<I>(charges: I) -> Self::Charge
    where I: IntoIterator<Item = Self::Charge>
    {
        charges.into_iter().fold(Self::identity(), Self::fuse)
    }
}

/// The trivial group: a single sector, i.e. no symmetry at all.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrivialGroup;

impl Symmetry for TrivialGroup {
    type Charge = ();

    fn identity() -> Self::Charge { }

    fn fuse(_a: Self::Charge, _b: Self::Charge) -> Self::Charge { }

    fn inverse(_a: Self::Charge) -> Self::Charge { }
}

/// U(1): a single conserved integer quantity, e.g. particle number or twice
/// the total spin projection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct U1;

impl Symmetry for U1 {
    type Charge = i32;

    fn identity() -> Self::Charge { 0 }

    fn fuse(a: Self::Charge, b: Self::Charge) -> Self::Charge { a + b }

    fn inverse(a: Self::Charge) -> Self::Charge { -a }
}

/// U(1) × U(1): two independently conserved integer quantities, e.g. the
/// numbers of spin-up and spin-down electrons.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TwoU1;

impl Symmetry for TwoU1 {
    type Charge = [i32; 2];

    fn identity() -> Self::Charge { [0, 0] }

    fn fuse(a: Self::Charge, b: Self::Charge) -> Self::Charge {
        [a[0] + b[0], a[1] + b[1]]
    }

    fn inverse(a: Self::Charge) -> Self::Charge { [-a[0], -a[1]] }
}

/// Z<sub>2</sub>: conserved parity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Z2;

impl Symmetry for Z2 {
    type Charge = u8;

    fn identity() -> Self::Charge { 0 }

    fn fuse(a: Self::Charge, b: Self::Charge) -> Self::Charge { (a + b) % 2 }

    fn inverse(a: Self::Charge) -> Self::Charge { a % 2 }
}
