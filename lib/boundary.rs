//! Environment tensors of a sweep.
//!
//! A [`Boundary`] is an array of block matrices indexed by an MPO bond index
//! `b`, holding the contraction of bra, operator, and ket to one side of a
//! bond. Left boundaries have rows labeled by the bra bond and columns by the
//! ket bond; right boundaries the other way around, so that
//! `Σ_b trace(L_b · R_b)` is the full expectation value across a bond.

use num_traits::Zero;
use serde::{ Deserialize, Serialize };
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    block_ops,
    index::Index,
    symmetry::Symmetry,
};

/// Partial contraction of a network to one side of a bond.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
pub struct Boundary<S: Symmetry, A: Elem> {
    data: Vec<BlockMatrix<S, A>>,
}

impl<S: Symmetry, A: Elem> Default for Boundary<S, A> {
    fn default() -> Self { Self { data: Vec::new() } }
}

impl<S: Symmetry, A: Elem> Boundary<S, A> {
    /// Create a boundary of `aux_dim` empty (zero) block matrices.
    pub fn new(aux_dim: usize) -> Self {
        Self { data: vec![BlockMatrix::new(); aux_dim] }
    }

    /// Create from a list of block matrices.
    pub fn from_vec(data: Vec<BlockMatrix<S, A>>) -> Self { Self { data } }

    /// Create the trivial left edge over `left_i`, which for an open chain
    /// is the one-dimensional identity sector.
    pub fn left_edge(left_i: &Index<S>) -> Self {
        Self::from_vec(vec![BlockMatrix::identity(left_i, left_i)])
    }

    /// Create the trivial right edge over `right_i`, whose charge is the
    /// target charge of the state.
    pub fn right_edge(right_i: &Index<S>) -> Self {
        Self::from_vec(vec![BlockMatrix::identity(right_i, right_i)])
    }

    /// Return the auxiliary (MPO bond) dimension.
    pub fn aux_dim(&self) -> usize { self.data.len() }

    /// Return the block matrix for `b`.
    pub fn get(&self, b: usize) -> Option<&BlockMatrix<S, A>> { self.data.get(b) }

    /// Return the block matrix for `b` mutably.
    pub fn get_mut(&mut self, b: usize) -> Option<&mut BlockMatrix<S, A>> {
        self.data.get_mut(b)
    }

    /// Iterate over all block matrices in bond order.
    pub fn iter(&self) -> std::slice::Iter<'_, BlockMatrix<S, A>> {
        self.data.iter()
    }

    /// Consume `self`, returning the block matrices.
    pub fn into_vec(self) -> Vec<BlockMatrix<S, A>> { self.data }

    /// Return the sum of the traces of all entries.
    pub fn trace(&self) -> A {
        self.data.iter().fold(A::zero(), |acc, m| acc + m.trace())
    }

    /// Return the approximate size of the stored data in bytes.
    pub fn footprint(&self) -> usize {
        self.data.iter().map(|m| m.footprint()).sum()
    }
}

impl<S: Symmetry, A: Elem> std::ops::Index<usize> for Boundary<S, A> {
    type Output = BlockMatrix<S, A>;

    fn index(&self, b: usize) -> &Self::Output { &self.data[b] }
}

impl<S: Symmetry, A: Elem> std::ops::IndexMut<usize> for Boundary<S, A> {
    fn index_mut(&mut self, b: usize) -> &mut Self::Output { &mut self.data[b] }
}

impl<S: Symmetry, A: Elem> FromIterator<BlockMatrix<S, A>> for Boundary<S, A> {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = BlockMatrix<S, A>>
    {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// Return `Σ_b trace(L_b · R_b)` for a left and a right boundary meeting at
/// the same bond.
///
/// Entries whose product is undefined (mismatched inner dimensions) do not
/// contribute.
pub fn expval<S, A>(left: &Boundary<S, A>, right: &Boundary<S, A>) -> A
where
    S: Symmetry,
    A: Elem,
{
    left.iter().zip(right.iter())
        .filter_map(|(l, r)| block_ops::gemm(l, r).ok())
        .fold(A::zero(), |acc, m| acc + m.trace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;
    use crate::symmetry::U1;

    #[test]
    fn edges_are_identities() {
        let triv: Index<U1> = Index::trivial();
        let l: Boundary<U1, f64> = Boundary::left_edge(&triv);
        let r: Boundary<U1, f64> = Boundary::right_edge(&triv);
        assert_eq!(l.aux_dim(), 1);
        assert_eq!(expval(&l, &r), 1.0);
    }

    #[test]
    fn expval_sums_over_bond() {
        let mut l: Boundary<U1, f64> = Boundary::new(2);
        let mut r: Boundary<U1, f64> = Boundary::new(2);
        l[0].insert_block(nd::array![[1.0, 2.0]], 0, 0).unwrap();
        r[0].insert_block(nd::array![[3.0], [4.0]], 0, 0).unwrap();
        l[1].insert_block(nd::array![[2.0]], 1, 1).unwrap();
        r[1].insert_block(nd::array![[5.0]], 1, 1).unwrap();
        assert_eq!(expval(&l, &r), 11.0 + 10.0);
        assert_eq!(l.trace(), 3.0);
    }
}
