//! Boundary and effective-Hamiltonian contractions.
//!
//! Every two-site sweep step is built from a handful of operations on site
//! tensors, MPO tensors, and [`Boundary`] environments:
//!
//! - `lbtm` ("left boundary times MPO") contracts a left boundary, one MPO
//!   column, and a ket tensor into a left-paired intermediate `X_{b'}`;
//! - `rbtm` does the mirror image for a right boundary and one MPO row,
//!   giving a right-paired intermediate `Y_b`;
//! - boundary steps finish `X`/`Y` against the bra to grow an environment by
//!   one site;
//! - `site_hamil2` applies `L ⊗ W ⊗ R` to a tensor, which is the
//!   matrix-vector product handed to an eigensolver;
//! - `predict_split_*` splits a two-site tensor through a density matrix
//!   perturbed by the `lbtm`/`rbtm` intermediates.
//!
//! These are collected in the [`ContractionEngine`] trait so that the
//! symmetry-specific strategy can be chosen at construction. The
//! [`AbelianEngine`] handles every abelian [`Symmetry`].
//!
//! Only charge sectors for which the operator's charge change matches the
//! charge difference between boundary and tensor are ever visited; missing
//! sectors are implicit zeros.

use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    Elem,
    block_matrix::{ BlockMatrix, BlockMatrixError },
    boundary::Boundary,
    index::Index,
    mpo::MPOTensor,
    mps_tensor::{ MPSTensor, MPSTensorError },
    runtime::RuntimeError,
    symmetry::Symmetry,
    truncation::TruncationParams,
    two_site::{ Split, TwoSiteTensor },
};

pub mod kernels;
pub mod abelian;

pub use abelian::AbelianEngine;

#[derive(Debug, Error)]
pub enum ContractionError {
    /// Returned when a boundary's auxiliary dimension does not match the MPO
    /// bond it is contracted with.
    #[error("error in contraction: boundary has aux dimension {found}, MPO expects {expected}")]
    AuxMismatch { expected: usize, found: usize },

    /// Returned when an MPO term refers to an operator missing from its
    /// table.
    #[error("error in contraction: missing operator for tag {0}")]
    MissingOperator(usize),

    /// Returned when a boundary's blocks disagree with a declared tensor
    /// index.
    #[error("error in contraction: {0} index does not match boundary data")]
    IndexMismatch(&'static str),

    #[error("block matrix error: {0}")]
    BlockMatrixError(#[from] BlockMatrixError),

    #[error("MPS tensor error: {0}")]
    MPSTensorError(#[from] MPSTensorError),

    #[error("runtime error: {0}")]
    RuntimeError(#[from] RuntimeError),
}
pub type ContractionResult<T> = Result<T, ContractionError>;

/// Choice between building `site_hamil2` through left (`lbtm`) or right
/// (`rbtm`) intermediates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathPolicy {
    /// Pick per MPO tensor: build from the left if the MPO has fewer
    /// nontrivial rows than nontrivial columns, where a trivial row or column
    /// holds exactly one entry.
    #[default]
    Auto,
    LeftBuild,
    RightBuild,
}

impl PathPolicy {
    /// Resolve to a concrete path for `mpo`.
    pub fn choose<S, A>(self, mpo: &MPOTensor<S, A>) -> Self
    where
        S: Symmetry,
        A: Elem,
    {
        match self {
            Self::Auto => {
                let rows = mpo.row_dim() - mpo.num_one_rows();
                let cols = mpo.col_dim() - mpo.num_one_cols();
                if rows < cols { Self::LeftBuild } else { Self::RightBuild }
            },
            other => other,
        }
    }
}

/// The three indices of a site tensor, detached from its data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteIndices<S: Symmetry> {
    pub phys: Index<S>,
    pub left: Index<S>,
    pub right: Index<S>,
}

impl<S: Symmetry> SiteIndices<S> {
    /// Copy the indices of `mps`.
    pub fn of<A: Elem>(mps: &MPSTensor<S, A>) -> Self {
        Self {
            phys: mps.phys_i().clone(),
            left: mps.left_i().clone(),
            right: mps.right_i().clone(),
        }
    }
}

/// Symmetry-specific contraction strategy.
///
/// Left boundaries have rows labeled by the bra bond and columns by the ket
/// bond; right boundaries the other way around.
pub trait ContractionEngine<S: Symmetry, A: Elem> {
    /// Return `X_{b'}` for every column `b'` of `mpo`, left-paired over
    /// `bra`'s physical and left indices with columns on `ket`'s right bond.
    fn lbtm(
        &self,
        ket: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        bra: &SiteIndices<S>,
    ) -> ContractionResult<Vec<BlockMatrix<S, A>>>;

    /// Return `Y_b` for every row `b` of `mpo`, right-paired over `bra`'s
    /// physical and right indices with rows on `ket`'s left bond.
    fn rbtm(
        &self,
        ket: &MPSTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        bra: &SiteIndices<S>,
    ) -> ContractionResult<Vec<BlockMatrix<S, A>>>;

    /// Grow an overlap environment `<bra|ket>` by one site to the right.
    fn overlap_left_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        left: &BlockMatrix<S, A>,
    ) -> ContractionResult<BlockMatrix<S, A>>;

    /// Grow an overlap environment `<bra|ket>` by one site to the left.
    fn overlap_right_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        right: &BlockMatrix<S, A>,
    ) -> ContractionResult<BlockMatrix<S, A>>;

    /// Grow a left environment `<bra|W|ket>` by one site.
    fn overlap_mpo_left_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>;

    /// Grow a right environment `<bra|W|ket>` by one site.
    fn overlap_mpo_right_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>;

    /// Like [`overlap_mpo_left_step`][Self::overlap_mpo_left_step] with
    /// `bra == ket`, which allows the Hermitian shortcut.
    fn boundary_left_step(
        &self,
        mps: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>;

    /// Like [`overlap_mpo_right_step`][Self::overlap_mpo_right_step] with
    /// `bra == ket`, which allows the Hermitian shortcut.
    fn boundary_right_step(
        &self,
        mps: &MPSTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>;

    /// Apply the effective Hamiltonian `L ⊗ W ⊗ R` to `ket`.
    ///
    /// The result is left-paired with exactly the block structure of `ket`'s
    /// left-paired data.
    fn site_hamil2(
        &self,
        ket: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<MPSTensor<S, A>>;

    /// Split a two-site tensor for a left-to-right step through its reduced
    /// density matrix, perturbed by `alpha` times the `lbtm` intermediates of
    /// the two-site operator `mpo`.
    fn predict_split_l2r(
        &self,
        tst: &TwoSiteTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        alpha: f64,
        params: TruncationParams,
    ) -> ContractionResult<Split<S, A>>;

    /// Split a two-site tensor for a right-to-left step through its reduced
    /// density matrix, perturbed by `alpha` times the `rbtm` intermediates of
    /// the two-site operator `mpo`.
    fn predict_split_r2l(
        &self,
        tst: &TwoSiteTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        alpha: f64,
        params: TruncationParams,
    ) -> ContractionResult<Split<S, A>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::{
        mpo::{ MPOTerm, OperatorTable },
        symmetry::U1,
    };

    #[test]
    fn auto_path_prefers_fewer_nontrivial_rows() {
        let phys: Index<U1> = Index::from_sectors([(-1, 1), (1, 1)]);
        let mut table = OperatorTable::new();
        let id = table.register(BlockMatrix::<U1, f64>::identity(&phys, &phys));
        let table = Arc::new(table);
        let one = MPOTerm { tag: id, scale: 1.0 };
        // no single-entry rows, two single-entry columns
        let w = MPOTensor::new(
            2, 3,
            [(0, 0, one), (0, 1, one), (1, 1, one), (1, 2, one)],
            table.clone(),
        ).unwrap();
        assert_eq!(w.num_one_rows(), 0);
        assert_eq!(w.num_one_cols(), 2);
        assert_eq!(PathPolicy::Auto.choose(&w), PathPolicy::RightBuild);
        let w = MPOTensor::new(
            3, 2,
            [(0, 0, one), (1, 0, one), (1, 1, one), (2, 1, one)],
            table,
        ).unwrap();
        assert_eq!(PathPolicy::Auto.choose(&w), PathPolicy::LeftBuild);
        assert_eq!(PathPolicy::RightBuild.choose(&w), PathPolicy::RightBuild);
    }
}
