//! Merged pairs of neighboring site tensors.
//!
//! A [`TwoSiteTensor`] holds `Θ[l, s1, s2, r]` in one of three layouts:
//!
//! - [`TwoSitePairing::Both`]: rows `(s1, l)` left-paired, columns `(s2, r)`
//!   right-paired; this is the layout factorized when splitting;
//! - [`TwoSitePairing::Left`]: left-paired over the fused physical index
//!   `s1 ⊗ s2`, i.e. an ordinary [`MPSTensor`] layout; this is the layout
//!   seen by the eigensolver;
//! - [`TwoSitePairing::Right`]: right-paired over the fused physical index.

use std::borrow::Cow;
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    block_ops::{ self, BlockSvd },
    index::Index,
    mps_tensor::{
        MPSTensor,
        MPSTensorError,
        MPSTensorResult,
        Normalization,
        Pairing,
    },
    reshapes,
    symmetry::Symmetry,
    truncation::{ TruncationParams, TruncationResults },
};

/// Matrix layout of a [`TwoSiteTensor`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TwoSitePairing {
    Left,
    Right,
    Both,
}

/// Result of splitting a two-site tensor into two site tensors.
#[derive(Clone, Debug)]
pub struct Split<S: Symmetry, A: Elem> {
    pub left: MPSTensor<S, A>,
    pub right: MPSTensor<S, A>,
    pub truncation: TruncationResults,
}

/// Two neighboring site tensors contracted over their shared bond.
#[derive(Clone, PartialEq)]
pub struct TwoSiteTensor<S: Symmetry, A: Elem> {
    phys1_i: Index<S>,
    phys2_i: Index<S>,
    phys_i: Index<S>,
    left_i: Index<S>,
    right_i: Index<S>,
    data: BlockMatrix<S, A>,
    pairing: TwoSitePairing,
}

impl<S: Symmetry, A: Elem> std::fmt::Debug for TwoSiteTensor<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "TwoSiteTensor {{")?;
        writeln!(f, "    phys1_i: {:?},", self.phys1_i)?;
        writeln!(f, "    phys2_i: {:?},", self.phys2_i)?;
        writeln!(f, "    left_i: {:?},", self.left_i)?;
        writeln!(f, "    right_i: {:?},", self.right_i)?;
        writeln!(f, "    pairing: {:?},", self.pairing)?;
        writeln!(f, "    n_blocks: {},", self.data.n_blocks())?;
        write!(f, "}}")
    }
}

impl<S: Symmetry, A: Elem> TwoSiteTensor<S, A> {
    /// Merge two neighboring site tensors.
    ///
    /// Fails if the right bond of `m1` does not match the left bond of `m2`.
    pub fn from_mps_pair(m1: &MPSTensor<S, A>, m2: &MPSTensor<S, A>)
        -> MPSTensorResult<Self>
    {
        if !m1.right_i().weak_equal(m2.left_i()) {
            return Err(MPSTensorError::IndexMismatch("shared bond"));
        }
        let data = block_ops::gemm(&m1.left_paired_data(), &m2.right_paired_data())?;
        let phys_i = reshapes::fused_phys(m1.phys_i(), m2.phys_i()).fused().clone();
        Ok(Self {
            phys1_i: m1.phys_i().clone(),
            phys2_i: m2.phys_i().clone(),
            phys_i,
            left_i: m1.left_i().clone(),
            right_i: m2.right_i().clone(),
            data,
            pairing: TwoSitePairing::Both,
        })
    }

    /// Return the physical index of the first site.
    pub fn phys1_i(&self) -> &Index<S> { &self.phys1_i }

    /// Return the physical index of the second site.
    pub fn phys2_i(&self) -> &Index<S> { &self.phys2_i }

    /// Return the fused physical index `s1 ⊗ s2`.
    pub fn fused_phys_i(&self) -> &Index<S> { &self.phys_i }

    /// Return the left bond index.
    pub fn left_i(&self) -> &Index<S> { &self.left_i }

    /// Return the right bond index.
    pub fn right_i(&self) -> &Index<S> { &self.right_i }

    /// Return the current layout.
    pub fn pairing(&self) -> TwoSitePairing { self.pairing }

    /// Return the raw data in its current layout.
    pub fn data(&self) -> &BlockMatrix<S, A> { &self.data }

    fn convert(&self, target: TwoSitePairing) -> BlockMatrix<S, A> {
        use TwoSitePairing::*;
        let (p1, p2, p, l, r)
            = (&self.phys1_i, &self.phys2_i, &self.phys_i, &self.left_i, &self.right_i);
        match (self.pairing, target) {
            (Both, Left) => reshapes::two_site_to_fused(p1, p2, l, r, &self.data),
            (Left, Both) => reshapes::fused_to_two_site(p1, p2, l, r, &self.data),
            (Left, Right) => reshapes::left_to_right(p, l, r, &self.data),
            (Right, Left) => reshapes::right_to_left(p, l, r, &self.data),
            (Both, Right) => {
                let lp = reshapes::two_site_to_fused(p1, p2, l, r, &self.data);
                reshapes::left_to_right(p, l, r, &lp)
            },
            (Right, Both) => {
                let lp = reshapes::right_to_left(p, l, r, &self.data);
                reshapes::fused_to_two_site(p1, p2, l, r, &lp)
            },
            _ => self.data.clone(),
        }
    }

    fn data_as(&self, target: TwoSitePairing) -> Cow<'_, BlockMatrix<S, A>> {
        if self.pairing == target {
            Cow::Borrowed(&self.data)
        } else {
            Cow::Owned(self.convert(target))
        }
    }

    /// Return the data left-paired over the fused physical index.
    pub fn left_paired_data(&self) -> Cow<'_, BlockMatrix<S, A>> {
        self.data_as(TwoSitePairing::Left)
    }

    /// Return the data right-paired over the fused physical index.
    pub fn right_paired_data(&self) -> Cow<'_, BlockMatrix<S, A>> {
        self.data_as(TwoSitePairing::Right)
    }

    /// Return the data in the product layout.
    pub fn both_paired_data(&self) -> Cow<'_, BlockMatrix<S, A>> {
        self.data_as(TwoSitePairing::Both)
    }

    fn make_paired(&mut self, target: TwoSitePairing) {
        if self.pairing == target { return; }
        self.data = self.convert(target);
        self.pairing = target;
    }

    /// Convert to [`TwoSitePairing::Left`] in place.
    pub fn make_left_paired(&mut self) { self.make_paired(TwoSitePairing::Left); }

    /// Convert to [`TwoSitePairing::Right`] in place.
    pub fn make_right_paired(&mut self) { self.make_paired(TwoSitePairing::Right); }

    /// Convert to [`TwoSitePairing::Both`] in place.
    pub fn make_both_paired(&mut self) { self.make_paired(TwoSitePairing::Both); }

    /// View the tensor as a single site tensor over the fused physical index.
    pub fn as_mps(&self) -> MPSTensorResult<MPSTensor<S, A>> {
        MPSTensor::new(
            self.phys_i.clone(),
            self.left_i.clone(),
            self.right_i.clone(),
            self.left_paired_data().into_owned(),
            Pairing::Left,
        )
    }

    /// Overwrite the data with that of a fused-index site tensor, as returned
    /// by an eigensolver working on [`Self::as_mps`].
    pub fn update_from_mps(&mut self, mps: &MPSTensor<S, A>) -> MPSTensorResult<()> {
        if !mps.phys_i().weak_equal(&self.phys_i) {
            return Err(MPSTensorError::IndexMismatch("physical"));
        }
        if !mps.left_i().weak_equal(&self.left_i) {
            return Err(MPSTensorError::IndexMismatch("left"));
        }
        if !mps.right_i().weak_equal(&self.right_i) {
            return Err(MPSTensorError::IndexMismatch("right"));
        }
        self.data = mps.left_paired_data().into_owned();
        self.pairing = TwoSitePairing::Left;
        Ok(())
    }

    /// Split by truncated SVD for a left-to-right step. The left tensor is
    /// left-normalized and the singular values go to the right tensor.
    pub fn split_mps_l2r(&self, params: TruncationParams)
        -> MPSTensorResult<Split<S, A>>
    {
        let (BlockSvd { u, s, vt }, truncation)
            = block_ops::svd_truncate(&self.both_paired_data(), params)?;
        let bond = u.right_basis();
        let mut left = MPSTensor::new(
            self.phys1_i.clone(), self.left_i.clone(), bond.clone(), u, Pairing::Left)?;
        left.set_normalization(Normalization::Left);
        let right = MPSTensor::new(
            self.phys2_i.clone(), bond, self.right_i.clone(),
            block_ops::scale_rows(&s, &vt), Pairing::Right)?;
        Ok(Split { left, right, truncation })
    }

    /// Split by truncated SVD for a right-to-left step. The right tensor is
    /// right-normalized and the singular values go to the left tensor.
    pub fn split_mps_r2l(&self, params: TruncationParams)
        -> MPSTensorResult<Split<S, A>>
    {
        let (BlockSvd { u, s, vt }, truncation)
            = block_ops::svd_truncate(&self.both_paired_data(), params)?;
        let bond = vt.left_basis();
        let left = MPSTensor::new(
            self.phys1_i.clone(), self.left_i.clone(), bond.clone(),
            block_ops::scale_columns(&u, &s), Pairing::Left)?;
        let mut right = MPSTensor::new(
            self.phys2_i.clone(), bond, self.right_i.clone(), vt, Pairing::Right)?;
        right.set_normalization(Normalization::Right);
        Ok(Split { left, right, truncation })
    }
}
