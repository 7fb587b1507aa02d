//! Site tensors of a matrix product state.
//!
//! An [`MPSTensor`] is a rank-3 tensor `T[l, s, r]` with a physical index
//! `s` and left/right auxiliary (bond) indices, stored as a [`BlockMatrix`]
//! in one of two [pairings][Pairing]. Each tensor also carries a
//! [`Normalization`] tag recording whether it is currently a left or right
//! isometry.
//!
//! Charges flow from left to right: every nonzero element satisfies
//! `fuse(l, s) == r`, which in either pairing means that every block sits on
//! the charge diagonal.

use std::{ borrow::Cow, fmt, ops::AddAssign };
use ndarray as nd;
use rand::Rng;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    Elem,
    block_matrix::{ BlockMatrix, BlockMatrixError },
    block_ops,
    dense,
    index::{ Index, ProductBasis },
    reshapes,
    symmetry::Symmetry,
};

#[derive(Debug, Error)]
pub enum MPSTensorError {
    /// Returned when a block violates charge conservation.
    #[error("error in MPSTensor: particle number is wrong in block {0}")]
    ChargeViolation(String),

    /// Returned when the declared auxiliary indices disagree with the data.
    #[error("error in MPSTensor: declared {0} index does not match data")]
    IndexMismatch(&'static str),

    /// Returned when a flat vector has the wrong length for the tensor's
    /// block structure.
    #[error("error in MPSTensor::with_vector: expected length {expected}, got {found}")]
    VectorLength { expected: usize, found: usize },

    #[error("block matrix error: {0}")]
    BlockMatrixError(#[from] BlockMatrixError),
}
use MPSTensorError::*;
pub type MPSTensorResult<T> = Result<T, MPSTensorError>;

/// Matrix layout of a site tensor's data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pairing {
    /// Rows `(s, l)`, columns `r`.
    Left,
    /// Rows `l`, columns `(s, r)`.
    Right,
}

/// Isometry status of a site tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Normalization {
    Unnormalized,
    /// `Σ_{s,l} conj(T[l, s, r]) T[l, s, r'] = δ(r, r')`.
    Left,
    /// `Σ_{s,r} conj(T[l, s, r]) T[l', s, r] = δ(l, l')`.
    Right,
}

/// Factorization used to normalize a site tensor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecompMethod {
    #[default]
    QR,
    SVD,
}

/// A single site tensor.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
pub struct MPSTensor<S: Symmetry, A: Elem> {
    phys_i: Index<S>,
    left_i: Index<S>,
    right_i: Index<S>,
    data: BlockMatrix<S, A>,
    pairing: Pairing,
    normalization: Normalization,
}

impl<S: Symmetry, A: Elem> MPSTensor<S, A> {
    /// Create a new tensor from data in a given pairing.
    ///
    /// Fails if the data does not match the declared indices or violates
    /// charge conservation.
    pub fn new(
        phys_i: Index<S>,
        left_i: Index<S>,
        right_i: Index<S>,
        data: BlockMatrix<S, A>,
        pairing: Pairing,
    ) -> MPSTensorResult<Self>
    {
        let out = Self {
            phys_i, left_i, right_i, data, pairing,
            normalization: Normalization::Unnormalized,
        };
        out.check_indices()?;
        out.check_charge_conservation()?;
        Ok(out)
    }

    /// Create a left-paired tensor with every allowed block zero.
    pub fn zeros(phys_i: Index<S>, left_i: Index<S>, right_i: Index<S>) -> Self {
        let pb = ProductBasis::left_paired(&phys_i, &left_i);
        let mut data = BlockMatrix::new();
        for (c, n) in pb.fused().iter() {
            let rsz = right_i.size_of_block(c);
            if rsz > 0 {
                data.block_or_zeros(c, c, n, rsz);
            }
        }
        Self {
            phys_i, left_i, right_i, data,
            pairing: Pairing::Left,
            normalization: Normalization::Unnormalized,
        }
    }

    /// Create a left-paired tensor with every allowed block filled with
    /// uniform random numbers in `[-1, 1)`.
    pub fn random<R>(
        phys_i: Index<S>,
        left_i: Index<S>,
        right_i: Index<S>,
        rng: &mut R,
    ) -> Self
    where R: Rng + ?Sized
    {
        let mut out = Self::zeros(phys_i, left_i, right_i);
        for (_, b) in out.data.iter_mut() {
            let (nr, nc) = b.dim();
            *b = dense::random(nr, nc, rng);
        }
        out
    }

    /// Return the physical index.
    pub fn phys_i(&self) -> &Index<S> { &self.phys_i }

    /// Return the left bond index.
    pub fn left_i(&self) -> &Index<S> { &self.left_i }

    /// Return the right bond index.
    pub fn right_i(&self) -> &Index<S> { &self.right_i }

    /// Return the current pairing.
    pub fn pairing(&self) -> Pairing { self.pairing }

    /// Return the current normalization tag.
    pub fn normalization(&self) -> Normalization { self.normalization }

    /// Tag the tensor with a normalization established by its producer.
    pub(crate) fn set_normalization(&mut self, normalization: Normalization) {
        self.normalization = normalization;
    }

    /// Return the raw data in its current pairing.
    pub fn data(&self) -> &BlockMatrix<S, A> { &self.data }

    /// Return the data in left-paired form, converting if necessary.
    pub fn left_paired_data(&self) -> Cow<'_, BlockMatrix<S, A>> {
        match self.pairing {
            Pairing::Left => Cow::Borrowed(&self.data),
            Pairing::Right => Cow::Owned(
                reshapes::right_to_left(
                    &self.phys_i, &self.left_i, &self.right_i, &self.data)
            ),
        }
    }

    /// Return the data in right-paired form, converting if necessary.
    pub fn right_paired_data(&self) -> Cow<'_, BlockMatrix<S, A>> {
        match self.pairing {
            Pairing::Right => Cow::Borrowed(&self.data),
            Pairing::Left => Cow::Owned(
                reshapes::left_to_right(
                    &self.phys_i, &self.left_i, &self.right_i, &self.data)
            ),
        }
    }

    /// Replace the data with new left-paired data, taking the right bond from
    /// its columns. The normalization tag is reset.
    pub fn replace_left_paired(&mut self, data: BlockMatrix<S, A>) {
        self.right_i = data.right_basis();
        self.data = data;
        self.pairing = Pairing::Left;
        self.normalization = Normalization::Unnormalized;
    }

    /// Replace the data with new right-paired data, taking the left bond from
    /// its rows. The normalization tag is reset.
    pub fn replace_right_paired(&mut self, data: BlockMatrix<S, A>) {
        self.left_i = data.left_basis();
        self.data = data;
        self.pairing = Pairing::Right;
        self.normalization = Normalization::Unnormalized;
    }

    /// Convert the data to left-paired form. No-op if already left-paired.
    pub fn make_left_paired(&mut self) {
        if self.pairing == Pairing::Left { return; }
        self.data = reshapes::right_to_left(
            &self.phys_i, &self.left_i, &self.right_i, &self.data);
        self.pairing = Pairing::Left;
        debug_assert!(self.check_indices().is_ok());
    }

    /// Convert the data to right-paired form. No-op if already right-paired.
    pub fn make_right_paired(&mut self) {
        if self.pairing == Pairing::Right { return; }
        self.data = reshapes::left_to_right(
            &self.phys_i, &self.left_i, &self.right_i, &self.data);
        self.pairing = Pairing::Right;
        debug_assert!(self.check_indices().is_ok());
    }

    /// Check that the data's bond sizes agree with the declared index that is
    /// not fused into the current pairing.
    pub fn check_indices(&self) -> MPSTensorResult<()> {
        self.data.check_shapes()?;
        match self.pairing {
            Pairing::Left => {
                let ok = self.data.iter()
                    .all(|(e, _)| self.right_i.size_of_block(e.rc) == e.rs);
                if ok { Ok(()) } else { Err(IndexMismatch("right")) }
            },
            Pairing::Right => {
                let ok = self.data.iter()
                    .all(|(e, _)| self.left_i.size_of_block(e.lc) == e.ls);
                if ok { Ok(()) } else { Err(IndexMismatch("left")) }
            },
        }
    }

    /// Check that every block satisfies `fuse(l, s) == r`.
    pub fn check_charge_conservation(&self) -> MPSTensorResult<()> {
        self.data.iter()
            .find(|(e, _)| e.lc != e.rc)
            .map_or(Ok(()), |(e, _)| {
                Err(ChargeViolation(format!("({:?}, {:?})", e.lc, e.rc)))
            })
    }

    /// Left-normalize the tensor in place, returning the remainder factor
    /// `R` such that the original tensor equals `self · R`.
    ///
    /// If the tensor is already left-normalized, `R` is the identity.
    pub fn normalize_left(&mut self, method: DecompMethod)
        -> MPSTensorResult<BlockMatrix<S, A>>
    {
        if self.normalization == Normalization::Left {
            return Ok(BlockMatrix::identity(&self.right_i, &self.right_i));
        }
        self.make_left_paired();
        let (q, r) = match method {
            DecompMethod::QR => block_ops::qr(&self.data)?,
            DecompMethod::SVD => {
                let block_ops::BlockSvd { u, s, vt } = block_ops::svd(&self.data)?;
                (u, block_ops::scale_rows(&s, &vt))
            },
        };
        self.right_i = q.right_basis();
        self.data = q;
        self.normalization = Normalization::Left;
        Ok(r)
    }

    /// Right-normalize the tensor in place, returning the remainder factor
    /// `L` such that the original tensor equals `L · self`.
    ///
    /// If the tensor is already right-normalized, `L` is the identity.
    pub fn normalize_right(&mut self, method: DecompMethod)
        -> MPSTensorResult<BlockMatrix<S, A>>
    {
        if self.normalization == Normalization::Right {
            return Ok(BlockMatrix::identity(&self.left_i, &self.left_i));
        }
        self.make_right_paired();
        let (l, q) = match method {
            DecompMethod::QR => block_ops::lq(&self.data)?,
            DecompMethod::SVD => {
                let block_ops::BlockSvd { u, s, vt }
                    = block_ops::svd(&block_ops::adjoint(&self.data))?;
                // m† = u s vt  =>  m = (vt† s) u†
                let l = block_ops::scale_columns(&block_ops::adjoint(&vt), &s);
                (l, block_ops::adjoint(&u))
            },
        };
        self.left_i = q.left_basis();
        self.data = q;
        self.normalization = Normalization::Right;
        Ok(l)
    }

    /// Replace the tensor by `n · self`, contracting `n` into the left bond.
    pub fn multiply_from_left(&mut self, n: &BlockMatrix<S, A>)
        -> MPSTensorResult<()>
    {
        self.make_right_paired();
        self.data = block_ops::gemm(n, &self.data)?;
        self.left_i = n.left_basis();
        self.normalization = Normalization::Unnormalized;
        Ok(())
    }

    /// Replace the tensor by `self · n`, contracting `n` into the right bond.
    pub fn multiply_from_right(&mut self, n: &BlockMatrix<S, A>)
        -> MPSTensorResult<()>
    {
        self.make_left_paired();
        self.data = block_ops::gemm(&self.data, n)?;
        self.right_i = n.right_basis();
        self.normalization = Normalization::Unnormalized;
        Ok(())
    }

    /// Multiply every element by `a`.
    pub fn multiply_by_scalar(&mut self, a: A) {
        self.data.scale(a);
        self.normalization = Normalization::Unnormalized;
    }

    /// Complex-conjugate every element in place.
    pub fn conjugate(&mut self) { self.data.conjugate(); }

    /// Return the Frobenius norm.
    pub fn scalar_norm(&self) -> f64 { self.data.norm() }

    /// Return `Σ conj(self) · other` over all elements.
    pub fn scalar_overlap(&self, other: &Self) -> A {
        match self.pairing {
            Pairing::Left =>
                self.data.scalar_overlap(&other.left_paired_data()),
            Pairing::Right =>
                self.data.scalar_overlap(&other.right_paired_data()),
        }
    }

    /// Return the number of elements in the left-paired block structure.
    pub fn vector_len(&self) -> usize { self.left_paired_data().num_elements() }

    /// Flatten the left-paired data into a vector, block by block in basis
    /// order, each block row-major.
    pub fn to_vector(&self) -> nd::Array1<A> {
        let data = self.left_paired_data();
        data.iter()
            .flat_map(|(_, b)| b.iter().copied())
            .collect()
    }

    /// Return a copy of `self` in left-paired form with elements taken from a
    /// vector laid out as by [`Self::to_vector`].
    pub fn with_vector(&self, v: &nd::Array1<A>) -> MPSTensorResult<Self> {
        let mut data = self.left_paired_data().into_owned();
        let expected = data.num_elements();
        if v.len() != expected {
            return Err(VectorLength { expected, found: v.len() });
        }
        let mut offset = 0;
        for (_, b) in data.iter_mut() {
            let n = b.len();
            b.iter_mut().zip(v.iter().skip(offset).take(n))
                .for_each(|(x, y)| { *x = *y; });
            offset += n;
        }
        Ok(Self {
            phys_i: self.phys_i.clone(),
            left_i: self.left_i.clone(),
            right_i: self.right_i.clone(),
            data,
            pairing: Pairing::Left,
            normalization: Normalization::Unnormalized,
        })
    }

    /// Return the approximate size of the stored data in bytes.
    pub fn footprint(&self) -> usize { self.data.footprint() }
}

impl<S: Symmetry, A: Elem> AddAssign<&MPSTensor<S, A>> for MPSTensor<S, A> {
    /// *Panics* if the auxiliary indices of the operands differ.
    fn add_assign(&mut self, rhs: &MPSTensor<S, A>) {
        assert!(
            self.left_i.weak_equal(&rhs.left_i)
                && self.right_i.weak_equal(&rhs.right_i),
            "error in MPSTensor::add_assign: mismatched bond indices"
        );
        match self.pairing {
            Pairing::Left => { self.data += &*rhs.left_paired_data(); },
            Pairing::Right => { self.data += &*rhs.right_paired_data(); },
        }
        self.normalization = Normalization::Unnormalized;
    }
}

impl<S: Symmetry, A: Elem> fmt::Debug for MPSTensor<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MPSTensor {{")?;
        writeln!(f, "    phys_i: {:?},", self.phys_i)?;
        writeln!(f, "    left_i: {:?},", self.left_i)?;
        writeln!(f, "    right_i: {:?},", self.right_i)?;
        writeln!(f, "    pairing: {:?},", self.pairing)?;
        writeln!(f, "    normalization: {:?},", self.normalization)?;
        writeln!(f, "    data: {:?}", self.data.basis())?;
        write!(f, "}}")
    }
}
