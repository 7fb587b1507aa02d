//! Block-sparse matrices graded by symmetry charges.
//!
//! A [`BlockMatrix`] is a [`DualIndex`] together with one dense block per
//! entry. Blocks are independent of one another and are looked up by their
//! `(left charge, right charge)` pair; a pair that is not present is an
//! implicit zero block.
//!
//! ```
//! use ndarray as nd;
//! use dmrg_core::{ BlockMatrix, U1 };
//!
//! let mut m: BlockMatrix<U1, f64> = BlockMatrix::new();
//! m.insert_block(nd::Array2::eye(2), 0, 0).unwrap();
//! m.insert_block(nd::Array2::eye(3) * 2.0, 1, 1).unwrap();
//! assert_eq!(m.trace(), 8.0);
//! assert!(m.has_block(1, 1));
//! assert!(!m.has_block(0, 1));
//! ```

use std::{
    fmt,
    ops::{ AddAssign, MulAssign, SubAssign },
};
use ndarray as nd;
use ndarray_linalg::error::LinalgError;
use num_traits::{ One, Zero };
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    Elem,
    dense,
    index::{ DualIndex, DualIndexEntry, Index, IndexError },
    symmetry::Symmetry,
};

#[derive(Debug, Error)]
pub enum BlockMatrixError {
    /// Returned when attempting to insert a block whose charge pair already
    /// exists.
    #[error("error in BlockMatrix::insert_block: block {0} already exists")]
    DuplicateBlock(String),

    /// Returned when a block's shape disagrees with its declared sizes.
    #[error("error in BlockMatrix: block {pair} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        pair: String,
        found: (usize, usize),
        expected: (usize, usize),
    },

    /// Returned when the inner dimensions of a block product disagree.
    #[error("error in gemm: inner dimensions of block {0} do not agree")]
    InnerDimMismatch(String),

    /// Returned by block-diagonal decompositions when more than one block
    /// shares a column charge.
    #[error("error in {0}: matrix is not block-diagonal in its column charges")]
    NotBlockDiagonal(&'static str),

    /// Returned when a dense factorization fails.
    #[error("error in dense backend: {0}")]
    Linalg(#[from] LinalgError),

    #[error("index error: {0}")]
    IndexError(#[from] IndexError),
}
use BlockMatrixError::*;
pub type BlockMatrixResult<T> = Result<T, BlockMatrixError>;

/// A block-sparse matrix.
///
/// Every block `k` has shape `basis()[k].ls × basis()[k].rs` (checked by
/// [`Self::reasonable`]), and no two blocks share a charge pair. Blocks are
/// kept sorted by `(left charge, right charge)`.
///
/// The serialized form stores the row basis (`rows_`), column basis
/// (`cols_`), and block payloads (`data_`) as separate sequences, all in
/// block order.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    bound = "A: Elem",
    try_from = "BlockMatrixRepr<S, A>",
    into = "BlockMatrixRepr<S, A>",
)]
pub struct BlockMatrix<S: Symmetry, A: Elem> {
    basis: DualIndex<S>,
    data: Vec<nd::Array2<A>>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
struct BlockMatrixRepr<S: Symmetry, A: Elem> {
    rows_: Vec<(S::Charge, usize)>,
    cols_: Vec<(S::Charge, usize)>,
    data_: Vec<nd::Array2<A>>,
}

impl<S: Symmetry, A: Elem> From<BlockMatrix<S, A>> for BlockMatrixRepr<S, A> {
    fn from(m: BlockMatrix<S, A>) -> Self {
        let rows_ = m.basis.iter().map(|e| (e.lc, e.ls)).collect();
        let cols_ = m.basis.iter().map(|e| (e.rc, e.rs)).collect();
        Self { rows_, cols_, data_: m.data }
    }
}

impl<S: Symmetry, A: Elem> TryFrom<BlockMatrixRepr<S, A>> for BlockMatrix<S, A> {
    type Error = BlockMatrixError;

    fn try_from(repr: BlockMatrixRepr<S, A>) -> BlockMatrixResult<Self> {
        let mut out = Self::new();
        let blocks = repr.rows_.into_iter()
            .zip(repr.cols_)
            .zip(repr.data_);
        for (((lc, ls), (rc, rs)), block) in blocks {
            if block.dim() != (ls, rs) {
                return Err(ShapeMismatch {
                    pair: format!("({:?}, {:?})", lc, rc),
                    found: block.dim(),
                    expected: (ls, rs),
                });
            }
            out.insert_block(block, lc, rc)?;
        }
        Ok(out)
    }
}

impl<S: Symmetry, A: Elem> Default for BlockMatrix<S, A> {
    fn default() -> Self {
        Self { basis: DualIndex::new(), data: Vec::new() }
    }
}

impl<S: Symmetry, A: Elem> BlockMatrix<S, A> {
    /// Create a new, empty block matrix.
    pub fn new() -> Self { Self::default() }

    /// Create a matrix of zero blocks, one on the charge diagonal for every
    /// charge common to `rows` and `cols`.
    pub fn from_indices(rows: &Index<S>, cols: &Index<S>) -> Self {
        let mut out = Self::new();
        for (c, ls) in rows.iter() {
            let rs = cols.size_of_block(c);
            if rs > 0 {
                out.push_sorted(c, c, nd::Array2::zeros((ls, rs)));
            }
        }
        out
    }

    /// Create a charge-diagonal matrix with ones on the leading diagonal of
    /// every block, for every charge common to `rows` and `cols`.
    pub fn identity(rows: &Index<S>, cols: &Index<S>) -> Self {
        let mut out = Self::from_indices(rows, cols);
        out.data.iter_mut()
            .for_each(|b| { b.diag_mut().fill(A::one()); });
        out
    }

    // caller guarantees (lc, rc) is absent
    fn push_sorted(&mut self, lc: S::Charge, rc: S::Charge, block: nd::Array2<A>) {
        let (ls, rs) = block.dim();
        let entry = DualIndexEntry { lc, rc, ls, rs };
        if let Ok(k) = self.basis.insert(entry) {
            self.data.insert(k, block);
        }
    }

    /// Return the block basis.
    pub fn basis(&self) -> &DualIndex<S> { &self.basis }

    /// Return the number of blocks.
    pub fn n_blocks(&self) -> usize { self.data.len() }

    /// Return `true` if there are no blocks.
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Return the row index, taking the largest row size per charge.
    pub fn left_basis(&self) -> Index<S> { self.basis.left_index() }

    /// Return the column index, taking the largest column size per charge.
    pub fn right_basis(&self) -> Index<S> { self.basis.right_index() }

    /// Return `true` if a block exists for `(lc, rc)`.
    pub fn has_block(&self, lc: S::Charge, rc: S::Charge) -> bool {
        self.basis.has(lc, rc)
    }

    /// Return the position of the block for `(lc, rc)`.
    pub fn find_block(&self, lc: S::Charge, rc: S::Charge) -> Option<usize> {
        self.basis.position(lc, rc)
    }

    /// Return the `k`-th block and its basis entry.
    pub fn block(&self, k: usize)
        -> Option<(&DualIndexEntry<S::Charge>, &nd::Array2<A>)>
    {
        self.basis.get(k).zip(self.data.get(k))
    }

    /// Return a mutable reference to the `k`-th block.
    ///
    /// The caller must not change the block's shape.
    pub fn block_mut(&mut self, k: usize) -> Option<&mut nd::Array2<A>> {
        self.data.get_mut(k)
    }

    /// Return the block for `(lc, rc)`.
    pub fn get(&self, lc: S::Charge, rc: S::Charge) -> Option<&nd::Array2<A>> {
        self.find_block(lc, rc).map(|k| &self.data[k])
    }

    /// Return a mutable reference to the block for `(lc, rc)`.
    pub fn get_mut(&mut self, lc: S::Charge, rc: S::Charge)
        -> Option<&mut nd::Array2<A>>
    {
        self.find_block(lc, rc).map(|k| &mut self.data[k])
    }

    /// Return the block for `(lc, rc)`, inserting a `rows × cols` zero block
    /// first if it is absent.
    pub fn block_or_zeros(
        &mut self,
        lc: S::Charge,
        rc: S::Charge,
        rows: usize,
        cols: usize,
    ) -> &mut nd::Array2<A>
    {
        let k = match self.basis.search(lc, rc) {
            Ok(k) => k,
            Err(k) => {
                let entry = DualIndexEntry { lc, rc, ls: rows, rs: cols };
                let k = self.basis.insert(entry).unwrap_or(k);
                self.data.insert(k, nd::Array2::zeros((rows, cols)));
                k
            },
        };
        &mut self.data[k]
    }

    /// Iterate over all blocks in basis order.
    pub fn iter(&self)
        -> impl Iterator<Item = (&DualIndexEntry<S::Charge>, &nd::Array2<A>)> + '_
    {
        self.basis.iter().zip(self.data.iter())
    }

    /// Iterate over all blocks mutably in basis order.
    pub fn iter_mut(&mut self)
        -> impl Iterator<Item = (&DualIndexEntry<S::Charge>, &mut nd::Array2<A>)> + '_
    {
        self.basis.iter().zip(self.data.iter_mut())
    }

    /// Insert a new block at its sorted position, returning the position.
    ///
    /// Fails if the charge pair is already present.
    pub fn insert_block(
        &mut self,
        block: nd::Array2<A>,
        lc: S::Charge,
        rc: S::Charge,
    ) -> BlockMatrixResult<usize>
    {
        let (ls, rs) = block.dim();
        let k = self.basis.insert(DualIndexEntry { lc, rc, ls, rs })
            .map_err(|_| DuplicateBlock(format!("({:?}, {:?})", lc, rc)))?;
        self.data.insert(k, block);
        Ok(k)
    }

    /// Remove the `k`-th block, returning its basis entry and data.
    pub fn remove_block(&mut self, k: usize)
        -> (DualIndexEntry<S::Charge>, nd::Array2<A>)
    {
        (self.basis.remove(k), self.data.remove(k))
    }

    /// Remove the block for `(lc, rc)`, if it exists.
    pub fn take_block(&mut self, lc: S::Charge, rc: S::Charge)
        -> Option<nd::Array2<A>>
    {
        self.find_block(lc, rc).map(|k| self.remove_block(k).1)
    }

    /// Resize the `k`-th block to `rows × cols`, zero-padding or cropping.
    pub fn resize_block(&mut self, k: usize, rows: usize, cols: usize) {
        let Some(entry) = self.basis.get_mut(k) else { return; };
        if (entry.ls, entry.rs) == (rows, cols) { return; }
        entry.ls = rows;
        entry.rs = cols;
        self.data[k] = dense::resized(&self.data[k], rows, cols);
    }

    /// Add `block` to the block for `(lc, rc)`, inserting it if absent.
    ///
    /// Shapes need not agree: the target grows to the element-wise maximum
    /// of both shapes, zero-padded, before the addition.
    pub fn match_and_add_block<T>(
        &mut self,
        block: &nd::ArrayBase<T, nd::Ix2>,
        lc: S::Charge,
        rc: S::Charge,
    )
    where T: nd::Data<Elem = A>
    {
        match self.basis.search(lc, rc) {
            Ok(k) => {
                let (ls, rs) = self.data[k].dim();
                let (nr, nc) = block.dim();
                self.resize_block(k, ls.max(nr), rs.max(nc));
                self.data[k].slice_mut(nd::s![..nr, ..nc]).scaled_add(A::one(), block);
            },
            Err(_) => {
                self.push_sorted(lc, rc, block.to_owned());
            },
        }
    }

    /// Return the sum of the traces of all blocks.
    pub fn trace(&self) -> A {
        self.data.iter()
            .fold(A::zero(), |acc, b| acc + dense::trace(b))
    }

    /// Return the Frobenius norm, `sqrt(Σ ‖block‖²)`.
    pub fn norm(&self) -> f64 {
        self.norm_sq().sqrt()
    }

    /// Return the squared Frobenius norm.
    pub fn norm_sq(&self) -> f64 {
        self.data.iter()
            .map(|b| dense::real_to_f64(dense::norm_sq(b)))
            .sum()
    }

    /// Return `Σ conj(self) · other` over blocks present in both operands.
    pub fn scalar_overlap(&self, other: &Self) -> A {
        self.iter()
            .filter_map(|(e, b)| {
                other.get(e.lc, e.rc)
                    .filter(|ob| ob.dim() == b.dim())
                    .map(|ob| dense::overlap(b, ob))
            })
            .fold(A::zero(), |acc, x| acc + x)
    }

    /// Multiply every element by `a`.
    pub fn scale(&mut self, a: A) {
        self.data.iter_mut().for_each(|b| { b.mapv_inplace(|x| x * a); });
    }

    /// Complex-conjugate every element in place.
    pub fn conjugate(&mut self) {
        self.data.iter_mut()
            .for_each(|b| { b.mapv_inplace(|x| x.conj()); });
    }

    /// Return `true` if every block's shape matches its declared sizes.
    pub fn reasonable(&self) -> bool {
        self.basis.len() == self.data.len()
            && self.iter().all(|(e, b)| b.dim() == (e.ls, e.rs))
    }

    /// Check the same as [`Self::reasonable`], reporting the first offending
    /// block.
    pub fn check_shapes(&self) -> BlockMatrixResult<()> {
        self.iter()
            .find(|(e, b)| b.dim() != (e.ls, e.rs))
            .map_or(Ok(()), |(e, b)| {
                Err(ShapeMismatch {
                    pair: format!("({:?}, {:?})", e.lc, e.rc),
                    found: b.dim(),
                    expected: (e.ls, e.rs),
                })
            })
    }

    /// Return the total number of stored elements.
    pub fn num_elements(&self) -> usize {
        self.data.iter().map(|b| b.len()).sum()
    }

    /// Return the approximate size of the stored payload in bytes.
    pub fn footprint(&self) -> usize {
        self.num_elements() * std::mem::size_of::<A>()
    }
}

impl<S: Symmetry, A: Elem> AddAssign<&BlockMatrix<S, A>> for BlockMatrix<S, A> {
    /// Add every block of `rhs` in place, inserting blocks absent from
    /// `self`.
    ///
    /// *Panics* if a shared block has a different shape in each operand.
    fn add_assign(&mut self, rhs: &BlockMatrix<S, A>) {
        for (e, b) in rhs.iter() {
            match self.basis.search(e.lc, e.rc) {
                Ok(k) => {
                    assert_eq!(
                        self.data[k].dim(), b.dim(),
                        "error in BlockMatrix::add_assign: mismatched block shapes"
                    );
                    self.data[k] += b;
                },
                Err(_) => { self.push_sorted(e.lc, e.rc, b.clone()); },
            }
        }
    }
}

impl<S: Symmetry, A: Elem> SubAssign<&BlockMatrix<S, A>> for BlockMatrix<S, A> {
    /// Subtract every block of `rhs` in place, inserting negated blocks
    /// absent from `self`.
    ///
    /// *Panics* if a shared block has a different shape in each operand.
    fn sub_assign(&mut self, rhs: &BlockMatrix<S, A>) {
        for (e, b) in rhs.iter() {
            match self.basis.search(e.lc, e.rc) {
                Ok(k) => {
                    assert_eq!(
                        self.data[k].dim(), b.dim(),
                        "error in BlockMatrix::sub_assign: mismatched block shapes"
                    );
                    self.data[k] -= b;
                },
                Err(_) => { self.push_sorted(e.lc, e.rc, b.mapv(|x| -x)); },
            }
        }
    }
}

impl<S: Symmetry, A: Elem> MulAssign<A> for BlockMatrix<S, A> {
    fn mul_assign(&mut self, a: A) { self.scale(a); }
}

impl<S: Symmetry, A: Elem> fmt::Debug for BlockMatrix<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BlockMatrix {{")?;
        for (e, b) in self.iter() {
            writeln!(f, "  {:?} x {:?} ({} x {}):", e.lc, e.rc, e.ls, e.rs)?;
            for row in b.rows() {
                write!(f, "   ")?;
                for x in row.iter() { write!(f, " {:?}", x)?; }
                writeln!(f)?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::symmetry::U1;

    fn block(rows: usize, cols: usize, start: f64) -> nd::Array2<f64> {
        nd::Array2::from_shape_fn((rows, cols), |(i, j)| start + (i * cols + j) as f64)
    }

    #[test]
    fn insert_keeps_sorted_and_rejects_duplicates() {
        let mut m: BlockMatrix<U1, f64> = BlockMatrix::new();
        m.insert_block(block(1, 2, 0.0), 2, 2).unwrap();
        m.insert_block(block(2, 2, 0.0), 0, 0).unwrap();
        m.insert_block(block(2, 3, 0.0), 0, 1).unwrap();
        assert!(matches!(
            m.insert_block(block(2, 2, 0.0), 0, 0),
            Err(DuplicateBlock(_))
        ));
        let pairs: Vec<(i32, i32)>
            = m.basis().iter().map(|e| (e.lc, e.rc)).collect();
        assert_eq!(pairs, vec![(0, 0), (0, 1), (2, 2)]);
        assert_eq!(m.n_blocks(), 3);
        assert!(m.reasonable());
    }

    #[test]
    fn add_creates_missing_blocks() {
        let mut a: BlockMatrix<U1, f64> = BlockMatrix::new();
        a.insert_block(block(2, 2, 1.0), 0, 0).unwrap();
        let mut b: BlockMatrix<U1, f64> = BlockMatrix::new();
        b.insert_block(block(2, 2, 1.0), 0, 0).unwrap();
        b.insert_block(block(1, 1, 5.0), 1, 1).unwrap();
        a += &b;
        assert_eq!(a.get(0, 0).unwrap(), &(block(2, 2, 1.0) * 2.0));
        assert_eq!(a.get(1, 1).unwrap()[[0, 0]], 5.0);
        a -= &b;
        a -= &b;
        assert_eq!(a.get(1, 1).unwrap()[[0, 0]], -5.0);
        assert!(a.get(0, 0).unwrap().iter().all(|x| *x == 0.0));
    }

    #[test]
    #[should_panic]
    fn add_panics_on_shape_mismatch() {
        let mut a: BlockMatrix<U1, f64> = BlockMatrix::new();
        a.insert_block(block(2, 2, 1.0), 0, 0).unwrap();
        let mut b: BlockMatrix<U1, f64> = BlockMatrix::new();
        b.insert_block(block(3, 2, 1.0), 0, 0).unwrap();
        a += &b;
    }

    #[test]
    fn match_and_add_on_empty_is_insert() {
        let x = block(2, 3, 1.0);
        let mut a: BlockMatrix<U1, f64> = BlockMatrix::new();
        a.match_and_add_block(&x, 1, 0);
        let mut b: BlockMatrix<U1, f64> = BlockMatrix::new();
        b.insert_block(x.clone(), 1, 0).unwrap();
        assert_eq!(a, b);
        a.match_and_add_block(&x, 1, 0);
        assert_eq!(a.get(1, 0).unwrap(), &(&x + &x));
    }

    #[test]
    fn match_and_add_pads_to_max_shape() {
        let mut a: BlockMatrix<U1, f64> = BlockMatrix::new();
        a.match_and_add_block(&nd::Array2::ones((2, 1)), 0, 0);
        a.match_and_add_block(&nd::Array2::ones((1, 3)), 0, 0);
        let b = a.get(0, 0).unwrap();
        assert_eq!(b, &nd::array![[2.0, 1.0, 1.0], [1.0, 0.0, 0.0]]);
        assert!(a.reasonable());
        assert_eq!(a.basis().get(0).map(|e| (e.ls, e.rs)), Some((2, 3)));
    }

    #[test]
    fn trace_and_norm() {
        let mut m: BlockMatrix<U1, f64> = BlockMatrix::new();
        let b0 = block(2, 2, 1.0);
        let b1 = block(3, 3, -2.0);
        m.insert_block(b0.clone(), 0, 0).unwrap();
        m.insert_block(b1.clone(), 1, 1).unwrap();
        assert_abs_diff_eq!(
            m.trace(), dense::trace(&b0) + dense::trace(&b1), epsilon = 1e-14);
        let n2: f64 = b0.iter().chain(b1.iter()).map(|x| x * x).sum();
        assert_abs_diff_eq!(m.norm(), n2.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn identity_is_charge_diagonal() {
        let rows: Index<U1> = Index::from_sectors([(0, 2), (1, 1), (2, 3)]);
        let cols: Index<U1> = Index::from_sectors([(0, 2), (2, 1)]);
        let id: BlockMatrix<U1, f64> = BlockMatrix::identity(&rows, &cols);
        assert_eq!(id.n_blocks(), 2);
        assert_eq!(id.get(2, 2).unwrap(), &nd::array![[1.0], [0.0], [0.0]]);
        assert_eq!(id.trace(), 3.0);
    }

    #[test]
    fn serialized_form_round_trips() {
        let mut m: BlockMatrix<U1, f64> = BlockMatrix::new();
        m.insert_block(block(2, 3, 0.5), 0, 1).unwrap();
        m.insert_block(block(1, 1, 7.0), -1, -1).unwrap();
        let bytes = bincode::serialize(&m).unwrap();
        let back: BlockMatrix<U1, f64> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, m);
    }
}
