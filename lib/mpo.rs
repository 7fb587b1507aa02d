//! Matrix product operators.
//!
//! An [`MPOTensor`] is a sparse matrix over a pair of bond indices `(b, b')`
//! whose nonzero entries are lists of [`MPOTerm`]s. A term refers to a local
//! operator by tag into an [`OperatorTable`], which is shared by every
//! tensor built from it and stores each distinct operator once.
//!
//! Local operators are block matrices over the physical index, with rows
//! labeling the outgoing (bra) and columns the incoming (ket) physical
//! states.

use std::{ collections::BTreeMap, fmt, sync::Arc };
use num_traits::One;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    dense,
    index::Index,
    reshapes,
    symmetry::Symmetry,
};

#[derive(Debug, Error)]
pub enum MPOError {
    /// Returned when a term refers to an operator that is not in the table.
    #[error("error in MPOTensor: unknown operator tag {0}")]
    UnknownTag(usize),

    /// Returned when a term is placed outside the declared bond dimensions.
    #[error("error in MPOTensor: entry ({0}, {1}) is out of bounds")]
    OutOfBounds(usize, usize),

    /// Returned when Hermitian partner metadata is malformed.
    #[error("error in MPOTensor::with_hermitian: {0}")]
    BadHermitian(&'static str),

    /// Returned when adjacent tensors of a chain disagree on their shared
    /// bond dimension.
    #[error("error in MPO creation: bond mismatch between sites {0} and {1}")]
    BondMismatch(usize, usize),

    /// Returned when attempting to build an empty chain.
    #[error("error in MPO creation: empty chain")]
    EmptyChain,
}
use MPOError::*;
pub type MPOResult<T> = Result<T, MPOError>;

/// Tag of an operator in an [`OperatorTable`].
pub type Tag = usize;

/// Deduplicated storage of local operators.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
pub struct OperatorTable<S: Symmetry, A: Elem> {
    ops: Vec<BlockMatrix<S, A>>,
}

impl<S: Symmetry, A: Elem> Default for OperatorTable<S, A> {
    fn default() -> Self { Self { ops: Vec::new() } }
}

impl<S: Symmetry, A: Elem> OperatorTable<S, A> {
    /// Create a new, empty table.
    pub fn new() -> Self { Self::default() }

    /// Add an operator to the table, returning its tag.
    ///
    /// An operator equal to one already present is not stored twice; the
    /// existing tag is returned instead.
    pub fn register(&mut self, op: BlockMatrix<S, A>) -> Tag {
        if let Some(tag) = self.ops.iter().position(|o| *o == op) {
            tag
        } else {
            self.ops.push(op);
            self.ops.len() - 1
        }
    }

    /// Return the operator for `tag`.
    pub fn get(&self, tag: Tag) -> Option<&BlockMatrix<S, A>> {
        self.ops.get(tag)
    }

    /// Return the number of distinct operators.
    pub fn len(&self) -> usize { self.ops.len() }

    /// Return `true` if the table holds no operators.
    pub fn is_empty(&self) -> bool { self.ops.is_empty() }
}

/// A scaled reference to a local operator.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
pub struct MPOTerm<A: Elem> {
    pub tag: Tag,
    pub scale: A,
}

/// One site of a matrix product operator.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
pub struct MPOTensor<S: Symmetry, A: Elem> {
    row_dim: usize,
    col_dim: usize,
    entries: BTreeMap<(usize, usize), Vec<MPOTerm<A>>>,
    col_index: Vec<Vec<usize>>,
    table: Arc<OperatorTable<S, A>>,
    left_herm: Vec<Option<usize>>,
    right_herm: Vec<Option<usize>>,
}

impl<S: Symmetry, A: Elem> MPOTensor<S, A> {
    /// Create a new MPO tensor from a list of `(b, b', term)` entries.
    ///
    /// Several terms may share a position; their operators are summed.
    pub fn new<I>(
        row_dim: usize,
        col_dim: usize,
        terms: I,
        table: Arc<OperatorTable<S, A>>,
    ) -> MPOResult<Self>
    where I: IntoIterator<Item = (usize, usize, MPOTerm<A>)>
    {
        let mut entries: BTreeMap<(usize, usize), Vec<MPOTerm<A>>>
            = BTreeMap::new();
        for (b, bp, term) in terms {
            if b >= row_dim || bp >= col_dim {
                return Err(OutOfBounds(b, bp));
            }
            if table.get(term.tag).is_none() {
                return Err(UnknownTag(term.tag));
            }
            entries.entry((b, bp)).or_default().push(term);
        }
        let mut col_index: Vec<Vec<usize>> = vec![Vec::new(); col_dim];
        entries.keys().for_each(|(b, bp)| { col_index[*bp].push(*b); });
        Ok(Self {
            row_dim,
            col_dim,
            entries,
            col_index,
            table,
            left_herm: vec![None; row_dim],
            right_herm: vec![None; col_dim],
        })
    }

    /// Create the 1×1 identity operator on `phys`.
    pub fn identity(phys: &Index<S>) -> Self {
        let mut table = OperatorTable::new();
        let tag = table.register(BlockMatrix::identity(phys, phys));
        let entries: BTreeMap<(usize, usize), Vec<MPOTerm<A>>>
            = [((0, 0), vec![MPOTerm { tag, scale: A::one() }])]
            .into_iter().collect();
        Self {
            row_dim: 1,
            col_dim: 1,
            entries,
            col_index: vec![vec![0]],
            table: Arc::new(table),
            left_herm: vec![None],
            right_herm: vec![None],
        }
    }

    /// Attach Hermitian partner metadata.
    ///
    /// `left_herm[b] = Some(p)` declares that the boundary computed for left
    /// bond index `b` is the conjugate transpose of the one for `p`, and
    /// likewise `right_herm` for the right bond index. Partners must refer to
    /// a smaller index so that they are computed first.
    pub fn with_hermitian(
        mut self,
        left_herm: Vec<Option<usize>>,
        right_herm: Vec<Option<usize>>,
    ) -> MPOResult<Self>
    {
        if left_herm.len() != self.row_dim || right_herm.len() != self.col_dim {
            return Err(BadHermitian("partner list has the wrong length"));
        }
        let well_ordered = |h: &[Option<usize>]| {
            h.iter().enumerate().all(|(b, p)| p.map_or(true, |p| p < b))
        };
        if !well_ordered(&left_herm) || !well_ordered(&right_herm) {
            return Err(BadHermitian("partners must precede their conjugates"));
        }
        self.left_herm = left_herm;
        self.right_herm = right_herm;
        Ok(self)
    }

    /// Return the left bond dimension.
    pub fn row_dim(&self) -> usize { self.row_dim }

    /// Return the right bond dimension.
    pub fn col_dim(&self) -> usize { self.col_dim }

    /// Return the shared operator table.
    pub fn table(&self) -> &Arc<OperatorTable<S, A>> { &self.table }

    /// Return the terms at `(b, b')`.
    pub fn at(&self, b: usize, bp: usize) -> Option<&[MPOTerm<A>]> {
        self.entries.get(&(b, bp)).map(|v| v.as_slice())
    }

    /// Return `true` if `(b, b')` holds at least one term.
    pub fn has(&self, b: usize, bp: usize) -> bool {
        self.entries.contains_key(&(b, bp))
    }

    /// Iterate over all nonzero positions and their terms, row-major.
    pub fn iter(&self)
        -> impl Iterator<Item = (usize, usize, &[MPOTerm<A>])> + '_
    {
        self.entries.iter().map(|((b, bp), t)| (*b, *bp, t.as_slice()))
    }

    /// Iterate over the nonzero entries of row `b`.
    pub fn row(&self, b: usize)
        -> impl Iterator<Item = (usize, &[MPOTerm<A>])> + '_
    {
        self.entries.range((b, 0)..(b + 1, 0))
            .map(|((_, bp), t)| (*bp, t.as_slice()))
    }

    /// Iterate over the nonzero entries of column `b'`.
    pub fn column(&self, bp: usize)
        -> impl Iterator<Item = (usize, &[MPOTerm<A>])> + '_
    {
        self.col_index.get(bp).into_iter()
            .flat_map(move |rows| {
                rows.iter().filter_map(move |b| {
                    self.at(*b, bp).map(|t| (*b, t))
                })
            })
    }

    /// Return the operator referenced by `term`.
    pub fn op(&self, term: &MPOTerm<A>) -> Option<&BlockMatrix<S, A>> {
        self.table.get(term.tag)
    }

    /// Return the sum of all scaled operators at `(b, b')`.
    pub fn summed_op(&self, b: usize, bp: usize) -> Option<BlockMatrix<S, A>> {
        let terms = self.at(b, bp)?;
        let mut out = BlockMatrix::new();
        for term in terms {
            let mut op = self.op(term)?.clone();
            op.scale(term.scale);
            out += &op;
        }
        Some(out)
    }

    /// Return the number of rows holding exactly one entry.
    pub fn num_one_rows(&self) -> usize {
        (0..self.row_dim).filter(|b| self.row(*b).count() == 1).count()
    }

    /// Return the number of columns holding exactly one entry.
    pub fn num_one_cols(&self) -> usize {
        self.col_index.iter().filter(|rows| rows.len() == 1).count()
    }

    /// Return the Hermitian partner of left bond index `b`.
    pub fn left_herm(&self, b: usize) -> Option<usize> {
        self.left_herm.get(b).copied().flatten()
    }

    /// Return the Hermitian partner of right bond index `b'`.
    pub fn right_herm(&self, bp: usize) -> Option<usize> {
        self.right_herm.get(bp).copied().flatten()
    }

    /// Return `true` if any Hermitian partner is declared.
    pub fn has_hermitian(&self) -> bool {
        self.left_herm.iter().chain(self.right_herm.iter()).any(|p| p.is_some())
    }

    /// Return the physical index read off the operators' column charges.
    pub fn phys_i(&self) -> Index<S> {
        let mut out = Index::new();
        for (_, _, terms) in self.iter() {
            for term in terms {
                if let Some(op) = self.op(term) {
                    op.basis().iter().for_each(|e| { out.grow_to(e.rc, e.rs); });
                }
            }
        }
        out
    }
}

impl<S: Symmetry, A: Elem> fmt::Debug for MPOTensor<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MPOTensor {{")?;
        writeln!(f, "    shape: {} x {},", self.row_dim, self.col_dim)?;
        writeln!(f, "    operators: {},", self.table.len())?;
        writeln!(f, "    entries: [")?;
        for ((b, bp), terms) in self.entries.iter() {
            let tags: Vec<String>
                = terms.iter()
                .map(|t| format!("{:?} * op{}", t.scale, t.tag))
                .collect();
            writeln!(f, "        ({}, {}): {},", b, bp, tags.join(" + "))?;
        }
        writeln!(f, "    ],")?;
        write!(f, "}}")
    }
}

/// Return the Kronecker product of two single-site operators over the fused
/// physical index laid out by [`reshapes::fused_phys`].
pub fn kron_ops<S, A>(
    phys1: &Index<S>,
    phys2: &Index<S>,
    op1: &BlockMatrix<S, A>,
    op2: &BlockMatrix<S, A>,
) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let pb = reshapes::fused_phys(phys1, phys2);
    let mut out = BlockMatrix::new();
    for (e1, b1) in op1.iter() {
        for (e2, b2) in op2.iter() {
            let (Some(row_off), Some(col_off))
                = (pb.offset(e1.lc, e2.lc), pb.offset(e1.rc, e2.rc))
                else { continue; };
            let lc = S::fuse(e1.lc, e2.lc);
            let rc = S::fuse(e1.rc, e2.rc);
            let k = dense::kron(b1, b2);
            let (nr, nc) = k.dim();
            let dst = out.block_or_zeros(lc, rc, pb.size(lc), pb.size(rc));
            dst.slice_mut(ndarray::s![row_off..row_off + nr, col_off..col_off + nc])
                .zip_mut_with(&k, |d, x| { *d += *x; });
        }
    }
    out
}

/// Merge two adjacent MPO tensors into one acting on the fused physical
/// index `phys1 ⊗ phys2`.
///
/// Each entry `(b1, b3)` of the result is `Σ_{b2} W1[b1, b2] ⊗ W2[b2, b3]`,
/// registered into a new operator table.
pub fn make_twosite_mpo<S, A>(
    m1: &MPOTensor<S, A>,
    m2: &MPOTensor<S, A>,
    phys1: &Index<S>,
    phys2: &Index<S>,
) -> MPOResult<MPOTensor<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    if m1.col_dim() != m2.row_dim() {
        return Err(BondMismatch(0, 1));
    }
    let mut summed: BTreeMap<(usize, usize), BlockMatrix<S, A>> = BTreeMap::new();
    for (b1, b2, _) in m1.iter() {
        let Some(op1) = m1.summed_op(b1, b2) else { continue; };
        for (b3, _) in m2.row(b2) {
            let Some(op2) = m2.summed_op(b2, b3) else { continue; };
            let k = kron_ops(phys1, phys2, &op1, &op2);
            *summed.entry((b1, b3)).or_default() += &k;
        }
    }
    let mut table = OperatorTable::new();
    let terms: Vec<(usize, usize, MPOTerm<A>)>
        = summed.into_iter()
        .map(|((b1, b3), op)| {
            let tag = table.register(op);
            (b1, b3, MPOTerm { tag, scale: A::one() })
        })
        .collect();
    MPOTensor::new(m1.row_dim(), m2.col_dim(), terms, Arc::new(table))
}

/// A chain of MPO tensors.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
pub struct MPO<S: Symmetry, A: Elem> {
    tensors: Vec<MPOTensor<S, A>>,
}

impl<S: Symmetry, A: Elem> MPO<S, A> {
    /// Create a new chain, checking that adjacent bond dimensions agree and
    /// that both ends have dimension 1.
    pub fn new(tensors: Vec<MPOTensor<S, A>>) -> MPOResult<Self> {
        if tensors.is_empty() { return Err(EmptyChain); }
        for (k, w) in tensors.windows(2).enumerate() {
            if w[0].col_dim() != w[1].row_dim() {
                return Err(BondMismatch(k, k + 1));
            }
        }
        let n = tensors.len();
        if tensors[0].row_dim() != 1 { return Err(BondMismatch(0, 0)); }
        if tensors[n - 1].col_dim() != 1 { return Err(BondMismatch(n - 1, n - 1)); }
        Ok(Self { tensors })
    }

    /// Create an identity operator on a chain of physical indices.
    pub fn identity(phys: &[Index<S>]) -> MPOResult<Self> {
        Self::new(phys.iter().map(MPOTensor::identity).collect())
    }

    /// Return the number of sites.
    pub fn len(&self) -> usize { self.tensors.len() }

    /// Return `true` if the chain has no sites.
    pub fn is_empty(&self) -> bool { self.tensors.is_empty() }

    /// Return the tensor at site `k`.
    pub fn get(&self, k: usize) -> Option<&MPOTensor<S, A>> { self.tensors.get(k) }

    /// Iterate over all sites.
    pub fn iter(&self) -> std::slice::Iter<'_, MPOTensor<S, A>> {
        self.tensors.iter()
    }
}

impl<S: Symmetry, A: Elem> std::ops::Index<usize> for MPO<S, A> {
    type Output = MPOTensor<S, A>;

    fn index(&self, k: usize) -> &Self::Output { &self.tensors[k] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;
    use crate::symmetry::U1;

    fn spin() -> Index<U1> { Index::from_sectors([(-1, 1), (1, 1)]) }

    fn sz() -> BlockMatrix<U1, f64> {
        let mut op = BlockMatrix::new();
        op.insert_block(nd::array![[-0.5]], -1, -1).unwrap();
        op.insert_block(nd::array![[0.5]], 1, 1).unwrap();
        op
    }

    fn splus() -> BlockMatrix<U1, f64> {
        let mut op = BlockMatrix::new();
        op.insert_block(nd::array![[1.0]], 1, -1).unwrap();
        op
    }

    #[test]
    fn table_deduplicates() {
        let mut table: OperatorTable<U1, f64> = OperatorTable::new();
        let a = table.register(sz());
        let b = table.register(splus());
        let c = table.register(sz());
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn row_and_column_access() {
        let mut table = OperatorTable::new();
        let id = table.register(BlockMatrix::identity(&spin(), &spin()));
        let z = table.register(sz());
        let one = |tag| MPOTerm { tag, scale: 1.0 };
        let w = MPOTensor::new(
            2, 2,
            [(0, 0, one(id)), (0, 1, one(z)), (1, 1, one(id))],
            Arc::new(table),
        ).unwrap();
        assert_eq!(w.row(0).map(|(bp, _)| bp).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(w.column(1).map(|(b, _)| b).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(w.num_one_rows(), 1);
        assert_eq!(w.num_one_cols(), 1);
        assert!(w.has(1, 1));
        assert!(!w.has(1, 0));
        assert_eq!(w.phys_i(), spin());
        assert!(MPOTensor::new(
            1, 1, [(0, 3, one(id))], w.table().clone()).is_err());
    }

    #[test]
    fn kron_of_identities_is_identity() {
        let id: BlockMatrix<U1, f64> = BlockMatrix::identity(&spin(), &spin());
        let k = kron_ops(&spin(), &spin(), &id, &id);
        let fused = reshapes::fused_phys(&spin(), &spin());
        assert_eq!(k, BlockMatrix::identity(fused.fused(), fused.fused()));
    }

    #[test]
    fn twosite_mpo_sums_over_inner_bond() {
        let mut table = OperatorTable::new();
        let z = table.register(sz());
        let table = Arc::new(table);
        let w1 = MPOTensor::new(
            1, 2,
            [(0, 0, MPOTerm { tag: z, scale: 1.0 }), (0, 1, MPOTerm { tag: z, scale: 2.0 })],
            table.clone(),
        ).unwrap();
        let w2 = MPOTensor::new(
            2, 1,
            [(0, 0, MPOTerm { tag: z, scale: 1.0 }), (1, 0, MPOTerm { tag: z, scale: 1.0 })],
            table,
        ).unwrap();
        let w12 = make_twosite_mpo(&w1, &w2, &spin(), &spin()).unwrap();
        assert_eq!((w12.row_dim(), w12.col_dim()), (1, 1));
        let op = w12.summed_op(0, 0).unwrap();
        // 3 * Sz ⊗ Sz: diagonal (+, -, -, +) / 4 in the fused basis
        assert_eq!(op.get(-2, -2).unwrap()[[0, 0]], 0.75);
        assert_eq!(op.get(0, 0).unwrap(), &nd::array![[-0.75, 0.0], [0.0, -0.75]]);
        assert_eq!(op.get(2, 2).unwrap()[[0, 0]], 0.75);
    }
}
