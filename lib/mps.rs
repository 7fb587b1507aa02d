//! Chains of site tensors.

use itertools::Itertools;
use rand::Rng;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    boundary::Boundary,
    contraction::{ ContractionEngine, ContractionError },
    dense,
    index::Index,
    mpo::MPO,
    mps_tensor::{ DecompMethod, MPSTensor, MPSTensorError, Normalization },
    symmetry::Symmetry,
};

#[derive(Debug, Error)]
pub enum MPSError {
    /// Returned when attempting to create an MPS with no sites.
    #[error("error in MPS creation: cannot create for an empty system")]
    EmptySystem,

    /// Returned when no state of the requested total charge can be built on
    /// the given physical indices.
    #[error("error in MPS creation: target charge is unreachable")]
    UnreachableCharge,

    /// Returned when neighboring tensors disagree on their shared bond.
    #[error("error in MPS: tensors disagree on bond {0}")]
    BondMismatch(usize),

    /// Returned when a site index is out of bounds.
    #[error("error in MPS: site {0} out of bounds")]
    OutOfBounds(usize),

    /// Returned when two chains (or a chain and an operator) have different
    /// lengths.
    #[error("error in MPS: length mismatch ({0} vs {1})")]
    LengthMismatch(usize, usize),

    #[error("MPS tensor error: {0}")]
    MPSTensorError(#[from] MPSTensorError),

    #[error("contraction error: {0}")]
    ContractionError(#[from] ContractionError),
}
use MPSError::*;
pub type MPSResult<T> = Result<T, MPSError>;

/// A matrix product state with abelian symmetry.
///
/// The leftmost bond carries the identity charge and the rightmost bond
/// carries the total charge of the state, each with size 1.
///
/// ```text
///       bond 0     bond 1            bond n-1     bond n
/// (1) -------- A[0] ------ A[1] ... ---------- A[n-1] -------- (target)
///               |           |                   |
///               s[0]        s[1]                s[n-1]
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "A: Elem")]
pub struct MPS<S: Symmetry, A: Elem> {
    data: Vec<MPSTensor<S, A>>,
    // Every site left of `center` is left-normalized and every site right of
    // it is right-normalized.
    center: Option<usize>,
}

impl<S: Symmetry, A: Elem> std::fmt::Debug for MPS<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "MPS {{")?;
        writeln!(f, "    n: {},", self.data.len())?;
        writeln!(f, "    center: {:?},", self.center)?;
        writeln!(f, "    bonds: [")?;
        for t in self.data.iter() {
            writeln!(f, "        {:?},", t.left_i())?;
        }
        if let Some(t) = self.data.last() {
            writeln!(f, "        {:?},", t.right_i())?;
        }
        writeln!(f, "    ],")?;
        write!(f, "}}")
    }
}

fn cap<S: Symmetry>(idx: Index<S>, max_bond_dim: usize) -> Index<S> {
    idx.iter().map(|(c, n)| (c, n.min(max_bond_dim))).collect()
}

/// Compute the bond indices of a chain over `phys` with total charge
/// `target`, keeping only sectors reachable from both ends and capping every
/// sector at `max_bond_dim`.
///
/// Returns `phys.len() + 1` indices, the first trivial and the last holding
/// `target` alone.
pub fn allowed_bonds<S: Symmetry>(
    phys: &[Index<S>],
    target: S::Charge,
    max_bond_dim: usize,
) -> MPSResult<Vec<Index<S>>>
{
    if phys.is_empty() { return Err(EmptySystem); }
    let n = phys.len();
    let mut from_left: Vec<Index<S>> = Vec::with_capacity(n + 1);
    from_left.push(Index::trivial());
    for p in phys.iter() {
        let next = cap(from_left[from_left.len() - 1].product(p), max_bond_dim);
        from_left.push(next);
    }
    let mut from_right: Vec<Index<S>> = vec![Index::new(); n + 1];
    from_right[n] = Index::from_sectors([(target, 1)]);
    for k in (0..n).rev() {
        from_right[k] = cap(from_right[k + 1].product(&phys[k].adjoin()), max_bond_dim);
    }
    let bonds: Vec<Index<S>>
        = from_left.iter().zip(from_right.iter())
        .map(|(l, r)| {
            l.iter()
                .filter_map(|(c, nl)| {
                    let nr = r.size_of_block(c);
                    (nr > 0).then_some((c, nl.min(nr)))
                })
                .collect()
        })
        .collect();
    if bonds.iter().any(|b| b.is_empty()) { return Err(UnreachableCharge); }
    Ok(bonds)
}

impl<S: Symmetry, A: Elem> MPS<S, A> {
    /// Create from a list of site tensors.
    ///
    /// Fails if the list is empty or neighboring tensors disagree on a bond.
    pub fn new(data: Vec<MPSTensor<S, A>>) -> MPSResult<Self> {
        if data.is_empty() { return Err(EmptySystem); }
        let mismatch = data.iter().tuple_windows()
            .position(|(a, b)| !a.right_i().weak_equal(b.left_i()));
        if let Some(k) = mismatch { return Err(BondMismatch(k + 1)); }
        Ok(Self { data, center: None })
    }

    /// Create a random state of total charge `target` over the physical
    /// indices `phys`, with every bond sector capped at `max_bond_dim`.
    pub fn random<R>(
        phys: &[Index<S>],
        target: S::Charge,
        max_bond_dim: usize,
        rng: &mut R,
    ) -> MPSResult<Self>
    where R: Rng + ?Sized
    {
        let bonds = allowed_bonds(phys, target, max_bond_dim)?;
        let data: Vec<MPSTensor<S, A>>
            = phys.iter().zip(bonds.iter().tuple_windows())
            .map(|(p, (l, r))| MPSTensor::random(p.clone(), l.clone(), r.clone(), &mut *rng))
            .collect();
        log::debug!(
            n = data.len(),
            max_bond = bonds.iter().map(|b| b.sum_of_sizes()).max().unwrap_or(0);
            "random MPS"
        );
        Ok(Self { data, center: None })
    }

    /// Return the number of sites.
    pub fn len(&self) -> usize { self.data.len() }

    /// Return `true` if the chain has no sites; never the case for a chain
    /// built through [`Self::new`] or [`Self::random`].
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Return the tensor at site `k`.
    pub fn get(&self, k: usize) -> Option<&MPSTensor<S, A>> { self.data.get(k) }

    /// Iterate over all site tensors.
    pub fn iter(&self) -> std::slice::Iter<'_, MPSTensor<S, A>> {
        self.data.iter()
    }

    /// Return the current orthogonality center, if known.
    pub fn center(&self) -> Option<usize> { self.center }

    pub(crate) fn set_center(&mut self, center: Option<usize>) {
        self.center = center.filter(|c| *c < self.data.len());
    }

    /// Return the total size of every bond, from the trivial left end to the
    /// right end.
    pub fn bond_dims(&self) -> Vec<usize> {
        self.data.iter()
            .map(|t| t.left_i().sum_of_sizes())
            .chain(self.data.last().map(|t| t.right_i().sum_of_sizes()))
            .collect()
    }

    /// Return the total charge carried by the right end.
    pub fn target(&self) -> Option<S::Charge> {
        self.data.last().and_then(|t| t.right_i().charges().next())
    }

    /// Return the tensor list.
    pub fn into_vec(self) -> Vec<MPSTensor<S, A>> { self.data }

    /// Replace sites `k` and `k + 1` after a two-site update, moving the
    /// orthogonality center to whichever of the pair is not normalized.
    ///
    /// Fails if the new pair does not fit into the chain.
    pub fn set_pair(
        &mut self,
        k: usize,
        left: MPSTensor<S, A>,
        right: MPSTensor<S, A>,
    ) -> MPSResult<()>
    {
        if k + 1 >= self.data.len() { return Err(OutOfBounds(k + 1)); }
        if !left.left_i().weak_equal(self.data[k].left_i()) {
            return Err(BondMismatch(k));
        }
        if !left.right_i().weak_equal(right.left_i()) {
            return Err(BondMismatch(k + 1));
        }
        if !right.right_i().weak_equal(self.data[k + 1].right_i()) {
            return Err(BondMismatch(k + 2));
        }
        self.center = match (left.normalization(), right.normalization()) {
            (Normalization::Left, _) => Some(k + 1),
            (_, Normalization::Right) => Some(k),
            _ => None,
        };
        self.data[k] = left;
        self.data[k + 1] = right;
        Ok(())
    }

    /// Bring the chain into mixed-canonical form around site `center`.
    pub fn canonize(&mut self, center: usize) -> MPSResult<()> {
        let n = self.data.len();
        if center >= n { return Err(OutOfBounds(center)); }
        for k in 0..center {
            let r = self.data[k].normalize_left(DecompMethod::QR)?;
            self.data[k + 1].multiply_from_left(&r)?;
        }
        for k in (center + 1..n).rev() {
            let l = self.data[k].normalize_right(DecompMethod::QR)?;
            self.data[k - 1].multiply_from_right(&l)?;
        }
        self.center = Some(center);
        Ok(())
    }

    /// Left-normalize every site, returning the norm of the state before
    /// normalization.
    pub fn normalize_left(&mut self) -> MPSResult<f64> {
        let n = self.data.len();
        for k in 0..n - 1 {
            let r = self.data[k].normalize_left(DecompMethod::QR)?;
            self.data[k + 1].multiply_from_left(&r)?;
        }
        let r = self.data[n - 1].normalize_left(DecompMethod::QR)?;
        self.center = Some(n - 1);
        Ok(absorb_phase(&mut self.data[n - 1], &r, Normalization::Left))
    }

    /// Right-normalize every site, returning the norm of the state before
    /// normalization.
    pub fn normalize_right(&mut self) -> MPSResult<f64> {
        for k in (1..self.data.len()).rev() {
            let l = self.data[k].normalize_right(DecompMethod::QR)?;
            self.data[k - 1].multiply_from_right(&l)?;
        }
        let l = self.data[0].normalize_right(DecompMethod::QR)?;
        self.center = Some(0);
        Ok(absorb_phase(&mut self.data[0], &l, Normalization::Right))
    }

    /// Compute `<self|other>`.
    pub fn overlap<E>(&self, other: &Self, engine: &E) -> MPSResult<A>
    where E: ContractionEngine<S, A>
    {
        if self.len() != other.len() {
            return Err(LengthMismatch(self.len(), other.len()));
        }
        let triv: Index<S> = Index::trivial();
        let mut env = BlockMatrix::identity(&triv, &triv);
        for (bra, ket) in self.data.iter().zip(other.data.iter()) {
            env = engine.overlap_left_step(bra, ket, &env)?;
        }
        Ok(env.trace())
    }

    /// Compute `sqrt(<self|self>)`.
    pub fn norm<E>(&self, engine: &E) -> MPSResult<f64>
    where E: ContractionEngine<S, A>
    {
        let nsq = dense::real_to_f64(self.overlap(self, engine)?.re());
        Ok(nsq.max(0.0).sqrt())
    }

    /// Compute `<self|mpo|self>` without dividing by the norm.
    pub fn expval<E>(&self, mpo: &MPO<S, A>, engine: &E) -> MPSResult<A>
    where E: ContractionEngine<S, A>
    {
        if self.len() != mpo.len() {
            return Err(LengthMismatch(self.len(), mpo.len()));
        }
        let mut env = Boundary::left_edge(self.data[0].left_i());
        for (t, w) in self.data.iter().zip(mpo.iter()) {
            env = engine.overlap_mpo_left_step(t, t, &env, w)?;
        }
        Ok(env.trace())
    }
}

impl<S: Symmetry, A: Elem> std::ops::Index<usize> for MPS<S, A> {
    type Output = MPSTensor<S, A>;

    fn index(&self, k: usize) -> &Self::Output { &self.data[k] }
}

// fold the sign (or phase) of a 1×1 end factor back into the end tensor and
// return its magnitude
fn absorb_phase<S, A>(
    t: &mut MPSTensor<S, A>,
    factor: &BlockMatrix<S, A>,
    normalization: Normalization,
) -> f64
where
    S: Symmetry,
    A: Elem,
{
    let Some(x) = factor.iter().next().and_then(|(_, b)| b.iter().next().copied())
        else { return 0.0; };
    let nrm = dense::real_to_f64(x.abs());
    if nrm > 0.0 {
        t.multiply_by_scalar(x / dense::elem_from_f64::<A>(nrm));
        t.set_normalization(normalization);
    }
    nrm
}
