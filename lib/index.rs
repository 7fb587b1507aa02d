//! Quantum-number graded vector spaces.
//!
//! An [`Index`] decomposes a vector space into symmetry sectors, each labeled
//! by a charge and carrying a block size. A [`DualIndex`] lists the allowed
//! (row-sector, column-sector) pairs of a block-sparse matrix. A
//! [`ProductBasis`] records where each pair of sectors lands inside the fused
//! sectors of a tensor product, which is what every reshape between matrix
//! pairings is built on.
//!
//! ```
//! use dmrg_core::index::{ Index, ProductBasis };
//! use dmrg_core::symmetry::{ Symmetry, U1 };
//!
//! let phys: Index<U1> = Index::from_sectors([(-1, 1), (1, 1)]);
//! let left: Index<U1> = Index::from_sectors([(0, 2), (2, 1)]);
//! let pb = ProductBasis::new(&phys, &left, |s, l| U1::fuse(l, s));
//! assert_eq!(pb.size(1), 3); // (s = -1, l = 2) and (s = 1, l = 0)
//! assert_eq!(pb.offset(-1, 2), Some(0));
//! assert_eq!(pb.offset(1, 0), Some(1));
//! ```

use std::{ fmt, ops::Range };
use rustc_hash::FxHashMap as HashMap;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::symmetry::Symmetry;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Returned when attempting to insert a charge pair that already exists
    /// in a [`DualIndex`].
    #[error("error in DualIndex::insert: duplicate charge pair {0}")]
    DuplicatePair(String),
}
use IndexError::*;
pub type IndexResult<T> = Result<T, IndexError>;

/// An ordered collection of `(charge, block size)` pairs with unique charges.
///
/// Sectors are kept sorted by charge. A charge that is not present has size
/// zero.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Index<S: Symmetry> {
    sectors: Vec<(S::Charge, usize)>,
}

impl<S: Symmetry> Default for Index<S> {
    fn default() -> Self { Self { sectors: Vec::new() } }
}

impl<S: Symmetry> Index<S> {
    /// Create a new, empty index.
    pub fn new() -> Self { Self::default() }

    /// Create a one-dimensional index holding only the identity charge.
    pub fn trivial() -> Self {
        Self { sectors: vec![(S::identity(), 1)] }
    }

    /// Create from a collection of sectors.
    ///
    /// Sizes of repeated charges are summed; zero-size sectors are dropped.
    pub fn from_sectors<I>(sectors: I) -> Self
    where I: IntoIterator<Item = (S::Charge, usize)>
    {
        let mut index = Self::new();
        sectors.into_iter()
            .for_each(|(c, n)| { index.grow(c, n); });
        index
    }

    /// Insert a new sector.
    ///
    /// Returns `false` and leaves `self` unchanged if the charge is already
    /// present.
    pub fn insert(&mut self, charge: S::Charge, size: usize) -> bool {
        match self.search(charge) {
            Ok(_) => false,
            Err(k) => {
                if size > 0 { self.sectors.insert(k, (charge, size)); }
                true
            },
        }
    }

    /// Add `size` to the sector for `charge`, creating it if necessary.
    pub fn grow(&mut self, charge: S::Charge, size: usize) {
        if size == 0 { return; }
        match self.search(charge) {
            Ok(k) => { self.sectors[k].1 += size; },
            Err(k) => { self.sectors.insert(k, (charge, size)); },
        }
    }

    /// Set the sector for `charge` to the larger of its current size and
    /// `size`.
    pub fn grow_to(&mut self, charge: S::Charge, size: usize) {
        if size == 0 { return; }
        match self.search(charge) {
            Ok(k) => { self.sectors[k].1 = self.sectors[k].1.max(size); },
            Err(k) => { self.sectors.insert(k, (charge, size)); },
        }
    }

    fn search(&self, charge: S::Charge) -> Result<usize, usize> {
        self.sectors.binary_search_by(|(c, _)| c.cmp(&charge))
    }

    /// Return `true` if `charge` has a sector.
    pub fn has(&self, charge: S::Charge) -> bool {
        self.search(charge).is_ok()
    }

    /// Return the position of the sector for `charge`.
    pub fn position(&self, charge: S::Charge) -> Option<usize> {
        self.search(charge).ok()
    }

    /// Return the size of the sector for `charge`, or zero.
    pub fn size_of_block(&self, charge: S::Charge) -> usize {
        self.search(charge).map(|k| self.sectors[k].1).unwrap_or(0)
    }

    /// Return the total dimension of the space.
    pub fn sum_of_sizes(&self) -> usize {
        self.sectors.iter().map(|(_, n)| *n).sum()
    }

    /// Return the number of sectors.
    pub fn len(&self) -> usize { self.sectors.len() }

    /// Return `true` if there are no sectors.
    pub fn is_empty(&self) -> bool { self.sectors.is_empty() }

    /// Return the `k`-th sector.
    pub fn get(&self, k: usize) -> Option<(S::Charge, usize)> {
        self.sectors.get(k).copied()
    }

    /// Iterate over all sectors in charge order.
    pub fn iter(&self) -> impl Iterator<Item = (S::Charge, usize)> + '_ {
        self.sectors.iter().copied()
    }

    /// Iterate over all charges in order.
    pub fn charges(&self) -> impl Iterator<Item = S::Charge> + '_ {
        self.sectors.iter().map(|(c, _)| *c)
    }

    /// Return `true` if `self` and `other` assign the same size to every
    /// charge, treating absent charges as size zero.
    pub fn weak_equal(&self, other: &Self) -> bool {
        self.sectors.iter().filter(|(_, n)| *n > 0)
            .eq(other.sectors.iter().filter(|(_, n)| *n > 0))
    }

    /// Remove every sector whose charge is absent from `other`.
    pub fn common_subset(&mut self, other: &Self) {
        self.sectors.retain(|(c, _)| other.has(*c));
    }

    /// Return the dual index, with every charge inverted.
    pub fn adjoin(&self) -> Self {
        Self::from_sectors(self.iter().map(|(c, n)| (S::inverse(c), n)))
    }

    /// Return the fused tensor product of `self` and `other`, with sizes of
    /// sectors fusing to the same charge summed.
    pub fn product(&self, other: &Self) -> Self {
        let mut out = Self::new();
        for (ca, na) in self.iter() {
            for (cb, nb) in other.iter() {
                out.grow(S::fuse(ca, cb), na * nb);
            }
        }
        out
    }
}

impl<S: Symmetry> fmt::Debug for Index<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index")?;
        f.debug_list()
            .entries(self.sectors.iter().map(|(c, n)| (c, n)))
            .finish()
    }
}

impl<S: Symmetry> FromIterator<(S::Charge, usize)> for Index<S> {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = (S::Charge, usize)>
    {
        Self::from_sectors(iter)
    }
}

/// One allowed block of a block-sparse matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DualIndexEntry<C> {
    /// Left (row) charge.
    pub lc: C,
    /// Right (column) charge.
    pub rc: C,
    /// Left (row) block size.
    pub ls: usize,
    /// Right (column) block size.
    pub rs: usize,
}

/// An ordered collection of allowed `(left charge, right charge)` blocks,
/// unique by charge pair and sorted lexicographically.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DualIndex<S: Symmetry> {
    entries: Vec<DualIndexEntry<S::Charge>>,
}

impl<S: Symmetry> Default for DualIndex<S> {
    fn default() -> Self { Self { entries: Vec::new() } }
}

impl<S: Symmetry> DualIndex<S> {
    /// Create a new, empty dual index.
    pub fn new() -> Self { Self::default() }

    /// Return the number of blocks.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Return `true` if there are no blocks.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Return the `k`-th entry.
    pub fn get(&self, k: usize) -> Option<&DualIndexEntry<S::Charge>> {
        self.entries.get(k)
    }

    pub(crate) fn get_mut(&mut self, k: usize)
        -> Option<&mut DualIndexEntry<S::Charge>>
    {
        self.entries.get_mut(k)
    }

    /// Iterate over all entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, DualIndexEntry<S::Charge>> {
        self.entries.iter()
    }

    /// Binary search for a charge pair, returning `Ok` with its position if
    /// present and `Err` with the insertion point otherwise.
    pub fn search(&self, lc: S::Charge, rc: S::Charge) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| (e.lc, e.rc).cmp(&(lc, rc)))
    }

    /// Return the position of a charge pair.
    pub fn position(&self, lc: S::Charge, rc: S::Charge) -> Option<usize> {
        self.search(lc, rc).ok()
    }

    /// Return `true` if a charge pair is present.
    pub fn has(&self, lc: S::Charge, rc: S::Charge) -> bool {
        self.search(lc, rc).is_ok()
    }

    /// Return the range of positions of all entries with left charge `lc`.
    pub fn left_range(&self, lc: S::Charge) -> Range<usize> {
        let start = self.entries.partition_point(|e| e.lc < lc);
        let end = self.entries.partition_point(|e| e.lc <= lc);
        start..end
    }

    /// Insert a new entry at its sorted position.
    ///
    /// Fails if the charge pair is already present.
    pub fn insert(&mut self, entry: DualIndexEntry<S::Charge>)
        -> IndexResult<usize>
    {
        match self.search(entry.lc, entry.rc) {
            Ok(_) => Err(DuplicatePair(format!("({:?}, {:?})", entry.lc, entry.rc))),
            Err(k) => {
                self.entries.insert(k, entry);
                Ok(k)
            },
        }
    }

    /// Remove the `k`-th entry.
    pub fn remove(&mut self, k: usize) -> DualIndexEntry<S::Charge> {
        self.entries.remove(k)
    }

    /// Project onto the row sectors.
    ///
    /// Where several blocks share a left charge, the largest row size is used.
    pub fn left_index(&self) -> Index<S> {
        let mut out = Index::new();
        self.entries.iter().for_each(|e| { out.grow_to(e.lc, e.ls); });
        out
    }

    /// Project onto the column sectors.
    ///
    /// Where several blocks share a right charge, the largest column size is
    /// used.
    pub fn right_index(&self) -> Index<S> {
        let mut out = Index::new();
        self.entries.iter().for_each(|e| { out.grow_to(e.rc, e.rs); });
        out
    }
}

impl<S: Symmetry> fmt::Debug for DualIndex<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DualIndex")?;
        f.debug_list()
            .entries(
                self.entries.iter()
                    .map(|e| format!("{:?}x{:?}: {}x{}", e.lc, e.rc, e.ls, e.rs))
            )
            .finish()
    }
}

/// Layout of the fused sectors of a tensor product `a ⊗ b`.
///
/// For every pair of sectors `(ca, cb)`, the fused charge is given by a
/// caller-supplied rule and the pair occupies a contiguous range inside the
/// fused sector. Pairs are laid out in charge order, `a` outer and `b` inner.
/// Within a pair's range, element `(i, j)` of `a ⊗ b` sits at offset
/// `i * size_b + j`.
#[derive(Clone, Debug)]
pub struct ProductBasis<S: Symmetry> {
    offsets: HashMap<(S::Charge, S::Charge), usize>,
    sizes: HashMap<S::Charge, usize>,
    fused: Index<S>,
}

impl<S: Symmetry> ProductBasis<S> {
    /// Build the layout of `a ⊗ b` under the fuse rule `fuse`.
    pub fn new<F>(a: &Index<S>, b: &Index<S>, fuse: F) -> Self
    where F: Fn(S::Charge, S::Charge) -> S::Charge
    {
        let mut offsets: HashMap<(S::Charge, S::Charge), usize>
            = HashMap::default();
        let mut sizes: HashMap<S::Charge, usize> = HashMap::default();
        for (ca, na) in a.iter() {
            for (cb, nb) in b.iter() {
                let cf = fuse(ca, cb);
                let size = sizes.entry(cf).or_insert(0);
                offsets.insert((ca, cb), *size);
                *size += na * nb;
            }
        }
        let fused = sizes.iter().map(|(c, n)| (*c, *n)).collect();
        Self { offsets, sizes, fused }
    }

    /// Layout for left-paired site tensors: physical ⊗ left, fused as
    /// `fuse(left, phys)`.
    pub fn left_paired(phys: &Index<S>, left: &Index<S>) -> Self {
        Self::new(phys, left, |s, l| S::fuse(l, s))
    }

    /// Layout for right-paired site tensors: physical ⊗ right, fused as
    /// `fuse(right, inverse(phys))`.
    pub fn right_paired(phys: &Index<S>, right: &Index<S>) -> Self {
        Self::new(phys, right, |s, r| S::difference(r, s))
    }

    /// Return the offset of the `(ca, cb)` pair inside its fused sector.
    pub fn offset(&self, ca: S::Charge, cb: S::Charge) -> Option<usize> {
        self.offsets.get(&(ca, cb)).copied()
    }

    /// Return the total size of a fused sector, or zero.
    pub fn size(&self, fused: S::Charge) -> usize {
        self.sizes.get(&fused).copied().unwrap_or(0)
    }

    /// Return the fused index.
    pub fn fused(&self) -> &Index<S> { &self.fused }
}
