//! Per-object revision history.
//!
//! Every runtime object is a sequence of revisions indexed by a generation
//! number. A kernel that writes an object appends a new (pending) revision; a
//! kernel that reads it captures the generation that was latest at submit
//! time. Old revisions are dropped as soon as nothing can read them anymore.

use std::{ collections::BTreeMap, fmt, sync::Arc };
use rustc_hash::FxHashSet as HashSet;
use serde::{ Deserialize, Serialize };
use crate::runtime::{
    RuntimeError,
    RuntimeResult,
    region::Region,
};

/// Opaque reference to a runtime-managed object.
///
/// Table slots are recycled once an object is released and drained; the
/// generation tells a stale handle apart from the slot's new occupant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    pub(crate) index: usize,
    pub(crate) gen: u32,
}

impl Handle {
    /// Return the numeric id of the handle.
    pub fn id(&self) -> usize { self.index }

    /// Return how many times the handle's slot was reused before it.
    pub fn generation(&self) -> u32 { self.gen }
}

/// Identifier of a submitted kernel.
pub type TaskId = u64;

/// Where an object's latest revision lives relative to a given rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locality {
    /// The rank owns the data.
    Local,
    /// The rank holds a fetched replica.
    Common,
    /// Reading the data on the rank requires a transfer.
    Remote,
}

pub(crate) enum Content<T> {
    /// Declared but never written; reads as `T::default()`.
    Empty,
    /// Waiting on its producing kernel.
    Pending,
    Ready(Arc<T>),
    Swapped(Region<T>),
    /// Moved into a successor revision.
    Consumed,
    Failed(String),
}

impl<T> fmt::Debug for Content<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Pending => write!(f, "Pending"),
            Self::Ready(_) => write!(f, "Ready"),
            Self::Swapped(r) => write!(f, "Swapped({:?})", r.state()),
            Self::Consumed => write!(f, "Consumed"),
            Self::Failed(msg) => write!(f, "Failed({msg})"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Revision<T> {
    pub(crate) content: Content<T>,
    pub(crate) owner: usize,
    pub(crate) replicas: HashSet<usize>,
    pub(crate) pending_readers: usize,
    pub(crate) pending_update: bool,
    pub(crate) last_use: u64,
}

impl<T> Revision<T> {
    pub(crate) fn new(content: Content<T>, owner: usize) -> Self {
        Self {
            content,
            owner,
            replicas: HashSet::default(),
            pending_readers: 0,
            pending_update: false,
            last_use: 0,
        }
    }

    pub(crate) fn pending(owner: usize) -> Self {
        Self::new(Content::Pending, owner)
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.content, Content::Pending)
    }

    /// Ranks that can read the revision without a transfer.
    pub(crate) fn holders(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.replicas.iter().copied().collect();
        out.push(self.owner);
        out.sort_unstable();
        out.dedup();
        out
    }

    pub(crate) fn locality(&self, rank: usize) -> Locality {
        if self.owner == rank {
            Locality::Local
        } else if self.replicas.contains(&rank) {
            Locality::Common
        } else {
            Locality::Remote
        }
    }

    fn is_idle(&self) -> bool {
        self.pending_readers == 0 && !self.pending_update && !self.is_pending()
    }
}

#[derive(Debug)]
pub(crate) struct Object<T> {
    revisions: BTreeMap<u64, Revision<T>>,
    latest: u64,
    next_gen: u64,
    released: bool,
    pub(crate) footprint: usize,
}

impl<T> Object<T> {
    pub(crate) fn new(first: Revision<T>, footprint: usize) -> Self {
        let revisions: BTreeMap<u64, Revision<T>> = [(0, first)].into_iter().collect();
        Self { revisions, latest: 0, next_gen: 1, released: false, footprint }
    }

    pub(crate) fn latest(&self) -> u64 { self.latest }

    pub(crate) fn revision(&self, gen: u64) -> Option<&Revision<T>> {
        self.revisions.get(&gen)
    }

    pub(crate) fn revision_mut(&mut self, gen: u64) -> Option<&mut Revision<T>> {
        self.revisions.get_mut(&gen)
    }

    pub(crate) fn latest_revision(&self) -> Option<&Revision<T>> {
        self.revisions.get(&self.latest)
    }

    pub(crate) fn latest_revision_mut(&mut self) -> Option<&mut Revision<T>> {
        self.revisions.get_mut(&self.latest)
    }

    /// Append a revision, making it the latest; returns its generation.
    pub(crate) fn push(&mut self, rev: Revision<T>) -> u64 {
        let gen = self.next_gen;
        self.next_gen += 1;
        self.revisions.insert(gen, rev);
        self.latest = gen;
        gen
    }

    /// Drop every revision that can no longer be read.
    pub(crate) fn collect(&mut self) {
        let latest = self.latest;
        let released = self.released;
        self.revisions.retain(|gen, rev| {
            !rev.is_idle() || (*gen == latest && !released)
        });
    }

    pub(crate) fn iter_revisions_mut(&mut self)
        -> impl Iterator<Item = (&u64, &mut Revision<T>)> + '_
    {
        self.revisions.iter_mut()
    }

    pub(crate) fn num_revisions(&self) -> usize { self.revisions.len() }
}

#[derive(Debug)]
struct Entry<T> {
    gen: u32,
    obj: Option<Object<T>>,
}

/// Arena of objects addressed by [`Handle`], with a free-list of drained
/// slots.
#[derive(Debug)]
pub(crate) struct ObjectTable<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
}

impl<T> Default for ObjectTable<T> {
    fn default() -> Self { Self { entries: Vec::new(), free: Vec::new() } }
}

impl<T> ObjectTable<T> {
    pub(crate) fn insert(&mut self, obj: Object<T>) -> Handle {
        if let Some(index) = self.free.pop() {
            if let Some(entry) = self.entries.get_mut(index) {
                entry.gen = entry.gen.wrapping_add(1);
                entry.obj = Some(obj);
                return Handle { index, gen: entry.gen };
            }
        }
        self.entries.push(Entry { gen: 0, obj: Some(obj) });
        Handle { index: self.entries.len() - 1, gen: 0 }
    }

    /// Return the number of slots, occupied or free.
    pub(crate) fn len(&self) -> usize { self.entries.len() }

    /// Return the number of objects not yet released.
    pub(crate) fn live(&self) -> usize {
        self.entries.iter()
            .filter(|entry| entry.obj.as_ref().is_some_and(|obj| !obj.released))
            .count()
    }

    /// Return a live object.
    pub(crate) fn get(&self, h: Handle) -> RuntimeResult<&Object<T>> {
        self.get_any(h)
            .filter(|obj| !obj.released)
            .ok_or(RuntimeError::UnknownHandle(h))
    }

    /// Return a live object mutably.
    pub(crate) fn get_mut(&mut self, h: Handle) -> RuntimeResult<&mut Object<T>> {
        self.get_any_mut(h)
            .filter(|obj| !obj.released)
            .ok_or(RuntimeError::UnknownHandle(h))
    }

    /// Return an object even if it was released, so that in-flight kernels
    /// can still finish against it.
    pub(crate) fn get_any_mut(&mut self, h: Handle) -> Option<&mut Object<T>> {
        self.entries.get_mut(h.index)
            .filter(|entry| entry.gen == h.gen)
            .and_then(|entry| entry.obj.as_mut())
    }

    pub(crate) fn get_any(&self, h: Handle) -> Option<&Object<T>> {
        self.entries.get(h.index)
            .filter(|entry| entry.gen == h.gen)
            .and_then(|entry| entry.obj.as_ref())
    }

    pub(crate) fn release(&mut self, h: Handle) -> RuntimeResult<()> {
        let obj = self.get_mut(h)?;
        obj.released = true;
        self.collect(h);
        Ok(())
    }

    /// Drop unreadable revisions of `h`, freeing its slot once it is
    /// released and nothing is left.
    pub(crate) fn collect(&mut self, h: Handle) {
        let Some(entry) = self.entries.get_mut(h.index) else { return; };
        if entry.gen != h.gen { return; }
        let Some(obj) = entry.obj.as_mut() else { return; };
        obj.collect();
        if obj.released && obj.num_revisions() == 0 {
            entry.obj = None;
            self.free.push(h.index);
        }
    }

    pub(crate) fn iter_mut(&mut self)
        -> impl Iterator<Item = (Handle, &mut Object<T>)> + '_
    {
        self.entries.iter_mut().enumerate()
            .filter_map(|(index, entry)| {
                let gen = entry.gen;
                entry.obj.as_mut()
                    .filter(|obj| !obj.released)
                    .map(|obj| (Handle { index, gen }, obj))
            })
    }
}
