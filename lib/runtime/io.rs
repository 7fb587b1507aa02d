//! Swap storage for out-of-core regions.
//!
//! Every region occupies one slot, identified by a per-rank slot id and the
//! rank number. I/O is issued through an [`IoBackend`] and returns an
//! [`IoTicket`] that is joined only when the data is actually needed.

use std::{
    fmt,
    fs,
    io,
    path::{ Path, PathBuf },
    sync::{ Mutex, atomic::{ AtomicBool, AtomicUsize, Ordering } },
    thread,
};
use rustc_hash::FxHashMap as HashMap;
use serde::{ Deserialize, Serialize };

/// Storage location of one region.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub id: usize,
    pub rank: usize,
}

impl Slot {
    /// Name of the swap file backing this slot.
    pub fn file_name(&self) -> String { format!("{}.{}", self.id, self.rank) }
}

/// Handle to an I/O operation that may still be running.
#[derive(Debug)]
pub enum IoTicket {
    Ready(io::Result<Vec<u8>>),
    Running(thread::JoinHandle<io::Result<Vec<u8>>>),
}

impl IoTicket {
    /// Return `true` if waiting on the ticket would not block.
    pub fn is_finished(&self) -> bool {
        match self {
            Self::Ready(_) => true,
            Self::Running(th) => th.is_finished(),
        }
    }

    /// Block until the operation completes, returning the bytes read (empty
    /// for writes).
    pub fn wait(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Ready(res) => res,
            Self::Running(th) => {
                th.join()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "I/O thread panicked"))?
            },
        }
    }
}

/// Capability to store and retrieve the bytes of a slot.
pub trait IoBackend: Send + Sync + fmt::Debug {
    /// Begin writing `bytes` to `slot`.
    fn write(&self, slot: Slot, bytes: Vec<u8>) -> IoTicket;

    /// Begin reading the contents of `slot`.
    fn read(&self, slot: Slot) -> IoTicket;

    /// Forget the contents of `slot`.
    fn discard(&self, slot: Slot);
}

/// Backend writing one file per slot into a directory, with all I/O on
/// background threads.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create a backend in `dir`, creating the directory if needed.
    pub fn new<P>(dir: P) -> io::Result<Self>
    where P: AsRef<Path>
    {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf() })
    }

    /// Return the path of the file backing `slot`.
    pub fn path(&self, slot: Slot) -> PathBuf { self.dir.join(slot.file_name()) }
}

impl IoBackend for FileBackend {
    fn write(&self, slot: Slot, bytes: Vec<u8>) -> IoTicket {
        let path = self.path(slot);
        IoTicket::Running(thread::spawn(move || {
            fs::write(path, bytes).map(|_| Vec::new())
        }))
    }

    fn read(&self, slot: Slot) -> IoTicket {
        let path = self.path(slot);
        IoTicket::Running(thread::spawn(move || fs::read(path)))
    }

    fn discard(&self, slot: Slot) {
        fs::remove_file(self.path(slot)).ok();
    }
}

/// Synchronous in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: Mutex<HashMap<Slot, Vec<u8>>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Create a backend whose writes all fail, as with a full disk.
    pub fn failing() -> Self {
        let backend = Self::default();
        backend.set_fail_writes(true);
        backend
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of writes issued so far.
    pub fn writes(&self) -> usize { self.writes.load(Ordering::Relaxed) }

    /// Number of reads issued so far.
    pub fn reads(&self) -> usize { self.reads.load(Ordering::Relaxed) }

    /// Return `true` if `slot` holds data.
    pub fn contains(&self, slot: Slot) -> bool {
        self.store.lock()
            .map(|store| store.contains_key(&slot))
            .unwrap_or(false)
    }
}

impl IoBackend for MemoryBackend {
    fn write(&self, slot: Slot, bytes: Vec<u8>) -> IoTicket {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return IoTicket::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                format!("write to slot {} refused", slot.file_name()),
            )));
        }
        match self.store.lock() {
            Ok(mut store) => {
                store.insert(slot, bytes);
                IoTicket::Ready(Ok(Vec::new()))
            },
            Err(_) => IoTicket::Ready(Err(poisoned())),
        }
    }

    fn read(&self, slot: Slot) -> IoTicket {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let res = match self.store.lock() {
            Ok(store) => {
                store.get(&slot).cloned()
                    .ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("slot {} is empty", slot.file_name()),
                        )
                    })
            },
            Err(_) => Err(poisoned()),
        };
        IoTicket::Ready(res)
    }

    fn discard(&self, slot: Slot) {
        if let Ok(mut store) = self.store.lock() { store.remove(&slot); }
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "memory backend lock poisoned")
}

/// Per-rank allocator of slot ids with a free-list.
#[derive(Debug)]
pub struct SlotAllocator {
    rank: usize,
    inner: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    next: usize,
    free: Vec<usize>,
}

impl SlotAllocator {
    pub fn new(rank: usize) -> Self {
        Self { rank, inner: Mutex::new(SlotState::default()) }
    }

    /// Return the rank whose slots are handed out.
    pub fn rank(&self) -> usize { self.rank }

    /// Take a slot, recycling freed ids first.
    pub fn acquire(&self) -> Slot {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = match inner.free.pop() {
            Some(id) => id,
            None => {
                inner.next += 1;
                inner.next - 1
            },
        };
        Slot { id, rank: self.rank }
    }

    /// Return a slot to the free-list.
    pub fn release(&self, slot: Slot) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if slot.rank == self.rank && !inner.free.contains(&slot.id) {
            inner.free.push(slot.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_recycled() {
        let alloc = SlotAllocator::new(3);
        let a = alloc.acquire();
        let b = alloc.acquire();
        assert_eq!((a.id, b.id), (0, 1));
        assert_eq!(b.file_name(), "1.3");
        alloc.release(a);
        assert_eq!(alloc.acquire(), a);
        assert_eq!(alloc.acquire().id, 2);
    }

    #[test]
    fn memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        let slot = Slot { id: 0, rank: 0 };
        backend.write(slot, vec![1, 2, 3]).wait().unwrap();
        assert!(backend.contains(slot));
        assert_eq!(backend.read(slot).wait().unwrap(), vec![1, 2, 3]);
        backend.discard(slot);
        assert!(backend.read(slot).wait().is_err());
        assert_eq!((backend.writes(), backend.reads()), (1, 2));
    }

    #[test]
    fn failing_backend_refuses_writes() {
        let backend = MemoryBackend::failing();
        let slot = Slot { id: 1, rank: 0 };
        assert!(backend.write(slot, vec![1]).wait().is_err());
        assert!(!backend.contains(slot));
        backend.set_fail_writes(false);
        backend.write(slot, vec![1]).wait().unwrap();
        assert!(backend.contains(slot));
    }

    #[test]
    fn file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let slot = Slot { id: 4, rank: 1 };
        backend.write(slot, vec![9; 16]).wait().unwrap();
        assert!(dir.path().join("4.1").exists());
        assert_eq!(backend.read(slot).wait().unwrap(), vec![9; 16]);
        backend.discard(slot);
        assert!(!dir.path().join("4.1").exists());
    }
}
