//! In-process matrix runtime.
//!
//! A [`Runtime`] owns a set of objects addressed by [`Handle`]s and executes
//! deferred [`Kernel`]s over them. Ranks are simulated in-process: each rank
//! has its own ready queue and its own pool of worker threads that steal
//! from one another, and every object revision is owned by one rank.
//! Reading a revision on another rank counts as a transfer and leaves a
//! replica behind.
//!
//! Ordering follows the revision graph only: a kernel reading a handle sees
//! every write submitted to that handle before it, and kernels on unrelated
//! handles run in any order. [`Runtime::sync`] drains everything.
//!
//! With `threads_per_rank == 0` no threads are spawned and kernels run on
//! the caller whenever it blocks in [`sync`][Runtime::sync] or
//! [`load`][Runtime::load].

pub mod kernel;
pub mod revision;
pub mod placement;
pub mod region;
pub mod io;

use std::{
    iter,
    panic::{ self, AssertUnwindSafe },
    path::Path,
    sync::{ Arc, Condvar, Mutex, MutexGuard, atomic::{ AtomicBool, Ordering } },
    thread,
    time::Duration,
};
use crossbeam::{
    deque::{ Injector, Steal, Stealer, Worker },
    sync::{ Parker, Unparker },
};
use ndarray as nd;
use rustc_hash::FxHashMap as HashMap;
use serde::{ Serialize, de::DeserializeOwned };
use thiserror::Error;
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    boundary::Boundary,
    symmetry::Symmetry,
};
pub use kernel::{ Complexity, FnKernel, Kernel, KernelError, KernelResult, OutputMode };
pub use revision::{ Handle, Locality, TaskId };
pub use region::{ Region, RegionError, RegionState };
pub use io::{ FileBackend, IoBackend, MemoryBackend, SlotAllocator };
use revision::{ Content, Object, ObjectTable, Revision };
use placement::InputSite;

/// Rank on which host-side accesses are accounted.
pub const HOST_RANK: usize = 0;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Returned when a handle was never created or has been released.
    #[error("error in runtime: unknown or released handle {0:?}")]
    UnknownHandle(Handle),

    /// Returned when a rank number exceeds the configured number of ranks.
    #[error("error in runtime: rank {0} out of range for {1} ranks")]
    BadRank(usize, usize),

    /// Returned when a kernel lists the same output twice.
    #[error("error in runtime: kernel '{0}' writes handle {1:?} more than once")]
    DuplicateOutput(String, Handle),

    /// Returned by `sync` when a kernel body failed.
    #[error("error in kernel '{name}': {msg}")]
    KernelFailed { name: String, msg: String },

    /// Returned when reading a handle whose producer failed.
    #[error("error in runtime: handle {0:?} depends on a failed kernel")]
    Poisoned(Handle),

    /// Returned when a worker thread has died.
    #[error("error in runtime: a worker thread exited unexpectedly")]
    DeadWorker,

    #[error("error in runtime: {0}")]
    RegionError(#[from] RegionError),
}
use RuntimeError::*;
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Data that can be managed by a [`Runtime`].
pub trait Payload
where Self: Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Approximate size in bytes.
    fn footprint(&self) -> usize;
}

impl<S, A> Payload for BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    fn footprint(&self) -> usize { BlockMatrix::footprint(self) }
}

impl<S, A> Payload for Boundary<S, A>
where
    S: Symmetry,
    A: Elem,
{
    fn footprint(&self) -> usize { Boundary::footprint(self) }
}

impl<A> Payload for nd::Array2<A>
where A: Elem + Default
{
    fn footprint(&self) -> usize { self.len() * std::mem::size_of::<A>() }
}

/// Swap settings for the runtime.
#[derive(Clone, Debug)]
pub struct OutOfCoreConfig {
    /// Resident bytes above which idle objects are swapped out at `sync`.
    pub budget: usize,
    pub backend: Arc<dyn IoBackend>,
}

impl OutOfCoreConfig {
    pub fn new(budget: usize, backend: Arc<dyn IoBackend>) -> Self {
        Self { budget, backend }
    }

    /// Swap into process memory; mostly useful for tests.
    pub fn in_memory(budget: usize) -> Self {
        Self::new(budget, Arc::new(MemoryBackend::new()))
    }

    /// Swap into files under `dir`.
    pub fn on_disk<P>(budget: usize, dir: P) -> std::io::Result<Self>
    where P: AsRef<Path>
    {
        Ok(Self::new(budget, Arc::new(FileBackend::new(dir)?)))
    }
}

/// Runtime settings.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Number of simulated ranks.
    pub ranks: usize,
    /// Worker threads per rank; zero runs kernels on the caller.
    pub threads_per_rank: usize,
    /// Weight of queued work against missing input bytes in placement.
    pub load_weight: f64,
    pub out_of_core: Option<OutOfCoreConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ranks: 1,
            threads_per_rank: num_cpus::get(),
            load_weight: 1.0,
            out_of_core: None,
        }
    }
}

impl RuntimeConfig {
    /// One rank, no worker threads.
    pub fn single_threaded() -> Self {
        Self { threads_per_rank: 0, ..Self::default() }
    }

    pub fn with_ranks(mut self, ranks: usize) -> Self {
        self.ranks = ranks.max(1);
        self
    }

    pub fn with_threads_per_rank(mut self, threads: usize) -> Self {
        self.threads_per_rank = threads;
        self
    }

    pub fn with_load_weight(mut self, load_weight: f64) -> Self {
        self.load_weight = load_weight;
        self
    }

    pub fn with_out_of_core(mut self, out_of_core: OutOfCoreConfig) -> Self {
        self.out_of_core = Some(out_of_core);
        self
    }
}

/// Counters describing what the runtime has done.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub submitted: usize,
    pub executed: usize,
    pub failed: usize,
    /// Reads of a revision on a rank that held no copy of it.
    pub transfers: usize,
    pub transfer_bytes: usize,
    /// Updates that had to copy a still-referenced revision.
    pub copies: usize,
    /// Updates that took over the previous buffer in place.
    pub reuses: usize,
    pub swap_outs: usize,
    pub swap_ins: usize,
}

#[derive(Clone, Debug)]
struct OutputSlot {
    handle: Handle,
    gen: u64,
    mode: OutputMode,
    prev: u64,
}

#[derive(Clone, Debug)]
struct TaskMeta {
    id: TaskId,
    name: String,
    rank: usize,
    cost: f64,
    inputs: Vec<(Handle, u64)>,
    outputs: Vec<OutputSlot>,
}

struct PendingTask<T> {
    meta: TaskMeta,
    kernel: Box<dyn Kernel<T>>,
    unresolved: usize,
}

struct ReadyTask<T> {
    meta: TaskMeta,
    kernel: Box<dyn Kernel<T>>,
    inputs: Vec<Arc<T>>,
    outputs: Vec<T>,
}

struct State<T> {
    objects: ObjectTable<T>,
    pending: HashMap<TaskId, PendingTask<T>>,
    waiters: HashMap<(Handle, u64), Vec<TaskId>>,
    next_task: TaskId,
    outstanding: usize,
    queued_cost: Vec<f64>,
    first_error: Option<RuntimeError>,
    stats: RuntimeStats,
    clock: u64,
    slots: Vec<Arc<SlotAllocator>>,
}

impl<T: Payload> State<T> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn is_pending(&self, h: Handle, gen: u64) -> bool {
        self.objects.get_any(h)
            .and_then(|obj| obj.revision(gen))
            .is_some_and(|rev| rev.is_pending())
    }

    // materialize revision `gen` of `h` for reading on `rank`
    fn fetch(&mut self, h: Handle, gen: u64, rank: usize) -> Result<Arc<T>, String> {
        let now = self.tick();
        let State { objects, stats, .. } = self;
        let obj = objects.get_any_mut(h).ok_or("object is gone")?;
        let footprint = obj.footprint;
        let rev = obj.revision_mut(gen).ok_or("revision is gone")?;
        let arc = match std::mem::replace(&mut rev.content, Content::Consumed) {
            Content::Ready(arc) => arc,
            Content::Empty => Arc::new(T::default()),
            Content::Swapped(region) => {
                stats.swap_ins += 1;
                match region.into_inner() {
                    Ok(value) => Arc::new(value),
                    Err(err) => {
                        rev.content = Content::Failed(err.to_string());
                        return Err(err.to_string());
                    },
                }
            },
            Content::Failed(msg) => {
                rev.content = Content::Failed(msg.clone());
                return Err(msg);
            },
            other => {
                rev.content = other;
                return Err("revision is not materialized".to_string());
            },
        };
        rev.content = Content::Ready(arc.clone());
        rev.last_use = now;
        if rev.locality(rank) == Locality::Remote {
            stats.transfers += 1;
            stats.transfer_bytes += footprint;
            rev.replicas.insert(rank);
        }
        Ok(arc)
    }

    // take revision `gen` of `h` as the starting value of a new revision
    // written on `rank`, in place if nothing else can observe it
    fn take_for_update(&mut self, h: Handle, gen: u64, rank: usize)
        -> Result<T, String>
    {
        let State { objects, stats, .. } = self;
        let obj = objects.get_any_mut(h).ok_or("object is gone")?;
        let footprint = obj.footprint;
        let rev = obj.revision_mut(gen).ok_or("revision is gone")?;
        rev.pending_update = false;
        if rev.pending_readers == 0 {
            let remote = rev.locality(rank) == Locality::Remote;
            let taken = match std::mem::replace(&mut rev.content, Content::Consumed) {
                Content::Ready(arc) => {
                    match Arc::try_unwrap(arc) {
                        Ok(value) => {
                            stats.reuses += 1;
                            Some(value)
                        },
                        Err(arc) => {
                            rev.content = Content::Ready(arc);
                            None
                        },
                    }
                },
                Content::Empty => Some(T::default()),
                Content::Swapped(region) => {
                    stats.swap_ins += 1;
                    stats.reuses += 1;
                    Some(region.into_inner().map_err(|e| e.to_string())?)
                },
                other => {
                    rev.content = other;
                    None
                },
            };
            if let Some(value) = taken {
                if remote {
                    stats.transfers += 1;
                    stats.transfer_bytes += footprint;
                }
                return Ok(value);
            }
        }
        let arc = self.fetch(h, gen, rank)?;
        self.stats.copies += 1;
        Ok((*arc).clone())
    }

    fn gather(&mut self, meta: &TaskMeta) -> Result<(Vec<Arc<T>>, Vec<T>), String> {
        let mut inputs: Vec<Arc<T>> = Vec::with_capacity(meta.inputs.len());
        for (h, gen) in meta.inputs.iter() {
            inputs.push(self.fetch(*h, *gen, meta.rank)?);
        }
        let mut outputs: Vec<T> = Vec::with_capacity(meta.outputs.len());
        for slot in meta.outputs.iter() {
            let value = match slot.mode {
                OutputMode::Write => T::default(),
                OutputMode::Update => {
                    self.take_for_update(slot.handle, slot.prev, meta.rank)?
                },
            };
            outputs.push(value);
        }
        Ok((inputs, outputs))
    }

    fn prepare(&mut self, task: PendingTask<T>) -> Result<ReadyTask<T>, (TaskMeta, String)> {
        let PendingTask { meta, kernel, .. } = task;
        match self.gather(&meta) {
            Ok((inputs, outputs)) => Ok(ReadyTask { meta, kernel, inputs, outputs }),
            Err(msg) => Err((meta, msg)),
        }
    }

    fn resident_bytes(&mut self) -> usize {
        let mut total = 0;
        for (_, obj) in self.objects.iter_mut() {
            let footprint = obj.footprint;
            if obj.latest_revision().is_some_and(|rev| matches!(rev.content, Content::Ready(_))) {
                total += footprint;
            }
        }
        total
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    queues: Vec<Injector<ReadyTask<T>>>,
    unparkers: Vec<Vec<Unparker>>,
    shutdown: AtomicBool,
    config: RuntimeConfig,
}

impl<T: Payload> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, st: &mut State<T>, task: PendingTask<T>) {
        match st.prepare(task) {
            Ok(ready) => {
                let rank = ready.meta.rank;
                self.queues[rank].push(ready);
                self.unparkers[rank].iter().for_each(|u| u.unpark());
            },
            Err((meta, msg)) => {
                self.complete(st, meta, Err(msg));
            },
        }
    }

    fn wake(&self, st: &mut State<T>, h: Handle, gen: u64) {
        let Some(ids) = st.waiters.remove(&(h, gen)) else { return; };
        for id in ids {
            let ready = match st.pending.get_mut(&id) {
                Some(task) => {
                    task.unresolved -= 1;
                    task.unresolved == 0
                },
                None => false,
            };
            if ready {
                if let Some(task) = st.pending.remove(&id) {
                    self.dispatch(st, task);
                }
            }
        }
    }

    fn complete(&self, st: &mut State<T>, meta: TaskMeta, result: Result<Vec<T>, String>) {
        st.outstanding -= 1;
        st.queued_cost[meta.rank] = (st.queued_cost[meta.rank] - meta.cost).max(0.0);
        let now = st.tick();
        for (h, gen) in meta.inputs.iter() {
            if let Some(rev) = st.objects.get_any_mut(*h).and_then(|o| o.revision_mut(*gen)) {
                rev.pending_readers = rev.pending_readers.saturating_sub(1);
            }
        }
        match result {
            Ok(values) => {
                st.stats.executed += 1;
                log::debug!(task = meta.id, rank = meta.rank; "finished {}", meta.name);
                for (slot, value) in meta.outputs.iter().zip(values) {
                    let Some(obj) = st.objects.get_any_mut(slot.handle) else { continue; };
                    obj.footprint = value.footprint();
                    if let Some(rev) = obj.revision_mut(slot.gen) {
                        rev.content = Content::Ready(Arc::new(value));
                        rev.last_use = now;
                    }
                }
            },
            Err(msg) => {
                st.stats.failed += 1;
                log::warn!(task = meta.id, rank = meta.rank; "kernel {} failed: {}", meta.name, msg);
                for slot in meta.outputs.iter() {
                    if let Some(rev) = st.objects.get_any_mut(slot.handle)
                        .and_then(|o| o.revision_mut(slot.gen))
                    {
                        rev.content = Content::Failed(msg.clone());
                    }
                }
                if st.first_error.is_none() {
                    st.first_error = Some(KernelFailed { name: meta.name.clone(), msg });
                }
            },
        }
        for slot in meta.outputs.iter() {
            self.wake(st, slot.handle, slot.gen);
        }
        let touched = meta.inputs.iter().map(|(h, _)| *h)
            .chain(meta.outputs.iter().map(|slot| slot.handle));
        for h in touched { st.objects.collect(h); }
    }

    fn run(&self, task: ReadyTask<T>) {
        let ReadyTask { meta, mut kernel, inputs, mut outputs } = task;
        let result = {
            let refs: Vec<&T> = inputs.iter().map(|a| a.as_ref()).collect();
            panic::catch_unwind(AssertUnwindSafe(|| kernel.execute(&refs, &mut outputs)))
        };
        drop(inputs);
        let result = match result {
            Ok(Ok(())) => Ok(outputs),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("kernel panicked".to_string()),
        };
        let mut st = self.lock();
        self.complete(&mut st, meta, result);
        drop(st);
        self.done.notify_all();
    }

    fn pop_any(&self) -> Option<ReadyTask<T>> {
        for queue in self.queues.iter() {
            loop {
                match queue.steal() {
                    Steal::Success(task) => { return Some(task); },
                    Steal::Empty => { break; },
                    Steal::Retry => { continue; },
                }
            }
        }
        None
    }

    // swap idle objects out until the resident set fits the budget
    fn evict(&self, st: &mut State<T>) -> RuntimeResult<()> {
        let Some(ooc) = self.config.out_of_core.as_ref() else { return Ok(()); };
        let mut resident = st.resident_bytes();
        let mut candidates: Vec<(u64, Handle)> = Vec::new();
        for (h, obj) in st.objects.iter_mut() {
            for (_, rev) in obj.iter_revisions_mut() {
                let Content::Swapped(region) = &mut rev.content else { continue; };
                if let Err(err) = region.poll() {
                    let content = std::mem::replace(&mut rev.content, Content::Consumed);
                    if let Content::Swapped(region) = content {
                        rev.content = recovered(region, &err);
                    }
                    return Err(err.into());
                }
            }
            let Some(rev) = obj.latest_revision() else { continue; };
            let idle = rev.pending_readers == 0 && !rev.pending_update;
            if let Content::Ready(arc) = &rev.content {
                if idle && Arc::strong_count(arc) == 1 {
                    candidates.push((rev.last_use, h));
                }
            }
        }
        candidates.sort_unstable();
        for (_, h) in candidates {
            if resident <= ooc.budget { break; }
            let State { objects, stats, slots, .. } = &mut *st;
            let Ok(obj) = objects.get_mut(h) else { continue; };
            let footprint = obj.footprint;
            let Some(rev) = obj.latest_revision_mut() else { continue; };
            let Content::Ready(arc) = std::mem::replace(&mut rev.content, Content::Consumed)
                else { continue; };
            match Arc::try_unwrap(arc) {
                Ok(value) => {
                    let mut region = Region::new(
                        value, ooc.backend.clone(), slots[rev.owner].clone());
                    if let Err(err) = region.unmap().and_then(|_| region.poll()) {
                        log::warn!(handle = h.id(); "swap-out failed: {}", err);
                        rev.content = recovered(region, &err);
                        return Err(err.into());
                    }
                    rev.content = Content::Swapped(region);
                    stats.swap_outs += 1;
                    resident = resident.saturating_sub(footprint);
                    log::debug!(handle = h.id(), bytes = footprint; "unmapped");
                },
                Err(arc) => { rev.content = Content::Ready(arc); },
            }
        }
        Ok(())
    }
}

// take back the in-memory copy of a region whose write failed
fn recovered<T: Payload>(region: Region<T>, err: &RegionError) -> Content<T> {
    match region.into_inner() {
        Ok(value) => Content::Ready(Arc::new(value)),
        Err(_) => Content::Failed(err.to_string()),
    }
}

fn find_task<T>(
    local: &Worker<T>,
    global: &Injector<T>,
    stealers: &[Stealer<T>],
) -> Option<T>
{
    local.pop().or_else(|| {
        iter::repeat_with(|| {
            global.steal_batch_and_pop(local)
                .or_else(|| stealers.iter().map(|s| s.steal()).collect())
        })
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    })
}

fn worker_loop<T: Payload>(
    shared: &Shared<T>,
    rank: usize,
    local: Worker<ReadyTask<T>>,
    parker: Parker,
    stealers: &[Stealer<ReadyTask<T>>],
) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match find_task(&local, &shared.queues[rank], stealers) {
            Some(task) => { shared.run(task); },
            None => { parker.park_timeout(Duration::from_millis(5)); },
        }
    }
}

/// Deferred-execution context over objects of type `T`.
pub struct Runtime<T: Payload> {
    shared: Arc<Shared<T>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl<T: Payload> Runtime<T> {
    /// Start a runtime, spawning `ranks * threads_per_rank` workers.
    pub fn new(config: RuntimeConfig) -> Self {
        let ranks = config.ranks.max(1);
        let tpr = config.threads_per_rank;
        let mut locals: Vec<(usize, Worker<ReadyTask<T>>, Parker)> = Vec::new();
        let mut stealers: Vec<Vec<Stealer<ReadyTask<T>>>> = vec![Vec::new(); ranks];
        let mut unparkers: Vec<Vec<Unparker>> = vec![Vec::new(); ranks];
        for r in 0..ranks {
            for _ in 0..tpr {
                let worker = Worker::new_lifo();
                stealers[r].push(worker.stealer());
                let parker = Parker::new();
                unparkers[r].push(parker.unparker().clone());
                locals.push((r, worker, parker));
            }
        }
        let state = State {
            objects: ObjectTable::default(),
            pending: HashMap::default(),
            waiters: HashMap::default(),
            next_task: 0,
            outstanding: 0,
            queued_cost: vec![0.0; ranks],
            first_error: None,
            stats: RuntimeStats::default(),
            clock: 0,
            slots: (0..ranks).map(|r| Arc::new(SlotAllocator::new(r))).collect(),
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            done: Condvar::new(),
            queues: (0..ranks).map(|_| Injector::new()).collect(),
            unparkers,
            shutdown: AtomicBool::new(false),
            config: RuntimeConfig { ranks, ..config },
        });
        let stealers = Arc::new(stealers);
        let threads: Vec<thread::JoinHandle<()>>
            = locals.into_iter()
            .map(|(r, worker, parker)| {
                let shared = Arc::clone(&shared);
                let stealers = Arc::clone(&stealers);
                thread::spawn(move || {
                    worker_loop(&shared, r, worker, parker, &stealers[r]);
                })
            })
            .collect();
        log::debug!(ranks = ranks, threads = threads.len(); "runtime started");
        Self { shared, threads }
    }

    /// Return the configuration in use.
    pub fn config(&self) -> &RuntimeConfig { &self.shared.config }

    /// Return the number of simulated ranks.
    pub fn ranks(&self) -> usize { self.shared.config.ranks }

    /// Return a snapshot of the runtime counters.
    pub fn stats(&self) -> RuntimeStats { self.shared.lock().stats }

    /// Return the number of handles created and not yet released.
    pub fn live_objects(&self) -> usize { self.shared.lock().objects.live() }

    fn check_rank(&self, rank: usize) -> RuntimeResult<()> {
        if rank < self.ranks() { Ok(()) } else { Err(BadRank(rank, self.ranks())) }
    }

    /// Manage `value`, owned by the host rank.
    pub fn create(&self, value: T) -> Handle {
        let footprint = value.footprint();
        let mut st = self.shared.lock();
        let rev = Revision::new(Content::Ready(Arc::new(value)), HOST_RANK);
        st.objects.insert(Object::new(rev, footprint))
    }

    /// Manage `value`, owned by `rank`.
    pub fn create_on(&self, value: T, rank: usize) -> RuntimeResult<Handle> {
        self.check_rank(rank)?;
        let footprint = value.footprint();
        let mut st = self.shared.lock();
        let rev = Revision::new(Content::Ready(Arc::new(value)), rank);
        Ok(st.objects.insert(Object::new(rev, footprint)))
    }

    /// Declare an object with no data yet; it reads as `T::default()` until
    /// written, and storage is only allocated when first used.
    pub fn declare(&self) -> Handle {
        let mut st = self.shared.lock();
        st.objects.insert(Object::new(Revision::new(Content::Empty, HOST_RANK), 0))
    }

    /// Like [`declare`][Self::declare], owned by `rank`.
    pub fn declare_on(&self, rank: usize) -> RuntimeResult<Handle> {
        self.check_rank(rank)?;
        let mut st = self.shared.lock();
        Ok(st.objects.insert(Object::new(Revision::new(Content::Empty, rank), 0)))
    }

    /// Stop managing `h`. Kernels already submitted against it still run.
    pub fn release(&self, h: Handle) -> RuntimeResult<()> {
        self.shared.lock().objects.release(h)
    }

    /// Queue a kernel; it runs once every revision it reads is materialized.
    pub fn submit<K>(&self, kernel: K) -> RuntimeResult<TaskId>
    where K: Kernel<T> + 'static
    {
        self.submit_boxed(Box::new(kernel))
    }

    /// Queue a boxed kernel.
    pub fn submit_boxed(&self, kernel: Box<dyn Kernel<T>>) -> RuntimeResult<TaskId> {
        let inputs = kernel.inputs();
        let outputs = kernel.outputs();
        for (k, (h, _)) in outputs.iter().enumerate() {
            if outputs[..k].iter().any(|(o, _)| o == h) {
                return Err(DuplicateOutput(kernel.name().to_string(), *h));
            }
        }
        let mut st = self.shared.lock();
        let mut sites: Vec<InputSite> = Vec::with_capacity(inputs.len());
        for h in inputs.iter() {
            let obj = st.objects.get(*h)?;
            let holders = obj.latest_revision()
                .map(|rev| rev.holders())
                .unwrap_or_default();
            sites.push(InputSite { bytes: obj.footprint, holders });
        }
        for (h, _) in outputs.iter() { st.objects.get(*h)?; }

        let id = st.next_task;
        st.next_task += 1;
        let rank = placement::choose_rank(
            &sites, &st.queued_cost, self.shared.config.load_weight);
        let bytes: usize = sites.iter().map(|s| s.bytes).sum();
        let cost = kernel.complexity().cost(bytes);

        let mut unresolved: usize = 0;
        let mut in_gens: Vec<(Handle, u64)> = Vec::with_capacity(inputs.len());
        {
            let State { objects, waiters, .. } = &mut *st;
            for h in inputs.iter() {
                let obj = objects.get_mut(*h)?;
                let gen = obj.latest();
                if let Some(rev) = obj.latest_revision_mut() {
                    rev.pending_readers += 1;
                    if rev.is_pending() {
                        unresolved += 1;
                        waiters.entry((*h, gen)).or_default().push(id);
                    }
                }
                in_gens.push((*h, gen));
            }
        }
        let mut out_slots: Vec<OutputSlot> = Vec::with_capacity(outputs.len());
        {
            let State { objects, waiters, .. } = &mut *st;
            for (h, mode) in outputs.iter() {
                let obj = objects.get_mut(*h)?;
                let prev = obj.latest();
                if *mode == OutputMode::Update {
                    if let Some(rev) = obj.latest_revision_mut() {
                        rev.pending_update = true;
                        if rev.is_pending() {
                            unresolved += 1;
                            waiters.entry((*h, prev)).or_default().push(id);
                        }
                    }
                }
                let gen = obj.push(Revision::pending(rank));
                obj.collect();
                out_slots.push(OutputSlot { handle: *h, gen, mode: *mode, prev });
            }
        }

        st.outstanding += 1;
        st.queued_cost[rank] += cost;
        st.stats.submitted += 1;
        log::debug!(task = id, rank = rank, unresolved = unresolved; "submitted {}", kernel.name());
        let meta = TaskMeta {
            id,
            name: kernel.name().to_string(),
            rank,
            cost,
            inputs: in_gens,
            outputs: out_slots,
        };
        let task = PendingTask { meta, kernel, unresolved };
        if unresolved == 0 {
            self.shared.dispatch(&mut st, task);
        } else {
            st.pending.insert(id, task);
        }
        Ok(id)
    }

    // block until `done` holds, running kernels on the caller if there are
    // no workers
    fn wait_until<F>(&self, done: F) -> RuntimeResult<()>
    where F: Fn(&State<T>) -> bool
    {
        if self.threads.is_empty() {
            loop {
                if done(&self.shared.lock()) { return Ok(()); }
                match self.shared.pop_any() {
                    Some(task) => { self.shared.run(task); },
                    None => { return Ok(()); },
                }
            }
        }
        let mut st = self.shared.lock();
        while !done(&st) {
            if self.threads.iter().any(|th| th.is_finished()) {
                return Err(DeadWorker);
            }
            st = self.shared.done
                .wait_timeout(st, Duration::from_millis(10))
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        Ok(())
    }

    /// Block until every submitted kernel has finished.
    ///
    /// Returns the first kernel failure since the last `sync`, if any, then
    /// swaps idle objects out if a memory budget is configured.
    pub fn sync(&self) -> RuntimeResult<()> {
        self.wait_until(|st| st.outstanding == 0)?;
        let mut st = self.shared.lock();
        if let Some(err) = st.first_error.take() { return Err(err); }
        self.shared.evict(&mut st)
    }

    fn latest_gen(&self, h: Handle) -> RuntimeResult<u64> {
        Ok(self.shared.lock().objects.get(h)?.latest())
    }

    /// Wait for the latest revision of `h` and return it, materialized on the
    /// host rank.
    pub fn load(&self, h: Handle) -> RuntimeResult<Arc<T>> {
        let gen = self.latest_gen(h)?;
        self.wait_until(|st| !st.is_pending(h, gen))?;
        let mut st = self.shared.lock();
        st.fetch(h, gen, HOST_RANK).map_err(|_| Poisoned(h))
    }

    fn update_on<F, R>(&self, h: Handle, rank: usize, f: F) -> RuntimeResult<R>
    where F: FnOnce(&mut T) -> R
    {
        let gen = self.latest_gen(h)?;
        self.wait_until(|st| !st.is_pending(h, gen))?;
        let mut st = self.shared.lock();
        let mut value = st.take_for_update(h, gen, rank).map_err(|_| Poisoned(h))?;
        let out = f(&mut value);
        let now = st.tick();
        let footprint = value.footprint();
        let obj = st.objects.get_mut(h)?;
        let mut rev = Revision::new(Content::Ready(Arc::new(value)), rank);
        rev.last_use = now;
        obj.push(rev);
        obj.footprint = footprint;
        obj.collect();
        Ok(out)
    }

    /// Write a new revision of `h` from the host, starting from the current
    /// one.
    ///
    /// The previous buffer is reused in place if nothing else references it,
    /// and copied otherwise.
    pub fn versioned<F, R>(&self, h: Handle, f: F) -> RuntimeResult<R>
    where F: FnOnce(&mut T) -> R
    {
        self.update_on(h, HOST_RANK, f)
    }

    /// Like [`versioned`][Self::versioned], but the new revision stays on the
    /// rank owning `h`, so no transfer is made to the host. A declared object
    /// is allocated here.
    pub fn exclusive<F, R>(&self, h: Handle, f: F) -> RuntimeResult<R>
    where F: FnOnce(&mut T) -> R
    {
        let owner = self.owner(h)?;
        self.update_on(h, owner, f)
    }

    /// Return the rank owning the latest revision of `h`.
    pub fn owner(&self, h: Handle) -> RuntimeResult<usize> {
        let st = self.shared.lock();
        let obj = st.objects.get(h)?;
        Ok(obj.latest_revision().map(|rev| rev.owner).unwrap_or(HOST_RANK))
    }

    /// Return where the latest revision of `h` lives relative to `rank`.
    pub fn locality(&self, h: Handle, rank: usize) -> RuntimeResult<Locality> {
        self.check_rank(rank)?;
        let st = self.shared.lock();
        let obj = st.objects.get(h)?;
        Ok(obj.latest_revision()
            .map(|rev| rev.locality(rank))
            .unwrap_or(Locality::Remote))
    }

    /// Return the most recently recorded size of `h` in bytes.
    pub fn footprint(&self, h: Handle) -> RuntimeResult<usize> {
        Ok(self.shared.lock().objects.get(h)?.footprint)
    }

    /// Return the residency state of `h`, or `None` if it is not swapped.
    pub fn region_state(&self, h: Handle) -> RuntimeResult<Option<RegionState>> {
        let st = self.shared.lock();
        let obj = st.objects.get(h)?;
        Ok(obj.latest_revision().and_then(|rev| {
            match &rev.content {
                Content::Swapped(region) => Some(region.state()),
                _ => None,
            }
        }))
    }

    /// Start reading a swapped object back in the background.
    pub fn prefetch(&self, h: Handle) -> RuntimeResult<()> {
        let mut st = self.shared.lock();
        let obj = st.objects.get_mut(h)?;
        if let Some(rev) = obj.latest_revision_mut() {
            if let Content::Swapped(region) = &mut rev.content {
                region.flush()?;
                region.prefetch()?;
            }
        }
        Ok(())
    }
}

impl<T: Payload> Drop for Runtime<T> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.unparkers.iter().flatten().for_each(|u| u.unpark());
        self.threads.drain(..)
            .for_each(|th| { th.join().ok(); });
    }
}
