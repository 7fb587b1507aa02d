use std::sync::Arc;
use ndarray as nd;
use dmrg_core::{
    BlockMatrix,
    Runtime,
    RuntimeConfig,
    U1,
    runtime::{
        FileBackend,
        FnKernel,
        Handle,
        Kernel,
        MemoryBackend,
        OutOfCoreConfig,
        Region,
        RegionError,
        RegionState,
        SlotAllocator,
    },
};

type Block = BlockMatrix<U1, f64>;

fn single(charge: i32, x: f64) -> Block {
    let mut m = BlockMatrix::new();
    m.insert_block(nd::array![[x]], charge, charge).unwrap();
    m
}

fn increment(h: Handle) -> impl Kernel<Block> {
    FnKernel::new("increment", |_: &[&Block], out: &mut [Block]| {
        let b = out[0].block_mut(0).ok_or("missing block")?;
        *b += 1.0;
        Ok(())
    })
    .updates(h)
}

#[test]
fn independent_increments_complete_on_sync() {
    const N: usize = 16;
    let rt: Runtime<Block> = Runtime::new(
        RuntimeConfig::default().with_ranks(2).with_threads_per_rank(2));
    let handles: Vec<Handle>
        = (0..N).map(|k| rt.create(single(k as i32, k as f64))).collect();
    for &h in handles.iter() { rt.submit(increment(h)).unwrap(); }
    rt.sync().unwrap();
    for (k, &h) in handles.iter().enumerate() {
        let m = rt.load(h).unwrap();
        let (entry, b) = m.block(0).unwrap();
        assert_eq!(entry.lc, k as i32);
        assert_eq!(b[[0, 0]], k as f64 + 1.0);
    }
    let stats = rt.stats();
    assert_eq!(stats.executed, N);
    assert_eq!(stats.failed, 0);
}

#[test]
fn single_threaded_runtime_drains_on_sync() {
    let rt: Runtime<Block> = Runtime::new(RuntimeConfig::single_threaded());
    let h = rt.create(single(0, 0.0));
    for _ in 0..5 { rt.submit(increment(h)).unwrap(); }
    rt.sync().unwrap();
    assert_eq!(rt.load(h).unwrap().block(0).unwrap().1[[0, 0]], 5.0);
}

#[test]
fn revisions_swap_out_under_a_budget() {
    let backend = Arc::new(MemoryBackend::new());
    let rt: Runtime<Block> = Runtime::new(
        RuntimeConfig::single_threaded()
            .with_out_of_core(OutOfCoreConfig::new(0, backend.clone())));
    let a = rt.create(single(0, 1.0));
    let b = rt.create(single(1, 2.0));
    rt.submit(increment(a)).unwrap();
    rt.submit(increment(b)).unwrap();
    rt.sync().unwrap();
    assert_eq!(rt.load(a).unwrap().block(0).unwrap().1[[0, 0]], 2.0);
    assert_eq!(rt.load(b).unwrap().block(0).unwrap().1[[0, 0]], 3.0);
    assert!(backend.writes() > 0);
}

#[test]
fn file_backed_region_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileBackend::new(dir.path()).unwrap());
    let slots = Arc::new(SlotAllocator::new(3));
    let data = single(2, 4.5);
    let mut region = Region::new(data.clone(), backend.clone(), slots);
    let path = backend.path(region.slot());
    assert!(path.file_name().unwrap().to_string_lossy().ends_with(".3"));

    region.unmap().unwrap();
    assert_eq!(region.state(), RegionState::Store);
    region.flush().unwrap();
    assert_eq!(region.state(), RegionState::Uncore);
    assert!(!region.is_resident());
    assert!(path.exists());

    region.prefetch().unwrap();
    assert_eq!(region.state(), RegionState::Prefetch);
    assert!(matches!(region.unmap(), Err(RegionError::InvalidTransition { .. })));

    assert_eq!(*region.access().unwrap(), data);
    assert_eq!(region.state(), RegionState::Core);
    drop(region);
    assert!(!path.exists());
}

#[test]
fn interrupted_store_keeps_data() {
    let backend = Arc::new(MemoryBackend::new());
    let slots = Arc::new(SlotAllocator::new(0));
    let mut region = Region::new(single(0, 1.0), backend.clone(), slots);
    region.unmap().unwrap();
    region.access().unwrap().block_mut(0).unwrap()[[0, 0]] = 7.0;
    assert_eq!(region.state(), RegionState::Core);
    assert_eq!(region.into_inner().unwrap().block(0).unwrap().1[[0, 0]], 7.0);
    assert_eq!(backend.reads(), 0);
}
