mod common;

use std::{ sync::Arc, time::Duration };
use approx::assert_abs_diff_eq;
use dmrg_core::{
    AbelianEngine,
    SweepConfig,
    SweepOptimizer,
    U1,
    checkpoint::Archive,
    optimizer::{ ExactDiag, IterationResult, OptimizerError, SweepStatus },
    runtime::{ MemoryBackend, OutOfCoreConfig },
};
use common::*;

fn config() -> SweepConfig {
    SweepConfig::default()
        .with_max_bond_dim(16)
        .with_cutoff(1e-12)
        .with_nsweeps(2)
}

#[test]
fn heisenberg_four_sites() {
    let mut opt = SweepOptimizer::new(random_state(4, 4, 1), heisenberg(4), config())
        .unwrap()
        .with_solver(ExactDiag);
    let energy = opt.run().unwrap();
    assert_abs_diff_eq!(energy, HEISENBERG_4, epsilon = 1e-8);
    assert_eq!(opt.sweeps_done(), 2);
    assert_eq!(opt.results().len(), 2);
    assert_eq!(opt.results()[0].len(), 6);
    let last: &IterationResult = opt.results()[1].last().unwrap();
    assert!(!last.left_to_right);
    assert_eq!(last.site, 0);

    let engine: AbelianEngine<U1, f64> = AbelianEngine::new();
    let h = heisenberg(4);
    let state = opt.into_mps();
    let norm = state.norm(&engine).unwrap();
    let e = state.expval(&h, &engine).unwrap() / (norm * norm);
    assert_abs_diff_eq!(e, HEISENBERG_4, epsilon = 1e-8);
}

#[test]
fn noisy_sweeps_still_converge() {
    let mut opt = SweepOptimizer::new(
        random_state(6, 2, 4), heisenberg(6), config().with_alpha(1e-3).with_nsweeps(4))
        .unwrap();
    let energy = opt.run().unwrap();
    let final_sweep = opt.results().last().unwrap();
    for r in final_sweep.iter() {
        assert!(r.bond_dimension <= 16);
        assert!(r.energy >= energy - 1e-8);
    }
    // open six-site chain
    assert_abs_diff_eq!(energy, -2.493577133887926, epsilon = 1e-6);
}

#[test]
fn swapped_boundaries_give_the_same_energy() {
    let backend = Arc::new(MemoryBackend::new());
    let swapped = config().with_out_of_core(OutOfCoreConfig::new(0, backend.clone()));
    let e_mem = SweepOptimizer::new(random_state(5, 4, 2), heisenberg(5), config())
        .unwrap()
        .run()
        .unwrap();
    let e_swap = SweepOptimizer::new(random_state(5, 4, 2), heisenberg(5), swapped)
        .unwrap()
        .run()
        .unwrap();
    assert_abs_diff_eq!(e_mem, e_swap, epsilon = 1e-10);
    assert!(backend.writes() > 0);
}

#[test]
fn checkpoint_resumes_completed_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.bin");
    let first = config().with_nsweeps(1).with_checkpoint(&path);
    let mut opt = SweepOptimizer::new(random_state(4, 4, 9), heisenberg(4), first).unwrap();
    let e1 = opt.run().unwrap();

    let ar = Archive::load(&path).unwrap();
    assert!(ar.contains("/simulation/sweep0/parameters"));
    assert!(ar.contains("/simulation/sweep0/results"));
    assert!(ar.contains("/state/mps/length"));
    let status: SweepStatus = ar.get("/status").unwrap();
    assert_eq!(status, SweepStatus { next_sweep: 1, finished: true, time_limited: false });

    let second = config().with_nsweeps(2).with_checkpoint(&path);
    let mut opt
        = SweepOptimizer::restore(&path, heisenberg(4), AbelianEngine::new(), second)
        .unwrap();
    assert_eq!(opt.sweeps_done(), 1);
    assert_abs_diff_eq!(opt.energy().unwrap(), e1, epsilon = 1e-12);
    let e2 = opt.run().unwrap();
    assert_eq!(opt.results().len(), 2);
    assert_abs_diff_eq!(e2, HEISENBERG_4, epsilon = 1e-8);
}

#[test]
fn time_limit_checkpoints_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.bin");
    let limited = config().with_time_limit(Duration::ZERO).with_checkpoint(&path);
    let mut opt
        = SweepOptimizer::new(random_state(4, 4, 6), heisenberg(4), limited).unwrap();
    match opt.run() {
        Err(OptimizerError::TimeLimitReached { sweep, site }) => {
            assert_eq!((sweep, site), (0, 0));
        },
        other => panic!("expected time limit, got {:?}", other),
    }
    let status: SweepStatus = Archive::load(&path).unwrap().get("/status").unwrap();
    assert!(status.time_limited);
    assert!(!status.finished);
    assert_eq!(status.next_sweep, 0);

    let mut opt
        = SweepOptimizer::restore(&path, heisenberg(4), AbelianEngine::new(), config())
        .unwrap();
    assert_eq!(opt.sweeps_done(), 0);
    assert_abs_diff_eq!(opt.run().unwrap(), HEISENBERG_4, epsilon = 1e-8);
}

#[test]
fn short_or_mismatched_chains_are_rejected() {
    assert!(matches!(
        SweepOptimizer::new(random_state(4, 4, 0), heisenberg(6), config()),
        Err(OptimizerError::LengthMismatch(4, 6)),
    ));
}
