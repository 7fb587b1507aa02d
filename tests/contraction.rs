mod common;

use std::sync::Arc;
use approx::assert_abs_diff_eq;
use ndarray as nd;
use rand::{ SeedableRng, rngs::StdRng };
use dmrg_core::{
    AbelianEngine,
    BlockMatrix,
    Boundary,
    ContractionEngine,
    Index,
    MPOTensor,
    MPSTensor,
    PathPolicy,
    Runtime,
    RuntimeConfig,
    TrivialGroup,
    TwoSiteTensor,
    U1,
    dense,
    mpo,
};
use common::*;

#[test]
fn block_trace_sums_diagonal_blocks() {
    let a: nd::Array2<f64> = nd::array![[1.0, 2.0], [3.0, 4.0]];
    let b: nd::Array2<f64>
        = nd::Array2::from_shape_fn((3, 3), |(i, j)| (3 * i + j) as f64 - 2.5);
    let mut m: BlockMatrix<U1, f64> = BlockMatrix::new();
    m.insert_block(a.clone(), 0, 0).unwrap();
    m.insert_block(b.clone(), 1, 1).unwrap();
    assert_eq!(m.n_blocks(), 2);
    assert_abs_diff_eq!(m.trace(), dense::trace(&a) + dense::trace(&b), epsilon = 1e-14);
}

#[test]
fn identity_operator_acts_as_identity() {
    let mut rng = StdRng::seed_from_u64(7);
    let phys: Index<TrivialGroup> = Index::from_sectors([((), 2)]);
    let bond: Index<TrivialGroup> = Index::from_sectors([((), 2)]);
    let m1: MPSTensor<TrivialGroup, f64>
        = MPSTensor::random(phys.clone(), Index::trivial(), bond.clone(), &mut rng);
    let m2: MPSTensor<TrivialGroup, f64>
        = MPSTensor::random(phys.clone(), bond, Index::trivial(), &mut rng);
    let w1 = MPOTensor::identity(&phys);
    let w2 = MPOTensor::identity(&phys);
    let w12 = mpo::make_twosite_mpo(&w1, &w2, &phys, &phys).unwrap();
    let ket = TwoSiteTensor::from_mps_pair(&m1, &m2).unwrap().as_mps().unwrap();
    let left = Boundary::left_edge(ket.left_i());
    let right = Boundary::right_edge(ket.right_i());
    for policy in [PathPolicy::LeftBuild, PathPolicy::RightBuild] {
        let engine: AbelianEngine<TrivialGroup, f64>
            = AbelianEngine::new().with_path_policy(policy);
        let out = engine.site_hamil2(&ket, &left, &right, &w12).unwrap();
        let diff = max_abs_diff(&out.to_vector(), &ket.to_vector());
        assert!(diff < 1e-10, "{:?}: max difference {}", policy, diff);
    }
}

fn heisenberg_pair(seed: u64)
    -> (MPSTensor<U1, f64>, Boundary<U1, f64>, Boundary<U1, f64>, MPOTensor<U1, f64>)
{
    let engine: AbelianEngine<U1, f64> = AbelianEngine::new();
    let mut state = random_state(4, 4, seed);
    state.canonize(1).unwrap();
    let h = heisenberg(4);
    let left = engine.boundary_left_step(
        &state[0], &Boundary::left_edge(state[0].left_i()), &h[0]).unwrap();
    let right = engine.boundary_right_step(
        &state[3], &Boundary::right_edge(state[3].right_i()), &h[3]).unwrap();
    let w12 = mpo::make_twosite_mpo(&h[1], &h[2], state[1].phys_i(), state[2].phys_i())
        .unwrap();
    let ket = TwoSiteTensor::from_mps_pair(&state[1], &state[2]).unwrap()
        .as_mps().unwrap();
    (ket, left, right, w12)
}

#[test]
fn build_paths_agree_on_bulk_pair() {
    let (ket, left, right, w12) = heisenberg_pair(11);
    let lbuild: AbelianEngine<U1, f64>
        = AbelianEngine::new().with_path_policy(PathPolicy::LeftBuild);
    let rbuild: AbelianEngine<U1, f64>
        = AbelianEngine::new().with_path_policy(PathPolicy::RightBuild);
    let lhs = lbuild.site_hamil2(&ket, &left, &right, &w12).unwrap();
    let rhs = rbuild.site_hamil2(&ket, &left, &right, &w12).unwrap();
    assert!(max_abs_diff(&lhs.to_vector(), &rhs.to_vector()) < 1e-10);
}

#[test]
fn hermitian_shortcut_reproduces_boundaries() {
    let mut state = random_state(4, 4, 5);
    state.canonize(3).unwrap();
    let h = heisenberg(4);
    let full: AbelianEngine<U1, f64> = AbelianEngine::new().with_hermitian(false);
    let short: AbelianEngine<U1, f64> = AbelianEngine::new();
    let mut lf = Boundary::left_edge(state[0].left_i());
    let mut ls = lf.clone();
    for k in 0..3 {
        lf = full.boundary_left_step(&state[k], &lf, &h[k]).unwrap();
        ls = short.boundary_left_step(&state[k], &ls, &h[k]).unwrap();
        assert_eq!(lf.aux_dim(), ls.aux_dim());
        for (a, b) in lf.iter().zip(ls.iter()) {
            let mut d = a.clone();
            d -= b;
            assert!(d.norm() < 1e-12);
        }
    }
}

#[test]
fn runtime_dispatch_matches_eager_evaluation() {
    let (ket, left, right, w12) = heisenberg_pair(3);
    let eager: AbelianEngine<U1, f64> = AbelianEngine::new();
    let rt = Arc::new(Runtime::new(
        RuntimeConfig::default().with_ranks(2).with_threads_per_rank(2)));
    let graph: AbelianEngine<U1, f64> = AbelianEngine::new().with_runtime(rt.clone());
    let a = eager.site_hamil2(&ket, &left, &right, &w12).unwrap();
    let b = graph.site_hamil2(&ket, &left, &right, &w12).unwrap();
    assert!(max_abs_diff(&a.to_vector(), &b.to_vector()) < 1e-10);
    let stats = rt.stats();
    assert!(stats.executed > 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(rt.live_objects(), 0);
}

#[test]
fn mismatched_boundary_blocks_are_errors() {
    let mut rng = StdRng::seed_from_u64(2);
    let phys: Index<TrivialGroup> = Index::from_sectors([((), 2)]);
    let ket: MPSTensor<TrivialGroup, f64>
        = MPSTensor::random(phys.clone(), Index::trivial(), Index::trivial(), &mut rng);
    let w = MPOTensor::identity(&phys);
    let left = Boundary::left_edge(ket.left_i());
    let mut wide: BlockMatrix<TrivialGroup, f64> = BlockMatrix::new();
    wide.insert_block(nd::array![[1.0, 5.0]], (), ()).unwrap();
    let right = Boundary::from_vec(vec![wide]);
    for policy in [PathPolicy::LeftBuild, PathPolicy::RightBuild] {
        let engine: AbelianEngine<TrivialGroup, f64>
            = AbelianEngine::new().with_path_policy(policy);
        assert!(engine.site_hamil2(&ket, &left, &right, &w).is_err(), "{:?}", policy);
    }
    let rt = Arc::new(Runtime::new(RuntimeConfig::single_threaded()));
    let graph: AbelianEngine<TrivialGroup, f64>
        = AbelianEngine::new().with_runtime(rt.clone());
    assert!(graph.site_hamil2(&ket, &left, &right, &w).is_err());
    assert_eq!(rt.live_objects(), 0);
}
