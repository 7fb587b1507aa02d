#![allow(dead_code)]

use std::sync::Arc;
use ndarray as nd;
use rand::{ SeedableRng, rngs::StdRng };
use dmrg_core::{
    BlockMatrix,
    Index,
    MPO,
    MPOTensor,
    MPS,
    OperatorTable,
    U1,
    mpo::MPOTerm,
};

/// Exact ground-state energy of the open four-site spin-1/2 Heisenberg chain.
pub const HEISENBERG_4: f64 = -1.6160254037844386;

/// Spin-1/2 site with charges `2 Sz`.
pub fn spin() -> Index<U1> { Index::from_sectors([(-1, 1), (1, 1)]) }

pub fn op(blocks: &[(i32, i32, f64)]) -> BlockMatrix<U1, f64> {
    let mut m = BlockMatrix::new();
    for &(lc, rc, x) in blocks {
        m.insert_block(nd::array![[x]], lc, rc).unwrap();
    }
    m
}

/// Open Heisenberg chain `H = Σ Sz Sz + (S+ S- + S- S+) / 2` on `n` sites.
///
/// Bulk rows and columns are ordered (done, S+, S-, Sz, start).
pub fn heisenberg(n: usize) -> MPO<U1, f64> {
    assert!(n >= 2);
    let mut table = OperatorTable::new();
    let id = table.register(op(&[(-1, -1, 1.0), (1, 1, 1.0)]));
    let sp = table.register(op(&[(1, -1, 1.0)]));
    let sm = table.register(op(&[(-1, 1, 1.0)]));
    let sz = table.register(op(&[(-1, -1, -0.5), (1, 1, 0.5)]));
    let table = Arc::new(table);
    let t = |tag, scale| MPOTerm { tag, scale };
    let bulk = [
        (0, 0, t(id, 1.0)),
        (1, 0, t(sp, 1.0)),
        (2, 0, t(sm, 1.0)),
        (3, 0, t(sz, 1.0)),
        (4, 1, t(sm, 0.5)),
        (4, 2, t(sp, 0.5)),
        (4, 3, t(sz, 1.0)),
        (4, 4, t(id, 1.0)),
    ];
    let herm = || vec![None, None, Some(1), None, None];
    let first = MPOTensor::new(
        1, 5,
        bulk.iter().filter(|(b, ..)| *b == 4).map(|(_, bp, t)| (0, *bp, *t)),
        table.clone(),
    ).unwrap()
        .with_hermitian(vec![None], herm())
        .unwrap();
    let last = MPOTensor::new(
        5, 1,
        bulk.iter().filter(|(_, bp, _)| *bp == 0).map(|(b, _, t)| (*b, 0, *t)),
        table.clone(),
    ).unwrap()
        .with_hermitian(herm(), vec![None])
        .unwrap();
    let mut tensors = vec![first];
    for _ in 1..n - 1 {
        tensors.push(
            MPOTensor::new(5, 5, bulk.iter().copied(), table.clone()).unwrap()
                .with_hermitian(herm(), herm())
                .unwrap()
        );
    }
    tensors.push(last);
    MPO::new(tensors).unwrap()
}

/// Random spin chain in the total `Sz = 0` sector.
pub fn random_state(n: usize, max_bond_dim: usize, seed: u64) -> MPS<U1, f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let phys = vec![spin(); n];
    MPS::random(&phys, 0, max_bond_dim, &mut rng).unwrap()
}

pub fn max_abs_diff(a: &nd::Array1<f64>, b: &nd::Array1<f64>) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
