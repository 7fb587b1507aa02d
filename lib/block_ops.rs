//! Algebra on block-sparse matrices: products and block-wise factorizations.
//!
//! Every factorization here decomposes each block independently with the
//! dense backend and connects the factors through a new bond whose sectors
//! are labeled by one of the original charges:
//!
//! - [`svd`], [`qr`]: bond charge is the block's column charge; column
//!   charges must be unique.
//! - [`lq`]: bond charge is the block's row charge; row charges must be
//!   unique.
//! - [`heev`]: blocks must sit on the charge diagonal.

use ndarray as nd;
use num_traits::Zero;
use crate::{
    Elem,
    block_matrix::{ BlockMatrix, BlockMatrixError, BlockMatrixResult },
    dense,
    symmetry::Symmetry,
    truncation::{ self, TruncationParams, TruncationResults },
};

/// Real diagonal data per sector, in the same order as a bond index.
pub type Spectrum<C> = Vec<(C, Vec<f64>)>;

/// Return the product `a · b`.
///
/// Blocks `(l, m)` of `a` and `(m, r)` of `b` contribute to block `(l, r)`
/// of the output. Block pairs whose inner dimensions disagree are an error.
pub fn gemm<S, A>(a: &BlockMatrix<S, A>, b: &BlockMatrix<S, A>)
    -> BlockMatrixResult<BlockMatrix<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    let mut out = BlockMatrix::new();
    for (ea, ba) in a.iter() {
        for k in b.basis().left_range(ea.rc) {
            let Some((eb, bb)) = b.block(k) else { continue; };
            if ea.rs != eb.ls {
                return Err(BlockMatrixError::InnerDimMismatch(
                    format!("({:?}, {:?})", ea.rc, eb.rc)));
            }
            out.match_and_add_block(&ba.dot(bb), ea.lc, eb.rc);
        }
    }
    Ok(out)
}

/// Return the conjugate transpose of `m`.
pub fn adjoint<S, A>(m: &BlockMatrix<S, A>) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let mut out = BlockMatrix::new();
    for (e, b) in m.iter() {
        out.match_and_add_block(&dense::adjoint(b), e.rc, e.lc);
    }
    out
}

/// Return the transpose of `m`.
pub fn transpose<S, A>(m: &BlockMatrix<S, A>) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let mut out = BlockMatrix::new();
    for (e, b) in m.iter() {
        out.match_and_add_block(&b.t(), e.rc, e.lc);
    }
    out
}

/// Build a charge-diagonal matrix from a spectrum.
pub fn diag<S, A>(spectrum: &Spectrum<S::Charge>) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let mut out = BlockMatrix::new();
    for (c, s) in spectrum.iter() {
        let d: nd::Array1<A>
            = s.iter().map(|x| dense::elem_from_f64(*x)).collect();
        out.match_and_add_block(&nd::Array2::from_diag(&d), *c, *c);
    }
    out
}

fn check_unique<C: Ord + Copy>(charges: impl Iterator<Item = C>, op: &'static str)
    -> BlockMatrixResult<()>
{
    let mut seen: Vec<C> = charges.collect();
    let n = seen.len();
    seen.sort();
    seen.dedup();
    if seen.len() == n {
        Ok(())
    } else {
        Err(BlockMatrixError::NotBlockDiagonal(op))
    }
}

/// Block-wise singular value decomposition `m = u · diag(s) · vt`.
#[derive(Clone, Debug)]
pub struct BlockSvd<S: Symmetry, A: Elem> {
    pub u: BlockMatrix<S, A>,
    pub s: Spectrum<S::Charge>,
    pub vt: BlockMatrix<S, A>,
}

/// Compute the thin SVD of every block.
pub fn svd<S, A>(m: &BlockMatrix<S, A>) -> BlockMatrixResult<BlockSvd<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    check_unique(m.basis().iter().map(|e| e.rc), "svd")?;
    let mut u = BlockMatrix::new();
    let mut vt = BlockMatrix::new();
    let mut s: Spectrum<S::Charge> = Vec::with_capacity(m.n_blocks());
    for (e, b) in m.iter() {
        let dense::DenseSvd { u: bu, s: bs, vt: bvt } = dense::svd(b)?;
        if bs.is_empty() { continue; }
        u.insert_block(bu, e.lc, e.rc)?;
        vt.insert_block(bvt, e.rc, e.rc)?;
        s.push((e.rc, bs.iter().map(|x| dense::real_to_f64(*x)).collect()));
    }
    s.sort_by(|l, r| l.0.cmp(&r.0));
    Ok(BlockSvd { u, s, vt })
}

/// Compute the SVD of every block and truncate the bond globally.
///
/// Sectors left with no kept values are removed from all three factors.
pub fn svd_truncate<S, A>(m: &BlockMatrix<S, A>, params: TruncationParams)
    -> BlockMatrixResult<(BlockSvd<S, A>, TruncationResults)>
where
    S: Symmetry,
    A: Elem,
{
    let BlockSvd { u, s, vt } = svd(m)?;
    let values: Vec<Vec<f64>> = s.iter().map(|(_, v)| v.clone()).collect();
    let (keep, results) = truncation::select(&values, params);

    let mut ut = BlockMatrix::new();
    let mut vtt = BlockMatrix::new();
    let mut st: Spectrum<S::Charge> = Vec::with_capacity(s.len());
    for ((c, sv), n) in s.into_iter().zip(keep) {
        if n == 0 { continue; }
        for (e, b) in u.iter().filter(|(e, _)| e.rc == c) {
            ut.insert_block(b.slice(nd::s![.., ..n]).to_owned(), e.lc, e.rc)?;
        }
        if let Some(b) = vt.get(c, c) {
            vtt.insert_block(b.slice(nd::s![..n, ..]).to_owned(), c, c)?;
        }
        st.push((c, sv[..n].to_vec()));
    }
    log::debug!(
        bond_dimension = results.bond_dimension,
        discarded_weight = results.discarded_weight;
        "svd_truncate"
    );
    Ok((BlockSvd { u: ut, s: st, vt: vtt }, results))
}

/// Compute the thin QR decomposition `m = q · r` of every block.
pub fn qr<S, A>(m: &BlockMatrix<S, A>)
    -> BlockMatrixResult<(BlockMatrix<S, A>, BlockMatrix<S, A>)>
where
    S: Symmetry,
    A: Elem,
{
    check_unique(m.basis().iter().map(|e| e.rc), "qr")?;
    let mut q = BlockMatrix::new();
    let mut r = BlockMatrix::new();
    for (e, b) in m.iter() {
        let (bq, br) = dense::qr(b)?;
        if bq.ncols() == 0 { continue; }
        q.insert_block(bq, e.lc, e.rc)?;
        r.insert_block(br, e.rc, e.rc)?;
    }
    Ok((q, r))
}

/// Compute the thin LQ decomposition `m = l · q` of every block.
pub fn lq<S, A>(m: &BlockMatrix<S, A>)
    -> BlockMatrixResult<(BlockMatrix<S, A>, BlockMatrix<S, A>)>
where
    S: Symmetry,
    A: Elem,
{
    check_unique(m.basis().iter().map(|e| e.lc), "lq")?;
    let mut l = BlockMatrix::new();
    let mut q = BlockMatrix::new();
    for (e, b) in m.iter() {
        let (bl, bq) = dense::lq(b)?;
        if bq.nrows() == 0 { continue; }
        l.insert_block(bl, e.lc, e.lc)?;
        q.insert_block(bq, e.lc, e.rc)?;
    }
    Ok((l, q))
}

/// Eigen-decomposition `m = evecs · diag(evals) · evecs†` of a Hermitian,
/// charge-diagonal matrix, eigenvalues descending per sector.
pub fn heev<S, A>(m: &BlockMatrix<S, A>)
    -> BlockMatrixResult<(BlockMatrix<S, A>, Spectrum<S::Charge>)>
where
    S: Symmetry,
    A: Elem,
{
    if m.basis().iter().any(|e| e.lc != e.rc || e.ls != e.rs) {
        return Err(BlockMatrixError::NotBlockDiagonal("heev"));
    }
    let mut evecs = BlockMatrix::new();
    let mut evals: Spectrum<S::Charge> = Vec::with_capacity(m.n_blocks());
    for (e, b) in m.iter() {
        let (bvals, bvecs) = dense::heev(b)?;
        if bvals.is_empty() { continue; }
        evecs.insert_block(bvecs, e.lc, e.rc)?;
        evals.push((e.lc, bvals.iter().map(|x| dense::real_to_f64(*x)).collect()));
    }
    Ok((evecs, evals))
}

/// Diagonalize a density matrix and truncate the bond globally.
///
/// Eigenvalues are ranked as `sqrt(max(λ, 0))`, so the truncation cutoff
/// has the same meaning as for [`svd_truncate`].
pub fn heev_truncate<S, A>(m: &BlockMatrix<S, A>, params: TruncationParams)
    -> BlockMatrixResult<(BlockMatrix<S, A>, Spectrum<S::Charge>, TruncationResults)>
where
    S: Symmetry,
    A: Elem,
{
    let (evecs, evals) = heev(m)?;
    let values: Vec<Vec<f64>>
        = evals.iter()
        .map(|(_, v)| v.iter().map(|x| x.max(0.0).sqrt()).collect())
        .collect();
    let (keep, results) = truncation::select(&values, params);

    let mut out = BlockMatrix::new();
    let mut kept: Spectrum<S::Charge> = Vec::with_capacity(evals.len());
    for ((c, ev), n) in evals.into_iter().zip(keep) {
        if n == 0 { continue; }
        if let Some(b) = evecs.get(c, c) {
            out.insert_block(b.slice(nd::s![.., ..n]).to_owned(), c, c)?;
        }
        kept.push((c, ev[..n].to_vec()));
    }
    log::debug!(
        bond_dimension = results.bond_dimension,
        discarded_weight = results.discarded_weight;
        "heev_truncate"
    );
    Ok((out, kept, results))
}

/// Multiply every column of the blocks in sector `c` by the matching entry of
/// the spectrum, i.e. return `m · diag(s)`.
pub fn scale_columns<S, A>(m: &BlockMatrix<S, A>, s: &Spectrum<S::Charge>)
    -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let mut out = m.clone();
    for (e, b) in out.iter_mut() {
        let Some((_, sv)) = s.iter().find(|(c, _)| *c == e.rc) else {
            b.fill(A::zero());
            continue;
        };
        b.axis_iter_mut(nd::Axis(1)).zip(sv.iter())
            .for_each(|(mut col, x)| {
                let x: A = dense::elem_from_f64(*x);
                col.mapv_inplace(|y| y * x);
            });
    }
    out
}

/// Multiply every row of the blocks in sector `c` by the matching entry of
/// the spectrum, i.e. return `diag(s) · m`.
pub fn scale_rows<S, A>(s: &Spectrum<S::Charge>, m: &BlockMatrix<S, A>)
    -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let mut out = m.clone();
    for (e, b) in out.iter_mut() {
        let Some((_, sv)) = s.iter().find(|(c, _)| *c == e.lc) else {
            b.fill(A::zero());
            continue;
        };
        b.axis_iter_mut(nd::Axis(0)).zip(sv.iter())
            .for_each(|(mut row, x)| {
                let x: A = dense::elem_from_f64(*x);
                row.mapv_inplace(|y| y * x);
            });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::symmetry::U1;

    fn random_diag(rng: &mut StdRng, shapes: &[(i32, usize, usize)])
        -> BlockMatrix<U1, f64>
    {
        let mut m = BlockMatrix::new();
        for &(c, r, k) in shapes {
            m.insert_block(dense::random(r, k, rng), c, c).unwrap();
        }
        m
    }

    fn distance(a: &BlockMatrix<U1, f64>, b: &BlockMatrix<U1, f64>) -> f64 {
        let mut d = a.clone();
        d -= b;
        d.norm()
    }

    #[test]
    fn gemm_matches_charges() {
        let mut a: BlockMatrix<U1, f64> = BlockMatrix::new();
        a.insert_block(nd::array![[1.0, 2.0]], 0, 1).unwrap();
        a.insert_block(nd::array![[3.0]], 1, 2).unwrap();
        let mut b: BlockMatrix<U1, f64> = BlockMatrix::new();
        b.insert_block(nd::array![[1.0], [1.0]], 1, 1).unwrap();
        b.insert_block(nd::array![[2.0, 0.0]], 2, 0).unwrap();
        let c = gemm(&a, &b).unwrap();
        assert_eq!(c.n_blocks(), 2);
        assert_eq!(c.get(0, 1).unwrap(), &nd::array![[3.0]]);
        assert_eq!(c.get(1, 0).unwrap(), &nd::array![[6.0, 0.0]]);
    }

    #[test]
    fn gemm_rejects_inner_mismatch() {
        let mut a: BlockMatrix<U1, f64> = BlockMatrix::new();
        a.insert_block(nd::Array2::ones((2, 2)), 0, 0).unwrap();
        let mut b: BlockMatrix<U1, f64> = BlockMatrix::new();
        b.insert_block(nd::Array2::ones((3, 1)), 0, 0).unwrap();
        assert!(gemm(&a, &b).is_err());
    }

    #[test]
    fn svd_qr_lq_reconstruct() {
        let mut rng = StdRng::seed_from_u64(1);
        let m = random_diag(&mut rng, &[(-1, 3, 2), (0, 2, 4), (2, 1, 1)]);

        let BlockSvd { u, s, vt } = svd(&m).unwrap();
        let back = gemm(&scale_columns(&u, &s), &vt).unwrap();
        assert_abs_diff_eq!(distance(&back, &m), 0.0, epsilon = 1e-12);

        let (q, r) = qr(&m).unwrap();
        assert_abs_diff_eq!(distance(&gemm(&q, &r).unwrap(), &m), 0.0, epsilon = 1e-12);

        let (l, q) = lq(&m).unwrap();
        assert_abs_diff_eq!(distance(&gemm(&l, &q).unwrap(), &m), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn svd_requires_unique_column_charges() {
        let mut m: BlockMatrix<U1, f64> = BlockMatrix::new();
        m.insert_block(nd::Array2::ones((1, 1)), 0, 1).unwrap();
        m.insert_block(nd::Array2::ones((1, 1)), 2, 1).unwrap();
        assert!(matches!(svd(&m), Err(BlockMatrixError::NotBlockDiagonal(_))));
    }

    #[test]
    fn svd_truncate_caps_bond() {
        let mut rng = StdRng::seed_from_u64(2);
        let m = random_diag(&mut rng, &[(0, 4, 4), (1, 3, 3)]);
        let (full, _) = svd_truncate(&m, TruncationParams::exact()).unwrap();
        assert_eq!(full.s.iter().map(|(_, v)| v.len()).sum::<usize>(), 7);
        let (cut, res) = svd_truncate(&m, TruncationParams::new(3, 0.0)).unwrap();
        assert_eq!(res.bond_dimension, 3);
        assert!(res.discarded_weight > 0.0);
        assert_eq!(cut.u.right_basis().sum_of_sizes(), 3);
        assert_eq!(cut.vt.left_basis().sum_of_sizes(), 3);
    }

    #[test]
    fn larger_bonds_discard_less() {
        let mut rng = StdRng::seed_from_u64(8);
        let m = random_diag(&mut rng, &[(-1, 3, 3), (0, 5, 4), (1, 2, 3)]);
        let norm2 = m.norm().powi(2);
        let mut prev = f64::INFINITY;
        for max_bond_dim in 1..=9 {
            let (cut, res) = svd_truncate(&m, TruncationParams::new(max_bond_dim, 0.0))
                .unwrap();
            assert!(res.bond_dimension <= max_bond_dim);
            assert!(
                res.discarded_weight <= prev + 1e-14,
                "M = {}: {} > {}", max_bond_dim, res.discarded_weight, prev,
            );
            let back = gemm(&scale_columns(&cut.u, &cut.s), &cut.vt).unwrap();
            assert_abs_diff_eq!(
                distance(&back, &m).powi(2) / norm2, res.discarded_weight, epsilon = 1e-10);
            prev = res.discarded_weight;
        }
        assert_abs_diff_eq!(prev, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn heev_truncate_keeps_dominant_sector() {
        let mut rho: BlockMatrix<U1, f64> = BlockMatrix::new();
        rho.insert_block(nd::array![[0.7, 0.0], [0.0, 0.2]], 0, 0).unwrap();
        rho.insert_block(nd::array![[0.1]], 1, 1).unwrap();
        let (u, evals, res) = heev_truncate(&rho, TruncationParams::new(2, 0.0)).unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].0, 0);
        assert_abs_diff_eq!(evals[0].1[0], 0.7, epsilon = 1e-12);
        assert_eq!(u.n_blocks(), 1);
        assert_abs_diff_eq!(res.discarded_weight, 0.1 / 1.0, epsilon = 1e-12);
    }
}
