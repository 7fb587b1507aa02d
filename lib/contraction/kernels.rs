//! Sparse kernels behind `lbtm` and `rbtm`.
//!
//! The kernels come in two stages. First, every boundary entry that the MPO
//! can reach is multiplied into the ket ([`left_products`],
//! [`right_products`]); this is where all the dense `gemm` work happens.
//! Second, for one MPO column (or row), the operator blocks are applied to
//! those products by scaled copies of contiguous sub-matrices
//! ([`lbtm_kernel`], [`rbtm_kernel`]).
//!
//! The second stage takes its inputs as `&[Option<&BlockMatrix>]` so that it
//! can run equally on owned products or on borrowed runtime payloads.

use ndarray as nd;
use num_traits::Zero;
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    block_ops,
    boundary::Boundary,
    contraction::{ ContractionError, ContractionResult, SiteIndices },
    index::ProductBasis,
    mpo::MPOTensor,
    symmetry::Symmetry,
};
use ContractionError::*;

/// Return `T_b = L_b · ket` for every row `b` of `mpo` holding at least one
/// entry, with `ket` right-paired.
pub fn left_products<S, A>(
    left: &Boundary<S, A>,
    ket_rp: &BlockMatrix<S, A>,
    mpo: &MPOTensor<S, A>,
) -> ContractionResult<Vec<Option<BlockMatrix<S, A>>>>
where
    S: Symmetry,
    A: Elem,
{
    if left.aux_dim() != mpo.row_dim() {
        return Err(AuxMismatch { expected: mpo.row_dim(), found: left.aux_dim() });
    }
    (0..mpo.row_dim())
        .map(|b| {
            if mpo.row(b).next().is_none() { return Ok(None); }
            Ok(Some(block_ops::gemm(&left[b], ket_rp)?))
        })
        .collect()
}

/// Return `T_{b'} = ket · R_{b'}` for every column `b'` of `mpo` holding at
/// least one entry, with `ket` left-paired.
pub fn right_products<S, A>(
    right: &Boundary<S, A>,
    ket_lp: &BlockMatrix<S, A>,
    mpo: &MPOTensor<S, A>,
) -> ContractionResult<Vec<Option<BlockMatrix<S, A>>>>
where
    S: Symmetry,
    A: Elem,
{
    if right.aux_dim() != mpo.col_dim() {
        return Err(AuxMismatch { expected: mpo.col_dim(), found: right.aux_dim() });
    }
    (0..mpo.col_dim())
        .map(|bp| {
            if mpo.column(bp).next().is_none() { return Ok(None); }
            Ok(Some(block_ops::gemm(ket_lp, &right[bp])?))
        })
        .collect()
}

/// Apply column `bp` of `mpo` to the left products `t`.
///
/// Each `t[b]` has rows on the bra's left bond and columns right-paired over
/// the ket's physical and right indices. The output has rows left-paired
/// over the bra's physical and left indices, and columns on the ket's right
/// bond.
pub fn lbtm_kernel<S, A>(
    bp: usize,
    t: &[Option<&BlockMatrix<S, A>>],
    mpo: &MPOTensor<S, A>,
    ket: &SiteIndices<S>,
    bra: &SiteIndices<S>,
) -> ContractionResult<BlockMatrix<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    let pb_in = ProductBasis::right_paired(&ket.phys, &ket.right);
    let pb_out = ProductBasis::left_paired(&bra.phys, &bra.left);
    let mut out: BlockMatrix<S, A> = BlockMatrix::new();
    for (b, terms) in mpo.column(bp) {
        let Some(Some(tb)) = t.get(b) else { continue; };
        for term in terms {
            let op = mpo.op(term).ok_or(MissingOperator(term.tag))?;
            for (e, blk) in tb.iter() {
                let lsz = bra.left.size_of_block(e.lc);
                if lsz == 0 { continue; }
                if lsz != e.ls { return Err(IndexMismatch("bra left")); }
                for (eo, w) in op.iter() {
                    let r = S::fuse(e.rc, eo.rc);
                    let rsz = ket.right.size_of_block(r);
                    let Some(in_off) = pb_in.offset(eo.rc, r) else { continue; };
                    if rsz == 0 { continue; }
                    if in_off + eo.rs * rsz > e.rs {
                        return Err(IndexMismatch("ket right"));
                    }
                    let out_c = S::fuse(e.lc, eo.lc);
                    if !bra.right.has(out_c) { continue; }
                    let Some(out_off) = pb_out.offset(eo.lc, e.lc) else { continue; };
                    if out_off + eo.ls * lsz > pb_out.size(out_c) {
                        return Err(IndexMismatch("bra phys"));
                    }
                    let dst = out.block_or_zeros(out_c, r, pb_out.size(out_c), rsz);
                    for ((ssp, ss), x) in w.indexed_iter() {
                        if x.is_zero() { continue; }
                        let r0 = out_off + ssp * lsz;
                        let c0 = in_off + ss * rsz;
                        dst.slice_mut(nd::s![r0..r0 + lsz, ..])
                            .scaled_add(*x * term.scale, &blk.slice(nd::s![.., c0..c0 + rsz]));
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Apply row `b` of `mpo` to the right products `t`.
///
/// Each `t[b']` has rows left-paired over the ket's physical and left
/// indices and columns on the bra's right bond. The output has rows on the
/// ket's left bond and columns right-paired over the bra's physical and
/// right indices.
pub fn rbtm_kernel<S, A>(
    b: usize,
    t: &[Option<&BlockMatrix<S, A>>],
    mpo: &MPOTensor<S, A>,
    ket: &SiteIndices<S>,
    bra: &SiteIndices<S>,
) -> ContractionResult<BlockMatrix<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    let pb_in = ProductBasis::left_paired(&ket.phys, &ket.left);
    let pb_out = ProductBasis::right_paired(&bra.phys, &bra.right);
    let mut out: BlockMatrix<S, A> = BlockMatrix::new();
    for (bp, terms) in mpo.row(b) {
        let Some(Some(tb)) = t.get(bp) else { continue; };
        for term in terms {
            let op = mpo.op(term).ok_or(MissingOperator(term.tag))?;
            for (e, blk) in tb.iter() {
                let rsz = bra.right.size_of_block(e.rc);
                if rsz == 0 { continue; }
                if rsz != e.rs { return Err(IndexMismatch("bra right")); }
                for (eo, w) in op.iter() {
                    let l = S::difference(e.lc, eo.rc);
                    let lsz = ket.left.size_of_block(l);
                    let Some(in_off) = pb_in.offset(eo.rc, l) else { continue; };
                    if lsz == 0 { continue; }
                    if in_off + eo.rs * lsz > e.ls {
                        return Err(IndexMismatch("ket left"));
                    }
                    let out_c = S::difference(e.rc, eo.lc);
                    if !bra.left.has(out_c) { continue; }
                    let Some(out_off) = pb_out.offset(eo.lc, e.rc) else { continue; };
                    if out_off + eo.ls * rsz > pb_out.size(out_c) {
                        return Err(IndexMismatch("bra phys"));
                    }
                    let dst = out.block_or_zeros(l, out_c, lsz, pb_out.size(out_c));
                    for ((ssp, ss), x) in w.indexed_iter() {
                        if x.is_zero() { continue; }
                        let r0 = in_off + ss * lsz;
                        let c0 = out_off + ssp * rsz;
                        dst.slice_mut(nd::s![.., c0..c0 + rsz])
                            .scaled_add(*x * term.scale, &blk.slice(nd::s![r0..r0 + lsz, ..]));
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use std::sync::Arc;
    use crate::{
        index::Index,
        mpo::{ MPOTerm, OperatorTable },
        mps_tensor::MPSTensor,
        symmetry::{ TrivialGroup, U1 },
    };

    fn spin() -> Index<U1> { Index::from_sectors([(-1, 1), (1, 1)]) }

    fn random_tensor(seed: u64) -> MPSTensor<U1, f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let left: Index<U1> = Index::from_sectors([(-1, 2), (1, 3)]);
        let right: Index<U1> = Index::from_sectors([(-2, 1), (0, 4), (2, 2)]);
        MPSTensor::random(spin(), left, right, &mut rng)
    }

    fn distance(a: &BlockMatrix<U1, f64>, b: &BlockMatrix<U1, f64>) -> f64 {
        let mut d = a.clone();
        d -= b;
        d.norm()
    }

    #[test]
    fn identity_lbtm_is_a_reshape() {
        let ket = random_tensor(1);
        let idx = SiteIndices::of(&ket);
        let mpo = MPOTensor::identity(&spin());
        let left = Boundary::left_edge(ket.left_i());
        let t = left_products(&left, &ket.right_paired_data(), &mpo).unwrap();
        let t: Vec<Option<&BlockMatrix<U1, f64>>> = t.iter().map(|x| x.as_ref()).collect();
        let x = lbtm_kernel(0, &t, &mpo, &idx, &idx).unwrap();
        assert_abs_diff_eq!(
            distance(&x, &ket.left_paired_data()), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn identity_rbtm_is_a_reshape() {
        let ket = random_tensor(2);
        let idx = SiteIndices::of(&ket);
        let mpo = MPOTensor::identity(&spin());
        let right = Boundary::right_edge(ket.right_i());
        let t = right_products(&right, &ket.left_paired_data(), &mpo).unwrap();
        let t: Vec<Option<&BlockMatrix<U1, f64>>> = t.iter().map(|x| x.as_ref()).collect();
        let y = rbtm_kernel(0, &t, &mpo, &idx, &idx).unwrap();
        assert_abs_diff_eq!(
            distance(&y, &ket.right_paired_data()), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn aux_dimensions_are_checked() {
        let ket = random_tensor(3);
        let mpo = MPOTensor::identity(&spin());
        let left: Boundary<U1, f64> = Boundary::new(3);
        assert!(matches!(
            left_products(&left, &ket.right_paired_data(), &mpo),
            Err(AuxMismatch { expected: 1, found: 3 }),
        ));
        assert!(matches!(
            right_products(&left, &ket.left_paired_data(), &mpo),
            Err(AuxMismatch { expected: 1, found: 3 }),
        ));
    }

    #[test]
    fn oversized_operator_blocks_are_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let phys: Index<TrivialGroup> = Index::from_sectors([((), 2)]);
        let bond: Index<TrivialGroup> = Index::from_sectors([((), 2)]);
        let ket: MPSTensor<TrivialGroup, f64>
            = MPSTensor::random(phys, bond.clone(), bond, &mut rng);
        let idx = SiteIndices::of(&ket);
        let mut table = OperatorTable::new();
        let mut wide: BlockMatrix<TrivialGroup, f64> = BlockMatrix::new();
        wide.insert_block(nd::Array2::eye(3), (), ()).unwrap();
        let tag = table.register(wide);
        let mpo = MPOTensor::new(
            1, 1, [(0, 0, MPOTerm { tag, scale: 1.0 })], Arc::new(table)).unwrap();

        let left = Boundary::left_edge(ket.left_i());
        let t = left_products(&left, &ket.right_paired_data(), &mpo).unwrap();
        let t: Vec<Option<&BlockMatrix<TrivialGroup, f64>>>
            = t.iter().map(|x| x.as_ref()).collect();
        assert!(matches!(
            lbtm_kernel(0, &t, &mpo, &idx, &idx), Err(IndexMismatch("ket right"))));

        let right = Boundary::right_edge(ket.right_i());
        let t = right_products(&right, &ket.left_paired_data(), &mpo).unwrap();
        let t: Vec<Option<&BlockMatrix<TrivialGroup, f64>>>
            = t.iter().map(|x| x.as_ref()).collect();
        assert!(matches!(
            rbtm_kernel(0, &t, &mpo, &idx, &idx), Err(IndexMismatch("ket left"))));
    }

    #[test]
    fn empty_products_give_empty_output() {
        let ket = random_tensor(4);
        let idx = SiteIndices::of(&ket);
        let mpo: MPOTensor<U1, f64> = MPOTensor::identity(&spin());
        let x = lbtm_kernel(0, &[None], &mpo, &idx, &idx).unwrap();
        assert!(x.is_empty());
        let y = rbtm_kernel(0, &[], &mpo, &idx, &idx).unwrap();
        assert!(y.is_empty());
    }
}
