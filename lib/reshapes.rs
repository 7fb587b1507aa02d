//! Pairing transforms between the matrix layouts of site tensors.
//!
//! A site tensor `T[l, s, r]` is stored as a block-sparse matrix in one of
//! two layouts:
//!
//! - *left-paired*: rows are `(s, l)` fused as `fuse(l, s)` (see
//!   [`ProductBasis::left_paired`]), columns are `r`;
//! - *right-paired*: rows are `l`, columns are `(s, r)` fused as
//!   `fuse(r, inverse(s))` (see [`ProductBasis::right_paired`]).
//!
//! Within a fused sector, the `(s, x)` pair owns a contiguous range and the
//! physical index is the slow one, so each physical component of a block is
//! a contiguous sub-matrix. Every transform here moves those sub-matrices
//! between layouts without touching their elements; sectors that a layout
//! cannot hold are skipped.
//!
//! The two-site transforms convert between the product layout of a merged
//! pair of sites (rows `(s1, l)`, columns `(s2, r)`) and the left-paired
//! layout over the fused physical index `s1 ⊗ s2`.

use ndarray as nd;
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    index::{ Index, ProductBasis },
    symmetry::Symmetry,
};

/// Return the fused physical index of two sites, with the `(s1, s2)` layout
/// used by the two-site transforms.
pub fn fused_phys<S: Symmetry>(phys1: &Index<S>, phys2: &Index<S>)
    -> ProductBasis<S>
{
    ProductBasis::new(phys1, phys2, S::fuse)
}

/// Convert left-paired data to right-paired data.
pub fn left_to_right<S, A>(
    phys: &Index<S>,
    left: &Index<S>,
    right: &Index<S>,
    m: &BlockMatrix<S, A>,
) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let pb_l = ProductBasis::left_paired(phys, left);
    let pb_r = ProductBasis::right_paired(phys, right);
    let mut out = BlockMatrix::new();
    for (e, b) in m.iter() {
        for (s, ssz) in phys.iter() {
            let l = S::difference(e.lc, s);
            let lsz = left.size_of_block(l);
            let (Some(off_l), Some(off_r)) = (pb_l.offset(s, l), pb_r.offset(s, e.rc))
                else { continue; };
            if lsz == 0 || off_l + ssz * lsz > e.ls { continue; }
            let rsz = e.rs;
            let in_c = S::difference(e.rc, s);
            let dst = out.block_or_zeros(l, in_c, lsz, pb_r.size(in_c));
            for ss in 0..ssz {
                let r0 = off_l + ss * lsz;
                let c0 = off_r + ss * rsz;
                dst.slice_mut(nd::s![.., c0..c0 + rsz])
                    .assign(&b.slice(nd::s![r0..r0 + lsz, ..]));
            }
        }
    }
    out
}

/// Convert right-paired data to left-paired data.
pub fn right_to_left<S, A>(
    phys: &Index<S>,
    left: &Index<S>,
    right: &Index<S>,
    m: &BlockMatrix<S, A>,
) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let pb_l = ProductBasis::left_paired(phys, left);
    let pb_r = ProductBasis::right_paired(phys, right);
    let mut out = BlockMatrix::new();
    for (e, b) in m.iter() {
        for (s, ssz) in phys.iter() {
            let r = S::fuse(e.rc, s);
            let rsz = right.size_of_block(r);
            let (Some(off_l), Some(off_r)) = (pb_l.offset(s, e.lc), pb_r.offset(s, r))
                else { continue; };
            if rsz == 0 || off_r + ssz * rsz > e.rs { continue; }
            let lsz = e.ls;
            let out_c = S::fuse(e.lc, s);
            let dst = out.block_or_zeros(out_c, r, pb_l.size(out_c), rsz);
            for ss in 0..ssz {
                let r0 = off_l + ss * lsz;
                let c0 = off_r + ss * rsz;
                dst.slice_mut(nd::s![r0..r0 + lsz, ..])
                    .assign(&b.slice(nd::s![.., c0..c0 + rsz]));
            }
        }
    }
    out
}

/// Convert the product layout of two merged sites (rows left-paired over
/// `phys1`, columns right-paired over `phys2`) to the left-paired layout over
/// the fused physical index.
pub fn two_site_to_fused<S, A>(
    phys1: &Index<S>,
    phys2: &Index<S>,
    left: &Index<S>,
    right: &Index<S>,
    m: &BlockMatrix<S, A>,
) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let pb_p = fused_phys(phys1, phys2);
    let pb_l1 = ProductBasis::left_paired(phys1, left);
    let pb_r2 = ProductBasis::right_paired(phys2, right);
    let pb_lf = ProductBasis::left_paired(pb_p.fused(), left);
    let mut out = BlockMatrix::new();
    for (e, b) in m.iter() {
        for (s1, s1sz) in phys1.iter() {
            let l = S::difference(e.lc, s1);
            let lsz = left.size_of_block(l);
            let Some(off_l1) = pb_l1.offset(s1, l) else { continue; };
            if lsz == 0 || off_l1 + s1sz * lsz > e.ls { continue; }
            for (s2, s2sz) in phys2.iter() {
                let r = S::fuse(e.rc, s2);
                let rsz = right.size_of_block(r);
                let Some(off_r2) = pb_r2.offset(s2, r) else { continue; };
                if rsz == 0 || off_r2 + s2sz * rsz > e.rs { continue; }
                let s = S::fuse(s1, s2);
                let (Some(off_p), Some(off_lf)) = (pb_p.offset(s1, s2), pb_lf.offset(s, l))
                    else { continue; };
                let out_c = S::fuse(l, s);
                let dst = out.block_or_zeros(out_c, r, pb_lf.size(out_c), rsz);
                for ss1 in 0..s1sz {
                    for ss2 in 0..s2sz {
                        let sidx = off_p + ss1 * s2sz + ss2;
                        let src_r = off_l1 + ss1 * lsz;
                        let src_c = off_r2 + ss2 * rsz;
                        let dst_r = off_lf + sidx * lsz;
                        dst.slice_mut(nd::s![dst_r..dst_r + lsz, ..])
                            .assign(&b.slice(nd::s![src_r..src_r + lsz, src_c..src_c + rsz]));
                    }
                }
            }
        }
    }
    out
}

/// Inverse of [`two_site_to_fused`].
pub fn fused_to_two_site<S, A>(
    phys1: &Index<S>,
    phys2: &Index<S>,
    left: &Index<S>,
    right: &Index<S>,
    m: &BlockMatrix<S, A>,
) -> BlockMatrix<S, A>
where
    S: Symmetry,
    A: Elem,
{
    let pb_p = fused_phys(phys1, phys2);
    let pb_l1 = ProductBasis::left_paired(phys1, left);
    let pb_r2 = ProductBasis::right_paired(phys2, right);
    let pb_lf = ProductBasis::left_paired(pb_p.fused(), left);
    let mut out = BlockMatrix::new();
    for (e, b) in m.iter() {
        let r = e.rc;
        let rsz = e.rs;
        for (s1, s1sz) in phys1.iter() {
            for (s2, s2sz) in phys2.iter() {
                let s = S::fuse(s1, s2);
                let l = S::difference(e.lc, s);
                let lsz = left.size_of_block(l);
                if lsz == 0 { continue; }
                let (Some(off_p), Some(off_lf)) = (pb_p.offset(s1, s2), pb_lf.offset(s, l))
                    else { continue; };
                let (Some(off_l1), Some(off_r2)) = (pb_l1.offset(s1, l), pb_r2.offset(s2, r))
                    else { continue; };
                let ssz = pb_p.size(s);
                if off_lf + ssz * lsz > e.ls { continue; }
                let out_l = S::fuse(l, s1);
                let out_r = S::difference(r, s2);
                let dst = out.block_or_zeros(
                    out_l, out_r, pb_l1.size(out_l), pb_r2.size(out_r));
                for ss1 in 0..s1sz {
                    for ss2 in 0..s2sz {
                        let sidx = off_p + ss1 * s2sz + ss2;
                        let src_r = off_lf + sidx * lsz;
                        let dst_r = off_l1 + ss1 * lsz;
                        let dst_c = off_r2 + ss2 * rsz;
                        dst.slice_mut(nd::s![dst_r..dst_r + lsz, dst_c..dst_c + rsz])
                            .assign(&b.slice(nd::s![src_r..src_r + lsz, ..]));
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::{ dense, symmetry::U1 };

    fn spin() -> Index<U1> { Index::from_sectors([(-1, 1), (1, 1)]) }

    // left-paired data with every allowed block filled
    fn random_left_paired(
        phys: &Index<U1>,
        left: &Index<U1>,
        right: &Index<U1>,
        rng: &mut StdRng,
    ) -> BlockMatrix<U1, f64>
    {
        let pb = ProductBasis::left_paired(phys, left);
        let mut m = BlockMatrix::new();
        for (c, n) in pb.fused().iter() {
            let rsz = right.size_of_block(c);
            if rsz > 0 {
                m.insert_block(dense::random(n, rsz, rng), c, c).unwrap();
            }
        }
        m
    }

    #[test]
    fn pairing_round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        let left: Index<U1> = Index::from_sectors([(0, 2), (2, 1)]);
        let right: Index<U1> = Index::from_sectors([(-1, 2), (1, 3), (3, 1)]);
        let m = random_left_paired(&spin(), &left, &right, &mut rng);
        let rp = left_to_right(&spin(), &left, &right, &m);
        assert_eq!(rp.left_basis(), left);
        assert_eq!(rp.num_elements(), m.num_elements());
        let back = right_to_left(&spin(), &left, &right, &rp);
        assert_eq!(back, m);
    }

    #[test]
    fn two_site_round_trip() {
        let mut rng = StdRng::seed_from_u64(6);
        let left: Index<U1> = Index::from_sectors([(0, 1)]);
        let right: Index<U1> = Index::from_sectors([(-2, 1), (0, 2), (2, 1)]);
        let phys_pair = fused_phys(&spin(), &spin());
        let fused = random_left_paired(phys_pair.fused(), &left, &right, &mut rng);
        let prod = fused_to_two_site(&spin(), &spin(), &left, &right, &fused);
        assert_eq!(prod.num_elements(), fused.num_elements());
        let back = two_site_to_fused(&spin(), &spin(), &left, &right, &prod);
        assert_eq!(back, fused);
    }
}
