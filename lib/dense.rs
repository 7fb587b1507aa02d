//! Dense local-matrix kernels.
//!
//! These are thin wrappers around `ndarray` and `ndarray-linalg` returning
//! thin (economy-sized) factorizations. Every block-sparse operation is
//! defined purely in terms of the functions here.

use ndarray as nd;
use ndarray_linalg::{
    Eigh,
    QR,
    SVD,
    UPLO,
    error::LinalgError,
};
use num_traits::{ Float, FromPrimitive, ToPrimitive, Zero };
use rand::Rng;
use crate::Elem;

pub type DenseResult<T> = Result<T, LinalgError>;

/// Thin singular value decomposition `m = u · diag(s) · vt`.
#[derive(Clone, Debug)]
pub struct DenseSvd<A: Elem> {
    /// Left singular vectors as columns, `m × k`.
    pub u: nd::Array2<A>,
    /// Singular values in descending order, length `k`.
    pub s: nd::Array1<A::Real>,
    /// Right singular vectors as rows, `k × n`.
    pub vt: nd::Array2<A>,
}

/// Convert a real scalar to `f64`.
pub fn real_to_f64<R: Float>(r: R) -> f64 {
    r.to_f64().unwrap_or(f64::NAN)
}

/// Convert an `f64` to an element type, with zero as a fallback.
pub fn elem_from_f64<A: Elem>(x: f64) -> A {
    A::from_f64(x).unwrap_or_else(A::zero)
}

/// Return the conjugate transpose of `m`.
pub fn adjoint<A, S>(m: &nd::ArrayBase<S, nd::Ix2>) -> nd::Array2<A>
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    m.t().mapv(|x| x.conj())
}

/// Return the trace of `m`, summed over the leading diagonal only.
pub fn trace<A, S>(m: &nd::ArrayBase<S, nd::Ix2>) -> A
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    m.diag().iter().fold(A::zero(), |acc, x| acc + *x)
}

/// Return the squared Frobenius norm of `m`.
pub fn norm_sq<A, S>(m: &nd::ArrayBase<S, nd::Ix2>) -> A::Real
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    m.iter()
        .map(|x| (*x * x.conj()).re())
        .fold(A::Real::zero(), |acc, x| acc + x)
}

/// Return `Σ conj(a) · b` over all elements.
pub fn overlap<A, S, T>(
    a: &nd::ArrayBase<S, nd::Ix2>,
    b: &nd::ArrayBase<T, nd::Ix2>,
) -> A
where
    A: Elem,
    S: nd::Data<Elem = A>,
    T: nd::Data<Elem = A>,
{
    a.iter().zip(b.iter())
        .fold(A::zero(), |acc, (x, y)| acc + x.conj() * *y)
}

/// Return a copy of `m` zero-padded (or cropped) to `rows × cols`.
pub fn resized<A, S>(m: &nd::ArrayBase<S, nd::Ix2>, rows: usize, cols: usize)
    -> nd::Array2<A>
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    let mut out: nd::Array2<A> = nd::Array2::zeros((rows, cols));
    let r = rows.min(m.nrows());
    let c = cols.min(m.ncols());
    out.slice_mut(nd::s![..r, ..c]).assign(&m.slice(nd::s![..r, ..c]));
    out
}

/// Return the Kronecker product `a ⊗ b`, where element `(i, j)` of `a`
/// owns the sub-matrix at rows `i * b.nrows()..` and columns
/// `j * b.ncols()..`.
pub fn kron<A, S, T>(a: &nd::ArrayBase<S, nd::Ix2>, b: &nd::ArrayBase<T, nd::Ix2>)
    -> nd::Array2<A>
where
    A: Elem,
    S: nd::Data<Elem = A>,
    T: nd::Data<Elem = A>,
{
    let (ar, ac) = a.dim();
    let (br, bc) = b.dim();
    let mut out: nd::Array2<A> = nd::Array2::zeros((ar * br, ac * bc));
    for ((i, j), x) in a.indexed_iter() {
        out.slice_mut(nd::s![i * br..(i + 1) * br, j * bc..(j + 1) * bc])
            .zip_mut_with(b, |o, y| { *o = *x * *y; });
    }
    out
}

/// Return an `rows × cols` matrix with elements drawn uniformly from
/// `[-1, 1)`.
pub fn random<A, R>(rows: usize, cols: usize, rng: &mut R) -> nd::Array2<A>
where
    A: Elem,
    R: Rng + ?Sized,
{
    nd::Array2::from_shape_simple_fn(
        (rows, cols), || elem_from_f64(rng.gen_range(-1.0..1.0)))
}

/// Thin SVD of `m`.
///
/// Matrices with a zero dimension decompose into empty factors.
pub fn svd<A, S>(m: &nd::ArrayBase<S, nd::Ix2>) -> DenseResult<DenseSvd<A>>
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    let (nr, nc) = m.dim();
    let k = nr.min(nc);
    if k == 0 {
        return Ok(DenseSvd {
            u: nd::Array2::zeros((nr, 0)),
            s: nd::Array1::zeros(0),
            vt: nd::Array2::zeros((0, nc)),
        });
    }
    let (Some(u), s, Some(vt)) = m.svd(true, true)?
        else {
            let kind = nd::ErrorKind::IncompatibleShape;
            return Err(LinalgError::Shape(nd::ShapeError::from_kind(kind)));
        };
    let u = u.slice(nd::s![.., ..k]).to_owned();
    let vt = vt.slice(nd::s![..k, ..]).to_owned();
    Ok(DenseSvd { u, s, vt })
}

/// Thin QR decomposition `m = q · r`, with `q` of shape `m × k` and `r` of
/// shape `k × n`.
pub fn qr<A, S>(m: &nd::ArrayBase<S, nd::Ix2>)
    -> DenseResult<(nd::Array2<A>, nd::Array2<A>)>
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    let (nr, nc) = m.dim();
    if nr.min(nc) == 0 {
        return Ok((nd::Array2::zeros((nr, 0)), nd::Array2::zeros((0, nc))));
    }
    m.to_owned().qr()
}

/// Thin LQ decomposition `m = l · q`, with `l` of shape `m × k` and `q` of
/// shape `k × n` with orthonormal rows.
pub fn lq<A, S>(m: &nd::ArrayBase<S, nd::Ix2>)
    -> DenseResult<(nd::Array2<A>, nd::Array2<A>)>
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    let (q, r) = qr(&adjoint(m))?;
    Ok((adjoint(&r), adjoint(&q)))
}

/// Eigen-decomposition of a Hermitian matrix, with eigenvalues in
/// *descending* order and eigenvectors as the matching columns.
///
/// Only the lower triangle of `m` is read.
pub fn heev<A, S>(m: &nd::ArrayBase<S, nd::Ix2>)
    -> DenseResult<(nd::Array1<A::Real>, nd::Array2<A>)>
where
    A: Elem,
    S: nd::Data<Elem = A>,
{
    let n = m.nrows();
    if n == 0 {
        return Ok((nd::Array1::zeros(0), nd::Array2::zeros((0, 0))));
    }
    let (evals, evecs) = m.to_owned().eigh(UPLO::Lower)?;
    let evals: nd::Array1<A::Real> = evals.iter().rev().copied().collect();
    let mut flipped: nd::Array2<A> = nd::Array2::zeros((n, n));
    flipped.axis_iter_mut(nd::Axis(1))
        .zip(evecs.axis_iter(nd::Axis(1)).rev())
        .for_each(|(mut dst, src)| { dst.assign(&src); });
    Ok((evals, flipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::C64;

    fn max_abs_diff(a: &nd::Array2<f64>, b: &nd::Array2<f64>) -> f64 {
        a.iter().zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn svd_reconstructs() {
        let mut rng = StdRng::seed_from_u64(10);
        let m: nd::Array2<f64> = random(5, 3, &mut rng);
        let DenseSvd { u, s, vt } = svd(&m).unwrap();
        assert_eq!(u.dim(), (5, 3));
        assert_eq!(vt.dim(), (3, 3));
        let us = &u * &s.view().insert_axis(nd::Axis(0));
        assert_abs_diff_eq!(max_abs_diff(&us.dot(&vt), &m), 0.0, epsilon = 1e-12);
        assert!(s.windows(2).into_iter().all(|w| w[0] >= w[1]));
    }

    #[test]
    fn qr_and_lq_reconstruct() {
        let mut rng = StdRng::seed_from_u64(11);
        let m: nd::Array2<f64> = random(4, 6, &mut rng);
        let (q, r) = qr(&m).unwrap();
        assert_eq!(q.dim(), (4, 4));
        assert_abs_diff_eq!(max_abs_diff(&q.dot(&r), &m), 0.0, epsilon = 1e-12);
        let (l, q) = lq(&m).unwrap();
        assert_eq!(q.dim(), (4, 6));
        assert_abs_diff_eq!(max_abs_diff(&l.dot(&q), &m), 0.0, epsilon = 1e-12);
        let qqt = q.dot(&q.t());
        assert_abs_diff_eq!(
            max_abs_diff(&qqt, &nd::Array2::eye(4)), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn heev_sorts_descending() {
        let m: nd::Array2<f64> = nd::array![[2.0, 1.0], [1.0, 2.0]];
        let (evals, evecs) = heev(&m).unwrap();
        assert_abs_diff_eq!(evals[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(evals[1], 1.0, epsilon = 1e-12);
        let v0 = evecs.column(0);
        assert_abs_diff_eq!(v0[0].abs(), v0[1].abs(), epsilon = 1e-12);
    }

    #[test]
    fn heev_handles_complex_hermitian() {
        let i = C64::i();
        let two = C64::from(2.0);
        let m: nd::Array2<C64> = nd::array![[two, i], [-i, two]];
        let (evals, evecs) = heev(&m).unwrap();
        assert_abs_diff_eq!(evals[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(evals[1], 1.0, epsilon = 1e-12);
        let v = evecs.column(0);
        let mv = m.dot(&v);
        for (x, y) in mv.iter().zip(v.iter()) {
            assert_abs_diff_eq!((x - y * 3.0).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn kron_layout() {
        let a: nd::Array2<f64> = nd::array![[1.0, 2.0]];
        let b: nd::Array2<f64> = nd::array![[1.0], [10.0]];
        assert_eq!(kron(&a, &b), nd::array![[1.0, 2.0], [10.0, 20.0]]);
    }

    #[test]
    fn resize_pads_with_zeros() {
        let m: nd::Array2<f64> = nd::array![[1.0, 2.0], [3.0, 4.0]];
        let p = resized(&m, 3, 1);
        assert_eq!(p, nd::array![[1.0], [3.0], [0.0]]);
    }
}
