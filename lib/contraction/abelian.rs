//! Contraction engine for abelian symmetries.

use std::{ fmt, sync::Arc };
use ndarray as nd;
use crate::{
    Elem,
    block_matrix::BlockMatrix,
    block_ops,
    boundary::Boundary,
    contraction::{
        ContractionEngine,
        ContractionError,
        ContractionResult,
        PathPolicy,
        SiteIndices,
        kernels,
    },
    dense,
    mpo::MPOTensor,
    mps_tensor::{ MPSTensor, Normalization, Pairing },
    reshapes,
    runtime::{ Complexity, FnKernel, Handle, Payload, Runtime, RuntimeResult },
    symmetry::Symmetry,
    truncation::TruncationParams,
    two_site::{ Split, TwoSiteTensor },
};

/// [`ContractionEngine`] for any abelian [`Symmetry`].
///
/// By default everything runs eagerly on the calling thread. With a
/// [runtime][Self::with_runtime] attached, `site_hamil2` is instead submitted
/// as a graph of kernels: one product per reachable boundary entry, one
/// operator application per MPO column (or row), and a final accumulation.
pub struct AbelianEngine<S: Symmetry, A: Elem> {
    path_policy: PathPolicy,
    use_hermitian: bool,
    runtime: Option<Arc<Runtime<BlockMatrix<S, A>>>>,
}

impl<S: Symmetry, A: Elem> Default for AbelianEngine<S, A> {
    fn default() -> Self {
        Self { path_policy: PathPolicy::Auto, use_hermitian: true, runtime: None }
    }
}

impl<S: Symmetry, A: Elem> Clone for AbelianEngine<S, A> {
    fn clone(&self) -> Self {
        Self {
            path_policy: self.path_policy,
            use_hermitian: self.use_hermitian,
            runtime: self.runtime.clone(),
        }
    }
}

impl<S: Symmetry, A: Elem> fmt::Debug for AbelianEngine<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbelianEngine")
            .field("path_policy", &self.path_policy)
            .field("use_hermitian", &self.use_hermitian)
            .field("runtime", &self.runtime.as_ref().map(|rt| rt.ranks()))
            .finish()
    }
}

impl<S: Symmetry, A: Elem> AbelianEngine<S, A> {
    pub fn new() -> Self { Self::default() }

    /// Set the policy choosing between left- and right-built `site_hamil2`.
    pub fn with_path_policy(mut self, path_policy: PathPolicy) -> Self {
        self.path_policy = path_policy;
        self
    }

    /// Enable or disable the Hermitian shortcut in boundary steps.
    ///
    /// The shortcut only applies where the MPO declares Hermitian partners.
    pub fn with_hermitian(mut self, use_hermitian: bool) -> Self {
        self.use_hermitian = use_hermitian;
        self
    }

    /// Dispatch `site_hamil2` through `runtime`.
    pub fn with_runtime(mut self, runtime: Arc<Runtime<BlockMatrix<S, A>>>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Return the path policy.
    pub fn path_policy(&self) -> PathPolicy { self.path_policy }

    /// Return `true` if the Hermitian shortcut is enabled.
    pub fn use_hermitian(&self) -> bool { self.use_hermitian }

    /// Return the attached runtime, if any.
    pub fn runtime(&self) -> Option<&Arc<Runtime<BlockMatrix<S, A>>>> {
        self.runtime.as_ref()
    }
}

fn borrowed<S, A>(products: &[Option<BlockMatrix<S, A>>])
    -> Vec<Option<&BlockMatrix<S, A>>>
where
    S: Symmetry,
    A: Elem,
{
    products.iter().map(Option::as_ref).collect()
}

fn accumulate<S, A>(acc: &mut BlockMatrix<S, A>, m: &BlockMatrix<S, A>)
where
    S: Symmetry,
    A: Elem,
{
    m.iter().for_each(|(e, b)| { acc.match_and_add_block(b, e.lc, e.rc); });
}

fn check_aux<S, A>(
    left: &Boundary<S, A>,
    right: &Boundary<S, A>,
    mpo: &MPOTensor<S, A>,
) -> ContractionResult<()>
where
    S: Symmetry,
    A: Elem,
{
    if left.aux_dim() != mpo.row_dim() {
        return Err(ContractionError::AuxMismatch {
            expected: mpo.row_dim(),
            found: left.aux_dim(),
        });
    }
    if right.aux_dim() != mpo.col_dim() {
        return Err(ContractionError::AuxMismatch {
            expected: mpo.col_dim(),
            found: right.aux_dim(),
        });
    }
    Ok(())
}

/// Copy `data` into the block structure of `template`, zero-filling absent
/// sectors.
///
/// A present block whose shape disagrees with the template is an
/// [`ContractionError::IndexMismatch`].
fn restrict_to<S, A>(template: &BlockMatrix<S, A>, mut data: BlockMatrix<S, A>)
    -> ContractionResult<BlockMatrix<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    let mut out = BlockMatrix::new();
    for (e, _) in template.iter() {
        let block = match data.take_block(e.lc, e.rc) {
            Some(b) if b.dim() == (e.ls, e.rs) => b,
            Some(_) => return Err(ContractionError::IndexMismatch("ket")),
            None => nd::Array2::zeros((e.ls, e.rs)),
        };
        out.insert_block(block, e.lc, e.rc)?;
    }
    Ok(out)
}

fn hamil_left_build<S, A>(
    ket: &MPSTensor<S, A>,
    left: &Boundary<S, A>,
    right: &Boundary<S, A>,
    mpo: &MPOTensor<S, A>,
) -> ContractionResult<BlockMatrix<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    let idx = SiteIndices::of(ket);
    let products = kernels::left_products(left, &ket.right_paired_data(), mpo)?;
    let t = borrowed(&products);
    let mut acc = BlockMatrix::new();
    for bp in 0..mpo.col_dim() {
        let x = kernels::lbtm_kernel(bp, &t, mpo, &idx, &idx)?;
        if x.is_empty() { continue; }
        accumulate(&mut acc, &block_ops::gemm(&x, &right[bp])?);
    }
    Ok(acc)
}

fn hamil_right_build<S, A>(
    ket: &MPSTensor<S, A>,
    left: &Boundary<S, A>,
    right: &Boundary<S, A>,
    mpo: &MPOTensor<S, A>,
) -> ContractionResult<BlockMatrix<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    let idx = SiteIndices::of(ket);
    let products = kernels::right_products(right, &ket.left_paired_data(), mpo)?;
    let t = borrowed(&products);
    let mut acc = BlockMatrix::new();
    for b in 0..mpo.row_dim() {
        let y = kernels::rbtm_kernel(b, &t, mpo, &idx, &idx)?;
        if y.is_empty() { continue; }
        accumulate(&mut acc, &block_ops::gemm(&left[b], &y)?);
    }
    Ok(reshapes::right_to_left(&idx.phys, &idx.left, &idx.right, &acc))
}

// objects created for one graph, released on every exit path
struct GraphScope<'a, T: Payload> {
    rt: &'a Runtime<T>,
    handles: Vec<Handle>,
}

impl<'a, T: Payload> GraphScope<'a, T> {
    fn new(rt: &'a Runtime<T>) -> Self { Self { rt, handles: Vec::new() } }

    fn create(&mut self, value: T) -> Handle {
        let h = self.rt.create(value);
        self.handles.push(h);
        h
    }

    fn declare(&mut self) -> Handle {
        let h = self.rt.declare();
        self.handles.push(h);
        h
    }

    // release everything, returning the first failure
    fn close(mut self) -> RuntimeResult<()> {
        let handles = std::mem::take(&mut self.handles);
        handles.into_iter()
            .map(|h| self.rt.release(h))
            .fold(Ok(()), |acc, res| acc.and(res))
    }
}

impl<'a, T: Payload> Drop for GraphScope<'a, T> {
    fn drop(&mut self) {
        for h in self.handles.drain(..) {
            if let Err(err) = self.rt.release(h) {
                log::warn!(handle = h.id(); "failed to release graph object: {}", err);
            }
        }
    }
}

/// Run `site_hamil2` as a kernel graph on `rt`, returning left-paired data.
fn hamil_dag<S, A>(
    rt: &Runtime<BlockMatrix<S, A>>,
    path: PathPolicy,
    ket: &MPSTensor<S, A>,
    left: &Boundary<S, A>,
    right: &Boundary<S, A>,
    mpo: &MPOTensor<S, A>,
) -> ContractionResult<BlockMatrix<S, A>>
where
    S: Symmetry,
    A: Elem,
{
    let idx = SiteIndices::of(ket);
    let left_build = path != PathPolicy::RightBuild;
    let mut scope = GraphScope::new(rt);
    let h_ket = scope.create(
        if left_build {
            ket.right_paired_data().into_owned()
        } else {
            ket.left_paired_data().into_owned()
        }
    );
    let h_left: Vec<Handle> = left.iter().map(|m| scope.create(m.clone())).collect();
    let h_right: Vec<Handle> = right.iter().map(|m| scope.create(m.clone())).collect();
    let (h_outer, h_inner) =
        if left_build { (&h_left, &h_right) } else { (&h_right, &h_left) };
    let (n_prod, n_out) =
        if left_build {
            (mpo.row_dim(), mpo.col_dim())
        } else {
            (mpo.col_dim(), mpo.row_dim())
        };

    let mut h_prod: Vec<Option<Handle>> = vec![None; n_prod];
    for (k, h_env) in h_outer.iter().enumerate().take(n_prod) {
        let reachable =
            if left_build {
                mpo.row(k).next().is_some()
            } else {
                mpo.column(k).next().is_some()
            };
        if !reachable { continue; }
        let h = scope.declare();
        let kernel = FnKernel::new(
            "site_hamil2.product",
            move |i: &[&BlockMatrix<S, A>], o: &mut [BlockMatrix<S, A>]| {
                o[0] =
                    if left_build {
                        block_ops::gemm(i[0], i[1])?
                    } else {
                        block_ops::gemm(i[1], i[0])?
                    };
                Ok(())
            })
            .reads(*h_env)
            .reads(h_ket)
            .writes(h)
            .complexity(Complexity::N3);
        rt.submit(kernel)?;
        h_prod[k] = Some(h);
    }

    let mut h_terms: Vec<Handle> = Vec::with_capacity(n_out);
    for k in 0..n_out {
        let sources: Vec<(usize, Handle)>
            = if left_build {
                mpo.column(k)
                    .filter_map(|(b, _)| h_prod[b].map(|h| (b, h)))
                    .collect()
            } else {
                mpo.row(k)
                    .filter_map(|(bp, _)| h_prod[bp].map(|h| (bp, h)))
                    .collect()
            };
        if sources.is_empty() { continue; }
        let slots: Vec<usize> = sources.iter().map(|(s, _)| *s).collect();
        let mpo_k = mpo.clone();
        let idx_k = idx.clone();
        let h = scope.declare();
        let mut kernel = FnKernel::new(
            "site_hamil2.term",
            move |i: &[&BlockMatrix<S, A>], o: &mut [BlockMatrix<S, A>]| {
                let mut t: Vec<Option<&BlockMatrix<S, A>>> = vec![None; n_prod];
                slots.iter().zip(i.iter())
                    .for_each(|(s, m)| { t[*s] = Some(*m); });
                let env = i[slots.len()];
                o[0] =
                    if left_build {
                        let x = kernels::lbtm_kernel(k, &t, &mpo_k, &idx_k, &idx_k)?;
                        block_ops::gemm(&x, env)?
                    } else {
                        let y = kernels::rbtm_kernel(k, &t, &mpo_k, &idx_k, &idx_k)?;
                        block_ops::gemm(env, &y)?
                    };
                Ok(())
            })
            .complexity(Complexity::N3);
        for (_, h_src) in sources.iter() { kernel = kernel.reads(*h_src); }
        kernel = kernel.reads(h_inner[k]).writes(h);
        rt.submit(kernel)?;
        h_terms.push(h);
    }

    let h_acc = scope.declare();
    let mut kernel = FnKernel::new(
        "site_hamil2.accumulate",
        move |i: &[&BlockMatrix<S, A>], o: &mut [BlockMatrix<S, A>]| {
            i.iter().for_each(|m| accumulate(&mut o[0], *m));
            Ok(())
        })
        .writes(h_acc);
    for h in h_terms.iter() { kernel = kernel.reads(*h); }
    rt.submit(kernel)?;
    log::debug!(
        products = h_prod.iter().flatten().count(),
        terms = h_terms.len();
        "site_hamil2 graph submitted"
    );

    let res = rt.sync().and_then(|_| rt.load(h_acc));
    let closed = scope.close();
    let acc = Arc::try_unwrap(res?).unwrap_or_else(|shared| (*shared).clone());
    closed?;
    if left_build {
        Ok(acc)
    } else {
        Ok(reshapes::right_to_left(&idx.phys, &idx.left, &idx.right, &acc))
    }
}

impl<S: Symmetry, A: Elem> ContractionEngine<S, A> for AbelianEngine<S, A> {
    fn lbtm(
        &self,
        ket: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        bra: &SiteIndices<S>,
    ) -> ContractionResult<Vec<BlockMatrix<S, A>>>
    {
        let products = kernels::left_products(left, &ket.right_paired_data(), mpo)?;
        let t = borrowed(&products);
        let ket_i = SiteIndices::of(ket);
        (0..mpo.col_dim())
            .map(|bp| kernels::lbtm_kernel(bp, &t, mpo, &ket_i, bra))
            .collect()
    }

    fn rbtm(
        &self,
        ket: &MPSTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        bra: &SiteIndices<S>,
    ) -> ContractionResult<Vec<BlockMatrix<S, A>>>
    {
        let products = kernels::right_products(right, &ket.left_paired_data(), mpo)?;
        let t = borrowed(&products);
        let ket_i = SiteIndices::of(ket);
        (0..mpo.row_dim())
            .map(|b| kernels::rbtm_kernel(b, &t, mpo, &ket_i, bra))
            .collect()
    }

    fn overlap_left_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        left: &BlockMatrix<S, A>,
    ) -> ContractionResult<BlockMatrix<S, A>>
    {
        let t = block_ops::gemm(left, &ket.right_paired_data())?;
        let t = reshapes::right_to_left(ket.phys_i(), bra.left_i(), ket.right_i(), &t);
        let bra_adj = block_ops::adjoint(&bra.left_paired_data());
        Ok(block_ops::gemm(&bra_adj, &t)?)
    }

    fn overlap_right_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        right: &BlockMatrix<S, A>,
    ) -> ContractionResult<BlockMatrix<S, A>>
    {
        let t = block_ops::gemm(&ket.left_paired_data(), right)?;
        let t = reshapes::left_to_right(ket.phys_i(), ket.left_i(), bra.right_i(), &t);
        let bra_adj = block_ops::adjoint(&bra.right_paired_data());
        Ok(block_ops::gemm(&t, &bra_adj)?)
    }

    fn overlap_mpo_left_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>
    {
        let x = self.lbtm(ket, left, mpo, &SiteIndices::of(bra))?;
        let bra_adj = block_ops::adjoint(&bra.left_paired_data());
        x.iter()
            .map(|xb| Ok(block_ops::gemm(&bra_adj, xb)?))
            .collect()
    }

    fn overlap_mpo_right_step(
        &self,
        bra: &MPSTensor<S, A>,
        ket: &MPSTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>
    {
        let y = self.rbtm(ket, right, mpo, &SiteIndices::of(bra))?;
        let bra_adj = block_ops::adjoint(&bra.right_paired_data());
        y.iter()
            .map(|yb| Ok(block_ops::gemm(yb, &bra_adj)?))
            .collect()
    }

    fn boundary_left_step(
        &self,
        mps: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>
    {
        let idx = SiteIndices::of(mps);
        let products = kernels::left_products(left, &mps.right_paired_data(), mpo)?;
        let t = borrowed(&products);
        let bra_adj = block_ops::adjoint(&mps.left_paired_data());
        let mut out: Vec<BlockMatrix<S, A>> = Vec::with_capacity(mpo.col_dim());
        let mut mirrored: usize = 0;
        for bp in 0..mpo.col_dim() {
            let partner = if self.use_hermitian { mpo.right_herm(bp) } else { None };
            let next = match partner.and_then(|p| out.get(p)) {
                Some(m) => {
                    mirrored += 1;
                    block_ops::adjoint(m)
                },
                None => {
                    let x = kernels::lbtm_kernel(bp, &t, mpo, &idx, &idx)?;
                    block_ops::gemm(&bra_adj, &x)?
                },
            };
            out.push(next);
        }
        log::debug!(aux_dim = out.len(), mirrored = mirrored; "boundary_left_step");
        Ok(Boundary::from_vec(out))
    }

    fn boundary_right_step(
        &self,
        mps: &MPSTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<Boundary<S, A>>
    {
        let idx = SiteIndices::of(mps);
        let products = kernels::right_products(right, &mps.left_paired_data(), mpo)?;
        let t = borrowed(&products);
        let bra_adj = block_ops::adjoint(&mps.right_paired_data());
        let mut out: Vec<BlockMatrix<S, A>> = Vec::with_capacity(mpo.row_dim());
        let mut mirrored: usize = 0;
        for b in 0..mpo.row_dim() {
            let partner = if self.use_hermitian { mpo.left_herm(b) } else { None };
            let next = match partner.and_then(|p| out.get(p)) {
                Some(m) => {
                    mirrored += 1;
                    block_ops::adjoint(m)
                },
                None => {
                    let y = kernels::rbtm_kernel(b, &t, mpo, &idx, &idx)?;
                    block_ops::gemm(&y, &bra_adj)?
                },
            };
            out.push(next);
        }
        log::debug!(aux_dim = out.len(), mirrored = mirrored; "boundary_right_step");
        Ok(Boundary::from_vec(out))
    }

    fn site_hamil2(
        &self,
        ket: &MPSTensor<S, A>,
        left: &Boundary<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
    ) -> ContractionResult<MPSTensor<S, A>>
    {
        check_aux(left, right, mpo)?;
        let path = self.path_policy.choose(mpo);
        let acc = match (&self.runtime, path) {
            (Some(rt), _) => hamil_dag(rt, path, ket, left, right, mpo)?,
            (None, PathPolicy::RightBuild) => hamil_right_build(ket, left, right, mpo)?,
            (None, _) => hamil_left_build(ket, left, right, mpo)?,
        };
        let data = restrict_to(&ket.left_paired_data(), acc)?;
        log::debug!(blocks = data.n_blocks(); "site_hamil2 via {:?}", path);
        let idx = SiteIndices::of(ket);
        Ok(MPSTensor::new(idx.phys, idx.left, idx.right, data, Pairing::Left)?)
    }

    fn predict_split_l2r(
        &self,
        tst: &TwoSiteTensor<S, A>,
        left: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        alpha: f64,
        params: TruncationParams,
    ) -> ContractionResult<Split<S, A>>
    {
        let data = tst.both_paired_data();
        let mut dm = block_ops::gemm(&data, &block_ops::adjoint(&data))?;
        if alpha > 0.0 {
            let mps = tst.as_mps()?;
            let idx = SiteIndices::of(&mps);
            let a: A = dense::elem_from_f64(alpha);
            for x in self.lbtm(&mps, left, mpo, &idx)?.iter().filter(|x| !x.is_empty()) {
                let x = reshapes::fused_to_two_site(
                    tst.phys1_i(), tst.phys2_i(), tst.left_i(), tst.right_i(), x);
                let mut noise = block_ops::gemm(&x, &block_ops::adjoint(&x))?;
                noise.scale(a);
                accumulate(&mut dm, &noise);
            }
        }
        let (u, _, truncation) = block_ops::heev_truncate(&dm, params)?;
        let right_data = block_ops::gemm(&block_ops::adjoint(&u), &data)?;
        let bond = u.right_basis();
        let mut left_t = MPSTensor::new(
            tst.phys1_i().clone(), tst.left_i().clone(), bond.clone(), u, Pairing::Left)?;
        left_t.set_normalization(Normalization::Left);
        let right_t = MPSTensor::new(
            tst.phys2_i().clone(), bond, tst.right_i().clone(), right_data, Pairing::Right)?;
        log::debug!(
            alpha = alpha,
            bond_dimension = truncation.bond_dimension,
            discarded_weight = truncation.discarded_weight;
            "predict_split_l2r"
        );
        Ok(Split { left: left_t, right: right_t, truncation })
    }

    fn predict_split_r2l(
        &self,
        tst: &TwoSiteTensor<S, A>,
        right: &Boundary<S, A>,
        mpo: &MPOTensor<S, A>,
        alpha: f64,
        params: TruncationParams,
    ) -> ContractionResult<Split<S, A>>
    {
        let data = tst.both_paired_data();
        let mut dm = block_ops::gemm(&block_ops::adjoint(&data), &data)?;
        if alpha > 0.0 {
            let mps = tst.as_mps()?;
            let idx = SiteIndices::of(&mps);
            let a: A = dense::elem_from_f64(alpha);
            for y in self.rbtm(&mps, right, mpo, &idx)?.iter().filter(|y| !y.is_empty()) {
                let y = reshapes::right_to_left(&idx.phys, &idx.left, &idx.right, y);
                let y = reshapes::fused_to_two_site(
                    tst.phys1_i(), tst.phys2_i(), tst.left_i(), tst.right_i(), &y);
                let mut noise = block_ops::gemm(&block_ops::adjoint(&y), &y)?;
                noise.scale(a);
                accumulate(&mut dm, &noise);
            }
        }
        let (v, _, truncation) = block_ops::heev_truncate(&dm, params)?;
        let left_data = block_ops::gemm(&data, &v)?;
        let bond = v.right_basis();
        let left_t = MPSTensor::new(
            tst.phys1_i().clone(), tst.left_i().clone(), bond.clone(), left_data, Pairing::Left)?;
        let mut right_t = MPSTensor::new(
            tst.phys2_i().clone(), bond, tst.right_i().clone(), block_ops::adjoint(&v),
            Pairing::Right)?;
        right_t.set_normalization(Normalization::Right);
        log::debug!(
            alpha = alpha,
            bond_dimension = truncation.bond_dimension,
            discarded_weight = truncation.discarded_weight;
            "predict_split_r2l"
        );
        Ok(Split { left: left_t, right: right_t, truncation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::{
        boundary,
        index::Index,
        mpo::{ MPOTerm, OperatorTable },
        runtime::RuntimeConfig,
        symmetry::U1,
    };

    fn spin() -> Index<U1> { Index::from_sectors([(-1, 1), (1, 1)]) }

    fn op(blocks: &[(i32, i32, f64)]) -> BlockMatrix<U1, f64> {
        let mut m = BlockMatrix::new();
        for &(lc, rc, x) in blocks {
            m.insert_block(nd::array![[x]], lc, rc).unwrap();
        }
        m
    }

    // XX model: H = Σ (S+S- + S-S+) / 2, with bulk rows/cols
    // (done, S+, S-, start)
    fn xx_chain() -> Vec<MPOTensor<U1, f64>> {
        let mut table = OperatorTable::new();
        let id = table.register(op(&[(-1, -1, 1.0), (1, 1, 1.0)]));
        let sp = table.register(op(&[(1, -1, 1.0)]));
        let sm = table.register(op(&[(-1, 1, 1.0)]));
        let table = Arc::new(table);
        let t = |tag, scale| MPOTerm { tag, scale };
        let bulk = [
            (0, 0, t(id, 1.0)),
            (1, 0, t(sp, 1.0)),
            (2, 0, t(sm, 1.0)),
            (3, 1, t(sm, 0.5)),
            (3, 2, t(sp, 0.5)),
            (3, 3, t(id, 1.0)),
        ];
        let first = MPOTensor::new(
            1, 4,
            bulk.iter().filter(|(b, ..)| *b == 3).map(|(_, bp, t)| (0, *bp, *t)),
            table.clone(),
        ).unwrap()
            .with_hermitian(vec![None], vec![None, None, Some(1), None])
            .unwrap();
        let middle = MPOTensor::new(4, 4, bulk.iter().copied(), table.clone())
            .unwrap()
            .with_hermitian(
                vec![None, None, Some(1), None], vec![None, None, Some(1), None])
            .unwrap();
        let last = MPOTensor::new(
            4, 1,
            bulk.iter().filter(|(_, bp, _)| *bp == 0).map(|(b, _, t)| (*b, 0, *t)),
            table,
        ).unwrap()
            .with_hermitian(vec![None, None, Some(1), None], vec![None])
            .unwrap();
        vec![first, middle, last]
    }

    fn random_chain(seed: u64) -> Vec<MPSTensor<U1, f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let bonds: Vec<Index<U1>> = vec![
            Index::trivial(),
            Index::from_sectors([(-1, 1), (1, 1)]),
            Index::from_sectors([(-2, 1), (0, 2), (2, 1)]),
            Index::from_sectors([(1, 1)]),
        ];
        (0..3)
            .map(|k| {
                MPSTensor::random(spin(), bonds[k].clone(), bonds[k + 1].clone(), &mut rng)
            })
            .collect()
    }

    fn distance(a: &BlockMatrix<U1, f64>, b: &BlockMatrix<U1, f64>) -> f64 {
        let mut d = a.clone();
        d -= b;
        d.norm()
    }

    fn environments(engine: &AbelianEngine<U1, f64>)
        -> (Vec<MPSTensor<U1, f64>>, Vec<MPOTensor<U1, f64>>, Boundary<U1, f64>, Boundary<U1, f64>)
    {
        let mps = random_chain(7);
        let mpo = xx_chain();
        let left = engine.boundary_left_step(
            &mps[0], &Boundary::left_edge(mps[0].left_i()), &mpo[0]).unwrap();
        let right = engine.boundary_right_step(
            &mps[2], &Boundary::right_edge(mps[2].right_i()), &mpo[2]).unwrap();
        (mps, mpo, left, right)
    }

    #[test]
    fn overlap_from_both_ends_agrees() {
        let engine: AbelianEngine<U1, f64> = AbelianEngine::new();
        let bra = random_chain(1);
        let ket = random_chain(2);
        let mut l = BlockMatrix::identity(&Index::trivial(), &Index::trivial());
        for (b, k) in bra.iter().zip(ket.iter()) {
            l = engine.overlap_left_step(b, k, &l).unwrap();
        }
        let edge: Index<U1> = Index::from_sectors([(1, 1)]);
        let mut r = BlockMatrix::identity(&edge, &edge);
        for (b, k) in bra.iter().zip(ket.iter()).rev() {
            r = engine.overlap_right_step(b, k, &r).unwrap();
        }
        assert_abs_diff_eq!(l.trace(), r.trace(), epsilon = 1e-12);
    }

    #[test]
    fn mpo_overlap_meets_in_the_middle() {
        let engine: AbelianEngine<U1, f64> = AbelianEngine::new();
        let (mps, mpo, left, right) = environments(&engine);
        let l2 = engine.overlap_mpo_left_step(&mps[1], &mps[1], &left, &mpo[1]).unwrap();
        let r1 = engine.overlap_mpo_right_step(&mps[1], &mps[1], &right, &mpo[1]).unwrap();
        let from_left = boundary::expval(&l2, &right);
        let from_right = boundary::expval(&left, &r1);
        assert_abs_diff_eq!(from_left, from_right, epsilon = 1e-12);
    }

    #[test]
    fn hermitian_shortcut_matches_full_computation() {
        let full: AbelianEngine<U1, f64> = AbelianEngine::new().with_hermitian(false);
        let herm: AbelianEngine<U1, f64> = AbelianEngine::new();
        let (mps, mpo, left, right) = environments(&full);
        let a = full.boundary_left_step(&mps[1], &left, &mpo[1]).unwrap();
        let b = herm.boundary_left_step(&mps[1], &left, &mpo[1]).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(distance(x, y), 0.0, epsilon = 1e-12);
        }
        let a = full.boundary_right_step(&mps[1], &right, &mpo[1]).unwrap();
        let b = herm.boundary_right_step(&mps[1], &right, &mpo[1]).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(distance(x, y), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn both_build_paths_agree() {
        let lhs: AbelianEngine<U1, f64>
            = AbelianEngine::new().with_path_policy(PathPolicy::LeftBuild);
        let rhs: AbelianEngine<U1, f64>
            = AbelianEngine::new().with_path_policy(PathPolicy::RightBuild);
        let (mps, mpo, left, right) = environments(&lhs);
        let a = lhs.site_hamil2(&mps[1], &left, &right, &mpo[1]).unwrap();
        let b = rhs.site_hamil2(&mps[1], &left, &right, &mpo[1]).unwrap();
        assert!(a.data().n_blocks() > 0);
        assert_abs_diff_eq!(distance(a.data(), b.data()), 0.0, epsilon = 1e-12);
        // <psi|H|psi> through site_hamil2 equals the boundary expectation value
        let e = mps[1].scalar_overlap(&a);
        let l2 = lhs.boundary_left_step(&mps[1], &left, &mpo[1]).unwrap();
        assert_abs_diff_eq!(e, boundary::expval(&l2, &right), epsilon = 1e-12);
    }

    #[test]
    fn runtime_graph_matches_eager() {
        let rt = Arc::new(Runtime::new(RuntimeConfig::default().with_threads_per_rank(2)));
        for path in [PathPolicy::LeftBuild, PathPolicy::RightBuild] {
            let eager: AbelianEngine<U1, f64>
                = AbelianEngine::new().with_path_policy(path);
            let graph = eager.clone().with_runtime(rt.clone());
            let (mps, mpo, left, right) = environments(&eager);
            let a = eager.site_hamil2(&mps[1], &left, &right, &mpo[1]).unwrap();
            let b = graph.site_hamil2(&mps[1], &left, &right, &mpo[1]).unwrap();
            assert_abs_diff_eq!(distance(a.data(), b.data()), 0.0, epsilon = 1e-12);
        }
        assert!(rt.stats().executed > 0);
    }

    #[test]
    fn mismatched_boundaries_are_rejected() {
        let engine: AbelianEngine<U1, f64> = AbelianEngine::new();
        let (mps, mpo, left, _) = environments(&engine);
        let res = engine.site_hamil2(&mps[1], &left, &left, &mpo[2]);
        assert!(matches!(res, Err(ContractionError::AuxMismatch { .. })));
    }
}
