//! Two-site sweep optimization.
//!
//! A [`SweepOptimizer`] owns a state, a Hamiltonian, and every boundary
//! between them. Each step merges two neighboring sites, finds the lowest
//! eigenpair of the effective Hamiltonian through an [`EigenSolver`] that
//! only sees `site_hamil2` as an apply-to-vector callback, splits the result
//! back into two sites, and grows one boundary by a site.
//!
//! Between steps the optimizer checks a wall-clock limit; when it is reached
//! the state is checkpointed and [`OptimizerError::TimeLimitReached`] is
//! returned so that the caller can unwind and exit.

use std::{
    path::{ Path, PathBuf },
    sync::Arc,
    time::{ Duration, Instant },
};
use ndarray as nd;
use ndarray_linalg::error::LinalgError;
use num_traits::{ One, Zero };
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    Elem,
    boundary::Boundary,
    checkpoint::{ Archive, CheckpointError },
    contraction::{ AbelianEngine, ContractionEngine, ContractionError, PathPolicy },
    dense,
    mpo::{ self, MPO, MPOError },
    mps::{ MPS, MPSError },
    mps_tensor::MPSTensorError,
    runtime::{ HOST_RANK, IoBackend, OutOfCoreConfig, Region, RegionError, RegionState, SlotAllocator },
    symmetry::Symmetry,
    truncation::TruncationParams,
    two_site::TwoSiteTensor,
};

#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Returned when the state and Hamiltonian have different lengths.
    #[error("error in sweep optimizer: MPS has {0} sites, MPO has {1}")]
    LengthMismatch(usize, usize),

    /// Returned when the chain is too short for two-site updates.
    #[error("error in sweep optimizer: need at least two sites")]
    TooFewSites,

    /// Returned when an eigensolver cannot produce an eigenpair.
    #[error("error in eigensolver: {0}")]
    SolverFailed(String),

    /// Returned when a boundary is requested before it was computed.
    #[error("error in sweep optimizer: boundary {0} is missing")]
    MissingBoundary(usize),

    /// Cooperative stop after the configured wall-clock limit; the state was
    /// checkpointed if a checkpoint path is configured.
    #[error("sweep optimizer stopped: time limit reached in sweep {sweep} at site {site}")]
    TimeLimitReached { sweep: usize, site: usize },

    #[error("MPS error: {0}")]
    MPSError(#[from] MPSError),

    #[error("MPS tensor error: {0}")]
    MPSTensorError(#[from] MPSTensorError),

    #[error("MPO error: {0}")]
    MPOError(#[from] MPOError),

    #[error("contraction error: {0}")]
    ContractionError(#[from] ContractionError),

    #[error("checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    #[error("region error: {0}")]
    RegionError(#[from] RegionError),

    #[error("linalg error: {0}")]
    LinalgError(#[from] LinalgError),
}
use OptimizerError::*;
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Parameters of a sweep run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Maximum bond dimension kept after each split.
    pub max_bond_dim: usize,
    /// Relative singular-value cutoff.
    pub cutoff: f64,
    /// Strength of the density-matrix perturbation used when splitting;
    /// zero selects plain SVD splitting. The final sweep always runs without
    /// perturbation.
    pub alpha: f64,
    /// Number of full (left-to-right then right-to-left) sweeps.
    pub nsweeps: usize,
    /// Wall-clock budget for one call to [`SweepOptimizer::run`].
    pub time_limit: Option<Duration>,
    /// Archive written after every sweep and on timeout.
    pub checkpoint: Option<PathBuf>,
    pub path_policy: PathPolicy,
    /// Swap boundaries out of memory above a resident-size budget.
    #[serde(skip)]
    pub out_of_core: Option<OutOfCoreConfig>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_bond_dim: 128,
            cutoff: 1e-10,
            alpha: 0.0,
            nsweeps: 4,
            time_limit: None,
            checkpoint: None,
            path_policy: PathPolicy::Auto,
            out_of_core: None,
        }
    }
}

impl SweepConfig {
    pub fn with_max_bond_dim(mut self, max_bond_dim: usize) -> Self {
        self.max_bond_dim = max_bond_dim;
        self
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_nsweeps(mut self, nsweeps: usize) -> Self {
        self.nsweeps = nsweeps;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    pub fn with_checkpoint<P>(mut self, path: P) -> Self
    where P: AsRef<Path>
    {
        self.checkpoint = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_path_policy(mut self, path_policy: PathPolicy) -> Self {
        self.path_policy = path_policy;
        self
    }

    pub fn with_out_of_core(mut self, out_of_core: OutOfCoreConfig) -> Self {
        self.out_of_core = Some(out_of_core);
        self
    }

    /// Return the truncation parameters applied at every split.
    pub fn truncation(&self) -> TruncationParams {
        TruncationParams::new(self.max_bond_dim, self.cutoff)
    }
}

/// Outcome of a single two-site step.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub sweep: usize,
    /// Left site of the optimized pair.
    pub site: usize,
    pub left_to_right: bool,
    pub energy: f64,
    pub bond_dimension: usize,
    pub discarded_weight: f64,
}

/// Progress marker stored under `/status`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepStatus {
    /// First sweep that has not been completed.
    pub next_sweep: usize,
    pub finished: bool,
    pub time_limited: bool,
}

/// Lowest-eigenpair solver for a linear operator given as a callback.
pub trait EigenSolver<A: Elem> {
    /// Return the lowest eigenvalue and a normalized eigenvector of the
    /// Hermitian operator `apply`, starting from `guess`.
    fn solve(
        &self,
        apply: &mut dyn FnMut(&nd::Array1<A>) -> OptimizerResult<nd::Array1<A>>,
        guess: &nd::Array1<A>,
    ) -> OptimizerResult<(f64, nd::Array1<A>)>;
}

/// [`EigenSolver`] that builds the dense operator column by column and
/// diagonalizes it; only suitable for small effective problems.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExactDiag;

impl<A: Elem> EigenSolver<A> for ExactDiag {
    fn solve(
        &self,
        apply: &mut dyn FnMut(&nd::Array1<A>) -> OptimizerResult<nd::Array1<A>>,
        guess: &nd::Array1<A>,
    ) -> OptimizerResult<(f64, nd::Array1<A>)>
    {
        let n = guess.len();
        if n == 0 { return Err(SolverFailed("empty search space".to_string())); }
        let mut h: nd::Array2<A> = nd::Array2::zeros((n, n));
        let mut unit: nd::Array1<A> = nd::Array1::zeros(n);
        for j in 0..n {
            unit[j] = A::one();
            let col = apply(&unit)?;
            if col.len() != n {
                return Err(SolverFailed(
                    format!("operator returned length {}, expected {}", col.len(), n)));
            }
            h.column_mut(j).assign(&col);
            unit[j] = A::zero();
        }
        let half: A = dense::elem_from_f64(0.5);
        let h = (&h + &dense::adjoint(&h)).mapv(|x| x * half);
        let (evals, evecs) = dense::heev(&h)?;
        let e = dense::real_to_f64(evals[n - 1]);
        Ok((e, evecs.column(n - 1).to_owned()))
    }
}

enum Stored<S: Symmetry, A: Elem> {
    Memory(Boundary<S, A>),
    Swapped { region: Region<Boundary<S, A>>, footprint: usize },
}

/// Boundaries for every bond, optionally swapped out through [`Region`]s.
struct BoundaryStore<S: Symmetry, A: Elem> {
    slots: Vec<Option<Stored<S, A>>>,
    swap: Option<(OutOfCoreConfig, Arc<SlotAllocator>)>,
}

impl<S: Symmetry, A: Elem> BoundaryStore<S, A> {
    fn new(n: usize, swap: Option<(OutOfCoreConfig, Arc<SlotAllocator>)>) -> Self {
        Self { slots: (0..n).map(|_| None).collect(), swap }
    }

    fn set(&mut self, k: usize, b: Boundary<S, A>) {
        let stored = match &self.swap {
            Some((ooc, slots)) => {
                let footprint = b.footprint();
                let backend: Arc<dyn IoBackend> = ooc.backend.clone();
                Stored::Swapped { region: Region::new(b, backend, slots.clone()), footprint }
            },
            None => Stored::Memory(b),
        };
        self.slots[k] = Some(stored);
    }

    fn get(&mut self, k: usize) -> OptimizerResult<&Boundary<S, A>> {
        match self.slots.get_mut(k).and_then(|s| s.as_mut()) {
            Some(Stored::Memory(b)) => Ok(&*b),
            Some(Stored::Swapped { region, .. }) => Ok(&*region.access()?),
            None => Err(MissingBoundary(k)),
        }
    }

    fn resident(&self) -> usize {
        self.slots.iter().flatten()
            .map(|s| match s {
                Stored::Memory(b) => b.footprint(),
                Stored::Swapped { region, footprint } =>
                    if region.is_resident() { *footprint } else { 0 },
            })
            .sum()
    }

    /// Begin swapping out boundary `k` if the store is over budget.
    fn release(&mut self, k: usize) -> OptimizerResult<()> {
        let Some((ooc, _)) = &self.swap else { return Ok(()); };
        if self.resident() <= ooc.budget { return Ok(()); }
        if let Some(Some(Stored::Swapped { region, .. })) = self.slots.get_mut(k) {
            if region.state() == RegionState::Core {
                region.unmap()?;
                log::debug!(bond = k; "boundary swapped out");
            }
        }
        Ok(())
    }

    /// Begin reading boundary `k` back ahead of use.
    fn prefetch(&mut self, k: usize) -> OptimizerResult<()> {
        if let Some(Some(Stored::Swapped { region, .. })) = self.slots.get_mut(k) {
            region.prefetch()?;
        }
        Ok(())
    }

    fn poll(&mut self) -> OptimizerResult<()> {
        for s in self.slots.iter_mut().flatten() {
            if let Stored::Swapped { region, .. } = s { region.poll()?; }
        }
        Ok(())
    }

    fn state(&self, k: usize) -> Option<RegionState> {
        match self.slots.get(k) {
            Some(Some(Stored::Swapped { region, .. })) => Some(region.state()),
            _ => None,
        }
    }
}

/// Two-site ground-state sweep optimizer.
pub struct SweepOptimizer<S, A, E = AbelianEngine<S, A>>
where
    S: Symmetry,
    A: Elem,
    E: ContractionEngine<S, A>,
{
    mps: MPS<S, A>,
    mpo: MPO<S, A>,
    engine: E,
    solver: Box<dyn EigenSolver<A>>,
    config: SweepConfig,
    // left[k] covers sites 0..k; right[k] covers sites k..n
    left: BoundaryStore<S, A>,
    right: BoundaryStore<S, A>,
    sweep: usize,
    results: Vec<Vec<IterationResult>>,
    start: Instant,
}

impl<S: Symmetry, A: Elem> SweepOptimizer<S, A, AbelianEngine<S, A>> {
    /// Create a new optimizer with an [`AbelianEngine`] using the configured
    /// path policy.
    pub fn new(mps: MPS<S, A>, mpo: MPO<S, A>, config: SweepConfig)
        -> OptimizerResult<Self>
    {
        let engine = AbelianEngine::new().with_path_policy(config.path_policy);
        Self::with_engine(mps, mpo, engine, config)
    }
}

impl<S, A, E> SweepOptimizer<S, A, E>
where
    S: Symmetry,
    A: Elem,
    E: ContractionEngine<S, A>,
{
    /// Create a new optimizer with a given contraction engine.
    ///
    /// The state is brought into right-canonical form and every right
    /// boundary is computed.
    pub fn with_engine(mut mps: MPS<S, A>, mpo: MPO<S, A>, engine: E, config: SweepConfig)
        -> OptimizerResult<Self>
    {
        let n = mps.len();
        if n != mpo.len() { return Err(LengthMismatch(n, mpo.len())); }
        if n < 2 { return Err(TooFewSites); }
        mps.canonize(0)?;
        let swap = config.out_of_core.clone()
            .map(|ooc| (ooc, Arc::new(SlotAllocator::new(HOST_RANK))));
        let mut left = BoundaryStore::new(n + 1, swap.clone());
        let mut right = BoundaryStore::new(n + 1, swap);
        left.set(0, Boundary::left_edge(mps[0].left_i()));
        let mut env = Boundary::right_edge(mps[n - 1].right_i());
        for k in (1..n).rev() {
            let next = engine.boundary_right_step(&mps[k], &env, &mpo[k])?;
            right.set(k + 1, env);
            env = next;
        }
        right.set(1, env);
        Ok(Self {
            mps,
            mpo,
            engine,
            solver: Box::new(ExactDiag),
            config,
            left,
            right,
            sweep: 0,
            results: Vec::new(),
            start: Instant::now(),
        })
    }

    /// Resume from a checkpoint written by [`Self::checkpoint`].
    pub fn restore<P>(path: P, mpo: MPO<S, A>, engine: E, config: SweepConfig)
        -> OptimizerResult<Self>
    where P: AsRef<Path>
    {
        let ar = Archive::load(path.as_ref())?;
        let mps: MPS<S, A> = ar.get_mps("/state/mps")?;
        let status: SweepStatus = ar.get("/status")?;
        let results: Vec<Vec<IterationResult>>
            = (0..status.next_sweep)
            .map(|s| ar.get(&format!("/simulation/sweep{}/results", s)))
            .collect::<Result<_, _>>()?;
        let mut out = Self::with_engine(mps, mpo, engine, config)?;
        out.sweep = status.next_sweep;
        out.results = results;
        log::info!(
            next_sweep = status.next_sweep;
            "restored sweep state from {}", path.as_ref().display()
        );
        Ok(out)
    }

    /// Replace the eigensolver.
    pub fn with_solver<T>(mut self, solver: T) -> Self
    where T: EigenSolver<A> + 'static
    {
        self.solver = Box::new(solver);
        self
    }

    /// Return the current state.
    pub fn mps(&self) -> &MPS<S, A> { &self.mps }

    /// Return the Hamiltonian.
    pub fn mpo(&self) -> &MPO<S, A> { &self.mpo }

    /// Return the configuration.
    pub fn config(&self) -> &SweepConfig { &self.config }

    /// Return the number of completed sweeps.
    pub fn sweeps_done(&self) -> usize { self.sweep }

    /// Return the per-step results of every completed sweep.
    pub fn results(&self) -> &[Vec<IterationResult>] { &self.results }

    /// Return the energy of the most recent step.
    pub fn energy(&self) -> Option<f64> {
        self.results.last().and_then(|r| r.last()).map(|r| r.energy)
    }

    /// Return the residency state of left boundary `k`, if it is swappable.
    pub fn left_boundary_state(&self, k: usize) -> Option<RegionState> {
        self.left.state(k)
    }

    /// Return the state.
    pub fn into_mps(self) -> MPS<S, A> { self.mps }

    /// Restart the wall-clock timer.
    pub fn reset_timer(&mut self) { self.start = Instant::now(); }

    fn check_time(&self, site: usize) -> OptimizerResult<()> {
        let Some(limit) = self.config.time_limit else { return Ok(()); };
        if self.start.elapsed() < limit { return Ok(()); }
        log::warn!(sweep = self.sweep, site = site; "time limit reached");
        self.checkpoint(
            SweepStatus { next_sweep: self.sweep, finished: false, time_limited: true })?;
        Err(TimeLimitReached { sweep: self.sweep, site })
    }

    fn alpha(&self) -> f64 {
        if self.sweep + 1 >= self.config.nsweeps { 0.0 } else { self.config.alpha }
    }

    fn step_l2r(&mut self, p: usize) -> OptimizerResult<IterationResult> {
        let alpha = self.alpha();
        let params = self.config.truncation();
        let mut tst = TwoSiteTensor::from_mps_pair(&self.mps[p], &self.mps[p + 1])?;
        let mpo2 = mpo::make_twosite_mpo(
            &self.mpo[p], &self.mpo[p + 1], self.mps[p].phys_i(), self.mps[p + 1].phys_i())?;
        self.right.prefetch(p + 3)?;
        let left = self.left.get(p)?;
        let right = self.right.get(p + 2)?;
        let engine = &self.engine;
        let ket = tst.as_mps()?;
        let mut apply = |v: &nd::Array1<A>| -> OptimizerResult<nd::Array1<A>> {
            let x = ket.with_vector(v)?;
            Ok(engine.site_hamil2(&x, left, right, &mpo2)?.to_vector())
        };
        let (energy, v) = self.solver.solve(&mut apply, &ket.to_vector())?;
        tst.update_from_mps(&ket.with_vector(&v)?)?;
        let split =
            if alpha > 0.0 {
                engine.predict_split_l2r(&tst, left, &mpo2, alpha, params)?
            } else {
                tst.split_mps_l2r(params)?
            };
        let next = engine.boundary_left_step(&split.left, left, &self.mpo[p])?;
        self.mps.set_pair(p, split.left, split.right)?;
        self.left.set(p + 1, next);
        self.left.release(p)?;
        self.left.poll()?;
        Ok(IterationResult {
            sweep: self.sweep,
            site: p,
            left_to_right: true,
            energy,
            bond_dimension: split.truncation.bond_dimension,
            discarded_weight: split.truncation.discarded_weight,
        })
    }

    fn step_r2l(&mut self, p: usize) -> OptimizerResult<IterationResult> {
        let alpha = self.alpha();
        let params = self.config.truncation();
        let mut tst = TwoSiteTensor::from_mps_pair(&self.mps[p], &self.mps[p + 1])?;
        let mpo2 = mpo::make_twosite_mpo(
            &self.mpo[p], &self.mpo[p + 1], self.mps[p].phys_i(), self.mps[p + 1].phys_i())?;
        if p > 0 { self.left.prefetch(p - 1)?; }
        let left = self.left.get(p)?;
        let right = self.right.get(p + 2)?;
        let engine = &self.engine;
        let ket = tst.as_mps()?;
        let mut apply = |v: &nd::Array1<A>| -> OptimizerResult<nd::Array1<A>> {
            let x = ket.with_vector(v)?;
            Ok(engine.site_hamil2(&x, left, right, &mpo2)?.to_vector())
        };
        let (energy, v) = self.solver.solve(&mut apply, &ket.to_vector())?;
        tst.update_from_mps(&ket.with_vector(&v)?)?;
        let split =
            if alpha > 0.0 {
                engine.predict_split_r2l(&tst, right, &mpo2, alpha, params)?
            } else {
                tst.split_mps_r2l(params)?
            };
        let next = engine.boundary_right_step(&split.right, right, &self.mpo[p + 1])?;
        self.mps.set_pair(p, split.left, split.right)?;
        self.right.set(p + 1, next);
        self.right.release(p + 2)?;
        self.right.poll()?;
        Ok(IterationResult {
            sweep: self.sweep,
            site: p,
            left_to_right: false,
            energy,
            bond_dimension: split.truncation.bond_dimension,
            discarded_weight: split.truncation.discarded_weight,
        })
    }

    /// Run one full sweep, left to right and back.
    pub fn sweep(&mut self) -> OptimizerResult<&[IterationResult]> {
        let n = self.mps.len();
        let mut results: Vec<IterationResult> = Vec::with_capacity(2 * (n - 1));
        for p in 0..n - 1 {
            self.check_time(p)?;
            let res = self.step_l2r(p)?;
            log::debug!(
                sweep = res.sweep,
                site = res.site,
                energy = res.energy,
                bond_dimension = res.bond_dimension;
                "l2r step"
            );
            results.push(res);
        }
        for p in (0..n - 1).rev() {
            self.check_time(p)?;
            let res = self.step_r2l(p)?;
            log::debug!(
                sweep = res.sweep,
                site = res.site,
                energy = res.energy,
                bond_dimension = res.bond_dimension;
                "r2l step"
            );
            results.push(res);
        }
        let max_discarded = results.iter()
            .map(|r| r.discarded_weight)
            .fold(0.0, f64::max);
        log::info!(
            sweep = self.sweep,
            energy = results.last().map(|r| r.energy).unwrap_or(f64::NAN),
            max_bond = self.mps.bond_dims().into_iter().max().unwrap_or(0),
            max_discarded = max_discarded,
            elapsed_s = self.start.elapsed().as_secs_f64();
            "sweep done"
        );
        self.results.push(results);
        self.sweep += 1;
        Ok(&self.results[self.results.len() - 1])
    }

    /// Run sweeps until `nsweeps` have been completed, checkpointing after
    /// each one. Returns the final energy.
    pub fn run(&mut self) -> OptimizerResult<f64> {
        self.reset_timer();
        while self.sweep < self.config.nsweeps {
            self.sweep()?;
            let finished = self.sweep >= self.config.nsweeps;
            self.checkpoint(
                SweepStatus { next_sweep: self.sweep, finished, time_limited: false })?;
        }
        self.energy().ok_or(SolverFailed("no sweeps were run".to_string()))
    }

    /// Write the configuration, completed results, state, and `status` to
    /// the configured checkpoint path. No-op without a path.
    pub fn checkpoint(&self, status: SweepStatus) -> OptimizerResult<()> {
        let Some(path) = &self.config.checkpoint else { return Ok(()); };
        let mut ar = if path.exists() { Archive::load(path)? } else { Archive::new() };
        for (s, res) in self.results.iter().enumerate() {
            ar.set(&format!("/simulation/sweep{}/parameters", s), &self.config)?;
            ar.set(&format!("/simulation/sweep{}/results", s), res)?;
        }
        ar.set_mps("/state/mps", &self.mps)?;
        ar.set("/status", &status)?;
        ar.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn exact_diag_finds_lowest_eigenpair() {
        let h: nd::Array2<f64> = nd::array![
            [2.0, 1.0, 0.0],
            [1.0, 2.0, 1.0],
            [0.0, 1.0, 2.0],
        ];
        let mut apply = |v: &nd::Array1<f64>| -> OptimizerResult<nd::Array1<f64>> {
            Ok(h.dot(v))
        };
        let guess = nd::Array1::from_elem(3, 1.0);
        let (e, v) = ExactDiag.solve(&mut apply, &guess).unwrap();
        assert_abs_diff_eq!(e, 2.0 - 2.0_f64.sqrt(), epsilon = 1e-12);
        let hv = h.dot(&v);
        for (x, y) in hv.iter().zip(v.iter()) {
            assert_abs_diff_eq!(*x, e * y, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(v.dot(&v), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn exact_diag_rejects_empty_space() {
        let mut apply = |v: &nd::Array1<f64>| -> OptimizerResult<nd::Array1<f64>> {
            Ok(v.clone())
        };
        let guess: nd::Array1<f64> = nd::Array1::zeros(0);
        assert!(matches!(ExactDiag.solve(&mut apply, &guess), Err(SolverFailed(_))));
    }

    #[test]
    fn config_round_trips_through_the_archive() {
        let config = SweepConfig::default()
            .with_max_bond_dim(32)
            .with_alpha(1e-3)
            .with_time_limit(Duration::from_secs(60))
            .with_path_policy(PathPolicy::LeftBuild)
            .with_out_of_core(OutOfCoreConfig::in_memory(0));
        let mut ar = Archive::new();
        ar.set("/simulation/sweep0/parameters", &config).unwrap();
        let back: SweepConfig = ar.get("/simulation/sweep0/parameters").unwrap();
        assert_eq!(back.max_bond_dim, 32);
        assert_eq!(back.path_policy, PathPolicy::LeftBuild);
        assert_eq!(back.time_limit, Some(Duration::from_secs(60)));
        assert!(back.out_of_core.is_none());
        assert_eq!(config.truncation(), TruncationParams::new(32, 1e-10));
    }
}
