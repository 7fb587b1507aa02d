//! Deferred tasks.

use std::{ fmt, marker::PhantomData };
use serde::{ Deserialize, Serialize };
use crate::runtime::revision::Handle;

/// Error type returned from a kernel body.
pub type KernelError = Box<dyn std::error::Error + Send + Sync>;
pub type KernelResult<T> = Result<T, KernelError>;

/// Asymptotic cost class of a kernel, as a function of the linear size of
/// its inputs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Complexity {
    #[default]
    N,
    N2,
    N3,
}

impl Complexity {
    /// Estimated cost of running a kernel over inputs of total size `bytes`.
    pub fn cost(self, bytes: usize) -> f64 {
        let n = (bytes.max(1) as f64).sqrt();
        match self {
            Self::N => n,
            Self::N2 => n * n,
            Self::N3 => n * n * n,
        }
    }
}

/// How a kernel output is initialized before the kernel body runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// Start from `T::default()`.
    Write,
    /// Start from the previous revision of the same handle, copied only if
    /// it is still referenced elsewhere.
    Update,
}

/// A unit of deferred work over runtime-managed objects.
///
/// Inputs are passed to [`execute`][Self::execute] in the order returned by
/// [`inputs`][Self::inputs], outputs in the order returned by
/// [`outputs`][Self::outputs].
pub trait Kernel<T>: Send {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Cost class used by the placement heuristic.
    fn complexity(&self) -> Complexity { Complexity::N }

    /// Handles read by the kernel.
    fn inputs(&self) -> Vec<Handle>;

    /// Handles written by the kernel.
    fn outputs(&self) -> Vec<(Handle, OutputMode)>;

    /// Run the kernel body.
    fn execute(&mut self, inputs: &[&T], outputs: &mut [T]) -> KernelResult<()>;
}

/// A [`Kernel`] built from a closure.
///
/// ```ignore
/// let k = FnKernel::new("axpy", |i: &[&Block], o: &mut [Block]| { ... })
///     .reads(x)
///     .updates(y)
///     .complexity(Complexity::N2);
/// runtime.submit(k)?;
/// ```
pub struct FnKernel<T, F> {
    name: String,
    complexity: Complexity,
    inputs: Vec<Handle>,
    outputs: Vec<(Handle, OutputMode)>,
    f: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> FnKernel<T, F>
where F: FnMut(&[&T], &mut [T]) -> KernelResult<()> + Send
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            complexity: Complexity::N,
            inputs: Vec::new(),
            outputs: Vec::new(),
            f,
            _marker: PhantomData,
        }
    }

    /// Add an input.
    pub fn reads(mut self, h: Handle) -> Self {
        self.inputs.push(h);
        self
    }

    /// Add an output initialized from `T::default()`.
    pub fn writes(mut self, h: Handle) -> Self {
        self.outputs.push((h, OutputMode::Write));
        self
    }

    /// Add an output initialized from its previous revision.
    pub fn updates(mut self, h: Handle) -> Self {
        self.outputs.push((h, OutputMode::Update));
        self
    }

    /// Set the cost class.
    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }
}

impl<T, F> Kernel<T> for FnKernel<T, F>
where F: FnMut(&[&T], &mut [T]) -> KernelResult<()> + Send
{
    fn name(&self) -> &str { &self.name }

    fn complexity(&self) -> Complexity { self.complexity }

    fn inputs(&self) -> Vec<Handle> { self.inputs.clone() }

    fn outputs(&self) -> Vec<(Handle, OutputMode)> { self.outputs.clone() }

    fn execute(&mut self, inputs: &[&T], outputs: &mut [T]) -> KernelResult<()> {
        (self.f)(inputs, outputs)
    }
}

impl<T, F> fmt::Debug for FnKernel<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnKernel")
            .field("name", &self.name)
            .field("complexity", &self.complexity)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_grows_with_class() {
        let n = 10_000;
        assert!(Complexity::N.cost(n) < Complexity::N2.cost(n));
        assert!(Complexity::N2.cost(n) < Complexity::N3.cost(n));
        assert_eq!(Complexity::N.cost(0), 1.0);
    }

    #[test]
    fn builder_records_arguments() {
        let k = FnKernel::new("noop", |_: &[&f64], _: &mut [f64]| Ok(()))
            .reads(Handle { index: 0, gen: 0 })
            .updates(Handle { index: 1, gen: 0 })
            .writes(Handle { index: 2, gen: 0 })
            .complexity(Complexity::N3);
        assert_eq!(k.name(), "noop");
        assert_eq!(k.inputs(), vec![Handle { index: 0, gen: 0 }]);
        assert_eq!(
            k.outputs(),
            vec![(Handle { index: 1, gen: 0 }, OutputMode::Update), (Handle { index: 2, gen: 0 }, OutputMode::Write)],
        );
        assert_eq!(Kernel::complexity(&k), Complexity::N3);
    }
}
