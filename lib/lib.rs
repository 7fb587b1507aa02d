//! Symmetry-block-sparse tensor contractions for the two-site
//! density-matrix renormalization group (DMRG), driven by an asynchronous
//! in-process matrix runtime.
//!
//! The crate is layered leaves-first:
//!
//! - [`symmetry`] and [`index`]: abelian charges and graded vector spaces.
//! - [`block_matrix`], [`block_ops`], and [`truncation`]: block-sparse
//!   matrices, their algebra, and bond-dimension control.
//! - [`mps_tensor`], [`mpo`], [`reshapes`], [`two_site`], and [`mps`]: site
//!   tensors, operators, pairing transforms, and chains of these.
//! - [`boundary`] and [`contraction`]: environment tensors and the kernels
//!   (`lbtm`, `rbtm`, `site_hamil2`) at the heart of every sweep step.
//! - [`runtime`]: deferred work-stealing kernel execution with revision
//!   tracking, copy-on-write, and out-of-core regions.
//! - [`optimizer`] and [`checkpoint`]: the two-site sweep driver and its
//!   persisted state.

use serde::{ Serialize, de::DeserializeOwned };
use ndarray_linalg::types::{ Lapack, Scalar };

pub mod symmetry;
pub mod index;
pub mod dense;
pub mod block_matrix;
pub mod block_ops;
pub mod truncation;
pub mod reshapes;
pub mod mps_tensor;
pub mod mpo;
pub mod boundary;
pub mod contraction;
pub mod two_site;
pub mod mps;
pub mod runtime;
pub mod optimizer;
pub mod checkpoint;

/// Convenience trait naming the scalar types that can be stored in a block
/// matrix and passed through the dense backend.
///
/// Implemented for `f32`, `f64`, and their complex counterparts.
pub trait Elem
where Self: Scalar + Lapack + Serialize + DeserializeOwned + Send + Sync + 'static
{ }

impl<A> Elem for A
where A: Scalar + Lapack + Serialize + DeserializeOwned + Send + Sync + 'static
{ }

pub use num_complex::{ Complex32 as C32, Complex64 as C64 };
pub use symmetry::{ Symmetry, TrivialGroup, TwoU1, U1, Z2 };
pub use index::{ DualIndex, DualIndexEntry, Index, ProductBasis };
pub use block_matrix::BlockMatrix;
pub use truncation::{ TruncationParams, TruncationResults };
pub use mps_tensor::{ MPSTensor, Normalization, Pairing };
pub use mpo::{ MPO, MPOTensor, OperatorTable };
pub use boundary::Boundary;
pub use contraction::{ AbelianEngine, ContractionEngine, PathPolicy };
pub use two_site::TwoSiteTensor;
pub use mps::MPS;
pub use runtime::{ Runtime, RuntimeConfig };
pub use optimizer::{ SweepConfig, SweepOptimizer };
