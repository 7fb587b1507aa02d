//! Hierarchical key-path archive for simulation checkpoints.
//!
//! An [`Archive`] maps slash-separated paths (`/simulation/sweep3/results`)
//! to bincode-encoded values and is itself persisted with bincode. Matrix
//! product states are stored as nested groups, one per site, with the block
//! basis (`rows_`, `cols_`) kept apart from the block payloads (`data_/j`),
//! all in block order:
//!
//! ```text
//! /state/mps/length
//! /state/mps/center
//! /state/mps/0/phys_i
//! /state/mps/0/left_i
//! /state/mps/0/right_i
//! /state/mps/0/pairing
//! /state/mps/0/normalization
//! /state/mps/0/rows_
//! /state/mps/0/cols_
//! /state/mps/0/data_/0
//! ...
//! ```
//!
//! Boundaries use one such block-matrix group per auxiliary index under an
//! `aux_dim` count.

use std::{
    collections::BTreeMap,
    fs,
    io::{ BufReader, BufWriter, Write },
    path::Path,
};
use ndarray as nd;
use serde::{ Deserialize, Serialize, de::DeserializeOwned };
use thiserror::Error;
use crate::{
    Elem,
    block_matrix::{ BlockMatrix, BlockMatrixError },
    boundary::Boundary,
    index::Index,
    mps::{ MPS, MPSError },
    mps_tensor::{ MPSTensor, MPSTensorError, Normalization, Pairing },
    symmetry::Symmetry,
};

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Returned when a requested path is absent from the archive.
    #[error("error in checkpoint: missing key {0}")]
    MissingKey(String),

    /// Returned when a path does not start with `/`.
    #[error("error in checkpoint: invalid key {0:?}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    BincodeError(#[from] bincode::Error),

    #[error("block matrix error: {0}")]
    BlockMatrixError(#[from] BlockMatrixError),

    #[error("MPS tensor error: {0}")]
    MPSTensorError(#[from] MPSTensorError),

    #[error("MPS error: {0}")]
    MPSError(#[from] MPSError),
}
use CheckpointError::*;
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// In-memory key-path archive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    entries: BTreeMap<String, Vec<u8>>,
}

fn join(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

impl Archive {
    /// Create a new, empty archive.
    pub fn new() -> Self { Self::default() }

    /// Read an archive from a file.
    pub fn load<P>(path: P) -> CheckpointResult<Self>
    where P: AsRef<Path>
    {
        let reader = BufReader::new(fs::File::open(path.as_ref())?);
        let out: Self = bincode::deserialize_from(reader)?;
        log::debug!(entries = out.entries.len(); "loaded archive");
        Ok(out)
    }

    /// Write the archive to a file, replacing any existing one only after the
    /// write has succeeded.
    pub fn save<P>(&self, path: P) -> CheckpointResult<()>
    where P: AsRef<Path>
    {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp)?);
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        log::info!(entries = self.entries.len(); "saved checkpoint to {}", path.display());
        Ok(())
    }

    /// Return `true` if the archive holds `key`.
    pub fn contains(&self, key: &str) -> bool { self.entries.contains_key(key) }

    /// Return the number of stored paths.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Return `true` if nothing is stored.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate over all stored paths in lexicographic order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Iterate over all stored paths under the group `prefix`.
    pub fn group<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = prefix.trim_end_matches('/');
        self.entries.keys()
            .map(|k| k.as_str())
            .filter(move |k| {
                k.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
            })
    }

    /// Remove every path under the group `prefix`.
    pub fn remove_group(&mut self, prefix: &str) {
        let prefix = prefix.trim_end_matches('/').to_string();
        self.entries.retain(|k, _| {
            !k.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
        });
    }

    /// Store `value` at `key`.
    pub fn set<T>(&mut self, key: &str, value: &T) -> CheckpointResult<()>
    where T: Serialize + ?Sized
    {
        if !key.starts_with('/') { return Err(InvalidKey(key.to_string())); }
        self.entries.insert(key.to_string(), bincode::serialize(value)?);
        Ok(())
    }

    /// Read the value at `key`.
    pub fn get<T>(&self, key: &str) -> CheckpointResult<T>
    where T: DeserializeOwned
    {
        let bytes = self.entries.get(key)
            .ok_or_else(|| MissingKey(key.to_string()))?;
        Ok(bincode::deserialize(bytes)?)
    }

    /// Store a block matrix under the group `prefix`.
    pub fn set_block_matrix<S, A>(&mut self, prefix: &str, m: &BlockMatrix<S, A>)
        -> CheckpointResult<()>
    where
        S: Symmetry,
        A: Elem,
    {
        self.remove_group(&join(prefix, "data_"));
        let rows_: Vec<(S::Charge, usize)>
            = m.basis().iter().map(|e| (e.lc, e.ls)).collect();
        let cols_: Vec<(S::Charge, usize)>
            = m.basis().iter().map(|e| (e.rc, e.rs)).collect();
        self.set(&join(prefix, "rows_"), &rows_)?;
        self.set(&join(prefix, "cols_"), &cols_)?;
        for (j, (_, b)) in m.iter().enumerate() {
            self.set(&format!("{}/{}", join(prefix, "data_"), j), b)?;
        }
        Ok(())
    }

    /// Read a block matrix from the group `prefix`.
    pub fn get_block_matrix<S, A>(&self, prefix: &str)
        -> CheckpointResult<BlockMatrix<S, A>>
    where
        S: Symmetry,
        A: Elem,
    {
        let rows_: Vec<(S::Charge, usize)> = self.get(&join(prefix, "rows_"))?;
        let cols_: Vec<(S::Charge, usize)> = self.get(&join(prefix, "cols_"))?;
        let mut out = BlockMatrix::new();
        for (j, ((lc, _), (rc, _))) in rows_.into_iter().zip(cols_).enumerate() {
            let block: nd::Array2<A>
                = self.get(&format!("{}/{}", join(prefix, "data_"), j))?;
            out.insert_block(block, lc, rc)?;
        }
        out.check_shapes()?;
        Ok(out)
    }

    /// Store a matrix product state under the group `prefix`, replacing
    /// whatever was there.
    pub fn set_mps<S, A>(&mut self, prefix: &str, mps: &MPS<S, A>)
        -> CheckpointResult<()>
    where
        S: Symmetry,
        A: Elem,
    {
        self.remove_group(prefix);
        self.set(&join(prefix, "length"), &mps.len())?;
        self.set(&join(prefix, "center"), &mps.center())?;
        for (k, t) in mps.iter().enumerate() {
            let site = join(prefix, &k.to_string());
            self.set(&join(&site, "phys_i"), t.phys_i())?;
            self.set(&join(&site, "left_i"), t.left_i())?;
            self.set(&join(&site, "right_i"), t.right_i())?;
            self.set(&join(&site, "pairing"), &t.pairing())?;
            self.set(&join(&site, "normalization"), &t.normalization())?;
            self.set_block_matrix(&site, t.data())?;
        }
        Ok(())
    }

    /// Read a matrix product state from the group `prefix`.
    pub fn get_mps<S, A>(&self, prefix: &str) -> CheckpointResult<MPS<S, A>>
    where
        S: Symmetry,
        A: Elem,
    {
        let n: usize = self.get(&join(prefix, "length"))?;
        let center: Option<usize> = self.get(&join(prefix, "center"))?;
        let mut data: Vec<MPSTensor<S, A>> = Vec::with_capacity(n);
        for k in 0..n {
            let site = join(prefix, &k.to_string());
            let phys_i: Index<S> = self.get(&join(&site, "phys_i"))?;
            let left_i: Index<S> = self.get(&join(&site, "left_i"))?;
            let right_i: Index<S> = self.get(&join(&site, "right_i"))?;
            let pairing: Pairing = self.get(&join(&site, "pairing"))?;
            let normalization: Normalization = self.get(&join(&site, "normalization"))?;
            let block = self.get_block_matrix(&site)?;
            let mut t = MPSTensor::new(phys_i, left_i, right_i, block, pairing)?;
            t.set_normalization(normalization);
            data.push(t);
        }
        let mut mps = MPS::new(data)?;
        mps.set_center(center);
        Ok(mps)
    }

    /// Store a boundary under the group `prefix`, one block matrix per
    /// auxiliary index.
    pub fn set_boundary<S, A>(&mut self, prefix: &str, b: &Boundary<S, A>)
        -> CheckpointResult<()>
    where
        S: Symmetry,
        A: Elem,
    {
        self.remove_group(prefix);
        self.set(&join(prefix, "aux_dim"), &b.aux_dim())?;
        for (k, m) in b.iter().enumerate() {
            self.set_block_matrix(&join(prefix, &k.to_string()), m)?;
        }
        Ok(())
    }

    /// Read a boundary from the group `prefix`.
    pub fn get_boundary<S, A>(&self, prefix: &str) -> CheckpointResult<Boundary<S, A>>
    where
        S: Symmetry,
        A: Elem,
    {
        let aux_dim: usize = self.get(&join(prefix, "aux_dim"))?;
        let data: Vec<BlockMatrix<S, A>>
            = (0..aux_dim)
            .map(|k| self.get_block_matrix(&join(prefix, &k.to_string())))
            .collect::<CheckpointResult<_>>()?;
        Ok(Boundary::from_vec(data))
    }
}
