//! Vector index adapter.
//!
//! The retrieval engine consumes an opaque cosine ANN index through the
//! narrow [`VectorIndex`] trait; swapping implementations must not affect
//! anything above it. The default implementation, [`HnswVectorIndex`], wraps
//! a usearch HNSW graph: points are keyed by slot id, deletion is a native
//! key removal, and the blob written at `{base}.idx` is usearch's own file
//! format.

use std::path::Path;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::config::{HNSW_EF_CONSTRUCTION, HNSW_EF_SEARCH, HNSW_M};
use crate::error::EngineError;

/// Capability set the engine requires from a vector index.
///
/// Distances are cosine distances in `[0, 2]`; callers derive similarity as
/// `1 − distance`. A previously deleted slot id may be re-added (updates
/// mark-then-reinsert at the same slot).
pub trait VectorIndex: Send + Sync + Sized + 'static {
    /// Creates an empty cosine index for `dim`-dimensional vectors with
    /// room for `max_elements` points.
    fn open(dim: usize, max_elements: usize) -> Result<Self, EngineError>;

    /// Inserts a point under the given slot id.
    fn add_point(&mut self, vector: &[f32], slot: u32) -> Result<(), EngineError>;

    /// Removes the point stored under the slot id.
    fn mark_delete(&mut self, slot: u32) -> Result<(), EngineError>;

    /// Returns up to `k` nearest `(slot, distance)` pairs, closest first.
    fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>, EngineError>;

    /// Writes the index blob to `path`.
    fn write_index(&self, path: &Path) -> Result<(), EngineError>;

    /// Replaces this index's contents with the blob at `path`.
    fn read_index(&mut self, path: &Path) -> Result<(), EngineError>;
}

/// Cosine HNSW index backed by usearch.
pub struct HnswVectorIndex {
    index: Index,
    dim: usize,
    max_elements: usize,
}

impl HnswVectorIndex {
    fn options(dim: usize) -> IndexOptions {
        IndexOptions {
            dimensions: dim,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: HNSW_M,
            expansion_add: HNSW_EF_CONSTRUCTION,
            expansion_search: HNSW_EF_SEARCH,
            ..Default::default()
        }
    }

    fn check_dim(&self, len: usize) -> Result<(), EngineError> {
        if len != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: len,
            });
        }
        Ok(())
    }
}

fn index_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::VectorIndex(e.to_string())
}

impl VectorIndex for HnswVectorIndex {
    fn open(dim: usize, max_elements: usize) -> Result<Self, EngineError> {
        let index = Index::new(&Self::options(dim)).map_err(index_err)?;
        // usearch requires reserved capacity before any insert
        index.reserve(max_elements.max(1)).map_err(index_err)?;
        Ok(Self {
            index,
            dim,
            max_elements,
        })
    }

    fn add_point(&mut self, vector: &[f32], slot: u32) -> Result<(), EngineError> {
        self.check_dim(vector.len())?;
        if self.index.size() >= self.index.capacity() {
            let grown = (self.index.capacity() * 2).max(self.max_elements);
            self.index.reserve(grown).map_err(index_err)?;
        }
        self.index.add(u64::from(slot), vector).map_err(index_err)
    }

    fn mark_delete(&mut self, slot: u32) -> Result<(), EngineError> {
        self.index.remove(u64::from(slot)).map_err(index_err)?;
        Ok(())
    }

    fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>, EngineError> {
        self.check_dim(query.len())?;
        if k == 0 || self.index.size() == 0 {
            return Ok(Vec::new());
        }
        let matches = self.index.search(query, k).map_err(index_err)?;
        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(&key, &distance)| (key as u32, distance))
            .collect())
    }

    fn write_index(&self, path: &Path) -> Result<(), EngineError> {
        let tmp = tmp_sibling(path);
        self.index
            .save(&tmp.to_string_lossy())
            .map_err(index_err)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_index(&mut self, path: &Path) -> Result<(), EngineError> {
        self.index
            .load(&path.to_string_lossy())
            .map_err(|e| EngineError::LoadCorrupt(format!("{}: {e}", path.display())))?;
        if self.index.dimensions() != self.dim {
            return Err(EngineError::LoadCorrupt(format!(
                "index blob has dimension {}, namespace expects {}",
                self.index.dimensions(),
                self.dim
            )));
        }
        // Loading shrinks capacity to the stored size; restore headroom.
        let capacity = self.max_elements.max(self.index.size()).max(1);
        self.index.reserve(capacity).map_err(index_err)?;
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    std::path::PathBuf::from(os)
}
