//! Engine configuration and tuning constants.
//!
//! `EngineConfig` carries the per-engine construction parameters; everything
//! else in this module is a documented compile-time default. BM25 parameters
//! are the one runtime-mutable pair and live in [`Bm25Params`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::EngineError;

/// Default number of results (`k`) returned by every search operation.
pub const DEFAULT_K: usize = 5;

/// BM25 Okapi term frequency saturation parameter.
///
/// Controls how quickly term frequency saturates. Higher values allow TF to
/// grow more. Default: 1.5.
pub const BM25_K1: f32 = 1.5;

/// BM25 Okapi document length normalization parameter.
///
/// 0.0 = no normalization, 1.0 = full normalization. Default: 0.75.
pub const BM25_B: f32 = 0.75;

/// Reciprocal Rank Fusion (RRF) constant `k`.
///
/// Used in the formula `1 / (k + rank)` to combine ranked lists.
/// Standard value is 60.0 (from the original RRF paper).
pub const RRF_K: f32 = 60.0;

/// MMR diversity weight λ: relevance is weighted λ, redundancy 1 − λ.
pub const MMR_LAMBDA: f32 = 0.7;

/// Oversampling factor for plain vector search.
///
/// `min(2k, live)` neighbors are requested so metadata filtering still
/// leaves enough survivors to fill `k` results.
pub const KNN_OVERSAMPLE: usize = 2;

/// Oversampling factor for the two candidate pools feeding hybrid fusion.
pub const HYBRID_OVERSAMPLE: usize = 3;

/// Tolerance when checking that hybrid weights sum to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-6;

/// Default interval between automatic compaction passes.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_millis(3_600_000);

/// Number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
pub const HNSW_M: usize = 16;

/// ef parameter during HNSW index construction.
pub const HNSW_EF_CONSTRUCTION: usize = 200;

/// ef parameter during HNSW search.
pub const HNSW_EF_SEARCH: usize = 100;

/// Construction parameters for an [`Engine`](crate::engine::Engine).
///
/// `dim` and `max_elements` apply to every namespace the engine creates and
/// are immutable for the engine's lifetime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Embedding dimension shared by all namespaces.
    pub dim: usize,
    /// Maximum number of slots per namespace.
    pub max_elements: usize,
    /// Run the background compaction timer.
    pub auto_compaction: bool,
    /// Interval between automatic compaction passes.
    pub compaction_interval: Duration,
}

impl EngineConfig {
    /// Creates a configuration with compaction disabled and the default interval.
    pub fn new(dim: usize, max_elements: usize) -> Self {
        Self {
            dim,
            max_elements,
            auto_compaction: false,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if self.dim == 0 {
            return Err(EngineError::Config("dim must be positive".into()));
        }
        if self.max_elements == 0 {
            return Err(EngineError::Config("max_elements must be positive".into()));
        }
        Ok(())
    }
}

/// Process-wide BM25 tuning pair `(k1, b)`.
///
/// Shared by all namespaces of an engine and read by every scoring call.
/// Stored as raw f32 bits in atomics so mutation needs no lock; callers
/// should still treat this as startup-time configuration.
#[derive(Debug)]
pub struct Bm25Params {
    k1: AtomicU32,
    b: AtomicU32,
}

impl Bm25Params {
    pub fn new(k1: f32, b: f32) -> Self {
        Self {
            k1: AtomicU32::new(k1.to_bits()),
            b: AtomicU32::new(b.to_bits()),
        }
    }

    pub fn set(&self, k1: f32, b: f32) {
        self.k1.store(k1.to_bits(), Ordering::Relaxed);
        self.b.store(b.to_bits(), Ordering::Relaxed);
    }

    /// Returns the current `(k1, b)` pair.
    pub fn get(&self) -> (f32, f32) {
        (
            f32::from_bits(self.k1.load(Ordering::Relaxed)),
            f32::from_bits(self.b.load(Ordering::Relaxed)),
        )
    }
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self::new(BM25_K1, BM25_B)
    }
}
