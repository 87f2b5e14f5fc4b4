//! Error types for mirador-core.
//!
//! Every operation surfaces failures to the caller; nothing is swallowed or
//! retried internally. Deleting a missing id is deliberately not an error.

use thiserror::Error;

/// Errors produced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Vector length differs from the namespace dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured namespace dimension.
        expected: usize,
        /// Length of the vector that was supplied.
        actual: usize,
    },
    /// Public id already live, or repeated within a batch.
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    /// Update targeted an id that is not present.
    #[error("id not found: {0}")]
    NotFound(String),
    /// A write would exceed `max_elements` with no reusable slot.
    #[error("capacity exhausted: namespace is full at {max_elements} elements")]
    CapacityExhausted {
        /// The namespace capacity that was hit.
        max_elements: usize,
    },
    /// Weighted hybrid search weights do not sum to 1.0.
    #[error(
        "hybrid weights must sum to 1.0 (vector_weight={vector_weight}, text_weight={text_weight})"
    )]
    BadWeights { vector_weight: f32, text_weight: f32 },
    /// Persisted files are missing or internally inconsistent.
    #[error("corrupt snapshot: {0}")]
    LoadCorrupt(String),
    /// Invalid engine construction parameters.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The vector index backend reported an error.
    #[error("vector index error: {0}")]
    VectorIndex(String),
    /// Filesystem error during persistence.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
