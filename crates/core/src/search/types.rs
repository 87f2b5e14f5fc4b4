//! Result types for search operations.

use serde::Serialize;

use crate::config::DEFAULT_K;
use crate::document::{Metadata, MetadataFilter};

/// A single hit from vector or full-text search.
///
/// `similarity` is cosine similarity (`1 − distance`) for vector search and
/// the BM25 score for full-text search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Public id of the matched entry.
    pub id: String,
    /// Relevance score; interpretation depends on the search type.
    pub similarity: f32,
    /// The entry's metadata at search time.
    pub metadata: Metadata,
}

/// A hit from hybrid search: a [`SearchResult`] extended with the per-side
/// and fused scores.
///
/// For weighted fusion `similarity == combined_score` and the per-side
/// scores are min-max normalized; for RRF `similarity` is the RRF sum and
/// the per-side scores are the raw scores from each list (0 when absent).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridResult {
    /// Public id of the matched entry.
    pub id: String,
    /// Fused relevance score.
    pub similarity: f32,
    /// The entry's metadata at search time.
    pub metadata: Metadata,
    /// Contribution from the vector side.
    pub vector_score: f32,
    /// Contribution from the text side.
    pub text_score: f32,
    /// Final fused score used for ordering.
    pub combined_score: f32,
}

/// Options for weighted hybrid search.
#[derive(Debug, Clone)]
pub struct HybridOptions {
    /// Weight of the normalized vector score; must sum to 1.0 with `text_weight`.
    pub vector_weight: f32,
    /// Weight of the normalized BM25 score.
    pub text_weight: f32,
    /// Number of results to return.
    pub k: usize,
    /// Exact-equality metadata constraints.
    pub filter: MetadataFilter,
    /// Apply MMR diversity reranking before truncating to `k`.
    pub rerank: bool,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            text_weight: 0.5,
            k: DEFAULT_K,
            filter: MetadataFilter::new(),
            rerank: false,
        }
    }
}
