//! Search primitives: result types, metadata filtering, fusion, and MMR.

pub mod filter;
pub mod fusion;
pub mod mmr;
pub mod types;

pub use filter::matches_filter;
pub use fusion::{linear_fusion, rrf_fusion};
pub use mmr::{cosine_similarity, mmr_rerank};
pub use types::{HybridOptions, HybridResult, SearchResult};
