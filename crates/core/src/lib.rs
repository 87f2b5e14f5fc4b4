//! # mirador-core
//!
//! Embeddable, in-process multi-namespace hybrid retrieval engine: HNSW
//! approximate nearest neighbor search, BM25 full-text search over indexed
//! metadata fields, and fused hybrid ranking (weighted linear combination
//! and Reciprocal Rank Fusion, with optional MMR reranking).
//!
//! Each namespace is an isolated document universe with its own vector
//! index, inverted index, slot space, and readers/writer lock; namespaces
//! are created lazily on first reference. Snapshots persist to a pair of
//! files per namespace and restore byte-identical search behavior.
//!
//! ```no_run
//! use mirador_core::{Engine, EngineConfig, Metadata};
//!
//! let engine = Engine::new(EngineConfig::new(4, 10_000))?;
//! engine.set_indexed_fields("docs", vec!["text".to_string()])?;
//!
//! let mut metadata = Metadata::new();
//! metadata.insert("text".into(), serde_json::json!("hello world"));
//! engine.insert("docs", "doc-1", vec![0.1, 0.2, 0.3, 0.4], metadata)?;
//!
//! let hits = engine.search("docs", &[0.1, 0.2, 0.3, 0.4], 5, &Default::default())?;
//! # Ok::<(), mirador_core::EngineError>(())
//! ```

/// BM25 full-text search: inverted index, Okapi BM25 scoring, and tokenizer.
pub mod bm25;
/// Engine configuration, BM25 parameters, and tuning constants.
pub mod config;
/// Core entry types: `Entry`, `Metadata`, `MetadataFilter`.
pub mod document;
/// The engine: namespace registry and the public operation set.
pub mod engine;
/// Error types.
pub mod error;
/// Search primitives: result types, metadata filtering, fusion, MMR.
pub mod search;
/// Storage layer: namespaces and disk persistence.
pub mod storage;
/// Vector index adapter: the `VectorIndex` trait and the usearch backend.
pub mod vector;

pub use config::EngineConfig;
pub use document::{Entry, Metadata, MetadataFilter};
pub use engine::Engine;
pub use error::EngineError;
pub use search::{HybridOptions, HybridResult, SearchResult};
pub use vector::{HnswVectorIndex, VectorIndex};
