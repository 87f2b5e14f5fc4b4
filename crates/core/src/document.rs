//! Core entry types.
//!
//! An `Entry` is one stored document: a caller-supplied public id, a
//! fixed-dimension embedding vector, and arbitrary JSON metadata. Entries
//! live at exactly one slot in their namespace for their in-memory lifetime.

use std::collections::HashMap;

/// Arbitrary JSON metadata attached to an entry, keyed by field name.
///
/// String-valued fields named in the namespace's indexed-field list
/// participate in the BM25 inverted index.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Exact-equality metadata constraints applied to search results.
///
/// An entry survives the filter when, for every pair, its metadata holds
/// exactly that value under that key.
pub type MetadataFilter = HashMap<String, serde_json::Value>;

/// A stored document: public id, embedding vector, and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Public identifier, unique within the namespace.
    pub id: String,
    /// Embedding vector; length equals the namespace dimension.
    pub vector: Vec<f32>,
    /// Arbitrary key-value metadata.
    pub metadata: Metadata,
}

impl Entry {
    /// Creates an entry with empty metadata.
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata: Metadata::new(),
        }
    }

    /// Creates an entry with the given metadata.
    pub fn with_metadata(id: impl Into<String>, vector: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }
}
