//! Inverted index plus BM25 corpus statistics.
//!
//! Maps terms to the set of slots mentioning them, and tracks per-slot
//! document length (token count across indexed fields), total document
//! count, and running average length. Postings and statistics are updated
//! in lock-step with every mutation; empty postings are pruned so term
//! enumeration and serialization reflect live data only.

use std::collections::{HashMap, HashSet};

use crate::bm25::tokenizer::tokenize;
use crate::document::Metadata;

/// Inverted index mapping terms to slot sets, with BM25 statistics.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    /// term → set of slots whose indexed fields contain the term
    postings: HashMap<String, HashSet<u32>>,
    /// slot → token count across its indexed fields at indexing time
    doc_lengths: HashMap<u32, u32>,
    /// Number of indexed documents; always equals `doc_lengths.len()`
    total_docs: usize,
    /// Arithmetic mean of `doc_lengths`, 0.0 when empty
    avg_doc_length: f32,
}

impl InvertedIndex {
    /// Creates a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an index from deserialized parts, trusting the given stats.
    ///
    /// Consistency of the parts is the caller's concern (snapshot loading
    /// validates separately).
    pub(crate) fn from_parts(
        postings: HashMap<String, HashSet<u32>>,
        doc_lengths: HashMap<u32, u32>,
        total_docs: usize,
        avg_doc_length: f32,
    ) -> Self {
        Self {
            postings,
            doc_lengths,
            total_docs,
            avg_doc_length,
        }
    }

    /// (Re)indexes a slot from its metadata under the given field list.
    ///
    /// Removes the slot from every posting it currently belongs to, then
    /// inserts it under each token of each string-valued indexed field.
    /// `doc_lengths[slot]` becomes the total token count; statistics are
    /// refreshed afterwards.
    pub fn index_entry(&mut self, slot: u32, metadata: &Metadata, fields: &[String]) {
        self.remove_slot_from_postings(slot);

        let mut doc_length = 0u32;
        for field in fields {
            if let Some(text) = metadata.get(field).and_then(|v| v.as_str()) {
                let tokens = tokenize(text);
                doc_length += tokens.len() as u32;
                for token in tokens.iter() {
                    self.postings.entry(token.to_string()).or_default().insert(slot);
                }
            }
        }

        self.doc_lengths.insert(slot, doc_length);
        self.refresh_stats();
    }

    /// Removes a slot from every posting and drops its length entry.
    pub fn unindex(&mut self, slot: u32) {
        self.remove_slot_from_postings(slot);
        self.doc_lengths.remove(&slot);
        self.refresh_stats();
    }

    fn remove_slot_from_postings(&mut self, slot: u32) {
        // Empty postings must not survive
        self.postings.retain(|_, slots| {
            slots.remove(&slot);
            !slots.is_empty()
        });
    }

    fn refresh_stats(&mut self) {
        self.total_docs = self.doc_lengths.len();
        self.avg_doc_length = if self.total_docs == 0 {
            0.0
        } else {
            self.doc_lengths.values().map(|&l| l as f32).sum::<f32>() / self.total_docs as f32
        };
    }

    /// Returns the posting for a term, if any.
    pub fn postings(&self, term: &str) -> Option<&HashSet<u32>> {
        self.postings.get(term)
    }

    /// Number of documents containing the term.
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, HashSet::len)
    }

    /// Indexed token count of a slot, 0 if the slot is not indexed.
    pub fn doc_length(&self, slot: u32) -> u32 {
        self.doc_lengths.get(&slot).copied().unwrap_or(0)
    }

    /// Number of indexed documents.
    pub fn total_docs(&self) -> usize {
        self.total_docs
    }

    /// Mean indexed token count, 0.0 when the index is empty.
    pub fn avg_doc_length(&self) -> f32 {
        self.avg_doc_length
    }

    /// Iterates over all `(term, slots)` postings.
    pub(crate) fn postings_iter(&self) -> impl Iterator<Item = (&String, &HashSet<u32>)> {
        self.postings.iter()
    }

    /// Iterates over all `(slot, length)` pairs.
    pub(crate) fn doc_lengths_iter(&self) -> impl Iterator<Item = (&u32, &u32)> {
        self.doc_lengths.iter()
    }

    /// Number of slots carrying a document length.
    pub(crate) fn doc_lengths_len(&self) -> usize {
        self.doc_lengths.len()
    }
}
