//! BM25 Okapi scoring engine.
//!
//! Scores every candidate slot against a query using the BM25 formula with
//! the engine's `(k1, b)` parameters. Candidates are gathered as the union
//! of postings for the query terms; per-candidate term frequencies are
//! recomputed by re-tokenizing the candidate's indexed string fields, so
//! scores always reflect the stored metadata.

use std::collections::{BTreeSet, HashMap};

use ordered_float::OrderedFloat;

use crate::bm25::inverted_index::InvertedIndex;
use crate::bm25::tokenizer::{tokenize, Tokens};
use crate::document::Metadata;

/// Scores all candidates for `query`, sorted by descending BM25 score.
///
/// `metadata_of` resolves a slot to its stored metadata. Returns an empty
/// list when the indexed-field list is empty, the query tokenizes to
/// nothing, or the index holds no documents. Score ties break on ascending
/// slot so the ordering is reproducible.
pub fn bm25_scores<'a, F>(
    index: &InvertedIndex,
    fields: &[String],
    query: &str,
    k1: f32,
    b: f32,
    metadata_of: F,
) -> Vec<(u32, f32)>
where
    F: Fn(u32) -> Option<&'a Metadata>,
{
    let query_tokens = tokenize(query);
    if fields.is_empty() || query_tokens.is_empty() || index.total_docs() == 0 {
        return Vec::new();
    }

    // Query term frequencies; the keys define which document tokens count.
    let mut qtf: HashMap<&str, u32> = HashMap::new();
    for token in query_tokens.iter() {
        *qtf.entry(token).or_insert(0) += 1;
    }

    // Union-gather candidates over the query terms' postings.
    let mut candidates: BTreeSet<u32> = BTreeSet::new();
    for term in qtf.keys() {
        if let Some(slots) = index.postings(term) {
            candidates.extend(slots.iter().copied());
        }
    }

    let n = index.total_docs() as f32;
    let avgdl = index.avg_doc_length();

    let mut scored: Vec<(u32, f32)> = Vec::with_capacity(candidates.len());
    for slot in candidates {
        let Some(metadata) = metadata_of(slot) else {
            continue;
        };

        // Re-tokenize the candidate's indexed fields, counting only query terms.
        let field_tokens: Vec<Tokens> = fields
            .iter()
            .filter_map(|field| metadata.get(field))
            .filter_map(|value| value.as_str())
            .map(tokenize)
            .collect();
        let mut dtf: HashMap<&str, u32> = HashMap::with_capacity(qtf.len());
        for tokens in &field_tokens {
            for token in tokens.iter() {
                if qtf.contains_key(token) {
                    *dtf.entry(token).or_insert(0) += 1;
                }
            }
        }

        let dl = index.doc_length(slot) as f32;
        let mut score = 0.0f32;
        for (term, &tf) in &dtf {
            let df = index.document_frequency(term) as f32;
            // IDF: ln((N - df + 0.5) / (df + 0.5) + 1) — non-negative for all terms
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf = tf as f32;
            let tf_norm = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avgdl));
            score += idf * tf_norm;
        }
        scored.push((slot, score));
    }

    scored.sort_unstable_by(|a, b| {
        OrderedFloat(b.1)
            .cmp(&OrderedFloat(a.1))
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}
