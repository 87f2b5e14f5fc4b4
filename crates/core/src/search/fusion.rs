//! Hybrid search fusion strategies.
//!
//! Combines a vector result list and a BM25 result list into a single
//! ranking keyed by public id. Two strategies:
//! - **Linear**: min-max normalize each list independently, then weight and
//!   sum; an id missing from one list contributes 0 on that side.
//! - **RRF** (Reciprocal Rank Fusion): rank-based, `Σ 1 / (k + rank)` with
//!   1-based ranks, no score normalization.
//!
//! Both orderings break score ties on ascending public id so results are
//! reproducible across runs and across a persistence round trip.

use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::search::types::{HybridResult, SearchResult};

/// Single-pass min/max over a result list's scores.
fn min_max(results: &[SearchResult]) -> Option<(f32, f32)> {
    if results.is_empty() {
        return None;
    }
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for r in results {
        if r.similarity < min {
            min = r.similarity;
        }
        if r.similarity > max {
            max = r.similarity;
        }
    }
    Some((min, max))
}

/// Min-max normalizes a list's scores; a degenerate range divides by 1.
fn normalized(results: &[SearchResult]) -> Vec<f32> {
    let Some((min, max)) = min_max(results) else {
        return Vec::new();
    };
    let denom = if max > min { max - min } else { 1.0 };
    results.iter().map(|r| (r.similarity - min) / denom).collect()
}

fn sort_by_combined(merged: &mut [HybridResult]) {
    merged.sort_unstable_by(|a, b| {
        OrderedFloat(b.combined_score)
            .cmp(&OrderedFloat(a.combined_score))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Weighted linear combination of min-max-normalized scores.
///
/// `combined = vector_weight · norm_vec + text_weight · norm_txt`, merged by
/// public id, sorted by combined score descending. Per-side scores in the
/// output are the normalized values.
pub fn linear_fusion(
    vector_results: &[SearchResult],
    text_results: &[SearchResult],
    vector_weight: f32,
    text_weight: f32,
) -> Vec<HybridResult> {
    let norm_vec = normalized(vector_results);
    let norm_txt = normalized(text_results);

    let mut merged: Vec<HybridResult> =
        Vec::with_capacity(vector_results.len() + text_results.len());
    let mut by_id: HashMap<&str, usize> = HashMap::with_capacity(merged.capacity());

    for (r, &n) in vector_results.iter().zip(&norm_vec) {
        by_id.insert(r.id.as_str(), merged.len());
        merged.push(HybridResult {
            id: r.id.clone(),
            similarity: 0.0,
            metadata: r.metadata.clone(),
            vector_score: n,
            text_score: 0.0,
            combined_score: 0.0,
        });
    }
    for (r, &n) in text_results.iter().zip(&norm_txt) {
        if let Some(&i) = by_id.get(r.id.as_str()) {
            merged[i].text_score = n;
        } else {
            merged.push(HybridResult {
                id: r.id.clone(),
                similarity: 0.0,
                metadata: r.metadata.clone(),
                vector_score: 0.0,
                text_score: n,
                combined_score: 0.0,
            });
        }
    }

    for result in &mut merged {
        result.combined_score =
            vector_weight * result.vector_score + text_weight * result.text_score;
        result.similarity = result.combined_score;
    }
    sort_by_combined(&mut merged);
    merged
}

/// Reciprocal Rank Fusion over the two lists.
///
/// Each id accumulates `1 / (rrf_k + rank)` for its 1-based rank in every
/// list it appears in. The fused score is reported as both `similarity` and
/// `combined_score`; per-side scores are the raw scores from each list.
pub fn rrf_fusion(
    vector_results: &[SearchResult],
    text_results: &[SearchResult],
    rrf_k: f32,
) -> Vec<HybridResult> {
    let mut merged: Vec<HybridResult> =
        Vec::with_capacity(vector_results.len() + text_results.len());
    let mut by_id: HashMap<&str, usize> = HashMap::with_capacity(merged.capacity());

    for (rank, r) in vector_results.iter().enumerate() {
        let contribution = 1.0 / (rrf_k + rank as f32 + 1.0);
        by_id.insert(r.id.as_str(), merged.len());
        merged.push(HybridResult {
            id: r.id.clone(),
            similarity: 0.0,
            metadata: r.metadata.clone(),
            vector_score: r.similarity,
            text_score: 0.0,
            combined_score: contribution,
        });
    }
    for (rank, r) in text_results.iter().enumerate() {
        let contribution = 1.0 / (rrf_k + rank as f32 + 1.0);
        if let Some(&i) = by_id.get(r.id.as_str()) {
            merged[i].text_score = r.similarity;
            merged[i].combined_score += contribution;
        } else {
            merged.push(HybridResult {
                id: r.id.clone(),
                similarity: 0.0,
                metadata: r.metadata.clone(),
                vector_score: 0.0,
                text_score: r.similarity,
                combined_score: contribution,
            });
        }
    }

    for result in &mut merged {
        result.similarity = result.combined_score;
    }
    sort_by_combined(&mut merged);
    merged
}
