//! Maximal Marginal Relevance reranking.
//!
//! Reorders an already-fused hybrid result list to balance relevance against
//! redundancy: each step picks the candidate maximizing
//! `λ · combined_score − (1 − λ) · max cos(candidate, selected)`.
//! The output is a permutation of the input; ties break by position (first
//! occurrence wins).

use crate::search::types::HybridResult;

/// Direct cosine similarity between two stored vectors; 0.0 for zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Greedy MMR rerank over `(result, stored vector)` pairs.
///
/// The first input element seeds the selection; remaining elements are
/// appended in marginal-relevance order.
pub fn mmr_rerank(candidates: Vec<(HybridResult, Vec<f32>)>, lambda: f32) -> Vec<HybridResult> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut remaining = candidates;
    let (first, first_vector) = remaining.remove(0);
    let mut selected = vec![first];
    let mut selected_vectors = vec![first_vector];

    while !remaining.is_empty() {
        let mut best_index = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (i, (candidate, vector)) in remaining.iter().enumerate() {
            let max_redundancy = selected_vectors
                .iter()
                .map(|s| cosine_similarity(vector, s))
                .fold(f32::NEG_INFINITY, f32::max);
            let score = lambda * candidate.combined_score - (1.0 - lambda) * max_redundancy;
            // Strict comparison: ties keep the earliest candidate
            if score > best_score {
                best_score = score;
                best_index = i;
            }
        }
        let (candidate, vector) = remaining.remove(best_index);
        selected.push(candidate);
        selected_vectors.push(vector);
    }

    selected
}
