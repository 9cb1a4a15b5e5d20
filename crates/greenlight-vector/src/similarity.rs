//! Cosine similarity and top-k ranking.

use serde::Serialize;

/// A ranked candidate: its position in the input slice and its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedHit {
    pub index: usize,
    pub score: f32,
}

/// Cosine similarity of two vectors, in [-1, 1].
///
/// Returns 0.0 for mismatched lengths or when either vector has zero
/// magnitude. Accumulates in f64.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a.sqrt() * mag_b.sqrt())) as f32
}

/// Score every candidate against `query` and return the `k` best, highest
/// first. Ties keep input order; non-finite scores rank as 0.0.
pub fn rank<V: AsRef<[f32]>>(query: &[f32], candidates: &[V], k: usize) -> Vec<RankedHit> {
    let mut hits: Vec<RankedHit> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let score = cosine_similarity(query, candidate.as_ref());
            RankedHit {
                index,
                score: if score.is_finite() { score } else { 0.0 },
            }
        })
        .collect();

    // Stable sort keeps equal scores in input order.
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric() {
        let a = [0.3, -0.2, 0.9];
        let b = [0.1, 0.4, -0.5];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_scale_invariant() {
        let a = [0.3, -0.2, 0.9];
        let b = [3.0, -2.0, 9.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_length_mismatch_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_rank_empty_candidates() {
        let candidates: Vec<Vec<f32>> = Vec::new();
        assert!(rank(&[1.0, 0.0], &candidates, 5).is_empty());
    }

    #[test]
    fn test_rank_orders_descending_and_truncates() {
        let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
        let hits = rank(&[1.0, 0.0], &candidates, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 1);
        assert_eq!(hits[1].index, 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_rank_k_larger_than_candidates() {
        let candidates = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(rank(&[1.0, 0.0], &candidates, 10).len(), 2);
    }

    #[test]
    fn test_rank_k_zero() {
        let candidates = vec![vec![1.0, 0.0]];
        assert!(rank(&[1.0, 0.0], &candidates, 0).is_empty());
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let candidates = vec![vec![2.0, 0.0], vec![1.0, 0.0], vec![3.0, 0.0]];
        let hits = rank(&[1.0, 0.0], &candidates, 3);
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_rank_non_finite_scores_as_zero() {
        let candidates = vec![vec![f32::NAN, 0.0], vec![-1.0, 0.0], vec![1.0, 0.0]];
        let hits = rank(&[1.0, 0.0], &candidates, 3);
        assert_eq!(hits[0].index, 2);
        assert_eq!(hits[1].index, 0);
        assert_eq!(hits[1].score, 0.0);
        assert_eq!(hits[2].index, 1);
    }

    #[test]
    fn test_rank_length_mismatch_candidate_scores_zero() {
        let candidates = vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0]];
        let hits = rank(&[1.0, 0.0], &candidates, 2);
        assert_eq!(hits[0].index, 1);
        assert_eq!(hits[1].score, 0.0);
    }
}
