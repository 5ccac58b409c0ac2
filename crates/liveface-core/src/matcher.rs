//! Signature similarity.

use crate::signature::Signature;

/// Cosine similarity between two vectors. Zero if either vector is empty,
/// zero-norm, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Remap a cosine in [−1,1] to a similarity score in [0,1].
pub fn remap_similarity(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Similarity score in [0,1] between two signatures.
pub fn compare_signatures(a: &Signature, b: &Signature) -> f32 {
    remap_similarity(cosine_similarity(&a.values, &b.values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.2f32, 0.5, -0.3, 0.7];
        assert!((remap_similarity(cosine_similarity(&v, &v)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_half() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((remap_similarity(cosine_similarity(&a, &b)) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        let a = vec![0.3f32, -0.4, 0.5];
        let b: Vec<f32> = a.iter().map(|v| -v).collect();
        assert!(remap_similarity(cosine_similarity(&a, &b)).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_score_half() {
        let a = vec![1.0f32, 0.0];
        let b = vec![1.0f32, 0.0, 0.0];
        assert!((remap_similarity(cosine_similarity(&a, &b)) - 0.5).abs() < 1e-6);
    }
}
