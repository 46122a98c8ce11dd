//! Compatibility scoring
//!
//! Pairwise scores across tempo, harmonic key and embedding similarity,
//! plus deterministic ranking of candidate successors.

pub mod harmonic;
pub mod rank;
pub mod scorer;

pub use harmonic::{harmonic_component, semitone_shift};
pub use rank::{rank_order, tie_bucket};
pub use scorer::{
    bpm_component, score, semantic_component, CompatibilityScore, CompatibilityScorer,
    ScoreWeights, ScorerConfig,
};

/// Cosine similarity of two vectors
///
/// `None` for empty, mismatched, zero-norm or non-finite input, which
/// callers treat as an absent embedding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if !(denom.is_finite() && denom > 0.0 && dot.is_finite()) {
        return None;
    }
    Some((dot / denom).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_similarity() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 2.0]).unwrap(), 0.0);
        assert_relative_eq!(
            cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap(),
            -1.0,
            epsilon = 1e-12
        );
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[], &[]).is_none());
    }

    /// Two tracks four BPM apart on neighbouring keys with embeddings at
    /// cosine 0.8 land at about 0.658.
    #[test]
    fn test_reference_pair_total() {
        let theta = 0.8_f64.acos();
        let a = crate::library::FeatureSnapshot::new("A")
            .with_bpm(120.0)
            .with_key("8A".parse().unwrap())
            .with_embedding(vec![1.0, 0.0]);
        let b = crate::library::FeatureSnapshot::new("B")
            .with_bpm(124.0)
            .with_key("9A".parse().unwrap())
            .with_embedding(vec![theta.cos() as f32, theta.sin() as f32]);

        let s = score(&a, &b, &ScoreWeights::default()).unwrap();
        assert_relative_eq!(s.bpm, 1.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(s.harmonic, 0.85);
        assert_relative_eq!(s.semantic.unwrap(), 0.9, epsilon = 1e-6);
        assert_relative_eq!(s.total, 0.658, epsilon = 1e-3);
    }
}
