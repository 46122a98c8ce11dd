//! Deterministic candidate ranking

use std::cmp::Ordering;

use super::scorer::{CompatibilityScore, CompatibilityScorer};
use crate::error::Result;
use crate::library::FeatureSnapshot;

/// Bucket a total so totals within `epsilon` compare equal
///
/// Bucketing keeps the comparator a total order, which plain epsilon
/// comparison does not.
pub fn tie_bucket(total: f64, epsilon: f64) -> i64 {
    if epsilon > 0.0 {
        (total / epsilon).round() as i64
    } else {
        (total * 1e15).round() as i64
    }
}

/// Ordering for ranking: best first
///
/// Higher total (bucketed), then higher harmonic, then higher semantic with
/// an absent semantic term ranking lowest. Callers sort stably over input
/// in library order, which supplies the final tie-break.
pub fn rank_order(a: &CompatibilityScore, b: &CompatibilityScore, epsilon: f64) -> Ordering {
    tie_bucket(b.total, epsilon)
        .cmp(&tie_bucket(a.total, epsilon))
        .then_with(|| b.harmonic.total_cmp(&a.harmonic))
        .then_with(|| {
            let sa = a.semantic.unwrap_or(-1.0);
            let sb = b.semantic.unwrap_or(-1.0);
            sb.total_cmp(&sa)
        })
}

impl CompatibilityScorer {
    /// Rank `candidates` as successors of `anchor`, best first
    ///
    /// `candidates` must be in library insertion order. The anchor itself is
    /// skipped; candidates with invalid features are logged and left out.
    /// Returns at most `limit` scores.
    pub fn rank(
        &self,
        anchor: &FeatureSnapshot,
        candidates: &[FeatureSnapshot],
        limit: usize,
    ) -> Result<Vec<CompatibilityScore>> {
        anchor.validate()?;
        let mut scores: Vec<CompatibilityScore> = candidates
            .iter()
            .filter(|c| c.id != anchor.id)
            .filter_map(|c| match self.score(anchor, c) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(track = %c.id, error = %e, "excluded from candidates");
                    None
                }
            })
            .collect();

        let eps = self.config().tie_epsilon;
        scores.sort_by(|a, b| rank_order(a, b, eps));
        scores.truncate(limit);
        Ok(scores)
    }

    /// Top recommendations for `anchor`, using the configured list length
    pub fn recommend(
        &self,
        anchor: &FeatureSnapshot,
        candidates: &[FeatureSnapshot],
    ) -> Result<Vec<CompatibilityScore>> {
        self.rank(anchor, candidates, self.config().recommendation_limit)
    }
}
