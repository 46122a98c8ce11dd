//! Weighted multi-dimensional compatibility scoring

use serde::{Deserialize, Serialize};

use super::cosine_similarity;
use super::harmonic::harmonic_component;
use crate::error::{Result, SegueError};
use crate::library::{FeatureSnapshot, TrackId};

// ============================================================================
// Configuration
// ============================================================================

/// Component weights; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub bpm: f64,
    pub harmonic: f64,
    pub semantic: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            bpm: 0.4,
            harmonic: 0.3,
            semantic: 0.3,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<()> {
        let parts = [
            ("bpm", self.bpm),
            ("harmonic", self.harmonic),
            ("semantic", self.semantic),
        ];
        for (name, w) in parts {
            if !w.is_finite() || w < 0.0 {
                return Err(SegueError::InvalidParameter {
                    param: format!("weights.{}", name),
                    value: w.to_string(),
                    expected: "a finite, non-negative weight".to_string(),
                });
            }
        }
        let sum = self.bpm + self.harmonic + self.semantic;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(SegueError::InvalidParameter {
                param: "weights".to_string(),
                value: format!("{:.4}", sum),
                expected: "weights summing to 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Scorer tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub weights: ScoreWeights,
    /// Relative BPM deviation at which the BPM component reaches 0
    pub bpm_tolerance: f64,
    /// Harmonic component for wheel neighbours and relative keys
    pub adjacent_key_score: f64,
    /// Harmonic component lost per wheel step beyond the first
    pub key_decay: f64,
    /// Totals closer than this rank as equal
    pub tie_epsilon: f64,
    /// Length of a recommendation list
    pub recommendation_limit: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            bpm_tolerance: 0.05,
            adjacent_key_score: 0.85,
            key_decay: 0.25,
            tie_epsilon: 1e-9,
            recommendation_limit: 15,
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(self.bpm_tolerance.is_finite() && self.bpm_tolerance > 0.0) {
            return Err(SegueError::InvalidParameter {
                param: "bpm_tolerance".to_string(),
                value: self.bpm_tolerance.to_string(),
                expected: "a positive number".to_string(),
            });
        }
        for (name, v) in [
            ("adjacent_key_score", self.adjacent_key_score),
            ("key_decay", self.key_decay),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(SegueError::InvalidParameter {
                    param: name.to_string(),
                    value: v.to_string(),
                    expected: "a value in [0, 1]".to_string(),
                });
            }
        }
        if self.tie_epsilon.is_nan() || self.tie_epsilon < 0.0 {
            return Err(SegueError::InvalidParameter {
                param: "tie_epsilon".to_string(),
                value: self.tie_epsilon.to_string(),
                expected: "a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Score
// ============================================================================

/// Pairwise compatibility, recomputed on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityScore {
    pub track_a: TrackId,
    pub track_b: TrackId,
    pub bpm: f64,
    pub harmonic: f64,
    /// `None` when either embedding is absent or unusable
    pub semantic: Option<f64>,
    /// Weighted total in [0, 1]
    pub total: f64,
}

/// BPM component: 1 at equal tempo, falling linearly to 0 at `tolerance`
pub fn bpm_component(bpm_a: f64, bpm_b: f64, tolerance: f64) -> f64 {
    (1.0 - (bpm_a - bpm_b).abs() / bpm_a / tolerance).clamp(0.0, 1.0)
}

/// Cosine similarity rescaled from [-1, 1] to [0, 1]
pub fn semantic_component(a: &FeatureSnapshot, b: &FeatureSnapshot) -> Option<f64> {
    let ea = a.embedding.as_ref()?;
    let eb = b.embedding.as_ref()?;
    cosine_similarity(ea, eb).map(|c| ((c + 1.0) / 2.0).clamp(0.0, 1.0))
}

/// Score two tracks with explicit weights and the default tunables
pub fn score(
    a: &FeatureSnapshot,
    b: &FeatureSnapshot,
    weights: &ScoreWeights,
) -> Result<CompatibilityScore> {
    let config = ScorerConfig {
        weights: *weights,
        ..ScorerConfig::default()
    };
    CompatibilityScorer::new(config).score(a, b)
}

// ============================================================================
// Scorer
// ============================================================================

/// Pure, deterministic compatibility scorer
#[derive(Debug, Clone)]
pub struct CompatibilityScorer {
    config: ScorerConfig,
    semantic_enabled: bool,
}

impl Default for CompatibilityScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

impl CompatibilityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            semantic_enabled: true,
        }
    }

    /// Drop the semantic term entirely, as when the embedding side is not ready
    pub fn without_semantic(mut self) -> Self {
        self.semantic_enabled = false;
        self
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Compatibility of `b` following `a`
    ///
    /// Fails with `InvalidFeature` if either track lacks a usable BPM or key.
    pub fn score(&self, a: &FeatureSnapshot, b: &FeatureSnapshot) -> Result<CompatibilityScore> {
        let (bpm_a, key_a) = a.musical_features()?;
        let (bpm_b, key_b) = b.musical_features()?;
        let cfg = &self.config;

        let bpm = bpm_component(bpm_a, bpm_b, cfg.bpm_tolerance);
        let harmonic = harmonic_component(&key_a, &key_b, cfg.adjacent_key_score, cfg.key_decay);
        let semantic = if self.semantic_enabled {
            semantic_component(a, b)
        } else {
            None
        };

        let w = &cfg.weights;
        let total = match semantic {
            Some(sem) => w.bpm * bpm + w.harmonic * harmonic + w.semantic * sem,
            None => {
                let denom = w.bpm + w.harmonic;
                if denom > 0.0 {
                    (w.bpm * bpm + w.harmonic * harmonic) / denom
                } else {
                    0.0
                }
            }
        };

        Ok(CompatibilityScore {
            track_a: a.id.clone(),
            track_b: b.id.clone(),
            bpm,
            harmonic,
            semantic,
            total: total.clamp(0.0, 1.0),
        })
    }
}
