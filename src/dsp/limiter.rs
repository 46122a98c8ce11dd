//! Limiter Effect
//!
//! Brickwall limiter, the last processor on the master bus.

use serde::{Deserialize, Serialize};

use super::effect::Effect;
use crate::engine::buffer::{db_to_linear, linear_to_db, DEFAULT_SAMPLE_RATE};
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

// ============================================================================
// Constants
// ============================================================================

/// Minimum ceiling in dB
const MIN_CEILING_DB: f32 = -12.0;
/// Maximum ceiling in dB
const MAX_CEILING_DB: f32 = 0.0;

/// Minimum release time in ms
const MIN_RELEASE_MS: f32 = 10.0;
/// Maximum release time in ms
const MAX_RELEASE_MS: f32 = 1000.0;

/// Very fast attack time for brickwall limiting (0.1ms)
const ATTACK_MS: f32 = 0.1;

/// Calculate envelope coefficient from time constant
#[inline]
fn time_to_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    (-1.0 / (time_ms * sample_rate / 1000.0)).exp()
}

/// Limiter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterParams {
    /// Maximum output level (-12 to 0 dBFS)
    pub ceiling_db: f32,
    /// Gain recovery time (10 to 1000 ms)
    pub release_ms: f32,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            ceiling_db: -1.0,
            release_ms: 100.0,
        }
    }
}

impl LimiterParams {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CEILING_DB..=MAX_CEILING_DB).contains(&self.ceiling_db) {
            return Err(SegueError::InvalidParameter {
                param: "limiter.ceiling_db".to_string(),
                value: self.ceiling_db.to_string(),
                expected: "-12 to 0 dBFS".to_string(),
            });
        }
        if !(MIN_RELEASE_MS..=MAX_RELEASE_MS).contains(&self.release_ms) {
            return Err(SegueError::InvalidParameter {
                param: "limiter.release_ms".to_string(),
                value: self.release_ms.to_string(),
                expected: "10 to 1000 ms".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Limiter Effect
// ============================================================================

/// Brickwall limiter
///
/// Fast attack, configurable release, and a final hard clamp so no sample
/// ever leaves above the ceiling.
#[derive(Debug, Clone)]
pub struct Limiter {
    ceiling_db: f32,
    ceiling_linear: f32,
    release_ms: f32,
    sample_rate: f32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current gain reduction in dB (positive)
    envelope: f32,
}

impl Limiter {
    pub fn new(params: &LimiterParams) -> Self {
        let mut limiter = Self {
            ceiling_db: params.ceiling_db.clamp(MIN_CEILING_DB, MAX_CEILING_DB),
            ceiling_linear: 1.0,
            release_ms: params.release_ms.clamp(MIN_RELEASE_MS, MAX_RELEASE_MS),
            sample_rate: DEFAULT_SAMPLE_RATE as f32,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
        };
        limiter.update_coefficients();
        limiter
    }

    pub fn ceiling_db(&self) -> f32 {
        self.ceiling_db
    }

    pub fn ceiling_linear(&self) -> f32 {
        self.ceiling_linear
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = time_to_coeff(ATTACK_MS, self.sample_rate);
        self.release_coeff = time_to_coeff(self.release_ms, self.sample_rate);
        self.ceiling_linear = db_to_linear(self.ceiling_db);
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(&LimiterParams::default())
    }
}

impl Effect for Limiter {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        for i in 0..buffer.len() {
            let peak = buffer
                .samples
                .iter()
                .map(|ch| ch[i].abs())
                .fold(0.0_f32, f32::max);

            let target = if peak > self.ceiling_linear {
                (linear_to_db(peak) - self.ceiling_db).max(0.0)
            } else {
                0.0
            };

            let coeff = if target > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * target;

            let gain = db_to_linear(-self.envelope);
            for ch in buffer.samples.iter_mut() {
                let s = ch[i] * gain;
                ch[i] = s.clamp(-self.ceiling_linear, self.ceiling_linear);
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f32;
        self.update_coefficients();
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn effect_type(&self) -> &'static str {
        "limiter"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f32, len: usize) -> AudioBuffer {
        AudioBuffer::from_channels(vec![vec![value; len], vec![-value; len]], 44100).unwrap()
    }

    #[test]
    fn test_limiter_clamping() {
        let limiter = Limiter::new(&LimiterParams {
            ceiling_db: 6.0,
            release_ms: 1.0,
        });
        assert_eq!(limiter.ceiling_db(), 0.0);
        assert!(LimiterParams::default().validate().is_ok());
        assert!(LimiterParams {
            ceiling_db: -20.0,
            release_ms: 100.0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_below_ceiling_untouched() {
        let mut limiter = Limiter::default();
        limiter.prepare(44100);
        let mut buffer = constant(0.5, 1000);
        limiter.process(&mut buffer);
        assert!(buffer.channel(0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_brickwall_never_exceeds_ceiling() {
        let mut limiter = Limiter::default();
        limiter.prepare(44100);
        let mut buffer = constant(3.0, 4410);
        limiter.process(&mut buffer);
        let ceiling = limiter.ceiling_linear();
        assert!(buffer
            .samples
            .iter()
            .flatten()
            .all(|s| s.abs() <= ceiling + 1e-7));
    }

    #[test]
    fn test_stereo_relationship_preserved() {
        let mut limiter = Limiter::default();
        limiter.prepare(44100);
        let mut buffer = constant(2.0, 2000);
        limiter.process(&mut buffer);
        for (l, r) in buffer.channel(0).iter().zip(buffer.channel(1)) {
            assert!((l + r).abs() < 1e-6);
        }
    }
}
