//! Compressor
//!
//! Feed-forward compressor with linked stereo peak detection, optional soft
//! knee and one-pole attack/release smoothing of the gain.

use serde::{Deserialize, Serialize};

use super::effect::Effect;
use crate::engine::buffer::{db_to_linear, DEFAULT_SAMPLE_RATE};
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

/// Floor used by the gain computer for silent input
const DETECTOR_FLOOR_DB: f32 = -96.0;

/// Compressor parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorParams {
    /// Threshold level in dB (-60 to 0 dB)
    pub threshold_db: f32,
    /// Compression ratio (1.0 to 20.0, representing 1:1 to 20:1)
    pub ratio: f32,
    /// Attack time in milliseconds (0.1 to 100 ms)
    pub attack_ms: f32,
    /// Release time in milliseconds (10 to 1000 ms)
    pub release_ms: f32,
    /// Knee width in dB (0 = hard knee, up to 12 dB for soft knee)
    pub knee_db: f32,
    /// Makeup gain in dB (0 to 24 dB)
    pub makeup_gain_db: f32,
}

impl Default for CompressorParams {
    /// Gentle bus compression: -12 dB, 2:1, 10 ms / 150 ms
    fn default() -> Self {
        Self {
            threshold_db: -12.0,
            ratio: 2.0,
            attack_ms: 10.0,
            release_ms: 150.0,
            knee_db: 0.0,
            makeup_gain_db: 0.0,
        }
    }
}

impl CompressorParams {
    /// Validate parameters against their ranges
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("threshold_db", self.threshold_db, -60.0, 0.0, "-60 to 0 dB"),
            ("ratio", self.ratio, 1.0, 20.0, "1.0 to 20.0"),
            ("attack_ms", self.attack_ms, 0.1, 100.0, "0.1 to 100 ms"),
            ("release_ms", self.release_ms, 10.0, 1000.0, "10 to 1000 ms"),
            ("knee_db", self.knee_db, 0.0, 12.0, "0 to 12 dB"),
            ("makeup_gain_db", self.makeup_gain_db, 0.0, 24.0, "0 to 24 dB"),
        ];
        for (param, value, min, max, expected) in checks {
            if !(min..=max).contains(&value) {
                return Err(SegueError::InvalidParameter {
                    param: format!("compressor.{}", param),
                    value: value.to_string(),
                    expected: expected.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Clamp parameters to valid ranges
    pub fn clamp(&mut self) {
        self.threshold_db = self.threshold_db.clamp(-60.0, 0.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack_ms = self.attack_ms.clamp(0.1, 100.0);
        self.release_ms = self.release_ms.clamp(10.0, 1000.0);
        self.knee_db = self.knee_db.clamp(0.0, 12.0);
        self.makeup_gain_db = self.makeup_gain_db.clamp(0.0, 24.0);
    }
}

/// Compressor dynamics processor
#[derive(Debug, Clone)]
pub struct Compressor {
    params: CompressorParams,
    sample_rate: u32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current smoothed gain (linear, 1.0 = no reduction)
    gain: f32,
}

impl Compressor {
    /// Create a compressor; parameters are clamped to their valid ranges
    pub fn new(params: CompressorParams) -> Self {
        let mut comp = Self {
            params,
            sample_rate: DEFAULT_SAMPLE_RATE,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain: 1.0,
        };
        comp.params.clamp();
        comp.update_coefficients();
        comp
    }

    pub fn params(&self) -> &CompressorParams {
        &self.params
    }

    /// Current gain reduction in dB for metering (0 or negative)
    pub fn gain_reduction_db(&self) -> f32 {
        if self.gain > 0.0 {
            20.0 * self.gain.log10()
        } else {
            DETECTOR_FLOOR_DB
        }
    }

    /// One-pole coefficients: coeff = exp(-1 / time_in_samples)
    fn update_coefficients(&mut self) {
        let sr = self.sample_rate as f32;
        let attack_samples = self.params.attack_ms / 1000.0 * sr;
        let release_samples = self.params.release_ms / 1000.0 * sr;
        self.attack_coeff = if attack_samples > 0.0 {
            (-1.0 / attack_samples).exp()
        } else {
            0.0
        };
        self.release_coeff = if release_samples > 0.0 {
            (-1.0 / release_samples).exp()
        } else {
            0.0
        };
    }

    /// Gain reduction in dB (0 or negative) for an input level in dB
    fn compute_gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.params.threshold_db;
        let ratio = self.params.ratio;
        let knee = self.params.knee_db;

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;
            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // ratio eases in quadratically across the knee
                let knee_factor = (input_db - knee_start) / knee;
                let effective_ratio = 1.0 + (ratio - 1.0) * knee_factor * knee_factor;
                (knee_start + (input_db - knee_start) / effective_ratio) - input_db
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressorParams::default())
    }
}

impl Effect for Compressor {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        let makeup = db_to_linear(self.params.makeup_gain_db);

        for frame in 0..buffer.len() {
            // linked detection: loudest channel drives all channels
            let peak = buffer
                .samples
                .iter()
                .map(|ch| ch[frame].abs())
                .fold(0.0_f32, f32::max);
            let input_db = if peak > 0.0 {
                20.0 * peak.log10()
            } else {
                DETECTOR_FLOOR_DB
            };

            let target = db_to_linear(self.compute_gain_reduction_db(input_db));
            let coeff = if target < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = coeff * self.gain + (1.0 - coeff) * target;

            let total = self.gain * makeup;
            for ch in buffer.samples.iter_mut() {
                ch[frame] *= total;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.update_coefficients();
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }

    fn effect_type(&self) -> &'static str {
        "compressor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::sine_tone;

    #[test]
    fn test_parameter_validation() {
        let mut params = CompressorParams::default();
        assert!(params.validate().is_ok());
        params.ratio = 0.5;
        assert!(params.validate().is_err());
        params.ratio = 2.0;
        params.release_ms = 5.0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_parameter_clamping() {
        let mut params = CompressorParams {
            threshold_db: -100.0,
            ratio: 50.0,
            attack_ms: 0.001,
            release_ms: 5000.0,
            knee_db: 20.0,
            makeup_gain_db: 50.0,
        };
        params.clamp();
        assert_eq!(params.threshold_db, -60.0);
        assert_eq!(params.ratio, 20.0);
        assert_eq!(params.attack_ms, 0.1);
        assert_eq!(params.release_ms, 1000.0);
        assert_eq!(params.knee_db, 12.0);
        assert_eq!(params.makeup_gain_db, 24.0);
    }

    #[test]
    fn test_gain_computer_hard_knee() {
        let comp = Compressor::new(CompressorParams {
            threshold_db: -20.0,
            ratio: 4.0,
            ..Default::default()
        });
        assert!(comp.compute_gain_reduction_db(-30.0).abs() < 1e-6);
        // 8 dB over at 4:1 leaves 2 dB over: 6 dB of reduction
        assert!((comp.compute_gain_reduction_db(-12.0) + 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_soft_knee_is_continuous() {
        let comp = Compressor::new(CompressorParams {
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 6.0,
            ..Default::default()
        });
        let below = comp.compute_gain_reduction_db(-23.0001);
        let above = comp.compute_gain_reduction_db(-16.9999);
        assert!(below.abs() < 1e-3);
        assert!((above - comp.compute_gain_reduction_db(-17.0)).abs() < 1e-3);
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = Compressor::default();
        comp.prepare(44100);
        let mut tone = sine_tone(220.0, 500.0, 44100, 2);
        let before = tone.rms_linear();
        comp.process(&mut tone);
        assert!(tone.rms_linear() < before);
        assert!(comp.gain_reduction_db() < 0.0);
        comp.reset();
        assert_eq!(comp.gain_reduction_db(), 0.0);
    }
}
