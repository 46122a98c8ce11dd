//! Envelope ducking for layered lanes
//!
//! Background lanes follow the inverse of the lead lane's RMS envelope and
//! lose their low end to a static high-pass, computed analytically over the
//! whole timeline rather than through a sidechain compressor.

use serde::{Deserialize, Serialize};

use super::envelope::{expand_envelope, rms_envelope};
use super::filter::BiquadFilter;
use super::gain::apply_gains;
use crate::engine::buffer::ms_to_samples;
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

/// Ducking parameters for non-lead lanes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckingConfig {
    /// Envelope window (ms)
    pub window_ms: f64,
    /// Gain reduction at the lead's loudest window (0..1)
    pub depth: f32,
    /// Static high-pass on background lanes (Hz)
    pub highpass_hz: f64,
}

impl Default for DuckingConfig {
    fn default() -> Self {
        Self {
            window_ms: 500.0,
            depth: 0.7,
            highpass_hz: 350.0,
        }
    }
}

impl DuckingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_ms.is_nan() || self.window_ms <= 0.0 {
            return Err(SegueError::InvalidParameter {
                param: "ducking.window_ms".to_string(),
                value: self.window_ms.to_string(),
                expected: "> 0 ms".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.depth) {
            return Err(SegueError::InvalidParameter {
                param: "ducking.depth".to_string(),
                value: self.depth.to_string(),
                expected: "0.0 to 1.0".to_string(),
            });
        }
        if !(20.0..=2000.0).contains(&self.highpass_hz) {
            return Err(SegueError::InvalidParameter {
                param: "ducking.highpass_hz".to_string(),
                value: self.highpass_hz.to_string(),
                expected: "20 to 2000 Hz".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-sample gain for a background lane given the lead lane's audio
///
/// gain = 1 − depth · env / max(env). A silent lead leaves the
/// background at unity.
pub fn duck_gains(lead: &AudioBuffer, len: usize, config: &DuckingConfig) -> Vec<f32> {
    let window = ms_to_samples(config.window_ms, lead.sample_rate).max(1);
    let envelope = rms_envelope(lead, window);
    let peak = envelope.iter().copied().fold(0.0_f32, f32::max);
    if peak <= f32::EPSILON {
        return vec![1.0; len];
    }
    let normalized: Vec<f32> = envelope.iter().map(|v| v / peak).collect();
    expand_envelope(&normalized, window, len)
        .into_iter()
        .map(|e| 1.0 - config.depth * e)
        .collect()
}

/// High-pass `background` and apply the inverse lead envelope in place
pub fn duck_background(background: &mut AudioBuffer, lead: &AudioBuffer, config: &DuckingConfig) {
    let filtered = BiquadFilter::high_pass(config.highpass_hz, background.sample_rate).apply(background);
    *background = filtered;
    let gains = duck_gains(lead, background.len(), config);
    apply_gains(background, &gains);
}
