//! Biquad low/high-pass filters
//!
//! Used for the bass-swap band split and the static high-pass on background
//! lanes. Each filter runs once over a whole region, never in chunks.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::effect::Effect;
use crate::engine::AudioBuffer;

/// Butterworth Q for a single biquad section
pub const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Remove above the cutoff
    LowPass,
    /// Remove below the cutoff
    HighPass,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Audio EQ Cookbook low/high-pass
    fn calculate(filter_type: FilterType, sample_rate: f64, frequency: f64, q: f64) -> Self {
        // Clamp frequency to valid range (below Nyquist)
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2) = match filter_type {
            FilterType::LowPass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
            FilterType::HighPass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
        };
        let a0 = 1.0 + alpha;

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Direct Form I
    #[inline]
    fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Second-order low- or high-pass filter
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    filter_type: FilterType,
    cutoff_hz: f64,
    q: f64,
    sample_rate: u32,
    coeffs: BiquadCoeffs,
    state: Vec<BiquadState>,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, cutoff_hz: f64, sample_rate: u32) -> Self {
        let mut filter = Self {
            filter_type,
            cutoff_hz,
            q: BUTTERWORTH_Q,
            sample_rate,
            coeffs: BiquadCoeffs::default(),
            state: Vec::new(),
        };
        filter.update_coefficients();
        filter
    }

    pub fn low_pass(cutoff_hz: f64, sample_rate: u32) -> Self {
        Self::new(FilterType::LowPass, cutoff_hz, sample_rate)
    }

    pub fn high_pass(cutoff_hz: f64, sample_rate: u32) -> Self {
        Self::new(FilterType::HighPass, cutoff_hz, sample_rate)
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    fn update_coefficients(&mut self) {
        self.coeffs = BiquadCoeffs::calculate(
            self.filter_type,
            self.sample_rate.max(1) as f64,
            self.cutoff_hz,
            self.q,
        );
    }

    /// Filtered copy of `buffer`, starting from silent filter memory
    pub fn apply(&self, buffer: &AudioBuffer) -> AudioBuffer {
        let mut filter = self.clone();
        filter.reset();
        filter.prepare(buffer.sample_rate);
        let mut out = buffer.clone();
        filter.process(&mut out);
        out
    }
}

impl Effect for BiquadFilter {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.state.len() < buffer.channels() {
            self.state.resize(buffer.channels(), BiquadState::default());
        }
        for (channel, state) in buffer.samples.iter_mut().zip(self.state.iter_mut()) {
            for sample in channel.iter_mut() {
                *sample = state.process(*sample as f64, &self.coeffs) as f32;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
    }

    fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = BiquadState::default());
    }

    fn effect_type(&self) -> &'static str {
        match self.filter_type {
            FilterType::LowPass => "low_pass",
            FilterType::HighPass => "high_pass",
        }
    }
}
