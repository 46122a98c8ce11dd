//! Flow rendering
//!
//! [`DspRenderer`] turns a finalized [`Flow`](crate::orchestrator::Flow)
//! plus source audio into one waveform:
//! - Tempo alignment and harmonic sync toward the previous lead segment
//! - Loop extension for segments longer than their source
//! - Per-segment RMS normalization, gain automation and transition fades
//! - Fake-sidechain ducking of background lanes
//! - One master-bus pass over the summed mix
//!
//! Rendering is deterministic: the same Flow, snapshot and source audio
//! give the same bytes, checked cheaply through [`RenderOutput::fingerprint`].

mod renderer;
mod segment;

pub use renderer::DspRenderer;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dsp::{DuckingConfig, LoopConfig, MasterBusConfig};
use crate::engine::buffer::{calculate_peak, AudioBuffer, DEFAULT_SAMPLE_RATE};
use crate::error::{Result, SegueError};
use crate::library::TrackId;
use crate::orchestrator::SegmentId;

/// Renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub loops: LoopConfig,
    pub ducking: DuckingConfig,
    pub master: MasterBusConfig,
    /// Relative tempo difference below which no stretch is requested
    pub align_tolerance: f64,
    /// Largest allowed |ratio − 1| for a tempo stretch
    pub max_stretch: f64,
    /// Pitch-shift segments toward the previous segment's key
    pub harmonic_sync: bool,
    /// Crossover for band-ducked transitions that do not carry their own
    pub crossover_hz: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            loops: LoopConfig::default(),
            ducking: DuckingConfig::default(),
            master: MasterBusConfig::default(),
            align_tolerance: 0.01,
            max_stretch: 0.08,
            harmonic_sync: true,
            crossover_hz: 200.0,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |param: &str, value: String, expected: &str| {
            Err(SegueError::InvalidParameter {
                param: format!("render.{}", param),
                value,
                expected: expected.to_string(),
            })
        };
        if !(8000..=192_000).contains(&self.sample_rate) {
            return fail("sample_rate", self.sample_rate.to_string(), "8000 to 192000 Hz");
        }
        if !(1..=2).contains(&self.channels) {
            return fail("channels", self.channels.to_string(), "1 or 2");
        }
        if !self.align_tolerance.is_finite() || self.align_tolerance <= 0.0 {
            return fail("align_tolerance", self.align_tolerance.to_string(), "> 0");
        }
        if !(0.0..1.0).contains(&self.max_stretch) {
            return fail("max_stretch", self.max_stretch.to_string(), "0 to 1");
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !(self.crossover_hz > 0.0 && self.crossover_hz < nyquist) {
            return fail("crossover_hz", self.crossover_hz.to_string(), "between 0 and Nyquist");
        }
        self.loops.validate()?;
        self.ducking.validate()?;
        self.master.validate()
    }
}

/// Non-fatal degradation of one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderWarning {
    pub segment: SegmentId,
    pub track: TrackId,
    pub message: String,
}

/// Result of a finished render
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub buffer: AudioBuffer,
    pub warnings: Vec<RenderWarning>,
    /// Hex SHA-256 of the interleaved little-endian f32 samples
    pub fingerprint: String,
}

impl RenderOutput {
    pub(crate) fn new(buffer: AudioBuffer, warnings: Vec<RenderWarning>) -> Self {
        let fingerprint = fingerprint(&buffer);
        Self {
            buffer,
            warnings,
            fingerprint,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.buffer.duration_ms()
    }

    pub fn peak_db(&self) -> f32 {
        calculate_peak(&self.buffer)
    }
}

/// SHA-256 of the interleaved sample bytes
pub fn fingerprint(buffer: &AudioBuffer) -> String {
    let mut hasher = Sha256::new();
    for sample in buffer.to_interleaved() {
        hasher.update(sample.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}
