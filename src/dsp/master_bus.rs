//! Master bus
//!
//! Processing applied exactly once to the summed mix: compressor first,
//! limiter always last.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::compressor::{Compressor, CompressorParams};
use super::effect::Effect;
use super::limiter::{Limiter, LimiterParams};
use crate::engine::buffer::calculate_peak;
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

/// Loudness reference and dynamics for the final mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterBusConfig {
    /// RMS level every segment is normalized to before mixing (dBFS)
    pub target_rms_db: f32,
    pub compressor: CompressorParams,
    pub limiter: LimiterParams,
}

impl Default for MasterBusConfig {
    fn default() -> Self {
        Self {
            target_rms_db: -18.0,
            compressor: CompressorParams::default(),
            limiter: LimiterParams::default(),
        }
    }
}

impl MasterBusConfig {
    pub fn validate(&self) -> Result<()> {
        if !(-60.0..=0.0).contains(&self.target_rms_db) {
            return Err(SegueError::InvalidParameter {
                param: "master.target_rms_db".to_string(),
                value: self.target_rms_db.to_string(),
                expected: "-60 to 0 dBFS".to_string(),
            });
        }
        self.compressor.validate()?;
        self.limiter.validate()
    }
}

/// Ordered effect chain for the mix bus
pub struct MasterBus {
    effects: Vec<Box<dyn Effect>>,
}

impl MasterBus {
    pub fn new(config: &MasterBusConfig, sample_rate: u32) -> Self {
        let mut effects: Vec<Box<dyn Effect>> = vec![
            Box::new(Compressor::new(config.compressor.clone())),
            Box::new(Limiter::new(&config.limiter)),
        ];
        for effect in &mut effects {
            effect.prepare(sample_rate);
        }
        Self { effects }
    }

    /// Effect names in processing order
    pub fn effect_types(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.effect_type()).collect()
    }

    /// Run the whole mix through the chain from a clean state
    pub fn process(&mut self, mix: &mut AudioBuffer) {
        let peak_in = calculate_peak(mix);
        for effect in &mut self.effects {
            effect.reset();
            effect.process(mix);
        }
        debug!(
            peak_in_db = peak_in,
            peak_out_db = calculate_peak(mix),
            "master bus processed"
        );
    }
}
