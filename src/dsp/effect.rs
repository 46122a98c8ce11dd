//! Effect trait definition

use crate::engine::AudioBuffer;

/// Stateful in-place audio processor
///
/// Every processor on the render path (filters, compressor, limiter)
/// implements this so the master bus can run them as one chain.
pub trait Effect: Send + Sync {
    /// Process audio buffer in-place
    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Prepare the effect for processing at `sample_rate`
    fn prepare(&mut self, sample_rate: u32);

    /// Reset effect state
    ///
    /// Clears any internal history (filter memory, envelope followers).
    fn reset(&mut self);

    /// Get the effect type identifier
    fn effect_type(&self) -> &'static str;
}
