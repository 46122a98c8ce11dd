//! Gain staging
//!
//! Segments are brought to a common RMS reference before mixing. Nothing
//! here clips; the master bus is the only stage that limits.

use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;

// ============================================================================
// Constants
// ============================================================================

/// Minimum normalization gain in dB
const MIN_GAIN_DB: f32 = -96.0;

/// Maximum normalization gain in dB
const MAX_GAIN_DB: f32 = 24.0;

/// Signals below this RMS are treated as silence and left alone
const SILENCE_RMS: f32 = 1e-6;

// ============================================================================
// Normalization
// ============================================================================

/// Scale `buffer` so its RMS sits at `target_db`
///
/// The applied gain is clamped to -96..+24 dB. Returns the gain in dB, or
/// 0 for silent input.
pub fn normalize_rms(buffer: &mut AudioBuffer, target_db: f32) -> f32 {
    let rms = buffer.rms_linear();
    if rms < SILENCE_RMS {
        return 0.0;
    }
    let gain_db = (target_db - linear_to_db(rms)).clamp(MIN_GAIN_DB, MAX_GAIN_DB);
    buffer.apply_linear_gain(db_to_linear(gain_db));
    gain_db
}

/// Multiply each sample frame by `gain(frame)`
pub fn apply_gain_curve<F>(buffer: &mut AudioBuffer, gain: F)
where
    F: Fn(usize) -> f32,
{
    let len = buffer.len();
    let gains: Vec<f32> = (0..len).map(gain).collect();
    apply_gains(buffer, &gains);
}

/// Multiply frames by a precomputed per-frame gain slice
///
/// Frames past the end of `gains` are left untouched.
pub fn apply_gains(buffer: &mut AudioBuffer, gains: &[f32]) {
    for channel in &mut buffer.samples {
        for (sample, g) in channel.iter_mut().zip(gains) {
            *sample *= g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::calculate_rms;
    use crate::engine::io::sine_tone;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_rms_hits_target() {
        let mut quiet = sine_tone(440.0, 200.0, 44100, 2);
        quiet.apply_gain(-30.0);
        let gain = normalize_rms(&mut quiet, -18.0);
        assert!(gain > 0.0);
        assert_relative_eq!(calculate_rms(&quiet), -18.0, epsilon = 0.01);
    }

    #[test]
    fn test_normalize_silence_is_noop() {
        let mut silent = AudioBuffer::silent(100, 2, 44100);
        assert_eq!(normalize_rms(&mut silent, -18.0), 0.0);
        assert!(silent.samples.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn test_normalization_gain_is_bounded() {
        let mut tiny = AudioBuffer::from_channels(vec![vec![1e-4; 64]], 44100).unwrap();
        let gain = normalize_rms(&mut tiny, -18.0);
        assert_relative_eq!(gain, 24.0);
    }

    #[test]
    fn test_apply_gain_curve() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 4], vec![2.0; 4]], 44100).unwrap();
        apply_gain_curve(&mut buffer, |i| i as f32 * 0.5);
        assert_eq!(buffer.channel(0), &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(buffer.channel(1), &[0.0, 1.0, 2.0, 3.0]);
    }
}
