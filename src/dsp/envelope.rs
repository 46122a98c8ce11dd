//! Short-window RMS envelopes
//!
//! Used by loop-region selection (energy per window) and by lane ducking
//! (lead-lane loudness over time).

use crate::engine::AudioBuffer;

/// RMS per consecutive window of `window` samples, across all channels
///
/// The last window may be shorter. Returns an empty vector for an empty
/// buffer or a zero window.
pub fn rms_envelope(buffer: &AudioBuffer, window: usize) -> Vec<f32> {
    let len = buffer.len();
    let channels = buffer.channels();
    if window == 0 || len == 0 || channels == 0 {
        return Vec::new();
    }

    (0..len)
        .step_by(window)
        .map(|start| {
            let end = (start + window).min(len);
            let mut sum = 0.0_f64;
            for ch in &buffer.samples {
                for &s in &ch[start..end] {
                    sum += (s as f64) * (s as f64);
                }
            }
            (sum / ((end - start) * channels) as f64).sqrt() as f32
        })
        .collect()
}

/// Expand a window envelope to one value per sample
///
/// Values are placed at window centres and linearly interpolated between
/// them, held flat before the first and after the last centre, so the gain
/// derived from it never steps at a window edge.
pub fn expand_envelope(envelope: &[f32], window: usize, len: usize) -> Vec<f32> {
    if envelope.is_empty() || window == 0 {
        return vec![0.0; len];
    }
    let half = window as f64 / 2.0;
    (0..len)
        .map(|i| {
            let pos = (i as f64 - half) / window as f64;
            if pos <= 0.0 {
                return envelope[0];
            }
            let idx = pos.floor() as usize;
            if idx + 1 >= envelope.len() {
                return envelope[envelope.len() - 1];
            }
            let frac = (pos - idx as f64) as f32;
            envelope[idx] * (1.0 - frac) + envelope[idx + 1] * frac
        })
        .collect()
}

/// Mean of `envelope[first..first + count]`, or 0 if the range is empty
pub fn mean_energy(envelope: &[f32], first: usize, count: usize) -> f64 {
    let end = (first + count).min(envelope.len());
    if first >= end {
        return 0.0;
    }
    envelope[first..end].iter().map(|&v| v as f64).sum::<f64>() / (end - first) as f64
}
