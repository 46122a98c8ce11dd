//! DSP primitive provider
//!
//! Tempo alignment and pitch shifting sit behind [`DspPrimitives`] so the
//! renderer can be driven by any implementation. [`OverlapAddPrimitives`]
//! is the built-in one: windowed overlap-add time stretching, and pitch
//! shifting as stretch followed by resampling back to the original length.

use std::f64::consts::PI;

use crate::engine::buffer::ms_to_samples;
use crate::engine::io::resample_linear;
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

/// Largest pitch shift accepted, in semitones
const MAX_SEMITONES: i32 = 12;

/// Analysis frame length (ms)
const FRAME_MS: f64 = 40.0;

/// Synthesis hop as a fraction of the frame
const HOP_DIVISOR: usize = 4;

/// Tempo and pitch operations used by the renderer
pub trait DspPrimitives: Send + Sync {
    /// Stretch `buffer` from `source_bpm` to `target_bpm` without changing pitch
    ///
    /// Fails with `StretchRatioExceeded` when `|target/source − 1| > max_ratio`.
    fn resample(&self, buffer: &AudioBuffer, source_bpm: f64, target_bpm: f64, max_ratio: f64) -> Result<AudioBuffer>;

    /// Shift pitch by `semitones` without changing length
    fn pitch_shift(&self, buffer: &AudioBuffer, semitones: i32) -> Result<AudioBuffer>;
}

/// Tempo ratio target/source
pub fn stretch_ratio(source_bpm: f64, target_bpm: f64) -> f64 {
    target_bpm / source_bpm
}

/// True if the tempos differ by more than `tolerance` (relative)
pub fn needs_alignment(source_bpm: f64, target_bpm: f64, tolerance: f64) -> bool {
    (stretch_ratio(source_bpm, target_bpm) - 1.0).abs() > tolerance
}

/// Validate a tempo change, returning the ratio
pub fn check_stretch(source_bpm: f64, target_bpm: f64, max_ratio: f64) -> Result<f64> {
    for (param, bpm) in [("source_bpm", source_bpm), ("target_bpm", target_bpm)] {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(SegueError::InvalidParameter {
                param: param.to_string(),
                value: bpm.to_string(),
                expected: "positive finite BPM".to_string(),
            });
        }
    }
    let ratio = stretch_ratio(source_bpm, target_bpm);
    if (ratio - 1.0).abs() > max_ratio {
        return Err(SegueError::StretchRatioExceeded {
            requested: ratio,
            max: max_ratio,
        });
    }
    Ok(ratio)
}

/// Built-in overlap-add implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapAddPrimitives;

impl OverlapAddPrimitives {
    /// Change duration by 1/`tempo_ratio` keeping pitch
    ///
    /// Frames are read every `hop · tempo_ratio` input samples and written
    /// every `hop` output samples, then normalized by the summed window.
    pub fn time_stretch(&self, buffer: &AudioBuffer, tempo_ratio: f64) -> AudioBuffer {
        if tempo_ratio == 1.0 || buffer.is_empty() {
            return buffer.clone();
        }
        let frame = ms_to_samples(FRAME_MS, buffer.sample_rate).max(HOP_DIVISOR * 2);
        let hop = frame / HOP_DIVISOR;
        let out_len = ((buffer.len() as f64) / tempo_ratio).round().max(1.0) as usize;
        let window: Vec<f64> = (0..frame)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * (n as f64 + 0.5) / frame as f64).cos())
            .collect();

        let mut weight = vec![0.0_f64; out_len];
        let mut accum = vec![vec![0.0_f64; out_len]; buffer.channels()];
        let mut k = 0_usize;
        while k * hop < out_len {
            let write = k * hop;
            let read = ((write as f64) * tempo_ratio).round() as usize;
            for (n, w) in window.iter().enumerate() {
                let o = write + n;
                if o >= out_len {
                    break;
                }
                weight[o] += w;
                for (ch, acc) in accum.iter_mut().enumerate() {
                    let x = buffer.samples[ch].get(read + n).copied().unwrap_or(0.0);
                    acc[o] += x as f64 * w;
                }
            }
            k += 1;
        }

        let samples = accum
            .into_iter()
            .map(|acc| {
                acc.into_iter()
                    .zip(&weight)
                    .map(|(v, &w)| if w > 1e-6 { (v / w) as f32 } else { 0.0 })
                    .collect()
            })
            .collect();
        AudioBuffer {
            samples,
            sample_rate: buffer.sample_rate,
        }
    }
}

impl DspPrimitives for OverlapAddPrimitives {
    fn resample(&self, buffer: &AudioBuffer, source_bpm: f64, target_bpm: f64, max_ratio: f64) -> Result<AudioBuffer> {
        let ratio = check_stretch(source_bpm, target_bpm, max_ratio)?;
        Ok(self.time_stretch(buffer, ratio))
    }

    fn pitch_shift(&self, buffer: &AudioBuffer, semitones: i32) -> Result<AudioBuffer> {
        if semitones.abs() > MAX_SEMITONES {
            return Err(SegueError::InvalidParameter {
                param: "semitones".to_string(),
                value: semitones.to_string(),
                expected: format!("-{} to {}", MAX_SEMITONES, MAX_SEMITONES),
            });
        }
        if semitones == 0 {
            return Ok(buffer.clone());
        }
        let factor = 2.0_f64.powf(semitones as f64 / 12.0);
        let stretched = self.time_stretch(buffer, 1.0 / factor);
        let shifted = AudioBuffer {
            samples: stretched
                .samples
                .iter()
                .map(|ch| resample_linear(ch, 1.0 / factor))
                .collect(),
            sample_rate: buffer.sample_rate,
        };
        Ok(shifted.slice(0, buffer.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::sine_tone;
    use test_case::test_case;

    fn zero_crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count()
    }

    #[test_case(120.0, 124.0, 0.08, true ; "small change")]
    #[test_case(120.0, 129.0, 0.08, true ; "near the bound")]
    #[test_case(120.0, 132.0, 0.08, false ; "ten percent")]
    #[test_case(128.0, 110.0, 0.08, false ; "slower beyond bound")]
    fn test_stretch_bound(source: f64, target: f64, max: f64, ok: bool) {
        assert_eq!(check_stretch(source, target, max).is_ok(), ok);
    }

    #[test]
    fn test_exceeded_reports_ratio() {
        match check_stretch(100.0, 120.0, 0.08) {
            Err(SegueError::StretchRatioExceeded { requested, max }) => {
                assert!((requested - 1.2).abs() < 1e-12);
                assert_eq!(max, 0.08);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_alignment_tolerance() {
        assert!(!needs_alignment(120.0, 120.6, 0.01));
        assert!(needs_alignment(120.0, 122.0, 0.01));
    }

    #[test]
    fn test_faster_tempo_shortens_and_keeps_pitch() {
        let tone = sine_tone(440.0, 2000.0, 44100, 1);
        let out = OverlapAddPrimitives.resample(&tone, 120.0, 126.0, 0.08).unwrap();
        let expected = (tone.len() as f64 / 1.05).round() as usize;
        assert_eq!(out.len(), expected);

        let rate_in = zero_crossings(tone.channel(0)) as f64 / tone.len() as f64;
        let rate_out = zero_crossings(out.channel(0)) as f64 / out.len() as f64;
        assert!((rate_out / rate_in - 1.0).abs() < 0.1, "{} vs {}", rate_out, rate_in);
    }

    #[test]
    fn test_pitch_shift_keeps_length() {
        let tone = sine_tone(220.0, 1000.0, 44100, 2);
        let up = OverlapAddPrimitives.pitch_shift(&tone, 3).unwrap();
        assert_eq!(up.len(), tone.len());
        assert_eq!(up.channels(), 2);
        assert!(up.rms_linear() > 0.1);
        assert!(OverlapAddPrimitives.pitch_shift(&tone, 13).is_err());
        assert_eq!(OverlapAddPrimitives.pitch_shift(&tone, 0).unwrap(), tone);
    }
}
