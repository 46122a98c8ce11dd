//! Loop-region selection and loop extension
//!
//! A segment that outlasts its source is extended by repeating a loop
//! region. The region is the loudest bar-aligned window of the source, with
//! both edges snapped to recorded onsets so every seam lands on a transient.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::curves::{fade_position, CurveFamily};
use super::envelope::{mean_energy, rms_envelope};
use crate::engine::buffer::ms_to_samples;
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

/// Loop selection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Loop length in bars
    pub bars: u32,
    pub beats_per_bar: u32,
    /// Energy window (ms)
    pub rms_window_ms: f64,
    /// Equal-power crossfade at every seam (ms)
    pub seam_ms: f64,
    /// Loop length used when the source has no usable BPM (ms)
    pub fallback_length_ms: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            bars: 4,
            beats_per_bar: 4,
            rms_window_ms: 50.0,
            seam_ms: 500.0,
            fallback_length_ms: 2000.0,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bars == 0 || self.beats_per_bar == 0 {
            return Err(SegueError::InvalidParameter {
                param: "loops.bars".to_string(),
                value: format!("{}x{}", self.bars, self.beats_per_bar),
                expected: "at least one bar of one beat".to_string(),
            });
        }
        for (param, value) in [
            ("loops.rms_window_ms", self.rms_window_ms),
            ("loops.seam_ms", self.seam_ms),
            ("loops.fallback_length_ms", self.fallback_length_ms),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(SegueError::InvalidParameter {
                    param: param.to_string(),
                    value: value.to_string(),
                    expected: "> 0 ms".to_string(),
                });
            }
        }
        Ok(())
    }

    fn bar_ms(&self, bpm: Option<f64>) -> f64 {
        match bpm.filter(|b| b.is_finite() && *b > 0.0) {
            Some(bpm) => self.beats_per_bar as f64 * 60_000.0 / bpm,
            None => self.fallback_length_ms / self.bars as f64,
        }
    }
}

/// Loop region in source samples, `start` inclusive and `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: usize,
    pub end: usize,
}

impl LoopRegion {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of extending a source by looping
#[derive(Debug, Clone)]
pub struct LoopExtension {
    pub buffer: AudioBuffer,
    pub region: Option<LoopRegion>,
    /// Output sample positions where a repeat starts
    pub seams: Vec<usize>,
}

/// Pick the loop region for `source`
///
/// Candidate windows start on the bar grid anchored at the first onset.
/// Windows ending after `min_end` are preferred so the loop can be reached
/// from the playback offset; among those the highest mean RMS wins, the
/// earliest on a tie. Returns `None` when no window can be snapped to two
/// distinct onsets.
pub fn select_loop_region(
    source: &AudioBuffer,
    bpm: Option<f64>,
    onsets_ms: &[f64],
    min_end: usize,
    config: &LoopConfig,
) -> Option<LoopRegion> {
    let len = source.len();
    let sr = source.sample_rate;
    if len == 0 {
        return None;
    }

    let mut onsets: Vec<usize> = onsets_ms
        .iter()
        .map(|&ms| ms_to_samples(ms, sr))
        .filter(|&s| s < len)
        .collect();
    onsets.dedup();

    let bar_ms = config.bar_ms(bpm);
    let loop_ms = bar_ms * config.bars as f64;
    let loop_len = ms_to_samples(loop_ms, sr).max(1);
    let min_len = ms_to_samples(config.seam_ms, sr).max(1);
    let window = ms_to_samples(config.rms_window_ms, sr).max(1);
    let envelope = rms_envelope(source, window);

    let mut candidates: Vec<(usize, usize)> = Vec::new();
    if loop_len >= len {
        candidates.push((0, len));
    } else {
        let anchor_ms = onsets.first().map(|&s| s as f64 * 1000.0 / sr as f64).unwrap_or(0.0);
        let mut k = 0_u32;
        loop {
            let start = ms_to_samples(anchor_ms + bar_ms * k as f64, sr);
            if start + loop_len > len {
                break;
            }
            candidates.push((start, start + loop_len));
            k += 1;
        }
        if candidates.is_empty() {
            candidates.push((0, len));
        }
    }

    let mut best: Option<(bool, f64, LoopRegion)> = None;
    for (start, end) in candidates {
        let Some(region) = snap_to_onsets(start, end, &onsets, min_len.min(end - start)) else {
            continue;
        };
        let reachable = region.end > min_end;
        let energy = mean_energy(&envelope, start / window, (end - start).div_ceil(window));
        let better = match &best {
            None => true,
            Some((best_reachable, best_energy, _)) => {
                (reachable && !best_reachable) || (reachable == *best_reachable && energy > *best_energy)
            }
        };
        if better {
            best = Some((reachable, energy, region));
        }
    }

    let region = best.map(|(_, _, region)| region);
    debug!(?region, loop_len, "loop region selected");
    region
}

/// Snap window edges to the nearest onsets
///
/// The end snaps among onsets at least `min_len` past the snapped start.
/// Without onsets the grid edges are kept.
fn snap_to_onsets(start: usize, end: usize, onsets: &[usize], min_len: usize) -> Option<LoopRegion> {
    if onsets.is_empty() {
        return Some(LoopRegion { start, end });
    }
    let snapped_start = nearest(onsets.iter().copied(), start)?;
    let snapped_end = nearest(
        onsets.iter().copied().filter(|&o| o >= snapped_start + min_len),
        end,
    )?;
    Some(LoopRegion {
        start: snapped_start,
        end: snapped_end,
    })
}

/// Nearest value to `target`, earlier on a tie
fn nearest(values: impl Iterator<Item = usize>, target: usize) -> Option<usize> {
    values.min_by_key(|&v| (v.abs_diff(target), v))
}

/// Render `target_len` samples of `source` starting at `offset`, looping
/// `region` once the source would run out
///
/// Each repeat opens with an equal-power seam of `seam_len` samples: the
/// incoming side starts at `region.start`, the outgoing side continues past
/// the point where the previous pass ended (silence beyond the source end).
pub fn extend(
    source: &AudioBuffer,
    region: Option<LoopRegion>,
    offset: usize,
    target_len: usize,
    seam_len: usize,
) -> LoopExtension {
    let channels = source.channels();
    let region = region.filter(|r| channels > 0 && !r.is_empty() && r.end <= source.len());

    let Some(region) = region.filter(|_| offset + target_len > source.len()) else {
        return LoopExtension {
            buffer: source.slice(offset, target_len),
            region,
            seams: Vec::new(),
        };
    };

    let read = |ch: usize, idx: usize| -> f32 { source.samples[ch].get(idx).copied().unwrap_or(0.0) };
    let seam_len = seam_len.min(region.len() / 2).max(1);
    let mut out = AudioBuffer::silent(target_len, channels, source.sample_rate);

    let mut pass_end = if offset < region.end { region.end } else { source.len() };
    let mut written = pass_end.saturating_sub(offset).min(target_len);
    for ch in 0..channels {
        for i in 0..written {
            out.samples[ch][i] = read(ch, offset + i);
        }
    }

    let mut seams = Vec::new();
    while written < target_len {
        seams.push(written);
        let count = region.len().min(target_len - written);
        for j in 0..count {
            let fade = if j < seam_len {
                Some(CurveFamily::EqualPower.gains(fade_position(j, seam_len)))
            } else {
                None
            };
            for ch in 0..channels {
                let incoming = read(ch, region.start + j);
                out.samples[ch][written + j] = match fade {
                    Some((g_out, g_in)) => {
                        (read(ch, pass_end + j) as f64 * g_out + incoming as f64 * g_in) as f32
                    }
                    None => incoming,
                };
            }
        }
        written += count;
        pass_end = region.end;
    }

    debug!(seams = seams.len(), target_len, "loop extension rendered");
    LoopExtension {
        buffer: out,
        region: Some(region),
        seams,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ms_to_samples;

    const SR: u32 = 44100;

    /// Clicks on every beat, louder from the middle beat on
    fn click_track(bpm: f64, beats: usize) -> (AudioBuffer, Vec<f64>) {
        let beat_ms = 60_000.0 / bpm;
        let len = ms_to_samples(beat_ms * beats as f64, SR);
        let mut samples = vec![0.0_f32; len];
        let mut onsets = Vec::new();
        for b in 0..beats {
            let ms = beat_ms * b as f64;
            let at = ms_to_samples(ms, SR);
            let level = if b >= beats / 2 { 0.9 } else { 0.3 };
            for s in samples.iter_mut().skip(at).take(400) {
                *s = level;
            }
            onsets.push(ms);
        }
        let buffer = AudioBuffer::from_channels(vec![samples.clone(), samples], SR).unwrap();
        (buffer, onsets)
    }

    #[test]
    fn test_region_prefers_loudest_bars() {
        let (buffer, onsets) = click_track(120.0, 33);
        let config = LoopConfig::default();
        let region = select_loop_region(&buffer, Some(120.0), &onsets, 0, &config).unwrap();
        // 4 bars at 120 BPM = 8 s; loud half starts at beat 16 (8 s)
        assert_eq!(region.start, ms_to_samples(8000.0, SR));
        assert_eq!(region.len(), ms_to_samples(8000.0, SR));
    }

    #[test]
    fn test_region_edges_are_onsets() {
        let (buffer, mut onsets) = click_track(123.0, 40);
        // jitter onsets away from the exact grid
        for (i, o) in onsets.iter_mut().enumerate() {
            *o += (i % 3) as f64 * 7.0;
        }
        let onset_samples: Vec<usize> = onsets.iter().map(|&ms| ms_to_samples(ms, SR)).collect();
        let region = select_loop_region(&buffer, Some(123.0), &onsets, 0, &LoopConfig::default()).unwrap();
        assert!(onset_samples.contains(&region.start));
        assert!(onset_samples.contains(&region.end));
    }

    #[test]
    fn test_extend_without_looping_is_a_plain_slice() {
        let (buffer, onsets) = click_track(120.0, 16);
        let region = select_loop_region(&buffer, Some(120.0), &onsets, 0, &LoopConfig::default());
        let ext = extend(&buffer, region, 100, 1000, 22050);
        assert!(ext.seams.is_empty());
        assert_eq!(ext.buffer, buffer.slice(100, 1000));
    }

    #[test]
    fn test_extend_seams_continue_from_loop_start() {
        let (buffer, onsets) = click_track(120.0, 33);
        let region = select_loop_region(&buffer, Some(120.0), &onsets, 0, &LoopConfig::default()).unwrap();
        let seam = ms_to_samples(500.0, SR);
        let target = buffer.len() * 3;
        let ext = extend(&buffer, Some(region), 0, target, seam);

        assert_eq!(ext.buffer.len(), target);
        assert!(!ext.seams.is_empty());
        assert_eq!(ext.seams[0], region.end);
        for &at in &ext.seams {
            // past the seam the output is the loop body, sample for sample
            let offset = seam + 10;
            if at + offset < target {
                assert_eq!(ext.buffer.samples[0][at + offset], buffer.samples[0][region.start + offset]);
            }
        }
        for pair in ext.seams.windows(2) {
            assert_eq!(pair[1] - pair[0], region.len());
        }
    }

    #[test]
    fn test_short_source_without_onsets_loops_whole_clip() {
        let buffer = AudioBuffer::from_channels(vec![vec![0.5; 1000]], SR).unwrap();
        let region = select_loop_region(&buffer, Some(120.0), &[], 0, &LoopConfig::default()).unwrap();
        assert_eq!(region, LoopRegion { start: 0, end: 1000 });
        let ext = extend(&buffer, Some(region), 0, 2500, 100);
        assert_eq!(ext.seams, vec![1000, 2000]);
    }

    #[test]
    fn test_config_validation() {
        assert!(LoopConfig::default().validate().is_ok());
        let bad = LoopConfig {
            bars: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
