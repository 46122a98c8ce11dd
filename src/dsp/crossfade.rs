//! Crossfades and bass-swap transitions
//!
//! Fades operate on a region of a buffer in one pass. Band-split filters run
//! once over the whole region and the automation curve blends wet and dry,
//! so there are no block seams inside a transition.

use super::curves::{fade_position, CurveFamily};
use super::filter::BiquadFilter;
use crate::engine::AudioBuffer;

/// Which side of a junction a region belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    /// Incoming segment's head
    In,
    /// Outgoing segment's tail
    Out,
}

/// Band ownership swap at a crossover frequency
///
/// The outgoing side loses its highs while the incoming side gains its lows,
/// so the bass changes hands progressively instead of doubling up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BassSwap {
    pub crossover_hz: f64,
}

/// Sum two regions with `curve` gains: outgoing fades out, incoming fades in
///
/// The result is as long as the longer input; the shorter one reads as
/// silence past its end.
pub fn crossfade(outgoing: &AudioBuffer, incoming: &AudioBuffer, curve: CurveFamily) -> AudioBuffer {
    let len = outgoing.len().max(incoming.len());
    let channels = outgoing.channels().max(incoming.channels());
    let out = outgoing.slice(0, len).with_channel_count(channels);
    let inc = incoming.slice(0, len).with_channel_count(channels);

    let mut result = AudioBuffer::silent(len, channels, outgoing.sample_rate);
    for i in 0..len {
        let (g_out, g_in) = curve.gains(fade_position(i, len));
        for ch in 0..channels {
            result.samples[ch][i] =
                (out.samples[ch][i] as f64 * g_out + inc.samples[ch][i] as f64 * g_in) as f32;
        }
    }
    result
}

/// Fade `len` samples of `buffer` starting at `start`
///
/// With a [`BassSwap`] the region is also blended against a filtered copy:
/// outgoing = g_out(p)·lerp(dry, low-passed, p),
/// incoming = g_in(p)·lerp(high-passed, dry, p).
pub fn apply_fade(
    buffer: &mut AudioBuffer,
    start: usize,
    len: usize,
    direction: FadeDirection,
    curve: CurveFamily,
    bass_swap: Option<BassSwap>,
) {
    let end = (start + len).min(buffer.len());
    if start >= end {
        return;
    }
    let len = end - start;

    let wet = bass_swap.map(|swap| {
        let region = buffer.slice(start, len);
        let filter = match direction {
            FadeDirection::Out => BiquadFilter::low_pass(swap.crossover_hz, buffer.sample_rate),
            FadeDirection::In => BiquadFilter::high_pass(swap.crossover_hz, buffer.sample_rate),
        };
        filter.apply(&region)
    });

    for i in 0..len {
        let p = fade_position(i, len);
        let (g_out, g_in) = curve.gains(p);
        let (gain, wet_mix) = match direction {
            FadeDirection::Out => (g_out, p),
            FadeDirection::In => (g_in, 1.0 - p),
        };
        for (ch, channel) in buffer.samples.iter_mut().enumerate() {
            let dry = channel[start + i] as f64;
            let value = match &wet {
                Some(filtered) => {
                    let w = filtered.samples[ch][i] as f64;
                    dry + (w - dry) * wet_mix
                }
                None => dry,
            };
            channel[start + i] = (value * gain) as f32;
        }
    }
}
