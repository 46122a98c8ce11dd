//! Audio Buffer Management
//!
//! Provides the core audio buffer type shared by the I/O layer, the DSP
//! primitives and the renderer. All processing uses 32-bit float samples,
//! stored non-interleaved so that per-channel filters can walk contiguous
//! memory.

use crate::error::{Result, SegueError};

// ============================================================================
// Constants
// ============================================================================

/// Default render sample rate (44.1kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Floor used when converting silence to decibels
pub const SILENCE_FLOOR_DB: f32 = -120.0;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Convert a millisecond position to a sample index at `sample_rate`
///
/// Rounds to the nearest sample so that the same millisecond value always
/// maps to the same index, which the loop-seam placement relies on.
#[inline]
pub fn ms_to_samples(ms: f64, sample_rate: u32) -> usize {
    if ms <= 0.0 {
        return 0;
    }
    (ms * sample_rate as f64 / 1000.0).round() as usize
}

/// Convert a sample count to milliseconds at `sample_rate`
#[inline]
pub fn samples_to_ms(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 * 1000.0 / sample_rate as f64
}

/// Calculate the RMS level of an audio buffer in dB
///
/// Returns -f32::INFINITY for empty or silent buffers.
pub fn calculate_rms(buffer: &AudioBuffer) -> f32 {
    linear_to_db(buffer.rms_linear())
}

/// Calculate the peak level of an audio buffer in dB
///
/// Returns -f32::INFINITY for empty buffers.
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    let peak = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| s.abs())
        .fold(0.0_f32, f32::max);

    linear_to_db(peak)
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    Mono,
    /// Two channels (stereo: left, right)
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Core audio buffer type
///
/// Stores audio as non-interleaved 32-bit floating point samples.
/// Each channel is a separate `Vec<f32>` and all channels have equal length.
///
/// # Example
/// ```
/// use segue::engine::buffer::{AudioBuffer, ChannelLayout, DEFAULT_SAMPLE_RATE};
///
/// // Create a 1-second stereo buffer
/// let buffer = AudioBuffer::new(DEFAULT_SAMPLE_RATE as usize, ChannelLayout::Stereo);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 44100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer at the default sample rate
    pub fn new(num_samples: usize, layout: ChannelLayout) -> Self {
        Self::silent(num_samples, layout.num_channels(), DEFAULT_SAMPLE_RATE)
    }

    /// Create a silent buffer with an explicit channel count and rate
    pub fn silent(num_samples: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; channels],
            sample_rate,
        }
    }

    /// Build a buffer from per-channel sample vectors
    ///
    /// All channels must have the same length.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(SegueError::InvalidAudio {
                reason: "Buffer needs at least one channel".to_string(),
                source: None,
            });
        }
        let len = samples[0].len();
        if samples.iter().any(|ch| ch.len() != len) {
            return Err(SegueError::InvalidAudio {
                reason: "Channels have different lengths".to_string(),
                source: None,
            });
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// Returns an error if the data length doesn't match the layout.
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let num_channels = layout.num_channels();

        if interleaved.len() % num_channels != 0 {
            return Err(SegueError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
                source: None,
            });
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.channels();
        let num_samples = self.len();

        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty (no samples)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in milliseconds
    #[inline]
    pub fn duration_ms(&self) -> f64 {
        samples_to_ms(self.len(), self.sample_rate)
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Copy `len` samples starting at `start` into a new buffer
    ///
    /// Positions past the end of this buffer read as silence, so the
    /// result always has exactly `len` samples.
    pub fn slice(&self, start: usize, len: usize) -> AudioBuffer {
        let samples = self
            .samples
            .iter()
            .map(|ch| {
                let mut out = vec![0.0_f32; len];
                if start < ch.len() {
                    let available = (ch.len() - start).min(len);
                    out[..available].copy_from_slice(&ch[start..start + available]);
                }
                out
            })
            .collect();
        AudioBuffer {
            samples,
            sample_rate: self.sample_rate,
        }
    }

    /// Sum `other` into this buffer starting at sample `offset`
    ///
    /// Samples of `other` that fall past the end are dropped. Channel counts
    /// must match; a mono source is spread to every channel.
    pub fn mix_from(&mut self, other: &AudioBuffer, offset: usize) {
        let own_len = self.len();
        if offset >= own_len {
            return;
        }
        let count = other.len().min(own_len - offset);
        let other_channels = other.channels();
        if other_channels == 0 {
            return;
        }
        for (ch, dest) in self.samples.iter_mut().enumerate() {
            let src = &other.samples[ch.min(other_channels - 1)];
            for i in 0..count {
                dest[offset + i] += src[i];
            }
        }
    }

    /// Return a copy converted to `channels` channels
    ///
    /// Mono is duplicated when up-mixing; down-mixing averages channels.
    pub fn with_channel_count(&self, channels: usize) -> AudioBuffer {
        if channels == self.channels() || self.channels() == 0 {
            return self.clone();
        }
        let samples = if channels > self.channels() {
            (0..channels)
                .map(|ch| self.samples[ch.min(self.channels() - 1)].clone())
                .collect()
        } else {
            let len = self.len();
            let scale = 1.0 / self.channels() as f32;
            let mut mono = vec![0.0_f32; len];
            for ch in &self.samples {
                for (m, s) in mono.iter_mut().zip(ch) {
                    *m += s * scale;
                }
            }
            vec![mono; channels]
        };
        AudioBuffer {
            samples,
            sample_rate: self.sample_rate,
        }
    }

    /// Linear RMS across all channels
    pub fn rms_linear(&self) -> f32 {
        let total_samples = self.channels() * self.len();
        if total_samples == 0 {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum_squares / total_samples as f64).sqrt() as f32
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Multiply all samples by a linear gain
    pub fn apply_linear_gain(&mut self, gain: f32) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Apply gain in decibels to all samples
    pub fn apply_gain(&mut self, gain_db: f32) {
        self.apply_linear_gain(db_to_linear(gain_db));
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(0, ChannelLayout::Stereo)
    }
}

// ============================================================================
// Tests
// ============================================================================
