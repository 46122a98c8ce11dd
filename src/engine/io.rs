//! Audio file I/O
//!
//! The renderer pulls raw PCM per track through [`AudioSource`] and writes
//! the final mix with [`write_wav`]. WAV is the only container; 16/24/32-bit
//! integer and 32-bit float input are accepted.
//!
//! Sample rate conversion uses linear interpolation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::{AudioBuffer, ChannelLayout, DEFAULT_SAMPLE_RATE};
use crate::error::{Result, SegueError};
use crate::library::{FeatureSnapshot, TrackId};

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Target sample rate (default: 44100)
    pub sample_rate: u32,
    /// Bit depth: 16, 24, or 32 float (default: 24)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bit_depth: 24,
        }
    }
}

impl ExportFormat {
    pub fn new(sample_rate: u32, bit_depth: u16) -> Self {
        ExportFormat {
            sample_rate,
            bit_depth,
        }
    }

    /// CD quality (44.1kHz, 16-bit)
    pub fn cd_quality() -> Self {
        ExportFormat::new(44100, 16)
    }
}

// ============================================================================
// Audio Source
// ============================================================================

/// Read side of the audio I/O collaborator
pub trait AudioSource: Send + Sync {
    /// Raw PCM for one track
    fn read(&self, track: &FeatureSnapshot) -> Result<AudioBuffer>;
}

/// Reads each track from the WAV file at its snapshot path
#[derive(Debug, Clone, Default)]
pub struct WavSource;

impl AudioSource for WavSource {
    fn read(&self, track: &FeatureSnapshot) -> Result<AudioBuffer> {
        let path = track.path.as_ref().ok_or_else(|| SegueError::FileNotFound {
            path: format!("<no path for track {}>", track.id),
            source: None,
        })?;
        read_wav(path)
    }
}

/// Serves pre-loaded buffers, keyed by track id
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    buffers: HashMap<TrackId, Arc<AudioBuffer>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<TrackId>, buffer: AudioBuffer) {
        self.buffers.insert(id.into(), Arc::new(buffer));
    }

    pub fn with(mut self, id: impl Into<TrackId>, buffer: AudioBuffer) -> Self {
        self.insert(id, buffer);
        self
    }
}

impl AudioSource for MemorySource {
    fn read(&self, track: &FeatureSnapshot) -> Result<AudioBuffer> {
        self.buffers
            .get(&track.id)
            .map(|b| (**b).clone())
            .ok_or_else(|| SegueError::FileNotFound {
                path: format!("<memory:{}>", track.id),
                source: None,
            })
    }
}

// ============================================================================
// WAV Read / Write
// ============================================================================

/// Read a WAV file into a buffer at the file's own rate and channel count
///
/// # Errors
/// * `FileNotFound` - the file does not exist
/// * `InvalidAudio` - not a readable WAV file
/// * `UnsupportedFormat` - more than 2 channels or an odd bit depth
/// * `EmptyAudio` - the file holds no samples
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(SegueError::FileNotFound {
            path: path.display().to_string(),
            source: None,
        });
    }

    let reader = WavReader::open(path).map_err(|e| SegueError::InvalidAudio {
        reason: format!("Failed to open WAV file: {}", e),
        source: Some(Box::new(e)),
    })?;
    decode_wav(reader)
}

/// Decode an in-memory WAV file, as returned by a generation service
pub fn read_wav_bytes(bytes: &[u8]) -> Result<AudioBuffer> {
    let reader = WavReader::new(std::io::Cursor::new(bytes)).map_err(|e| SegueError::InvalidAudio {
        reason: format!("Failed to parse WAV data: {}", e),
        source: Some(Box::new(e)),
    })?;
    decode_wav(reader)
}

fn decode_wav<R: std::io::Read>(reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let layout = ChannelLayout::from_count(channels).ok_or_else(|| SegueError::UnsupportedFormat {
        format: format!("{}-channel audio (only mono/stereo supported)", channels),
    })?;

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    if interleaved.is_empty() {
        return Err(SegueError::EmptyAudio);
    }

    AudioBuffer::from_interleaved(&interleaved, layout, spec.sample_rate)
}

/// Write a buffer to a WAV file, resampling to the format's rate if needed
pub fn write_wav(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    if !matches!(format.bit_depth, 16 | 24 | 32) {
        return Err(SegueError::UnsupportedFormat {
            format: format!("{}-bit audio (only 16, 24, 32 supported)", format.bit_depth),
        });
    }

    let converted;
    let buffer = if buffer.sample_rate != format.sample_rate {
        converted = resample(buffer, format.sample_rate);
        &converted
    } else {
        buffer
    };

    let spec = WavSpec {
        channels: buffer.channels() as u16,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let interleaved = buffer.to_interleaved();
    let mut writer = WavWriter::create(path, spec).map_err(wav_write_error)?;

    match format.bit_depth {
        16 => {
            for sample in interleaved {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(wav_write_error)?;
            }
        }
        24 => {
            for sample in interleaved {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(wav_write_error)?;
            }
        }
        _ => {
            for sample in interleaved {
                writer.write_sample(sample).map_err(wav_write_error)?;
            }
        }
    }

    writer.finalize().map_err(wav_write_error)?;
    tracing::debug!(path = %path.display(), samples = buffer.len(), "wrote wav");
    Ok(())
}

/// Bring a buffer to the render sample rate and channel count
pub fn conform(buffer: AudioBuffer, sample_rate: u32, channels: usize) -> AudioBuffer {
    let buffer = if buffer.sample_rate != sample_rate {
        resample(&buffer, sample_rate)
    } else {
        buffer
    };
    if buffer.channels() != channels {
        buffer.with_channel_count(channels)
    } else {
        buffer
    }
}

/// Convert a buffer to another sample rate
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate == target_rate || buffer.sample_rate == 0 {
        return buffer.clone();
    }
    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    AudioBuffer {
        samples: buffer
            .samples
            .iter()
            .map(|ch| resample_linear(ch, ratio))
            .collect(),
        sample_rate: target_rate,
    }
}

/// Generate a sine tone, mainly for tests and demos
pub fn sine_tone(frequency: f32, duration_ms: f64, sample_rate: u32, channels: usize) -> AudioBuffer {
    let len = crate::engine::buffer::ms_to_samples(duration_ms, sample_rate);
    let angular = 2.0 * std::f64::consts::PI * frequency as f64 / sample_rate as f64;
    let wave: Vec<f32> = (0..len).map(|i| (angular * i as f64).sin() as f32).collect();
    AudioBuffer {
        samples: vec![wave; channels.max(1)],
        sample_rate,
    }
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn wav_write_error(e: hound::Error) -> SegueError {
    match e {
        hound::Error::IoError(io) => SegueError::Io(io),
        other => SegueError::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |e: hound::Error| SegueError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    };

    match (sample_format, bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        // 24-bit stored as i32 in hound
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        (format, bits) => Err(SegueError::UnsupportedFormat {
            format: format!("{}-bit {:?} audio", bits, format),
        }),
    }
}

/// Linear interpolation resampling
pub(crate) fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() || !(ratio.is_finite() && ratio > 0.0) {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).round().max(1.0) as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_sine_tone_shape() {
        let tone = sine_tone(441.0, 1000.0, 44100, 2);
        assert_eq!(tone.len(), 44100);
        assert_eq!(tone.channels(), 2);
        // 100 samples per cycle: quarter period peaks
        assert_relative_eq!(tone.channel(0)[25], 1.0, epsilon = 1e-4);
        assert!(tone.channel(1)[50].abs() < 1e-4);
    }

    #[test]
    fn test_resample_linear_upsample() {
        let resampled = resample_linear(&[0.0, 1.0, 0.0], 2.0);
        assert_eq!(resampled.len(), 6);
        assert_relative_eq!(resampled[1], 0.5);
    }

    #[test]
    fn test_resample_linear_downsample() {
        let samples = vec![0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5];
        assert_eq!(resample_linear(&samples, 0.5).len(), 4);
    }

    #[test]
    fn test_conform_rate_and_channels() {
        let mono = sine_tone(220.0, 500.0, 22050, 1);
        let out = conform(mono, 44100, 2);
        assert_eq!(out.sample_rate, 44100);
        assert_eq!(out.channels(), 2);
        assert_eq!(out.len(), 22050);
    }

    #[test]
    fn test_round_trip_24bit_stereo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let original = sine_tone(440.0, 250.0, 44100, 2);

        write_wav(&original, &path, ExportFormat::default()).unwrap();
        let imported = read_wav(&path).unwrap();

        assert_eq!(imported.len(), original.len());
        assert_eq!(imported.channels(), 2);
        for (a, b) in original.channel(1).iter().zip(imported.channel(1)) {
            assert!((a - b).abs() < 1e-3, "sample mismatch: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_round_trip_16bit_and_float() {
        let dir = tempdir().unwrap();
        let original = sine_tone(1000.0, 100.0, 44100, 1);

        let p16 = dir.path().join("a16.wav");
        write_wav(&original, &p16, ExportFormat::cd_quality()).unwrap();
        let back = read_wav(&p16).unwrap();
        for (a, b) in original.channel(0).iter().zip(back.channel(0)) {
            assert!((a - b).abs() < 1e-3);
        }

        let p32 = dir.path().join("a32.wav");
        write_wav(&original, &p32, ExportFormat::new(44100, 32)).unwrap();
        assert_eq!(read_wav(&p32).unwrap(), original);
    }

    #[test]
    fn test_read_wav_bytes_matches_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.wav");
        let original = sine_tone(330.0, 50.0, 32000, 1);
        write_wav(&original, &path, ExportFormat::new(32000, 32)).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(read_wav_bytes(&bytes).unwrap(), original);
        assert!(read_wav_bytes(b"not a wav").is_err());
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let dir = tempdir().unwrap();
        let tone = sine_tone(440.0, 10.0, 44100, 1);
        let err = write_wav(&tone, &dir.path().join("x.wav"), ExportFormat::new(44100, 12));
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_file_and_sources() {
        match read_wav(Path::new("/nonexistent/segue/a.wav")) {
            Err(SegueError::FileNotFound { path, .. }) => assert!(path.contains("nonexistent")),
            other => panic!("expected FileNotFound, got {:?}", other),
        }

        let track = FeatureSnapshot::new("t");
        assert!(WavSource.read(&track).is_err());
        let source = MemorySource::new().with("t", sine_tone(440.0, 10.0, 44100, 1));
        assert_eq!(source.read(&track).unwrap().len(), 441);
        assert!(source.read(&FeatureSnapshot::new("u")).is_err());
    }
}
