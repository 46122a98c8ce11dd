//! Per-segment render pipeline
//!
//! extract (loop if short) → tempo stretch → pitch shift → RMS normalize
//! → gain automation → head/tail transition fades

use tracing::debug;

use super::RenderConfig;
use crate::dsp::{
    apply_fade, apply_gain_curve, check_stretch, extend, needs_alignment, normalize_rms, select_loop_region, BassSwap,
    DspPrimitives, FadeDirection,
};
use crate::engine::buffer::{ms_to_samples, samples_to_ms, AudioBuffer};
use crate::error::{Result, SegueError};
use crate::library::{FeatureSnapshot, HarmonicKey};
use crate::orchestrator::{Segment, TransitionDescriptor, TransitionKind};
use crate::scoring::semitone_shift;

/// Tempo and key a segment ends up playing at
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Alignment {
    pub bpm: Option<f64>,
    pub key: Option<HarmonicKey>,
}

pub(crate) struct SegmentJob<'a> {
    pub segment: &'a Segment,
    pub features: &'a FeatureSnapshot,
    /// Source audio already at the render rate and channel count
    pub source: &'a AudioBuffer,
    /// What to align to; `None` plays the segment as recorded
    pub target: Option<Alignment>,
    /// Transition of the following segment in the same lane
    pub tail: Option<&'a TransitionDescriptor>,
}

pub(crate) struct RenderedSegment {
    /// Body plus tail, starting at the segment's start time
    pub buffer: AudioBuffer,
    pub effective: Alignment,
    pub warnings: Vec<String>,
}

pub(crate) fn render_segment(
    job: &SegmentJob<'_>,
    config: &RenderConfig,
    primitives: &dyn DspPrimitives,
) -> Result<RenderedSegment> {
    let sr = config.sample_rate;
    let segment = job.segment;
    let body = ms_to_samples(segment.duration_ms() as f64, sr);
    let tail = job
        .tail
        .map(|t| ms_to_samples(t.duration_ms as f64, sr))
        .unwrap_or(0);
    let out_len = body + tail;
    let offset = ms_to_samples(segment.source_offset_ms as f64, sr);

    let mut warnings = Vec::new();
    let own_bpm = job.features.bpm.filter(|b| b.is_finite() && *b > 0.0);
    let target = job.target.unwrap_or_default();
    let mut effective = Alignment {
        bpm: own_bpm,
        key: job.features.key,
    };

    // Tempo
    let mut buffer = None;
    if let (Some(source_bpm), Some(target_bpm)) = (own_bpm, target.bpm) {
        if needs_alignment(source_bpm, target_bpm, config.align_tolerance) {
            match check_stretch(source_bpm, target_bpm, config.max_stretch) {
                Ok(ratio) => {
                    let needed = ((out_len as f64) * ratio).round() as usize;
                    let material = extract(job, offset, needed, config, &mut warnings);
                    match primitives.resample(&material, source_bpm, target_bpm, config.max_stretch) {
                        Ok(stretched) => {
                            debug!(segment = segment.id, ratio, "tempo aligned");
                            buffer = Some(stretched.slice(0, out_len));
                            effective.bpm = Some(target_bpm);
                        }
                        Err(SegueError::StretchRatioExceeded { requested, max }) => {
                            warnings.push(stretch_warning(requested, max));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(SegueError::StretchRatioExceeded { requested, max }) => {
                    warnings.push(stretch_warning(requested, max));
                }
                Err(e) => return Err(e),
            }
        }
    }
    let mut buffer = match buffer {
        Some(buffer) => buffer,
        None => extract(job, offset, out_len, config, &mut warnings),
    };

    // Key
    if config.harmonic_sync {
        if let (Some(own), Some(aim)) = (job.features.key, target.key) {
            let semitones = semitone_shift(&own, &aim);
            if semitones != 0 {
                buffer = primitives.pitch_shift(&buffer, semitones)?;
                let pitch_class = (own.pitch_class() as i32 + semitones).rem_euclid(12) as u8;
                effective.key = HarmonicKey::new(pitch_class, own.mode()).ok();
                debug!(segment = segment.id, semitones, "pitch aligned");
            }
        }
    }

    // Level
    normalize_rms(&mut buffer, config.master.target_rms_db);
    let gain = &segment.gain;
    apply_gain_curve(&mut buffer, |i| gain.gain_at(samples_to_ms(i, sr)));

    // Transitions
    if let Some(head) = segment.transition.as_ref().filter(|t| t.duration_ms > 0) {
        let len = ms_to_samples(head.duration_ms as f64, sr);
        apply_fade(&mut buffer, 0, len, FadeDirection::In, head.curve, bass_swap(head, config));
    }
    if let Some(next) = job.tail {
        apply_fade(&mut buffer, body, tail, FadeDirection::Out, next.curve, bass_swap(next, config));
    }

    Ok(RenderedSegment {
        buffer,
        effective,
        warnings,
    })
}

/// `len` samples of source from `offset`, looped when the source runs out
fn extract(
    job: &SegmentJob<'_>,
    offset: usize,
    len: usize,
    config: &RenderConfig,
    warnings: &mut Vec<String>,
) -> AudioBuffer {
    let source = job.source;
    if offset + len <= source.len() {
        return source.slice(offset, len);
    }

    let sr = config.sample_rate;
    let bpm = job.features.bpm.filter(|b| b.is_finite() && *b > 0.0);
    let region = select_loop_region(source, bpm, &job.features.onsets_ms, offset, &config.loops);
    if region.is_none() {
        warnings.push("no loop region found; padded with silence".to_string());
    }
    let seam = ms_to_samples(config.loops.seam_ms, sr);
    extend(source, region, offset, len, seam).buffer
}

fn bass_swap(transition: &TransitionDescriptor, config: &RenderConfig) -> Option<BassSwap> {
    match transition.kind {
        TransitionKind::BandDuckedCrossfade => Some(BassSwap {
            crossover_hz: transition.crossover_hz.unwrap_or(config.crossover_hz),
        }),
        _ => None,
    }
}

fn stretch_warning(requested: f64, max: f64) -> String {
    format!(
        "tempo ratio {:.3} exceeds ±{:.0}%; crossfade only",
        requested,
        max * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::OverlapAddPrimitives;
    use crate::engine::io::sine_tone;
    use crate::orchestrator::{Flow, GainEnvelope};

    const SR: u32 = 44100;

    fn features(bpm: f64, key: &str) -> FeatureSnapshot {
        FeatureSnapshot::new("a").with_bpm(bpm).with_key(key.parse().unwrap())
    }

    fn single_segment(duration_ms: i64, offset_ms: i64) -> Flow {
        let mut flow = Flow::new();
        flow.append(0, "a".into(), offset_ms, duration_ms, None).unwrap();
        flow
    }

    fn render(
        flow: &Flow,
        features: &FeatureSnapshot,
        source: &AudioBuffer,
        target: Option<Alignment>,
    ) -> RenderedSegment {
        let job = SegmentJob {
            segment: &flow.lead().segments[0],
            features,
            source,
            target,
            tail: None,
        };
        render_segment(&job, &RenderConfig::default(), &OverlapAddPrimitives).unwrap()
    }

    #[test]
    fn test_length_is_body_plus_tail() {
        let flow = single_segment(1000, 0);
        let source = sine_tone(440.0, 2000.0, SR, 2);
        let features = features(120.0, "8A");
        let tail = TransitionDescriptor::straight(250);
        let job = SegmentJob {
            segment: &flow.lead().segments[0],
            features: &features,
            source: &source,
            target: None,
            tail: Some(&tail),
        };
        let rendered = render_segment(&job, &RenderConfig::default(), &OverlapAddPrimitives).unwrap();
        assert_eq!(rendered.buffer.len(), ms_to_samples(1250.0, SR));
        // Tail fades to silence
        let last = rendered.buffer.len() - 1;
        assert!(rendered.buffer.samples[0][last].abs() < 1e-3);
    }

    #[test]
    fn test_small_tempo_difference_is_left_alone() {
        let flow = single_segment(500, 0);
        let source = sine_tone(440.0, 1000.0, SR, 2);
        let rendered = render(
            &flow,
            &features(120.0, "8A"),
            &source,
            Some(Alignment {
                bpm: Some(120.6),
                key: None,
            }),
        );
        assert_eq!(rendered.effective.bpm, Some(120.0));
        assert!(rendered.warnings.is_empty());
    }

    #[test]
    fn test_stretch_within_bound_adopts_target_tempo() {
        let flow = single_segment(500, 0);
        let source = sine_tone(440.0, 1000.0, SR, 2);
        let rendered = render(
            &flow,
            &features(120.0, "8A"),
            &source,
            Some(Alignment {
                bpm: Some(126.0),
                key: None,
            }),
        );
        assert_eq!(rendered.effective.bpm, Some(126.0));
        assert_eq!(rendered.buffer.len(), ms_to_samples(500.0, SR));
    }

    #[test]
    fn test_stretch_beyond_bound_is_a_warning() {
        let flow = single_segment(500, 0);
        let source = sine_tone(440.0, 1000.0, SR, 2);
        let rendered = render(
            &flow,
            &features(120.0, "8A"),
            &source,
            Some(Alignment {
                bpm: Some(140.0),
                key: None,
            }),
        );
        assert_eq!(rendered.effective.bpm, Some(120.0));
        assert_eq!(rendered.warnings.len(), 1);
        assert!(rendered.warnings[0].contains("crossfade only"));
    }

    #[test]
    fn test_distant_key_is_pitch_aligned() {
        let flow = single_segment(300, 0);
        let source = sine_tone(440.0, 1000.0, SR, 2);
        // 8A (A minor) against 3A (Bb minor): shift up one semitone
        let rendered = render(
            &flow,
            &features(120.0, "8A"),
            &source,
            Some(Alignment {
                bpm: None,
                key: Some("3A".parse().unwrap()),
            }),
        );
        assert_eq!(rendered.effective.key, Some("3A".parse().unwrap()));
    }

    #[test]
    fn test_short_source_is_looped() {
        let flow = single_segment(3000, 0);
        let source = sine_tone(220.0, 1000.0, SR, 2);
        let rendered = render(&flow, &features(120.0, "8A"), &source, None);
        assert_eq!(rendered.buffer.len(), ms_to_samples(3000.0, SR));
        let late = rendered.buffer.slice(ms_to_samples(2500.0, SR), 4410);
        assert!(late.rms_linear() > 0.05);
    }

    #[test]
    fn test_gain_envelope_is_applied_after_normalization() {
        let mut flow = single_segment(500, 0);
        let id = flow.lead().segments[0].id;
        flow.set_gain(id, GainEnvelope::Constant { gain: 0.5 }).unwrap();
        let source = sine_tone(440.0, 1000.0, SR, 2);
        let half = render(&flow, &features(120.0, "8A"), &source, None);

        let unity_flow = single_segment(500, 0);
        let unity = render(&unity_flow, &features(120.0, "8A"), &source, None);
        approx::assert_relative_eq!(half.buffer.rms_linear() * 2.0, unity.buffer.rms_linear(), epsilon = 1e-4);
    }
}
