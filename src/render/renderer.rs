//! Flow → waveform

use tracing::{debug, info, warn};

use super::segment::{render_segment, Alignment, SegmentJob};
use super::{RenderConfig, RenderOutput, RenderWarning};
use crate::dsp::{duck_background, DspPrimitives, MasterBus, OverlapAddPrimitives};
use crate::engine::buffer::{ms_to_samples, AudioBuffer};
use crate::engine::cancel::CancelToken;
use crate::engine::io::{conform, AudioSource};
use crate::error::{Result, SegueError};
use crate::library::LibrarySnapshot;
use crate::orchestrator::{segment_features, Flow, LaneRole, Segment};

/// Deterministic renderer for finalized flows
pub struct DspRenderer {
    config: RenderConfig,
    primitives: Box<dyn DspPrimitives>,
}

impl DspRenderer {
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            primitives: Box::new(OverlapAddPrimitives),
        })
    }

    /// Use another tempo/pitch provider
    pub fn with_primitives(mut self, primitives: Box<dyn DspPrimitives>) -> Self {
        self.primitives = primitives;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn render(&self, flow: &Flow, library: &LibrarySnapshot, source: &dyn AudioSource) -> Result<RenderOutput> {
        self.render_with(flow, library, source, &CancelToken::new(), &mut |_, _| {})
    }

    /// Render with cancellation and per-segment progress
    ///
    /// Lanes are rendered in order, segments in time order within a lane.
    /// `progress(done, total)` fires after each completed segment, and
    /// `cancel` is only checked between segments. Background lanes are
    /// ducked against the lead mix before the lanes are summed; the master
    /// bus runs once over the sum.
    pub fn render_with(
        &self,
        flow: &Flow,
        library: &LibrarySnapshot,
        source: &dyn AudioSource,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<RenderOutput> {
        flow.validate()?;
        if flow.is_empty() {
            return Err(SegueError::InvalidFlow {
                reason: "nothing to render".to_string(),
            });
        }

        let sr = self.config.sample_rate;
        let channels = self.config.channels;
        let total_len = ms_to_samples(flow.duration_ms() as f64, sr);
        let total_segments = flow.segment_count();
        info!(segments = total_segments, duration_ms = flow.duration_ms(), "render started");

        let mut done = 0;
        let mut warnings = Vec::new();
        // Effective tempo/key of each lead segment, by time span
        let mut lead_spans: Vec<(i64, i64, Alignment)> = Vec::new();
        let mut lead_mix: Option<AudioBuffer> = None;
        let mut backgrounds: Vec<AudioBuffer> = Vec::new();

        for lane in flow.lanes() {
            let mut mix = AudioBuffer::silent(total_len, channels, sr);
            let mut previous: Option<Alignment> = None;

            for (i, segment) in lane.segments.iter().enumerate() {
                if cancel.is_cancelled() {
                    info!(done, total = total_segments, "render cancelled");
                    return Err(SegueError::RenderCancelled);
                }

                let features = segment_features(flow, library, segment).map_err(|e| io_error(segment, e))?;
                let raw = match flow.clip(&segment.track).filter(|_| segment.is_generated()) {
                    Some(clip) => (*clip.buffer).clone(),
                    None => source.read(&features).map_err(|e| io_error(segment, e))?,
                };
                let audio = conform(raw, sr, channels);

                let target = match lane.role {
                    LaneRole::Lead => previous,
                    LaneRole::Background => lead_spans
                        .iter()
                        .find(|(start, end, _)| *start <= segment.start_ms && segment.start_ms < *end)
                        .map(|(_, _, alignment)| *alignment),
                };
                let tail = lane
                    .segments
                    .get(i + 1)
                    .and_then(|next| next.transition.as_ref())
                    .filter(|t| t.duration_ms > 0);

                let job = SegmentJob {
                    segment,
                    features: &features,
                    source: &audio,
                    target,
                    tail,
                };
                let rendered = render_segment(&job, &self.config, self.primitives.as_ref())?;

                for message in rendered.warnings {
                    warn!(segment = segment.id, track = %segment.track, "{}", message);
                    warnings.push(RenderWarning {
                        segment: segment.id,
                        track: segment.track.clone(),
                        message,
                    });
                }

                let (at, skip) = if segment.start_ms < 0 {
                    (0, ms_to_samples(-segment.start_ms as f64, sr))
                } else {
                    (ms_to_samples(segment.start_ms as f64, sr), 0)
                };
                let body = rendered.buffer.slice(skip, rendered.buffer.len().saturating_sub(skip));
                mix.mix_from(&body, at);

                if lane.role == LaneRole::Lead {
                    lead_spans.push((segment.start_ms, segment.end_ms, rendered.effective));
                }
                previous = Some(rendered.effective);

                done += 1;
                debug!(segment = segment.id, done, total = total_segments, "segment rendered");
                progress(done, total_segments);
            }

            match lane.role {
                LaneRole::Lead if lead_mix.is_none() => lead_mix = Some(mix),
                _ => backgrounds.push(mix),
            }
        }

        let mut output = lead_mix.unwrap_or_else(|| AudioBuffer::silent(total_len, channels, sr));
        let lead = output.clone();
        for mut background in backgrounds {
            duck_background(&mut background, &lead, &self.config.ducking);
            output.mix_from(&background, 0);
        }
        MasterBus::new(&self.config.master, sr).process(&mut output);

        let output = RenderOutput::new(output, warnings);
        info!(
            fingerprint = %output.fingerprint,
            warnings = output.warnings.len(),
            "render committed"
        );
        Ok(output)
    }
}

fn io_error(segment: &Segment, error: SegueError) -> SegueError {
    SegueError::RenderIo {
        segment: segment.id,
        track: segment.track.to_string(),
        reason: error.to_string(),
    }
}
