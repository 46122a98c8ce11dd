//! Multi-lane auto-orchestration
//!
//! Adds background lanes under an existing lead lane. Each background
//! segment sits under one lead segment, matches its tempo within the
//! scorer's tolerance and stays above a harmonic floor against its key.
//! A track never plays in two lanes over the same stretch of time.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::flow::{Flow, GainEnvelope, LaneRole, SegmentOrigin};
use super::segment_features;
use crate::engine::cancel::CancelToken;
use crate::error::{Result, SegueError};
use crate::library::{FeatureSnapshot, LibrarySnapshot};
use crate::scoring::{bpm_component, harmonic_component, rank_order, CompatibilityScore, CompatibilityScorer};

/// Background lane settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayeringConfig {
    pub extra_lanes: usize,
    /// Minimum harmonic component against the lead segment
    pub harmonic_floor: f64,
    /// Share of lead segments each background lane sits under
    pub coverage: f64,
    /// Constant gain of background segments
    pub background_gain: f32,
}

impl Default for LayeringConfig {
    fn default() -> Self {
        Self {
            extra_lanes: 2,
            harmonic_floor: 0.6,
            coverage: 0.5,
            background_gain: 0.7,
        }
    }
}

impl LayeringConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |param: &str, value: String, expected: &str| {
            Err(SegueError::InvalidParameter {
                param: format!("layering.{}", param),
                value,
                expected: expected.to_string(),
            })
        };
        if !(0.0..=1.0).contains(&self.harmonic_floor) {
            return fail("harmonic_floor", self.harmonic_floor.to_string(), "0 to 1");
        }
        if !(0.0..=1.0).contains(&self.coverage) {
            return fail("coverage", self.coverage.to_string(), "0 to 1");
        }
        if !self.background_gain.is_finite() || self.background_gain < 0.0 {
            return fail("background_gain", self.background_gain.to_string(), ">= 0");
        }
        Ok(())
    }

    /// Lead segments between two background entries in one lane
    fn stride(&self) -> Option<usize> {
        if self.coverage <= 0.0 {
            None
        } else {
            Some((1.0 / self.coverage).round().max(1.0) as usize)
        }
    }
}

/// What `add_layers` placed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayeringOutcome {
    /// Indices of the lanes that were added
    pub lanes: Vec<usize>,
    pub placed: usize,
    /// Windows where no candidate qualified
    pub unfilled: usize,
}

/// Add background lanes under the lead lane of `flow`
///
/// Lane `l` covers lead segment `i` when `(i + l) % stride == 0`, with the
/// stride derived from the coverage, so lanes alternate under the lead.
/// Cancellation is checked per lane; a cancelled call leaves `flow` as it
/// was.
pub fn add_layers(
    flow: &mut Flow,
    library: &LibrarySnapshot,
    scorer: &CompatibilityScorer,
    config: &LayeringConfig,
    cancel: &CancelToken,
) -> Result<LayeringOutcome> {
    config.validate()?;
    let mut outcome = LayeringOutcome::default();
    let stride = match config.stride() {
        Some(stride) if config.extra_lanes > 0 => stride,
        _ => return Ok(outcome),
    };

    let lead: Vec<(i64, i64, FeatureSnapshot)> = flow
        .lead()
        .segments
        .iter()
        .map(|s| segment_features(flow, library, s).map(|f| (s.start_ms, s.end_ms, f)))
        .collect::<Result<_>>()?;

    let tolerance = scorer.config().bpm_tolerance;
    let eps = scorer.config().tie_epsilon;
    let mut working = flow.clone();

    for l in 0..config.extra_lanes {
        if cancel.is_cancelled() {
            return Err(SegueError::SearchAborted);
        }
        let lane = working.add_lane(LaneRole::Background);
        outcome.lanes.push(lane);

        for (i, (start, end, anchor)) in lead.iter().enumerate() {
            if (i + l) % stride != 0 {
                continue;
            }
            let Ok((anchor_bpm, anchor_key)) = anchor.musical_features() else {
                outcome.unfilled += 1;
                continue;
            };

            let mut scored: Vec<CompatibilityScore> = library
                .tracks()
                .iter()
                .filter(|c| !working.segments().any(|(_, s)| s.track == c.id && s.overlaps(*start, *end)))
                .filter(|c| match c.musical_features() {
                    Ok((bpm, key)) => {
                        bpm_component(anchor_bpm, bpm, tolerance) > 0.0
                            && harmonic_component(
                                &anchor_key,
                                &key,
                                scorer.config().adjacent_key_score,
                                scorer.config().key_decay,
                            ) >= config.harmonic_floor
                    }
                    Err(_) => false,
                })
                .filter_map(|c| scorer.score(anchor, c).ok())
                .collect();
            scored.sort_by(|a, b| rank_order(a, b, eps));

            match scored.first() {
                Some(best) => {
                    let id = working.place(
                        lane,
                        best.track_b.clone(),
                        SegmentOrigin::Library,
                        0,
                        *start,
                        end - start,
                        None,
                    )?;
                    working.set_gain(
                        id,
                        GainEnvelope::Constant {
                            gain: config.background_gain,
                        },
                    )?;
                    debug!(lane, track = %best.track_b, start, "background segment placed");
                    outcome.placed += 1;
                }
                None => outcome.unfilled += 1,
            }
        }
    }

    *flow = working;
    info!(lanes = outcome.lanes.len(), placed = outcome.placed, unfilled = outcome.unfilled, "layers added");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Library, TrackId};

    fn library() -> LibrarySnapshot {
        let mut lib = Library::new();
        for (id, bpm, key) in [
            ("lead-a", 120.0, "8A"),
            ("lead-b", 121.0, "9A"),
            ("pad", 120.5, "8A"),
            ("perc", 119.5, "8B"),
            ("fast", 140.0, "8A"),
            ("clash", 120.0, "2B"),
        ] {
            lib.insert(FeatureSnapshot::new(id).with_bpm(bpm).with_key(key.parse().unwrap()));
        }
        lib.snapshot()
    }

    fn lead_flow() -> Flow {
        let mut flow = Flow::new();
        for track in ["lead-a", "lead-b", "lead-a", "lead-b"] {
            flow.append(0, track.into(), 0, 10_000, None).unwrap();
        }
        flow
    }

    #[test]
    fn test_layers_respect_tempo_key_and_vertical_repeat() {
        let mut flow = lead_flow();
        let outcome = add_layers(
            &mut flow,
            &library(),
            &CompatibilityScorer::default(),
            &LayeringConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.lanes, vec![1, 2]);
        assert_eq!(outcome.placed + outcome.unfilled, 4);
        assert!(flow.validate().is_ok());

        for (lane, segment) in flow.segments().filter(|(l, _)| *l > 0) {
            assert_ne!(segment.track, TrackId::from("fast"), "lane {}", lane);
            assert_ne!(segment.track, TrackId::from("clash"), "lane {}", lane);
            assert_eq!(segment.gain, GainEnvelope::Constant { gain: 0.7 });
            let clashes = flow
                .segments()
                .filter(|(l, s)| *l != lane && s.track == segment.track)
                .any(|(_, s)| s.overlaps(segment.start_ms, segment.end_ms));
            assert!(!clashes, "{} repeats vertically", segment.track);
        }
    }

    #[test]
    fn test_lanes_alternate_under_lead() {
        let mut flow = lead_flow();
        add_layers(
            &mut flow,
            &library(),
            &CompatibilityScorer::default(),
            &LayeringConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let starts: Vec<i64> = flow.lane(1).unwrap().segments.iter().map(|s| s.start_ms).collect();
        assert_eq!(starts, vec![0, 20_000]);
        let starts: Vec<i64> = flow.lane(2).unwrap().segments.iter().map(|s| s.start_ms).collect();
        assert_eq!(starts, vec![10_000, 30_000]);
    }

    #[test]
    fn test_zero_coverage_adds_nothing() {
        let mut flow = lead_flow();
        let before = flow.clone();
        let outcome = add_layers(
            &mut flow,
            &library(),
            &CompatibilityScorer::default(),
            &LayeringConfig {
                coverage: 0.0,
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap();
        assert!(outcome.lanes.is_empty());
        assert_eq!(flow, before);
    }

    #[test]
    fn test_cancel_leaves_flow_untouched() {
        let mut flow = lead_flow();
        let before = flow.clone();
        let token = CancelToken::new();
        token.cancel();
        let result = add_layers(
            &mut flow,
            &library(),
            &CompatibilityScorer::default(),
            &LayeringConfig::default(),
            &token,
        );
        assert!(matches!(result, Err(SegueError::SearchAborted)));
        assert_eq!(flow, before);
    }
}
