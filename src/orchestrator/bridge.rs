//! Smart bridge search
//!
//! Joins two neighbouring segments with a connective one. Every library
//! track except the anchors is scored against both sides and the two
//! scores are combined into one bidirectional score. The best candidate
//! is used if it clears the acceptance threshold; otherwise exactly one
//! request goes to the bridge generator, bounded by a timeout. If that
//! fails too, the best candidate goes in anyway with a plain crossfade,
//! and with no candidate at all the anchors crossfade directly.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::flow::{Flow, GeneratedClip, Segment, SegmentId, SegmentOrigin, TransitionDescriptor};
use super::segment_features;
use crate::bridge::{BridgeGenerator, BridgeRequest};
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};
use crate::events::{Event, EventSink, NullSink};
use crate::library::{FeatureSnapshot, LibrarySnapshot, TrackId};
use crate::scoring::{tie_bucket, CompatibilityScore, CompatibilityScorer};

static NULL_SINK: NullSink = NullSink;

/// How the left and right scores of a candidate are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeCombination {
    HarmonicMean,
    ArithmeticMean,
    Minimum,
}

impl BridgeCombination {
    pub fn combine(&self, left: f64, right: f64) -> f64 {
        match self {
            BridgeCombination::HarmonicMean => {
                if left + right <= 0.0 {
                    0.0
                } else {
                    2.0 * left * right / (left + right)
                }
            }
            BridgeCombination::ArithmeticMean => (left + right) / 2.0,
            BridgeCombination::Minimum => left.min(right),
        }
    }
}

/// Bridge search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Minimum bidirectional score for a library bridge
    pub threshold: f64,
    pub combination: BridgeCombination,
    /// Longest wait for a generated clip
    pub timeout_ms: u64,
    /// Bridge length when the anchors leave no gap
    pub default_duration_ms: i64,
    /// Crossfade into the bridge, capped at the bridge length
    pub transition_ms: i64,
    pub crossover_hz: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            combination: BridgeCombination::HarmonicMean,
            timeout_ms: 45_000,
            default_duration_ms: 8_000,
            transition_ms: 4_000,
            crossover_hz: 200.0,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |param: &str, value: String, expected: &str| {
            Err(SegueError::InvalidParameter {
                param: format!("bridge.{}", param),
                value,
                expected: expected.to_string(),
            })
        };
        if !(0.0..=1.0).contains(&self.threshold) {
            return fail("threshold", self.threshold.to_string(), "0 to 1");
        }
        if self.timeout_ms == 0 {
            return fail("timeout_ms", "0".to_string(), "> 0 ms");
        }
        if self.default_duration_ms <= 0 {
            return fail("default_duration_ms", self.default_duration_ms.to_string(), "> 0 ms");
        }
        if self.transition_ms < 0 {
            return fail("transition_ms", self.transition_ms.to_string(), ">= 0 ms");
        }
        Ok(())
    }
}

/// One library track scored against both anchors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeCandidate {
    pub track: TrackId,
    /// Left anchor into the candidate
    pub left: CompatibilityScore,
    /// Candidate into the right anchor
    pub right: CompatibilityScore,
    pub score: f64,
}

/// What ended up between the anchors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    /// A library track above the threshold
    Library,
    /// A generated clip
    Generated,
    /// The best library track below the threshold, straight crossfade
    Fallback,
    /// Nothing inserted; the right anchor crossfades straight from the left
    Direct,
}

/// Result of a bridge search
#[derive(Debug, Clone)]
pub struct BridgeOutcome {
    /// The inserted segment, or the right anchor for a direct crossfade
    pub segment: Segment,
    pub kind: BridgeKind,
    /// Best-ranked candidate, if any
    pub candidate: Option<BridgeCandidate>,
    /// Id of the generator request, if one was issued
    pub request: Option<String>,
    /// Why a generated bridge was not used
    pub fallback_reason: Option<String>,
}

/// Bridge search over one library snapshot
pub struct BridgeFinder<'a> {
    library: &'a LibrarySnapshot,
    scorer: &'a CompatibilityScorer,
    config: &'a BridgeConfig,
    generator: Option<Arc<dyn BridgeGenerator>>,
    events: &'a dyn EventSink,
}

impl<'a> BridgeFinder<'a> {
    pub fn new(library: &'a LibrarySnapshot, scorer: &'a CompatibilityScorer, config: &'a BridgeConfig) -> Self {
        Self {
            library,
            scorer,
            config,
            generator: None,
            events: &NULL_SINK,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn BridgeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_events(mut self, events: &'a dyn EventSink) -> Self {
        self.events = events;
        self
    }

    /// Score every library track except the anchors, best first
    ///
    /// Ties on the bucketed score keep library order.
    pub fn rank_candidates(&self, left: &FeatureSnapshot, right: &FeatureSnapshot) -> Vec<BridgeCandidate> {
        let eps = self.scorer.config().tie_epsilon;
        let mut candidates: Vec<BridgeCandidate> = self
            .library
            .tracks()
            .iter()
            .filter(|t| t.id != left.id && t.id != right.id)
            .filter_map(|t| {
                let into = self.scorer.score(left, t);
                let out = self.scorer.score(t, right);
                match (into, out) {
                    (Ok(l), Ok(r)) => Some(BridgeCandidate {
                        track: t.id.clone(),
                        score: self.config.combination.combine(l.total, r.total),
                        left: l,
                        right: r,
                    }),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(track = %t.id, error = %e, "excluded from bridge candidates");
                        None
                    }
                }
            })
            .collect();
        candidates.sort_by(|a, b| tie_bucket(b.score, eps).cmp(&tie_bucket(a.score, eps)));
        candidates
    }

    /// `findBridge`: insert a connective segment between `left` and `right`
    ///
    /// The anchors must be consecutive segments of one lane. On error the
    /// flow is unchanged.
    pub fn find_bridge(&self, flow: &mut Flow, left: SegmentId, right: SegmentId) -> Result<BridgeOutcome> {
        self.config.validate()?;
        let (left_seg, right_seg) = anchors(flow, left, right)?;
        let left_features = segment_features(flow, self.library, &left_seg)?;
        let right_features = segment_features(flow, self.library, &right_seg)?;

        let gap = right_seg.start_ms - left_seg.end_ms;
        let duration_ms = if gap > 0 { gap } else { self.config.default_duration_ms };
        let transition_ms = self.config.transition_ms.min(duration_ms);

        let candidates = self.rank_candidates(&left_features, &right_features);
        let best = candidates.first().cloned();

        if let Some(candidate) = best.as_ref().filter(|c| c.score > self.config.threshold) {
            let transition = TransitionDescriptor::band_ducked(transition_ms, self.config.crossover_hz);
            let id = flow.insert_after(left, candidate.track.clone(), SegmentOrigin::Library, duration_ms, Some(transition))?;
            info!(track = %candidate.track, score = candidate.score, "library bridge inserted");
            return self.finish(flow, id, BridgeKind::Library, best, None, None);
        }

        let request = BridgeRequest::new(&left_features, &right_features, duration_ms)?;
        let mut issued = false;
        let generated = self.ready_generator().and_then(|generator| {
            issued = true;
            self.request_with_timeout(generator, &request)
        });
        let reason = match generated {
            Ok(buffer) => {
                let track = TrackId(format!("bridge-{}", request.id));
                let transition = TransitionDescriptor::generated_bridge(transition_ms);
                let id = flow.insert_after(left, track.clone(), SegmentOrigin::Generated, duration_ms, Some(transition))?;
                flow.add_clip(
                    track,
                    GeneratedClip {
                        buffer: Arc::new(buffer),
                        bpm: request.target_bpm,
                        key: request.target_key,
                    },
                );
                info!(request = %request.id, duration_ms, "generated bridge inserted");
                return self.finish(flow, id, BridgeKind::Generated, best, Some(request.id), None);
            }
            Err(SegueError::BridgeUnavailable { reason }) => reason,
            Err(e) => e.to_string(),
        };

        let request_id = issued.then(|| request.id.clone());
        warn!(left = %left_seg.track, right = %right_seg.track, reason = %reason, "bridge generation unavailable");
        self.events.publish(Event::BridgeFallback {
            left: left_seg.track.clone(),
            right: right_seg.track.clone(),
            reason: reason.clone(),
            substitute: best.as_ref().map(|c| c.track.clone()),
        });

        match best.as_ref() {
            Some(candidate) => {
                let id = flow.insert_after(
                    left,
                    candidate.track.clone(),
                    SegmentOrigin::Library,
                    duration_ms,
                    Some(TransitionDescriptor::straight(transition_ms)),
                )?;
                self.finish(flow, id, BridgeKind::Fallback, best, request_id, Some(reason))
            }
            None => {
                let transition_ms = self.config.transition_ms.min(right_seg.duration_ms());
                flow.set_transition(right, Some(TransitionDescriptor::straight(transition_ms)))?;
                let segment = flow.segment(right).cloned().ok_or(SegueError::UnknownSegment { segment: right })?;
                info!(left = %left_seg.track, right = %right_seg.track, "no bridge track, direct crossfade");
                Ok(BridgeOutcome {
                    segment,
                    kind: BridgeKind::Direct,
                    candidate: None,
                    request: request_id,
                    fallback_reason: Some(format!("{}; no library track to fall back on", reason)),
                })
            }
        }
    }

    /// The generator, if one is configured and ready
    fn ready_generator(&self) -> Result<Arc<dyn BridgeGenerator>> {
        let generator = self.generator.clone().ok_or_else(|| SegueError::BridgeUnavailable {
            reason: "generator not configured".to_string(),
        })?;
        let readiness = generator.readiness();
        if !readiness.is_ready() {
            return Err(SegueError::BridgeUnavailable {
                reason: format!("generator {} is {}", generator.name(), readiness.as_str()),
            });
        }
        Ok(generator)
    }

    /// Ask the generator for a clip, waiting at most the configured timeout
    ///
    /// The request runs on its own thread. A late reply is dropped.
    fn request_with_timeout(&self, generator: Arc<dyn BridgeGenerator>, request: &BridgeRequest) -> Result<AudioBuffer> {
        self.events.publish(Event::BridgeRequested {
            request: request.id.clone(),
            left: request.left.id.clone(),
            right: request.right.id.clone(),
            duration_ms: request.target_duration_ms,
        });
        info!(request = %request.id, generator = generator.name(), "bridge requested");

        let (tx, rx) = mpsc::channel();
        let owned = request.clone();
        thread::Builder::new()
            .name("segue-bridge".to_string())
            .spawn(move || {
                let _ = tx.send(generator.request_bridge(&owned));
            })
            .map_err(|e| SegueError::BridgeUnavailable {
                reason: format!("could not start request: {}", e),
            })?;

        let buffer = match rx.recv_timeout(Duration::from_millis(self.config.timeout_ms)) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(SegueError::BridgeUnavailable {
                    reason: format!("timed out after {} ms", self.config.timeout_ms),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SegueError::BridgeUnavailable {
                    reason: "request thread exited without a reply".to_string(),
                })
            }
        };
        if buffer.is_empty() || !buffer.is_finite() {
            return Err(SegueError::BridgeUnavailable {
                reason: "generated clip is empty or not finite".to_string(),
            });
        }
        Ok(buffer)
    }

    fn finish(
        &self,
        flow: &Flow,
        id: SegmentId,
        kind: BridgeKind,
        candidate: Option<BridgeCandidate>,
        request: Option<String>,
        fallback_reason: Option<String>,
    ) -> Result<BridgeOutcome> {
        let segment = flow.segment(id).cloned().ok_or(SegueError::UnknownSegment { segment: id })?;
        self.events.publish(Event::BridgeInserted {
            segment: id,
            track: segment.track.clone(),
            generated: kind == BridgeKind::Generated,
        });
        Ok(BridgeOutcome {
            segment,
            kind,
            candidate,
            request,
            fallback_reason,
        })
    }
}

/// The two anchors, checked to be consecutive in one lane
fn anchors(flow: &Flow, left: SegmentId, right: SegmentId) -> Result<(Segment, Segment)> {
    let (left_lane, left_index) = flow.locate(left).ok_or(SegueError::UnknownSegment { segment: left })?;
    let (right_lane, right_index) = flow.locate(right).ok_or(SegueError::UnknownSegment { segment: right })?;
    if left_lane != right_lane || right_index != left_index + 1 {
        return Err(SegueError::InvalidFlow {
            reason: format!("segments {} and {} are not neighbours in one lane", left, right),
        });
    }
    let lane = &flow.lanes()[left_lane];
    Ok((lane.segments[left_index].clone(), lane.segments[right_index].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{MockBridgeGenerator, Readiness};
    use crate::events::RecordingSink;
    use crate::library::Library;
    use crate::orchestrator::flow::TransitionKind;
    use approx::assert_relative_eq;

    fn track(id: &str, bpm: f64, key: &str) -> FeatureSnapshot {
        FeatureSnapshot::new(id).with_bpm(bpm).with_key(key.parse().unwrap())
    }

    fn anchored_flow() -> (Flow, SegmentId, SegmentId) {
        let mut flow = Flow::new();
        let a = flow.append(0, "left".into(), 0, 10_000, None).unwrap();
        let b = flow.append(0, "right".into(), 0, 10_000, None).unwrap();
        (flow, a, b)
    }

    /// Anchors far apart in tempo and key, so nothing bridges them well
    fn distant_library(extra: &[(&str, f64, &str)]) -> LibrarySnapshot {
        let mut lib = Library::new();
        lib.insert(track("left", 90.0, "1A"));
        lib.insert(track("right", 140.0, "7B"));
        for (id, bpm, key) in extra {
            lib.insert(track(id, *bpm, key));
        }
        lib.snapshot()
    }

    #[test]
    fn test_combinations() {
        assert_relative_eq!(BridgeCombination::HarmonicMean.combine(0.5, 1.0), 2.0 / 3.0);
        assert_relative_eq!(BridgeCombination::ArithmeticMean.combine(0.5, 1.0), 0.75);
        assert_eq!(BridgeCombination::Minimum.combine(0.5, 1.0), 0.5);
        assert_eq!(BridgeCombination::HarmonicMean.combine(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_good_library_candidate_is_used() {
        let mut lib = Library::new();
        lib.insert(track("left", 120.0, "8A"));
        lib.insert(track("right", 121.0, "9A"));
        lib.insert(track("far", 150.0, "2B"));
        lib.insert(track("close", 120.5, "8A"));
        let lib = lib.snapshot();
        let scorer = CompatibilityScorer::default();
        let config = BridgeConfig::default();
        let generator = Arc::new(MockBridgeGenerator::new());
        let (mut flow, a, b) = anchored_flow();

        let outcome = BridgeFinder::new(&lib, &scorer, &config)
            .with_generator(generator.clone())
            .find_bridge(&mut flow, a, b)
            .unwrap();

        assert_eq!(outcome.kind, BridgeKind::Library);
        assert_eq!(outcome.segment.track, TrackId::from("close"));
        assert_eq!(generator.request_count(), 0);
        // anchors touched: default length, right pushed back
        assert_eq!(outcome.segment.duration_ms(), 8_000);
        assert_eq!(flow.segment(b).unwrap().start_ms, 18_000);
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn test_low_scores_generate_a_bridge() {
        let lib = distant_library(&[("mid", 200.0, "4B")]);
        let scorer = CompatibilityScorer::default();
        let config = BridgeConfig::default();
        let generator = Arc::new(MockBridgeGenerator::new());
        let events = RecordingSink::new();
        let (mut flow, a, b) = anchored_flow();
        flow.move_segment(b, 16_000).unwrap();

        let outcome = BridgeFinder::new(&lib, &scorer, &config)
            .with_generator(generator.clone())
            .with_events(&events)
            .find_bridge(&mut flow, a, b)
            .unwrap();

        assert_eq!(outcome.kind, BridgeKind::Generated);
        assert_eq!(generator.request_count(), 1);
        assert_eq!(outcome.segment.duration_ms(), 6_000);
        assert_eq!(
            outcome.segment.transition.as_ref().unwrap().kind,
            TransitionKind::GeneratedBridge
        );
        let clip = flow.clip(&outcome.segment.track).unwrap();
        assert_eq!(clip.bpm, 115.0);
        assert!(flow.validate().is_ok());
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, Event::BridgeRequested { duration_ms: 6_000, .. })));
    }

    #[test]
    fn test_failed_generation_falls_back_to_best_candidate() {
        let lib = distant_library(&[("mid", 200.0, "4B")]);
        let scorer = CompatibilityScorer::default();
        let config = BridgeConfig::default();
        let generator = Arc::new(MockBridgeGenerator::new().failing("model crashed"));
        let (mut flow, a, b) = anchored_flow();

        let outcome = BridgeFinder::new(&lib, &scorer, &config)
            .with_generator(generator.clone())
            .find_bridge(&mut flow, a, b)
            .unwrap();

        assert_eq!(outcome.kind, BridgeKind::Fallback);
        assert_eq!(outcome.segment.track, TrackId::from("mid"));
        assert!(outcome.fallback_reason.unwrap().contains("model crashed"));
        assert!(outcome.request.is_some());
        assert_eq!(generator.request_count(), 1);
    }

    #[test]
    fn test_not_ready_generator_is_not_asked() {
        let lib = distant_library(&[("mid", 200.0, "4B")]);
        let scorer = CompatibilityScorer::default();
        let config = BridgeConfig::default();
        let generator = Arc::new(MockBridgeGenerator::new().with_readiness(Readiness::Initializing));
        let (mut flow, a, b) = anchored_flow();

        let outcome = BridgeFinder::new(&lib, &scorer, &config)
            .with_generator(generator.clone())
            .find_bridge(&mut flow, a, b)
            .unwrap();
        assert_eq!(outcome.kind, BridgeKind::Fallback);
        assert!(outcome.request.is_none());
        assert_eq!(generator.request_count(), 0);
    }

    #[test]
    fn test_no_candidate_and_no_generator_crossfades_directly() {
        let lib = distant_library(&[]);
        let scorer = CompatibilityScorer::default();
        let config = BridgeConfig::default();
        let (mut flow, a, b) = anchored_flow();
        let events = RecordingSink::new();

        let outcome = BridgeFinder::new(&lib, &scorer, &config)
            .with_events(&events)
            .find_bridge(&mut flow, a, b)
            .unwrap();

        assert_eq!(outcome.kind, BridgeKind::Direct);
        assert_eq!(outcome.segment.id, b);
        assert!(outcome.candidate.is_none());
        assert_eq!(flow.lead().segments.len(), 2);
        let transition = flow.segment(b).unwrap().transition.clone().unwrap();
        assert_eq!(transition.kind, TransitionKind::StraightCrossfade);
        assert_eq!(transition.duration_ms, config.transition_ms);
        assert!(flow.validate().is_ok());

        let reason = outcome.fallback_reason.unwrap();
        assert!(reason.starts_with("generator not configured"), "{}", reason);
        assert!(!reason.contains("Bridge unavailable"));
        assert!(events.events().iter().any(|e| matches!(
            e,
            Event::BridgeFallback { substitute: None, .. }
        )));
        assert!(!events.events().iter().any(|e| matches!(e, Event::BridgeInserted { .. })));
    }

    #[test]
    fn test_anchors_must_be_neighbours() {
        let lib = distant_library(&[]);
        let scorer = CompatibilityScorer::default();
        let config = BridgeConfig::default();
        let (mut flow, a, b) = anchored_flow();
        let result = BridgeFinder::new(&lib, &scorer, &config).find_bridge(&mut flow, b, a);
        assert!(matches!(result, Err(SegueError::InvalidFlow { .. })));
    }

    #[test]
    fn test_rank_candidates_skips_anchors() {
        let lib = distant_library(&[("x", 100.0, "1A"), ("y", 130.0, "7B")]);
        let scorer = CompatibilityScorer::default();
        let config = BridgeConfig::default();
        let finder = BridgeFinder::new(&lib, &scorer, &config);
        let ranked = finder.rank_candidates(lib.get(&"left".into()).unwrap(), lib.get(&"right".into()).unwrap());
        let ids: Vec<&str> = ranked.iter().map(|c| c.track.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"left") && !ids.contains(&"right"));
    }
}
