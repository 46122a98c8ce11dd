//! Beam search sequencing
//!
//! Builds the lead lane from a seed track. Each step scores every partial
//! sequence's last track against the unused candidates, expands the best
//! `beam_width` successors of each, and keeps the `beam_width` partial
//! sequences with the highest cumulative score.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::flow::{Flow, TransitionDescriptor, TransitionKind};
use crate::engine::cancel::CancelToken;
use crate::error::{Result, SegueError};
use crate::library::{FeatureSnapshot, LibrarySnapshot, TrackId};
use crate::scoring::{rank_order, tie_bucket, CompatibilityScore, CompatibilityScorer};

/// Limits and layout for generated flows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConstraints {
    /// Partial sequences kept per depth
    pub beam_width: usize,
    /// A track may not repeat within this many previous positions
    pub no_repeat_window: usize,
    /// Tracks in the lead lane, seed included
    pub target_length: usize,
    /// Optional cap on the lead lane's total length
    pub max_duration_ms: Option<i64>,
    /// Output length of each lead segment
    pub segment_ms: i64,
    /// Overlap window at each junction
    pub transition_ms: i64,
    pub transition_kind: TransitionKind,
    /// Bass-swap crossover for band-ducked transitions
    pub crossover_hz: f64,
}

impl Default for SearchConstraints {
    fn default() -> Self {
        Self {
            beam_width: 4,
            no_repeat_window: 4,
            target_length: 8,
            max_duration_ms: None,
            segment_ms: 30_000,
            transition_ms: 4_000,
            transition_kind: TransitionKind::BandDuckedCrossfade,
            crossover_hz: 200.0,
        }
    }
}

impl SearchConstraints {
    pub fn validate(&self) -> Result<()> {
        let fail = |param: &str, value: String, expected: &str| {
            Err(SegueError::InvalidParameter {
                param: format!("search.{}", param),
                value,
                expected: expected.to_string(),
            })
        };
        if self.beam_width == 0 {
            return fail("beam_width", "0".to_string(), ">= 1");
        }
        if self.target_length == 0 {
            return fail("target_length", "0".to_string(), ">= 1");
        }
        if self.segment_ms <= 0 {
            return fail("segment_ms", self.segment_ms.to_string(), "> 0 ms");
        }
        if self.transition_ms < 0 || self.transition_ms > self.segment_ms {
            return fail(
                "transition_ms",
                self.transition_ms.to_string(),
                "between 0 and segment_ms",
            );
        }
        if self.transition_kind == TransitionKind::GeneratedBridge {
            return fail(
                "transition_kind",
                "generated_bridge".to_string(),
                "straight_crossfade or band_ducked_crossfade",
            );
        }
        if let Some(max) = self.max_duration_ms {
            if max <= 0 {
                return fail("max_duration_ms", max.to_string(), "> 0 ms");
            }
        }
        Ok(())
    }

    /// Number of lead segments allowed by length and duration budget
    pub fn effective_length(&self) -> usize {
        match self.max_duration_ms {
            Some(max) if self.segment_ms > 0 => {
                let fit = (max + self.segment_ms - 1) / self.segment_ms;
                self.target_length.min(fit.max(1) as usize)
            }
            _ => self.target_length,
        }
    }

    /// Transition used at every generated junction
    pub fn transition(&self) -> TransitionDescriptor {
        match self.transition_kind {
            TransitionKind::BandDuckedCrossfade => {
                TransitionDescriptor::band_ducked(self.transition_ms, self.crossover_hz)
            }
            _ => TransitionDescriptor::straight(self.transition_ms),
        }
    }
}

/// Winning sequence and the score of each junction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub tracks: Vec<TrackId>,
    pub junctions: Vec<CompatibilityScore>,
    pub cumulative: f64,
}

#[derive(Debug, Clone)]
struct Partial {
    /// Indices into the candidate pool
    path: Vec<usize>,
    junctions: Vec<CompatibilityScore>,
    cumulative: f64,
}

/// Find the best sequence starting at `seed`
///
/// Cancellation is checked between depths; on cancel nothing is returned
/// but `SearchAborted`. Stops early, with a warning, when the no-repeat
/// window leaves no candidate.
pub fn search_sequence(
    library: &LibrarySnapshot,
    scorer: &CompatibilityScorer,
    seed: &TrackId,
    constraints: &SearchConstraints,
    cancel: &CancelToken,
) -> Result<SearchOutcome> {
    search_sequence_with_progress(library, scorer, seed, constraints, cancel, &mut |_, _, _| {})
}

/// [`search_sequence`], calling `progress(depth, of, best)` after each depth
pub fn search_sequence_with_progress(
    library: &LibrarySnapshot,
    scorer: &CompatibilityScorer,
    seed: &TrackId,
    constraints: &SearchConstraints,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(usize, usize, f64),
) -> Result<SearchOutcome> {
    constraints.validate()?;
    let seed_track = library
        .get(seed)
        .ok_or_else(|| SegueError::UnknownTrack { track: seed.to_string() })?;
    seed_track.validate()?;

    let pool: Vec<&FeatureSnapshot> = library
        .tracks()
        .iter()
        .filter(|t| match t.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(track = %t.id, error = %e, "excluded from search");
                false
            }
        })
        .collect();
    let seed_index = pool
        .iter()
        .position(|t| t.id == *seed)
        .ok_or_else(|| SegueError::UnknownTrack { track: seed.to_string() })?;

    let eps = scorer.config().tie_epsilon;
    let width = constraints.beam_width;
    let length = constraints.effective_length();
    let mut beam = vec![Partial {
        path: vec![seed_index],
        junctions: Vec::new(),
        cumulative: 0.0,
    }];

    for depth in 1..length {
        if cancel.is_cancelled() {
            debug!(depth, "search cancelled");
            return Err(SegueError::SearchAborted);
        }

        let mut expansions: Vec<Partial> = Vec::new();
        for partial in &beam {
            let last = pool[partial.path[partial.path.len() - 1]];
            let recent = &partial.path[partial.path.len().saturating_sub(constraints.no_repeat_window)..];

            let mut scored: Vec<(usize, CompatibilityScore)> = pool
                .iter()
                .enumerate()
                .filter(|(i, _)| !recent.contains(i) && *i != partial.path[partial.path.len() - 1])
                .filter_map(|(i, c)| scorer.score(last, c).ok().map(|s| (i, s)))
                .collect();
            scored.sort_by(|a, b| rank_order(&a.1, &b.1, eps));

            for (index, score) in scored.into_iter().take(width) {
                let mut next = partial.clone();
                next.cumulative += score.total;
                next.path.push(index);
                next.junctions.push(score);
                expansions.push(next);
            }
        }

        if expansions.is_empty() {
            warn!(depth, "no candidates left outside the no-repeat window");
            break;
        }

        // stable: ties keep beam order, then per-parent rank order
        expansions.sort_by(|a, b| tie_bucket(b.cumulative, eps).cmp(&tie_bucket(a.cumulative, eps)));
        expansions.truncate(width);
        debug!(depth, best = expansions[0].cumulative, kept = expansions.len(), "search depth expanded");
        progress(depth, length - 1, expansions[0].cumulative);
        beam = expansions;
    }

    let best = beam.swap_remove(0);
    let outcome = SearchOutcome {
        tracks: best.path.iter().map(|&i| pool[i].id.clone()).collect(),
        junctions: best.junctions,
        cumulative: best.cumulative,
    };
    info!(
        seed = %seed,
        length = outcome.tracks.len(),
        cumulative = outcome.cumulative,
        "sequence found"
    );
    Ok(outcome)
}

/// Lay a track sequence out as the lead lane of a new flow
pub fn flow_from_sequence(tracks: &[TrackId], constraints: &SearchConstraints) -> Result<Flow> {
    let mut flow = Flow::new();
    for (i, track) in tracks.iter().enumerate() {
        let transition = if i == 0 || constraints.transition_ms == 0 {
            None
        } else {
            Some(constraints.transition())
        };
        flow.append(0, track.clone(), 0, constraints.segment_ms, transition)?;
    }
    Ok(flow)
}

/// `buildFlow`: search from `seed` and return the resulting flow
pub fn build_flow(
    library: &LibrarySnapshot,
    scorer: &CompatibilityScorer,
    seed: &TrackId,
    constraints: &SearchConstraints,
    cancel: &CancelToken,
) -> Result<Flow> {
    let outcome = search_sequence(library, scorer, seed, constraints, cancel)?;
    flow_from_sequence(&outcome.tracks, constraints)
}
