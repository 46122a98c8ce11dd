//! Flow model
//!
//! A flow is a set of lanes on one output timeline. Lane 0 is the lead lane;
//! further lanes are background layers. All times are integer milliseconds.
//!
//! Within a lane segments are sorted and disjoint (`end_i <= start_{i+1}`).
//! A segment's `transition` declares how it enters: the previous segment
//! keeps sounding for `transition.duration_ms` past its own end.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dsp::CurveFamily;
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};
use crate::library::{HarmonicKey, TrackId};

/// Stable segment identifier, unique within a flow
pub type SegmentId = u64;

/// Keyframes closer than this replace each other
const KEYFRAME_MERGE_MS: i64 = 10;

// ============================================================================
// Gain envelope
// ============================================================================

/// Gain automation point, relative to the segment start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub at_ms: i64,
    pub gain: f32,
}

/// Segment gain over time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GainEnvelope {
    Constant { gain: f32 },
    Automation { keyframes: Vec<Keyframe> },
}

impl Default for GainEnvelope {
    fn default() -> Self {
        GainEnvelope::Constant { gain: 1.0 }
    }
}

impl GainEnvelope {
    /// Linear gain at `relative_ms` from the segment start
    ///
    /// Automation interpolates linearly and holds beyond the first and last
    /// keyframes. An automation without keyframes is unity.
    pub fn gain_at(&self, relative_ms: f64) -> f32 {
        match self {
            GainEnvelope::Constant { gain } => *gain,
            GainEnvelope::Automation { keyframes } => {
                let (Some(first), Some(last)) = (keyframes.first(), keyframes.last()) else {
                    return 1.0;
                };
                if relative_ms <= first.at_ms as f64 {
                    return first.gain;
                }
                if relative_ms >= last.at_ms as f64 {
                    return last.gain;
                }
                for pair in keyframes.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    if relative_ms <= b.at_ms as f64 {
                        let span = (b.at_ms - a.at_ms) as f64;
                        if span <= 0.0 {
                            return b.gain;
                        }
                        let t = ((relative_ms - a.at_ms as f64) / span) as f32;
                        return a.gain + (b.gain - a.gain) * t;
                    }
                }
                last.gain
            }
        }
    }

    /// Add a keyframe, replacing any within 10 ms of it
    ///
    /// A constant envelope becomes an automation that starts from its value.
    pub fn add_keyframe(&mut self, at_ms: i64, gain: f32) {
        if let GainEnvelope::Constant { gain: constant } = *self {
            *self = GainEnvelope::Automation {
                keyframes: vec![Keyframe {
                    at_ms: 0,
                    gain: constant,
                }],
            };
        }
        if let GainEnvelope::Automation { keyframes } = self {
            keyframes.retain(|k| (k.at_ms - at_ms).abs() > KEYFRAME_MERGE_MS);
            keyframes.push(Keyframe { at_ms, gain });
            keyframes.sort_by_key(|k| k.at_ms);
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    StraightCrossfade,
    BandDuckedCrossfade,
    GeneratedBridge,
}

/// How a segment enters from its predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDescriptor {
    pub kind: TransitionKind,
    pub duration_ms: i64,
    pub curve: CurveFamily,
    /// Bass-swap crossover for band-ducked crossfades
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossover_hz: Option<f64>,
}

impl TransitionDescriptor {
    pub fn straight(duration_ms: i64) -> Self {
        Self {
            kind: TransitionKind::StraightCrossfade,
            duration_ms,
            curve: CurveFamily::EqualPower,
            crossover_hz: None,
        }
    }

    pub fn band_ducked(duration_ms: i64, crossover_hz: f64) -> Self {
        Self {
            kind: TransitionKind::BandDuckedCrossfade,
            duration_ms,
            curve: CurveFamily::EqualPower,
            crossover_hz: Some(crossover_hz),
        }
    }

    pub fn generated_bridge(duration_ms: i64) -> Self {
        Self {
            kind: TransitionKind::GeneratedBridge,
            duration_ms,
            curve: CurveFamily::EqualPower,
            crossover_hz: None,
        }
    }
}

// ============================================================================
// Segments and lanes
// ============================================================================

/// Accumulated trims; positive values mean content was trimmed away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimState {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Where a segment's audio comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentOrigin {
    #[default]
    Library,
    /// Clip produced by the bridge generator, held in the flow
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub track: TrackId,
    #[serde(default)]
    pub origin: SegmentOrigin,
    /// Position in the source audio that plays at `start_ms`
    pub source_offset_ms: i64,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(default)]
    pub gain: GainEnvelope,
    #[serde(default)]
    pub trim: TrimState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionDescriptor>,
}

impl Segment {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Incoming overlap window length (0 without a transition)
    pub fn transition_ms(&self) -> i64 {
        self.transition.as_ref().map_or(0, |t| t.duration_ms)
    }

    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        self.start_ms.max(start_ms) < self.end_ms.min(end_ms)
    }

    pub fn is_generated(&self) -> bool {
        self.origin == SegmentOrigin::Generated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneRole {
    Lead,
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub role: LaneRole,
    pub segments: Vec<Segment>,
}

impl Lane {
    pub fn new(role: LaneRole) -> Self {
        Self {
            role,
            segments: Vec::new(),
        }
    }

    pub fn end_ms(&self) -> i64 {
        self.segments.last().map_or(0, |s| s.end_ms)
    }

    pub fn start_ms(&self) -> i64 {
        self.segments.first().map_or(0, |s| s.start_ms)
    }

    fn validate(&self, lane: usize) -> Result<()> {
        for segment in &self.segments {
            if segment.end_ms <= segment.start_ms {
                return Err(invalid(format!("segment {} in lane {} is empty", segment.id, lane)));
            }
            if segment.source_offset_ms < 0 {
                return Err(invalid(format!(
                    "segment {} in lane {} starts before its source",
                    segment.id, lane
                )));
            }
            let transition = segment.transition_ms();
            if transition < 0 || transition > segment.duration_ms() {
                return Err(invalid(format!(
                    "segment {} transition of {} ms does not fit its {} ms",
                    segment.id,
                    transition,
                    segment.duration_ms()
                )));
            }
        }
        for pair in self.segments.windows(2) {
            if pair[0].end_ms > pair[1].start_ms {
                return Err(invalid(format!(
                    "segments {} and {} overlap in lane {}",
                    pair[0].id, pair[1].id, lane
                )));
            }
        }
        Ok(())
    }
}

/// Generated audio referenced by `Generated` segments
#[derive(Debug, Clone)]
pub struct GeneratedClip {
    pub buffer: Arc<AudioBuffer>,
    pub bpm: f64,
    pub key: Option<HarmonicKey>,
}

/// A generated clip as recorded in saved flow JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipFile {
    /// WAV file, relative to the flow file
    pub path: PathBuf,
    pub bpm: f64,
    #[serde(default)]
    pub key: Option<HarmonicKey>,
}

// ============================================================================
// Flow
// ============================================================================

/// Ordered, optionally layered plan for one render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    lanes: Vec<Lane>,
    next_segment_id: SegmentId,
    #[serde(skip)]
    clips: BTreeMap<TrackId, GeneratedClip>,
    /// Filled in when the flow is saved, see [`crate::orchestrator::save_flow`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    clip_files: BTreeMap<TrackId, ClipFile>,
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Flow {
    /// Compares the plan; generated clips are compared by track id only
    fn eq(&self, other: &Self) -> bool {
        self.lanes == other.lanes
            && self.next_segment_id == other.next_segment_id
            && self.clips.keys().eq(other.clips.keys())
    }
}

impl Flow {
    /// Empty flow with one lead lane
    pub fn new() -> Self {
        Self {
            lanes: vec![Lane::new(LaneRole::Lead)],
            next_segment_id: 1,
            clips: BTreeMap::new(),
            clip_files: BTreeMap::new(),
        }
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lead(&self) -> &Lane {
        &self.lanes[0]
    }

    pub fn lane(&self, index: usize) -> Option<&Lane> {
        self.lanes.get(index)
    }

    pub fn add_lane(&mut self, role: LaneRole) -> usize {
        self.lanes.push(Lane::new(role));
        self.lanes.len() - 1
    }

    /// Track ids of the lead lane in play order
    pub fn lead_tracks(&self) -> Vec<TrackId> {
        self.lead().segments.iter().map(|s| s.track.clone()).collect()
    }

    pub fn segment_count(&self) -> usize {
        self.lanes.iter().map(|l| l.segments.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_count() == 0
    }

    /// Output length: the latest segment end across lanes
    pub fn duration_ms(&self) -> i64 {
        self.lanes.iter().map(Lane::end_ms).max().unwrap_or(0)
    }

    /// All segments in lane order, then time order
    pub fn segments(&self) -> impl Iterator<Item = (usize, &Segment)> {
        self.lanes
            .iter()
            .enumerate()
            .flat_map(|(i, lane)| lane.segments.iter().map(move |s| (i, s)))
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.locate(id).map(|(l, i)| &self.lanes[l].segments[i])
    }

    /// (lane, index) of a segment
    pub fn locate(&self, id: SegmentId) -> Option<(usize, usize)> {
        self.lanes.iter().enumerate().find_map(|(l, lane)| {
            lane.segments.iter().position(|s| s.id == id).map(|i| (l, i))
        })
    }

    pub fn clip(&self, track: &TrackId) -> Option<&GeneratedClip> {
        self.clips.get(track)
    }

    pub fn add_clip(&mut self, track: TrackId, clip: GeneratedClip) {
        self.clips.insert(track, clip);
    }

    pub fn clips(&self) -> impl Iterator<Item = (&TrackId, &GeneratedClip)> {
        self.clips.iter()
    }

    pub fn clip_files(&self) -> &BTreeMap<TrackId, ClipFile> {
        &self.clip_files
    }

    pub(crate) fn set_clip_files(&mut self, files: BTreeMap<TrackId, ClipFile>) {
        self.clip_files = files;
    }

    /// Append a segment at the end of `lane`
    pub fn append(
        &mut self,
        lane: usize,
        track: TrackId,
        source_offset_ms: i64,
        duration_ms: i64,
        transition: Option<TransitionDescriptor>,
    ) -> Result<SegmentId> {
        let start_ms = self.lane_ref(lane)?.end_ms();
        self.place(lane, track, SegmentOrigin::Library, source_offset_ms, start_ms, duration_ms, transition)
    }

    /// Place a segment at an explicit start time, keeping the lane sorted
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &mut self,
        lane: usize,
        track: TrackId,
        origin: SegmentOrigin,
        source_offset_ms: i64,
        start_ms: i64,
        duration_ms: i64,
        transition: Option<TransitionDescriptor>,
    ) -> Result<SegmentId> {
        let id = self.next_segment_id;
        let segment = Segment {
            id,
            track,
            origin,
            source_offset_ms,
            start_ms,
            end_ms: start_ms + duration_ms,
            gain: GainEnvelope::default(),
            trim: TrimState::default(),
            transition,
        };
        self.edit_lane(lane, |segments| {
            let at = segments.partition_point(|s| s.start_ms <= start_ms);
            segments.insert(at, segment);
            Ok(())
        })?;
        self.next_segment_id += 1;
        Ok(id)
    }

    /// Insert a segment of `duration_ms` right after `after`, pushing later
    /// segments of the lane back as far as needed to keep it disjoint
    pub fn insert_after(
        &mut self,
        after: SegmentId,
        track: TrackId,
        origin: SegmentOrigin,
        duration_ms: i64,
        transition: Option<TransitionDescriptor>,
    ) -> Result<SegmentId> {
        let (lane, index) = self.locate(after).ok_or(SegueError::UnknownSegment { segment: after })?;
        let start_ms = self.lanes[lane].segments[index].end_ms;
        let end_ms = start_ms + duration_ms;
        let id = self.next_segment_id;
        self.edit_lane(lane, |segments| {
            if let Some(next) = segments.get(index + 1) {
                let shift = (end_ms - next.start_ms).max(0);
                for s in &mut segments[index + 1..] {
                    s.start_ms += shift;
                    s.end_ms += shift;
                }
            }
            segments.insert(
                index + 1,
                Segment {
                    id,
                    track,
                    origin,
                    source_offset_ms: 0,
                    start_ms,
                    end_ms,
                    gain: GainEnvelope::default(),
                    trim: TrimState::default(),
                    transition,
                },
            );
            Ok(())
        })?;
        self.next_segment_id += 1;
        Ok(id)
    }

    /// Move the start edge earlier by `delta_ms` (negative trims content away)
    ///
    /// The source offset moves with the edge so the audio stays anchored at
    /// the same output time.
    pub fn trim_start(&mut self, id: SegmentId, delta_ms: i64) -> Result<()> {
        self.edit_segment(id, |s| {
            if s.source_offset_ms - delta_ms < 0 {
                return Err(invalid(format!(
                    "cannot extend segment {} by {} ms: only {} ms of source before it",
                    s.id, delta_ms, s.source_offset_ms
                )));
            }
            s.start_ms -= delta_ms;
            s.source_offset_ms -= delta_ms;
            s.trim.start_ms -= delta_ms;
            Ok(())
        })
    }

    /// Move the end edge later by `delta_ms` (negative trims content away)
    pub fn trim_end(&mut self, id: SegmentId, delta_ms: i64) -> Result<()> {
        self.edit_segment(id, |s| {
            s.end_ms += delta_ms;
            s.trim.end_ms -= delta_ms;
            Ok(())
        })
    }

    /// Shift a segment to a new start time, keeping its duration
    pub fn move_segment(&mut self, id: SegmentId, start_ms: i64) -> Result<()> {
        let (lane, _) = self.locate(id).ok_or(SegueError::UnknownSegment { segment: id })?;
        self.edit_lane(lane, |segments| {
            if let Some(s) = segments.iter_mut().find(|s| s.id == id) {
                let duration = s.duration_ms();
                s.start_ms = start_ms;
                s.end_ms = start_ms + duration;
            }
            segments.sort_by_key(|s| s.start_ms);
            Ok(())
        })
    }

    pub fn remove_segment(&mut self, id: SegmentId) -> Result<Segment> {
        let (lane, index) = self.locate(id).ok_or(SegueError::UnknownSegment { segment: id })?;
        let removed = self.lanes[lane].segments.remove(index);
        if removed.is_generated() && !self.segments().any(|(_, s)| s.track == removed.track) {
            self.clips.remove(&removed.track);
            self.clip_files.remove(&removed.track);
        }
        Ok(removed)
    }

    /// Move the segment at `from` to position `to` in `lane`, re-packing
    /// start times from the lane's first start and keeping durations
    pub fn reorder(&mut self, lane: usize, from: usize, to: usize) -> Result<()> {
        self.edit_lane(lane, |segments| {
            if from >= segments.len() || to >= segments.len() {
                return Err(invalid(format!(
                    "reorder {} -> {} out of range for {} segments",
                    from,
                    to,
                    segments.len()
                )));
            }
            let origin = segments[0].start_ms;
            let segment = segments.remove(from);
            segments.insert(to, segment);
            let mut cursor = origin;
            for s in segments.iter_mut() {
                let duration = s.duration_ms();
                s.start_ms = cursor;
                s.end_ms = cursor + duration;
                cursor = s.end_ms;
            }
            Ok(())
        })
    }

    pub fn set_gain(&mut self, id: SegmentId, gain: GainEnvelope) -> Result<()> {
        self.edit_segment(id, |s| {
            s.gain = gain;
            Ok(())
        })
    }

    pub fn set_transition(&mut self, id: SegmentId, transition: Option<TransitionDescriptor>) -> Result<()> {
        self.edit_segment(id, |s| {
            s.transition = transition;
            Ok(())
        })
    }

    /// Check every lane invariant
    pub fn validate(&self) -> Result<()> {
        if self.lanes.is_empty() || self.lanes[0].role != LaneRole::Lead {
            return Err(invalid("lane 0 must be the lead lane".to_string()));
        }
        for (i, lane) in self.lanes.iter().enumerate() {
            lane.validate(i)?;
        }
        for (_, s) in self.segments() {
            if s.is_generated() && !self.clips.contains_key(&s.track) {
                return Err(invalid(format!("generated segment {} has no clip", s.id)));
            }
        }
        Ok(())
    }

    fn lane_ref(&self, lane: usize) -> Result<&Lane> {
        self.lanes
            .get(lane)
            .ok_or_else(|| invalid(format!("no lane {}", lane)))
    }

    /// Apply `edit` to one lane; the lane is restored if the result is invalid
    fn edit_lane<F>(&mut self, lane: usize, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Segment>) -> Result<()>,
    {
        self.lane_ref(lane)?;
        let backup = self.lanes[lane].segments.clone();
        let outcome = edit(&mut self.lanes[lane].segments).and_then(|_| self.lanes[lane].validate(lane));
        if outcome.is_err() {
            self.lanes[lane].segments = backup;
        }
        outcome
    }

    fn edit_segment<F>(&mut self, id: SegmentId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Segment) -> Result<()>,
    {
        let (lane, index) = self.locate(id).ok_or(SegueError::UnknownSegment { segment: id })?;
        self.edit_lane(lane, |segments| edit(&mut segments[index]))
    }
}

fn invalid(reason: String) -> SegueError {
    SegueError::InvalidFlow { reason }
}
