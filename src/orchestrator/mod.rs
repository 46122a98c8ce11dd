//! Path orchestration
//!
//! Turns library snapshots into a [`Flow`]:
//! - Beam search sequencing of the lead lane
//! - Smart bridge search between two fixed segments
//! - Background lanes under the lead
//! - Interactive edits with undo/redo
//! - Saving flows, generated clips included
//!
//! Long-running searches run on the [`OrchestratorSession`] worker.

pub mod bridge;
pub mod flow;
pub mod history;
pub mod layering;
pub mod persist;
pub mod search;
pub mod session;

pub use bridge::{BridgeCandidate, BridgeCombination, BridgeConfig, BridgeFinder, BridgeKind, BridgeOutcome};
pub use flow::{
    ClipFile, Flow, GainEnvelope, GeneratedClip, Keyframe, Lane, LaneRole, Segment, SegmentId, SegmentOrigin,
    TransitionDescriptor, TransitionKind, TrimState,
};
pub use history::{FlowEdit, FlowHistory, HistoryResult, MAX_UNDO_LEVELS};
pub use layering::{add_layers, LayeringConfig, LayeringOutcome};
pub use persist::{load_flow, save_flow};
pub use search::{
    build_flow, flow_from_sequence, search_sequence, search_sequence_with_progress, SearchConstraints,
    SearchOutcome,
};
pub use session::{OrchestratorSession, SearchRequest};

use crate::error::{Result, SegueError};
use crate::library::{FeatureSnapshot, LibrarySnapshot};

/// Features behind a segment: its library snapshot, or for a generated
/// segment the clip's tempo and key
pub(crate) fn segment_features(flow: &Flow, library: &LibrarySnapshot, segment: &Segment) -> Result<FeatureSnapshot> {
    if segment.is_generated() {
        let clip = flow.clip(&segment.track).ok_or_else(|| SegueError::InvalidFlow {
            reason: format!("generated segment {} has no clip", segment.id),
        })?;
        let mut features = FeatureSnapshot::new(segment.track.clone()).with_bpm(clip.bpm);
        features.key = clip.key;
        return Ok(features);
    }
    library
        .get(&segment.track)
        .cloned()
        .ok_or_else(|| SegueError::UnknownTrack {
            track: segment.track.to_string(),
        })
}
