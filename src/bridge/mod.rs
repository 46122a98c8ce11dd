//! Bridge-generation collaborator
//!
//! When no library track connects two anchors well enough, the orchestrator
//! asks a [`BridgeGenerator`] for a short connective clip. Generators are
//! usually backed by a heavy model that loads in the background, so every
//! implementation reports a [`Readiness`] that callers check before asking.
//!
//! Implementations:
//! - [`MockBridgeGenerator`]: procedural riser with configurable latency
//!   and failure, used by tests and offline runs
//! - [`RemoteBridgeGenerator`]: HTTP generation service (feature
//!   `remote-bridge`)

mod mock;
mod remote;

pub use mock::MockBridgeGenerator;
pub use remote::{RemoteBridgeConfig, RemoteBridgeGenerator};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::library::{FeatureSnapshot, HarmonicKey};

/// Readiness of a model-backed collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    NotReady,
    Initializing,
    Ready,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::NotReady => "not ready",
            Readiness::Initializing => "initializing",
            Readiness::Ready => "ready",
        }
    }
}

/// Request for a generated clip joining two anchors
#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest {
    pub id: String,
    pub left: FeatureSnapshot,
    pub right: FeatureSnapshot,
    pub target_duration_ms: i64,
    /// Mean of the anchor tempos
    pub target_bpm: f64,
    /// The right anchor's key, so the bridge lands in the next track
    pub target_key: Option<HarmonicKey>,
}

impl BridgeRequest {
    /// Build a request between two anchors with usable BPM and key
    pub fn new(left: &FeatureSnapshot, right: &FeatureSnapshot, target_duration_ms: i64) -> Result<Self> {
        let (left_bpm, _) = left.musical_features()?;
        let (right_bpm, right_key) = right.musical_features()?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            left: left.clone(),
            right: right.clone(),
            target_duration_ms,
            target_bpm: (left_bpm + right_bpm) / 2.0,
            target_key: Some(right_key),
        })
    }

    /// Text prompt for prompt-driven generators
    pub fn prompt(&self) -> String {
        match &self.target_key {
            Some(key) => format!(
                "smooth transition riser from {} into {}, in {}, {:.0} bpm",
                self.left.title, self.right.title, key, self.target_bpm
            ),
            None => format!(
                "smooth transition riser from {} into {}, {:.0} bpm",
                self.left.title, self.right.title, self.target_bpm
            ),
        }
    }
}

/// External bridge-generation service
pub trait BridgeGenerator: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &str;

    /// Whether requests can be served right now
    fn readiness(&self) -> Readiness;

    /// Generate a clip for `request`
    ///
    /// May block for as long as generation takes; callers enforce their
    /// own timeout.
    fn request_bridge(&self, request: &BridgeRequest) -> Result<AudioBuffer>;
}
