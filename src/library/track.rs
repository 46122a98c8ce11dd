//! Track records and feature snapshots
//!
//! `TrackRecord` is the raw, nullable shape a feature store hands over.
//! `FeatureSnapshot` is the read-only view the scorer and renderer work on:
//! defaults for absent values are applied exactly once, in
//! [`FeatureSnapshot::from_record`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::key::HarmonicKey;
use crate::error::{Result, SegueError};

/// Stable track identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        TrackId(value.to_string())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        TrackId(value)
    }
}

/// Raw track record as stored by the ingestion side
///
/// Every analysed value may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Camelot code or note name, see [`HarmonicKey`]'s `FromStr`
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub energy: Option<f32>,
    #[serde(default)]
    pub onsets_ms: Option<Vec<f64>>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Immutable view of one track's analysed features
///
/// Cloning is cheap: the onset list and embedding are shared. Two snapshots
/// are never compared by value; use [`FeatureSnapshot::same_revision`].
#[derive(Debug, Clone, Serialize)]
pub struct FeatureSnapshot {
    pub id: TrackId,
    pub title: String,
    pub path: Option<PathBuf>,
    pub duration_ms: f64,
    pub sample_rate: u32,
    pub bpm: Option<f64>,
    pub key: Option<HarmonicKey>,
    /// Energy summary; an absent value ranks as 0
    pub energy: f32,
    pub onsets_ms: Arc<[f64]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Arc<[f32]>>,
    /// Bumped by the store on every change to this track
    pub revision: u64,
}

impl FeatureSnapshot {
    /// Create a snapshot with no analysed features
    pub fn new(id: impl Into<TrackId>) -> Self {
        let id = id.into();
        Self {
            title: id.0.clone(),
            id,
            path: None,
            duration_ms: 0.0,
            sample_rate: crate::engine::buffer::DEFAULT_SAMPLE_RATE,
            bpm: None,
            key: None,
            energy: 0.0,
            onsets_ms: Arc::from(Vec::new()),
            embedding: None,
            revision: 0,
        }
    }

    /// Build a snapshot from a raw record, applying defaults once
    ///
    /// An unparseable key string is treated as absent, which leaves the
    /// track out of scoring rather than guessing a key.
    pub fn from_record(record: TrackRecord, revision: u64) -> Self {
        let key = record.key.as_deref().and_then(|text| match text.parse() {
            Ok(key) => Some(key),
            Err(_) => {
                tracing::warn!(track = %record.id, key = text, "unparseable key, treating as absent");
                None
            }
        });

        let mut onsets = record.onsets_ms.unwrap_or_default();
        onsets.retain(|t| t.is_finite() && *t >= 0.0);
        onsets.sort_by(f64::total_cmp);
        onsets.dedup();

        Self {
            title: record.title.unwrap_or_else(|| record.id.clone()),
            id: TrackId(record.id),
            path: record.path,
            duration_ms: record.duration_ms.filter(|d| d.is_finite()).unwrap_or(0.0).max(0.0),
            sample_rate: record
                .sample_rate
                .unwrap_or(crate::engine::buffer::DEFAULT_SAMPLE_RATE),
            bpm: record.bpm,
            key,
            energy: record.energy.filter(|e| e.is_finite()).unwrap_or(0.0),
            onsets_ms: Arc::from(onsets),
            embedding: record.embedding.filter(|e| !e.is_empty()).map(Arc::from),
            revision,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn with_key(mut self, key: HarmonicKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_energy(mut self, energy: f32) -> Self {
        self.energy = energy;
        self
    }

    pub fn with_onsets(mut self, mut onsets_ms: Vec<f64>) -> Self {
        onsets_ms.sort_by(f64::total_cmp);
        self.onsets_ms = Arc::from(onsets_ms);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(Arc::from(embedding));
        self
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// BPM and key, or `InvalidFeature` if either is missing or unusable
    pub fn musical_features(&self) -> Result<(f64, HarmonicKey)> {
        let bpm = match self.bpm {
            Some(bpm) if bpm.is_finite() && bpm > 0.0 => bpm,
            Some(bpm) => return Err(self.invalid(format!("BPM {} is not a positive finite number", bpm))),
            None => return Err(self.invalid("missing BPM".to_string())),
        };
        let key = self.key.ok_or_else(|| self.invalid("missing key".to_string()))?;
        Ok((bpm, key))
    }

    /// Check the track is usable for scoring
    pub fn validate(&self) -> Result<()> {
        self.musical_features().map(|_| ())
    }

    /// True if both snapshots describe the same revision of the same track
    pub fn same_revision(&self, other: &FeatureSnapshot) -> bool {
        self.id == other.id && self.revision == other.revision
    }

    /// Duration of one beat in milliseconds, if the BPM is usable
    pub fn beat_ms(&self) -> Option<f64> {
        self.bpm
            .filter(|b| b.is_finite() && *b > 0.0)
            .map(|b| 60_000.0 / b)
    }

    fn invalid(&self, reason: String) -> SegueError {
        SegueError::InvalidFeature {
            track: self.id.to_string(),
            reason,
        }
    }
}
