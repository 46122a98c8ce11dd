//! Feature store and vector index contracts, with an in-memory library
//!
//! The ingestion side owns and mutates tracks. Everything downstream reads a
//! [`LibrarySnapshot`], captured once per scoring or render pass, so a track
//! changing mid-job never leaks into that job.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::track::{FeatureSnapshot, TrackId, TrackRecord};
use crate::error::{Result, SegueError};
use crate::scoring::cosine_similarity;

/// Read contract of the feature store
pub trait FeatureStore: Send + Sync {
    /// Look up one track
    fn get_track(&self, id: &TrackId) -> Result<FeatureSnapshot>;

    /// All tracks, in library insertion order
    fn list_tracks(&self) -> Vec<FeatureSnapshot>;
}

/// Similarity search over track embeddings
pub trait VectorIndex: Send + Sync {
    /// Up to `k` tracks ordered by descending cosine similarity to `vector`
    fn nearest_by_similarity(&self, vector: &[f32], k: usize) -> Vec<(TrackId, f32)>;
}

// ============================================================================
// Library
// ============================================================================

/// Mutable in-memory library
///
/// Preserves insertion order, which is the last tie-break when ranking.
#[derive(Debug, Default)]
pub struct Library {
    tracks: Vec<FeatureSnapshot>,
    positions: HashMap<TrackId, usize>,
    next_revision: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    Wrapped { tracks: Vec<TrackRecord> },
    Bare(Vec<TrackRecord>),
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON manifest: either `[{..}, ..]` or `{"tracks": [{..}, ..]}`
    ///
    /// Relative audio paths are resolved against the manifest's directory.
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SegueError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        })?;
        let records = match serde_json::from_str::<Manifest>(&text)? {
            Manifest::Wrapped { tracks } => tracks,
            Manifest::Bare(tracks) => tracks,
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut library = Library::new();
        for mut record in records {
            if let Some(audio) = record.path.take() {
                record.path = Some(if audio.is_relative() {
                    base.join(audio)
                } else {
                    audio
                });
            }
            library.upsert(record);
        }
        tracing::info!(tracks = library.len(), manifest = %path.display(), "library loaded");
        Ok(library)
    }

    /// Insert or replace a track; replacing keeps its original position
    pub fn upsert(&mut self, record: TrackRecord) -> &FeatureSnapshot {
        self.next_revision += 1;
        let snapshot = FeatureSnapshot::from_record(record, self.next_revision);
        self.insert_snapshot(snapshot)
    }

    /// Insert a prepared snapshot, stamping a fresh revision
    pub fn insert(&mut self, snapshot: FeatureSnapshot) -> &FeatureSnapshot {
        self.next_revision += 1;
        let snapshot = snapshot.with_revision(self.next_revision);
        self.insert_snapshot(snapshot)
    }

    fn insert_snapshot(&mut self, snapshot: FeatureSnapshot) -> &FeatureSnapshot {
        let idx = match self.positions.get(&snapshot.id) {
            Some(&idx) => {
                self.tracks[idx] = snapshot;
                idx
            }
            None => {
                self.positions.insert(snapshot.id.clone(), self.tracks.len());
                self.tracks.push(snapshot);
                self.tracks.len() - 1
            }
        };
        &self.tracks[idx]
    }

    /// Remove a track, returning its last snapshot
    pub fn remove(&mut self, id: &TrackId) -> Option<FeatureSnapshot> {
        let idx = self.positions.remove(id)?;
        let removed = self.tracks.remove(idx);
        for pos in self.positions.values_mut() {
            if *pos > idx {
                *pos -= 1;
            }
        }
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Freeze the current state for one scoring or render pass
    pub fn snapshot(&self) -> LibrarySnapshot {
        LibrarySnapshot::capture(self)
    }
}

impl FeatureStore for Library {
    fn get_track(&self, id: &TrackId) -> Result<FeatureSnapshot> {
        self.positions
            .get(id)
            .map(|&idx| self.tracks[idx].clone())
            .ok_or_else(|| SegueError::UnknownTrack {
                track: id.to_string(),
            })
    }

    fn list_tracks(&self) -> Vec<FeatureSnapshot> {
        self.tracks.clone()
    }
}

impl VectorIndex for Library {
    fn nearest_by_similarity(&self, vector: &[f32], k: usize) -> Vec<(TrackId, f32)> {
        nearest(&self.tracks, vector, k)
    }
}

// ============================================================================
// Library Snapshot
// ============================================================================

/// Immutable, cheaply clonable view of a library at one point in time
#[derive(Debug, Clone)]
pub struct LibrarySnapshot {
    tracks: Arc<[FeatureSnapshot]>,
    positions: Arc<HashMap<TrackId, usize>>,
}

impl LibrarySnapshot {
    /// Capture any feature store
    pub fn capture(store: &dyn FeatureStore) -> Self {
        let tracks = store.list_tracks();
        let positions = tracks
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.id.clone(), idx))
            .collect();
        Self {
            tracks: Arc::from(tracks),
            positions: Arc::new(positions),
        }
    }

    pub fn get(&self, id: &TrackId) -> Option<&FeatureSnapshot> {
        self.positions.get(id).map(|&idx| &self.tracks[idx])
    }

    /// Insertion position of a track, used as the final ranking tie-break
    pub fn position(&self, id: &TrackId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn tracks(&self) -> &[FeatureSnapshot] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl FeatureStore for LibrarySnapshot {
    fn get_track(&self, id: &TrackId) -> Result<FeatureSnapshot> {
        self.get(id).cloned().ok_or_else(|| SegueError::UnknownTrack {
            track: id.to_string(),
        })
    }

    fn list_tracks(&self) -> Vec<FeatureSnapshot> {
        self.tracks.to_vec()
    }
}

impl VectorIndex for LibrarySnapshot {
    fn nearest_by_similarity(&self, vector: &[f32], k: usize) -> Vec<(TrackId, f32)> {
        nearest(&self.tracks, vector, k)
    }
}

fn nearest(tracks: &[FeatureSnapshot], vector: &[f32], k: usize) -> Vec<(TrackId, f32)> {
    let mut hits: Vec<(usize, f32)> = tracks
        .iter()
        .enumerate()
        .filter_map(|(idx, t)| {
            let emb = t.embedding.as_ref()?;
            cosine_similarity(vector, emb).map(|sim| (idx, sim as f32))
        })
        .collect();
    // stable sort keeps insertion order among equal similarities
    hits.sort_by(|a, b| b.1.total_cmp(&a.1));
    hits.truncate(k);
    hits.into_iter()
        .map(|(idx, sim)| (tracks[idx].id.clone(), sim))
        .collect()
}
