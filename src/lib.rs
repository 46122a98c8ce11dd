//! Segue - Harmonic Flow Assembly and Rendering
//!
//! Segue turns a library of short analysed clips into one continuous,
//! musically coherent stream:
//! 1. Compatibility scoring - tempo, Camelot-wheel key and embedding similarity
//! 2. Path orchestration - beam-search sequencing, smart bridges and background lanes
//! 3. Rendering - tempo/key alignment, beat-aligned loops, bass-swap transitions,
//!    fake-sidechain ducking and a master bus
//!
//! # Architecture
//!
//! Data flows one way:
//! - `library`: immutable feature snapshots
//! - `scoring`: pairwise compatibility
//! - `orchestrator`: builds and edits a [`Flow`](orchestrator::Flow)
//! - `render`: turns the flow into a waveform
//!
//! Deep components report through [`events::EventSink`] and never call back
//! into the interactive layer.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod library;
pub mod orchestrator;
pub mod render;
pub mod scoring;

pub use config::SegueConfig;
pub use error::{Result, SegueError};
pub use events::{Event, EventSink};
pub use library::{FeatureSnapshot, HarmonicKey, Library, LibrarySnapshot, TrackId};
pub use orchestrator::{Flow, OrchestratorSession};
pub use render::{DspRenderer, RenderConfig, RenderOutput};
pub use scoring::{CompatibilityScore, CompatibilityScorer};
