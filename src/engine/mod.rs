//! Audio Engine Module
//!
//! Core plumbing shared by the renderer and the orchestrator:
//! - Audio buffer management and level helpers
//! - File and in-memory audio sources
//! - Cooperative cancellation
//! - Render jobs on worker threads

pub mod buffer;
pub mod cancel;
pub mod io;
pub mod job;

pub use buffer::{AudioBuffer, ChannelLayout};
pub use cancel::CancelToken;
pub use io::{conform, read_wav, read_wav_bytes, sine_tone, write_wav, AudioSource, ExportFormat, MemorySource, WavSource};
pub use job::{spawn_render, JobState, RenderHandle};
