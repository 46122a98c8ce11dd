//! Render jobs
//!
//! A render runs as one bounded job on its own thread, working on the
//! library snapshot and flow it was handed at spawn time. The state
//! machine is `Pending → Rendering { segment, of } → Committed`, with
//! `Failed` and `Cancelled` as the other terminal states. Every change is
//! published as an [`Event::RenderState`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{error, info};

use super::cancel::CancelToken;
use super::io::AudioSource;
use crate::error::{Result, SegueError};
use crate::events::{Event, EventSink};
use crate::library::LibrarySnapshot;
use crate::orchestrator::Flow;
use crate::render::{DspRenderer, RenderOutput};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Render job state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    /// `segment` segments of `of` are finished
    Rendering { segment: usize, of: usize },
    Committed,
    Failed { error: String },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Committed | JobState::Failed { .. } | JobState::Cancelled)
    }
}

/// Handle to a running render job
pub struct RenderHandle {
    id: u64,
    state: Arc<Mutex<JobState>>,
    cancel: CancelToken,
    worker: JoinHandle<Result<RenderOutput>>,
}

impl RenderHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| JobState::Failed {
                error: "job state poisoned".to_string(),
            })
    }

    /// Request cancellation at the next segment boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the job and take its output
    pub fn join(self) -> Result<RenderOutput> {
        self.worker.join().map_err(|_| SegueError::ProcessingError {
            reason: format!("render job {} panicked", self.id),
        })?
    }
}

/// Start rendering `flow` on a worker thread
pub fn spawn_render(
    renderer: Arc<DspRenderer>,
    flow: Flow,
    library: LibrarySnapshot,
    source: Arc<dyn AudioSource>,
    events: Arc<dyn EventSink>,
) -> Result<RenderHandle> {
    let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
    let state = Arc::new(Mutex::new(JobState::Pending));
    let cancel = CancelToken::new();
    events.publish(Event::RenderState {
        job: id,
        state: JobState::Pending,
    });

    let worker_state = Arc::clone(&state);
    let worker_cancel = cancel.clone();
    let worker = thread::Builder::new()
        .name(format!("segue-render-{}", id))
        .spawn(move || {
            let set = |next: JobState| {
                if let Ok(mut current) = worker_state.lock() {
                    *current = next.clone();
                }
                events.publish(Event::RenderState { job: id, state: next });
            };

            set(JobState::Rendering {
                segment: 0,
                of: flow.segment_count(),
            });
            let result = renderer.render_with(&flow, &library, source.as_ref(), &worker_cancel, &mut |done, of| {
                set(JobState::Rendering { segment: done, of })
            });

            match &result {
                Ok(output) => {
                    for warning in &output.warnings {
                        events.publish(Event::RenderWarning {
                            job: id,
                            segment: warning.segment,
                            track: warning.track.clone(),
                            message: warning.message.clone(),
                        });
                    }
                    info!(job = id, "render job committed");
                    set(JobState::Committed);
                }
                Err(SegueError::RenderCancelled) => {
                    info!(job = id, "render job cancelled");
                    set(JobState::Cancelled);
                }
                Err(e) => {
                    error!(job = id, error = %e, "render job failed");
                    set(JobState::Failed { error: e.to_string() });
                }
            }
            result
        })?;

    Ok(RenderHandle {
        id,
        state,
        cancel,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::{sine_tone, MemorySource};
    use crate::events::RecordingSink;
    use crate::library::{FeatureSnapshot, Library};
    use crate::render::RenderConfig;

    fn inputs() -> (Flow, LibrarySnapshot, Arc<dyn AudioSource>) {
        let mut lib = Library::new();
        lib.insert(FeatureSnapshot::new("a").with_bpm(120.0));
        let source = MemorySource::new().with("a", sine_tone(440.0, 1000.0, 44100, 2));
        let mut flow = Flow::new();
        flow.append(0, "a".into(), 0, 500, None).unwrap();
        flow.append(0, "a".into(), 500, 500, None).unwrap();
        (flow, lib.snapshot(), Arc::new(source))
    }

    fn states(sink: &RecordingSink, job: u64) -> Vec<JobState> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::RenderState { job: j, state } if j == job => Some(state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_job_walks_through_states() {
        let (flow, lib, source) = inputs();
        let sink = Arc::new(RecordingSink::new());
        let renderer = Arc::new(DspRenderer::new(RenderConfig::default()).unwrap());
        let handle = spawn_render(renderer, flow, lib, source, sink.clone()).unwrap();
        let id = handle.id();
        let output = handle.join().unwrap();
        assert_eq!(output.fingerprint.len(), 64);

        assert_eq!(
            states(&sink, id),
            vec![
                JobState::Pending,
                JobState::Rendering { segment: 0, of: 2 },
                JobState::Rendering { segment: 1, of: 2 },
                JobState::Rendering { segment: 2, of: 2 },
                JobState::Committed,
            ]
        );
    }

    #[test]
    fn test_failed_job_reports_error() {
        let (flow, lib, _) = inputs();
        let sink = Arc::new(RecordingSink::new());
        let renderer = Arc::new(DspRenderer::new(RenderConfig::default()).unwrap());
        let handle = spawn_render(renderer, flow, lib, Arc::new(MemorySource::new()), sink.clone()).unwrap();
        let id = handle.id();
        assert!(matches!(handle.join(), Err(SegueError::RenderIo { .. })));
        let last = states(&sink, id).pop().unwrap();
        assert!(matches!(last, JobState::Failed { .. }));
        assert!(last.is_terminal());
    }
}
