//! Background search worker
//!
//! Scoring and path search run on a dedicated thread fed by a command
//! channel. Results go back only as [`Event`]s. Starting a search cancels
//! the one in flight, and the worker runs searches one at a time, so at
//! most one search is ever active per session.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use super::layering::{add_layers, LayeringConfig};
use super::search::{flow_from_sequence, search_sequence_with_progress, SearchConstraints};
use crate::engine::cancel::CancelToken;
use crate::error::{Result, SegueError};
use crate::events::{Event, EventSink};
use crate::library::{LibrarySnapshot, TrackId};
use crate::scoring::CompatibilityScorer;

/// One search job
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub seed: TrackId,
    pub constraints: SearchConstraints,
    /// Background lanes to add after the lead lane is built
    pub layering: Option<LayeringConfig>,
}

impl SearchRequest {
    pub fn new(seed: impl Into<TrackId>) -> Self {
        Self {
            seed: seed.into(),
            constraints: SearchConstraints::default(),
            layering: None,
        }
    }

    pub fn with_constraints(mut self, constraints: SearchConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_layering(mut self, layering: LayeringConfig) -> Self {
        self.layering = Some(layering);
        self
    }
}

enum Command {
    Search {
        id: u64,
        request: SearchRequest,
        library: Arc<LibrarySnapshot>,
        cancel: CancelToken,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
struct ActiveSearch {
    id: u64,
    cancel: CancelToken,
}

type ActiveHandle = Arc<Mutex<Option<ActiveSearch>>>;

/// Handle to the search worker
pub struct OrchestratorSession {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    active: ActiveHandle,
    library: Arc<LibrarySnapshot>,
    next_id: u64,
}

impl OrchestratorSession {
    /// Start the worker thread
    pub fn new(library: LibrarySnapshot, scorer: CompatibilityScorer, events: Arc<dyn EventSink>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let active: ActiveHandle = Arc::new(Mutex::new(None));
        let worker_active = Arc::clone(&active);
        let worker = thread::Builder::new()
            .name("segue-search".to_string())
            .spawn(move || run_worker(rx, scorer, events, worker_active))?;

        Ok(Self {
            tx,
            worker: Some(worker),
            active,
            library: Arc::new(library),
            next_id: 1,
        })
    }

    /// Replace the snapshot used by later searches
    ///
    /// Searches already queued keep the snapshot they started with.
    pub fn set_library(&mut self, library: LibrarySnapshot) {
        self.library = Arc::new(library);
    }

    /// Queue a search, cancelling the one in flight; returns its id
    pub fn start_search(&mut self, request: SearchRequest) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancelToken::new();

        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.replace(ActiveSearch {
                id,
                cancel: cancel.clone(),
            }) {
                debug!(search = previous.id, replaced_by = id, "cancelling search");
                previous.cancel.cancel();
            }
        }

        self.tx
            .send(Command::Search {
                id,
                request,
                library: Arc::clone(&self.library),
                cancel,
            })
            .map_err(|_| SegueError::ProcessingError {
                reason: "search worker has stopped".to_string(),
            })?;
        Ok(id)
    }

    /// Cancel the active search, if any
    pub fn cancel(&self) {
        if let Ok(active) = self.active.lock() {
            if let Some(search) = active.as_ref() {
                search.cancel.cancel();
            }
        }
    }

    /// Id of the most recently started search that has not finished
    pub fn active_search(&self) -> Option<u64> {
        self.active.lock().ok().and_then(|a| a.as_ref().map(|s| s.id))
    }

    /// Cancel outstanding work and wait for the worker to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel();
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for OrchestratorSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(rx: Receiver<Command>, scorer: CompatibilityScorer, events: Arc<dyn EventSink>, active: ActiveHandle) {
    while let Ok(command) = rx.recv() {
        let (id, request, library, cancel) = match command {
            Command::Search {
                id,
                request,
                library,
                cancel,
            } => (id, request, library, cancel),
            Command::Shutdown => break,
        };

        events.publish(Event::SearchStarted {
            search: id,
            seed: request.seed.clone(),
        });
        let event = match run_search(id, &request, &library, &scorer, &cancel, events.as_ref()) {
            Ok(event) => event,
            Err(SegueError::SearchAborted) => {
                info!(search = id, "search aborted");
                Event::SearchAborted { search: id }
            }
            Err(e) => Event::SearchFailed {
                search: id,
                error: e.to_string(),
            },
        };

        if let Ok(mut current) = active.lock() {
            if current.as_ref().map(|s| s.id) == Some(id) {
                *current = None;
            }
        }
        events.publish(event);
    }
    debug!("search worker stopped");
}

fn run_search(
    id: u64,
    request: &SearchRequest,
    library: &LibrarySnapshot,
    scorer: &CompatibilityScorer,
    cancel: &CancelToken,
    events: &dyn EventSink,
) -> Result<Event> {
    let outcome = search_sequence_with_progress(
        library,
        scorer,
        &request.seed,
        &request.constraints,
        cancel,
        &mut |depth, of, best| {
            events.publish(Event::SearchProgress {
                search: id,
                depth,
                of,
                best,
            })
        },
    )?;
    let mut flow = flow_from_sequence(&outcome.tracks, &request.constraints)?;
    if let Some(layering) = &request.layering {
        add_layers(&mut flow, library, scorer, layering, cancel)?;
    }
    if cancel.is_cancelled() {
        return Err(SegueError::SearchAborted);
    }
    Ok(Event::SearchCompleted {
        search: id,
        outcome,
        flow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelSink;
    use crate::library::{FeatureSnapshot, Library};
    use std::time::Duration;

    fn library() -> LibrarySnapshot {
        let mut lib = Library::new();
        for (i, key) in ["8A", "9A", "7A", "8B", "10A", "6A"].iter().enumerate() {
            lib.insert(
                FeatureSnapshot::new(format!("t{}", i))
                    .with_bpm(120.0 + i as f64 * 0.5)
                    .with_key(key.parse().unwrap()),
            );
        }
        lib.snapshot()
    }

    fn terminal(event: &Event) -> Option<u64> {
        match event {
            Event::SearchCompleted { search, .. }
            | Event::SearchAborted { search }
            | Event::SearchFailed { search, .. } => Some(*search),
            _ => None,
        }
    }

    fn collect_until_done(rx: &Receiver<Event>, last: u64) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            let done = terminal(&event) == Some(last);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[test]
    fn test_search_completes_with_flow() {
        let (tx, rx) = mpsc::channel();
        let mut session =
            OrchestratorSession::new(library(), CompatibilityScorer::default(), Arc::new(ChannelSink::new(tx))).unwrap();
        let id = session
            .start_search(SearchRequest::new("t0").with_constraints(SearchConstraints {
                target_length: 4,
                ..Default::default()
            }))
            .unwrap();

        let events = collect_until_done(&rx, id);
        match events.last().unwrap() {
            Event::SearchCompleted { flow, outcome, .. } => {
                assert_eq!(outcome.tracks.len(), 4);
                assert_eq!(flow.lead().segments.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(events.iter().any(|e| matches!(e, Event::SearchProgress { depth: 3, of: 3, .. })));
        session.shutdown();
    }

    #[test]
    fn test_new_search_replaces_old_one() {
        let (tx, rx) = mpsc::channel();
        let mut session =
            OrchestratorSession::new(library(), CompatibilityScorer::default(), Arc::new(ChannelSink::new(tx))).unwrap();
        let first = session.start_search(SearchRequest::new("t0")).unwrap();
        let second = session.start_search(SearchRequest::new("t3")).unwrap();
        assert_ne!(session.active_search(), Some(first));

        let events = collect_until_done(&rx, second);
        let first_end = events.iter().position(|e| terminal(e) == Some(first)).unwrap();
        let second_start = events
            .iter()
            .position(|e| matches!(e, Event::SearchStarted { search, .. } if *search == second))
            .unwrap();
        assert!(first_end < second_start, "searches overlapped");
        assert!(matches!(events.last().unwrap(), Event::SearchCompleted { .. }));
    }

    #[test]
    fn test_unknown_seed_reports_failure() {
        let (tx, rx) = mpsc::channel();
        let mut session =
            OrchestratorSession::new(library(), CompatibilityScorer::default(), Arc::new(ChannelSink::new(tx))).unwrap();
        let id = session.start_search(SearchRequest::new("missing")).unwrap();
        let events = collect_until_done(&rx, id);
        assert!(matches!(events.last().unwrap(), Event::SearchFailed { .. }));
    }
}
