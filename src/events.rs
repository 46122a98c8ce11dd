//! Notifications from the orchestrator and renderer
//!
//! Deep components never call back into whoever drives them. They publish
//! [`Event`]s to an [`EventSink`] and the interactive layer decides what to
//! do with them on its own thread.

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::engine::job::JobState;
use crate::library::TrackId;
use crate::orchestrator::{Flow, SearchOutcome, SegmentId};

/// Something the core wants the outside world to know
#[derive(Debug, Clone)]
pub enum Event {
    SearchStarted {
        search: u64,
        seed: TrackId,
    },
    SearchProgress {
        search: u64,
        depth: usize,
        of: usize,
        best: f64,
    },
    SearchCompleted {
        search: u64,
        outcome: SearchOutcome,
        flow: Flow,
    },
    /// Cancelled, usually because a newer search replaced it
    SearchAborted {
        search: u64,
    },
    SearchFailed {
        search: u64,
        error: String,
    },
    BridgeRequested {
        request: String,
        left: TrackId,
        right: TrackId,
        duration_ms: i64,
    },
    /// A generated bridge could not be used
    BridgeFallback {
        left: TrackId,
        right: TrackId,
        reason: String,
        /// Library track used instead, if any
        substitute: Option<TrackId>,
    },
    BridgeInserted {
        segment: SegmentId,
        track: TrackId,
        generated: bool,
    },
    RenderState {
        job: u64,
        state: JobState,
    },
    /// Non-fatal quality degradation during a render
    RenderWarning {
        job: u64,
        segment: SegmentId,
        track: TrackId,
        message: String,
    },
}

/// Receiver of core notifications
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}

/// Forwards events over an mpsc channel
///
/// A closed receiver is ignored; the producer keeps working.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Sender<Event>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Event>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: Event) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event);
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Calls a closure for each event
pub struct CallbackSink<F>
where
    F: Fn(&Event) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&Event) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn publish(&self, event: Event) {
        (self.callback)(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_channel_sink_forwards_and_survives_closed_receiver() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.publish(Event::SearchAborted { search: 3 });
        assert!(matches!(rx.recv().unwrap(), Event::SearchAborted { search: 3 }));
        drop(rx);
        sink.publish(Event::SearchAborted { search: 4 });
    }

    #[test]
    fn test_recording_and_callback_sinks() {
        let recording = RecordingSink::new();
        recording.publish(Event::SearchStarted {
            search: 1,
            seed: "a".into(),
        });
        assert_eq!(recording.len(), 1);

        let count = AtomicUsize::new(0);
        let sink = CallbackSink::new(|_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        sink.publish(Event::SearchAborted { search: 1 });
        sink.publish(Event::SearchAborted { search: 2 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
