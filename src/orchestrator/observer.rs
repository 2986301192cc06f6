//! Progress notifications published by the orchestrator.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::session::SessionStats;

/// Something observable happened during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    SessionStarted {
        session_id: String,
        playlist_name: String,
        /// Tracks that will be dispatched in this run.
        to_process: usize,
        resumed: bool,
    },
    TrackSent {
        track_id: String,
        label: String,
    },
    TrackDownloading {
        track_id: String,
        label: String,
    },
    TrackCompleted {
        track_id: String,
        label: String,
        path: PathBuf,
        size: u64,
        /// An identical file was already present.
        duplicate: bool,
    },
    TrackFailed {
        track_id: String,
        label: String,
        reason: String,
    },
    TrackSkipped {
        track_id: String,
        label: String,
        reason: String,
    },
    BatchStarted {
        /// 1-based.
        index: usize,
        total_batches: usize,
        size: usize,
    },
    BatchFinished {
        index: usize,
        total_batches: usize,
        resolved: usize,
        size: usize,
    },
    Draining {
        in_flight: usize,
    },
    SessionFinished {
        stats: SessionStats,
    },
}

/// Receives [`ProgressEvent`]s. Called from the run loop and the event
/// pump; implementations must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}
