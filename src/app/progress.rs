//! Progress UI (spinner) fed by orchestrator events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use relay_core::ProgressEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Counters shown in the spinner line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tally {
    pub(crate) total: usize,
    pub(crate) completed: usize,
    pub(crate) failed: usize,
    pub(crate) skipped: usize,
}

impl Tally {
    fn done(self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// Folds one event into the counters. Returns a line worth printing
    /// above the spinner, if any.
    pub(crate) fn apply(&mut self, event: &ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::SessionStarted {
                playlist_name,
                to_process,
                resumed,
                ..
            } => {
                self.total = *to_process;
                let verb = if *resumed { "Resuming" } else { "Starting" };
                Some(format!("{verb} \"{playlist_name}\": {to_process} tracks to process"))
            }
            ProgressEvent::TrackCompleted {
                label, duplicate, ..
            } => {
                self.completed += 1;
                let note = if *duplicate { " (already present)" } else { "" };
                Some(format!("✓ {label}{note}"))
            }
            ProgressEvent::TrackFailed { label, reason, .. } => {
                self.failed += 1;
                Some(format!("✗ {label}: {reason}"))
            }
            ProgressEvent::TrackSkipped { .. } => {
                self.skipped += 1;
                None
            }
            ProgressEvent::SessionFinished { stats } => Some(format!(
                "Done: {} completed, {} failed, {} skipped ({:.1}% success)",
                stats.completed, stats.failed, stats.skipped, stats.success_rate
            )),
            ProgressEvent::TrackSent { .. }
            | ProgressEvent::TrackDownloading { .. }
            | ProgressEvent::BatchStarted { .. }
            | ProgressEvent::BatchFinished { .. }
            | ProgressEvent::Draining { .. } => None,
        }
    }

    fn status_line(self, event: &ProgressEvent) -> String {
        let prefix = format!("[{}/{}]", self.done().min(self.total), self.total);
        match event {
            ProgressEvent::TrackSent { label, .. } => format!("{prefix} Sent {label}"),
            ProgressEvent::TrackDownloading { label, .. } => {
                format!("{prefix} Downloading {label}")
            }
            ProgressEvent::BatchStarted {
                index,
                total_batches,
                size,
            } => format!("{prefix} Batch {index}/{total_batches} ({size} tracks)"),
            ProgressEvent::Draining { in_flight } => {
                format!("{prefix} Waiting for {in_flight} in-flight tracks")
            }
            _ => format!("{prefix} Waiting for the bot..."),
        }
    }
}

/// Spawns the task that consumes `events`. Draws a spinner when
/// `use_spinner` is set; otherwise just drains the channel. The task ends
/// when the channel closes or the session finishes.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    mut events: UnboundedReceiver<ProgressEvent>,
) -> JoinHandle<Tally> {
    tokio::spawn(async move {
        let mut tally = Tally::default();
        let spinner = use_spinner.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });

        while let Some(event) = events.recv().await {
            let line = tally.apply(&event);
            if let Some(spinner) = &spinner {
                if let Some(line) = line {
                    spinner.println(line);
                }
                spinner.set_message(tally.status_line(&event));
            }
            if matches!(event, ProgressEvent::SessionFinished { .. }) {
                break;
            }
        }

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        tally
    })
}
