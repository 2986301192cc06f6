//! Inbound event handling: the task that turns bot replies into track
//! state changes.
//!
//! Every event is correlated the moment it arrives. Downloads and option
//! replies then run as tasks of their own so a slow transfer never holds
//! back the replies queued behind it.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::correlation::{BotEvent, CorrelationEngine, Disposition, FileMatch, PendingRequest};
use crate::organizer::{FileOrganizer, MAX_FILENAME_LEN, MoveOutcome, sanitize_component};
use crate::pacing::SendPacer;
use crate::session::{SessionError, SessionTracker, TrackStatus};
use crate::track::Track;
use crate::transport::{Transport, TransportError};

use super::observer::{ProgressEvent, ProgressObserver};
use super::retry::{RetryDecision, SendRetryPolicy};

pub(crate) const NOT_FOUND_REASON: &str = "Bot reported no results";
pub(crate) const NO_RESPONSE_REASON: &str = "No response from bot";

/// Shared state for the event pump and the run loop.
pub(crate) struct EventContext {
    pub(crate) engine: Arc<CorrelationEngine>,
    pub(crate) tracker: Arc<SessionTracker>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) organizer: Arc<FileOrganizer>,
    pub(crate) observer: Arc<dyn ProgressObserver>,
    pub(crate) pacer: Arc<SendPacer>,
    pub(crate) retry: SendRetryPolicy,
    pub(crate) bot: String,
    pub(crate) download_timeout: Duration,
    fatal: Mutex<Option<SessionError>>,
}

impl EventContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine: Arc<CorrelationEngine>,
        tracker: Arc<SessionTracker>,
        transport: Arc<dyn Transport>,
        organizer: Arc<FileOrganizer>,
        observer: Arc<dyn ProgressObserver>,
        pacer: Arc<SendPacer>,
        retry: SendRetryPolicy,
        bot: String,
        download_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            tracker,
            transport,
            organizer,
            observer,
            pacer,
            retry,
            bot,
            download_timeout,
            fatal: Mutex::new(None),
        }
    }

    /// First persistence failure seen by the pump, if any.
    pub(crate) fn take_fatal(&self) -> Option<SessionError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Applies a tracker result. Rejected transitions are logged and
    /// dropped; storage failures are kept for the run loop to abort on.
    fn record(&self, result: Result<(), SessionError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err @ (SessionError::InvalidTransition { .. } | SessionError::UnknownTrack { .. })) => {
                warn!(error = %err, "ignoring late update");
                false
            }
            Err(err) => {
                error!(error = %err, "could not persist progress");
                let mut slot = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
                slot.get_or_insert(err);
                false
            }
        }
    }

    pub(crate) fn fail_track(&self, track_id: &str, label: &str, reason: &str) {
        if self.record(self.tracker.mark_failed(track_id, reason)) {
            self.observer.on_event(&ProgressEvent::TrackFailed {
                track_id: track_id.to_string(),
                label: label.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    /// Runs `attempt` under the send pacer, retrying flood waits and
    /// transient errors per the retry policy. Returns the last error once
    /// the policy gives up.
    pub(crate) async fn send_paced<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut number = 1;
        loop {
            self.pacer.acquire().await;
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match self.retry.should_retry(&err, number) {
                RetryDecision::Retry { delay, attempt: next } => {
                    if let Some(wait) = err.flood_wait_duration() {
                        self.pacer.record_flood_wait(wait);
                    }
                    warn!(
                        track = %label,
                        error = %err,
                        delay_secs = delay.as_secs_f64(),
                        attempt = next,
                        "send failed, retrying"
                    );
                    sleep(delay).await;
                    number = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(track = %label, reason, "giving up on send");
                    return Err(err);
                }
            }
        }
    }

    /// Correlates one inbound event and starts whatever work it needs.
    ///
    /// State changes that answer the event happen here, before returning;
    /// only the transfer and the option reply are handed to `tasks`.
    fn route(self: &Arc<Self>, event: BotEvent, tasks: &mut JoinSet<()>) {
        match self.engine.dispatch(&event) {
            Disposition::File(matched) => {
                if let Some(job) = self.begin_download(&event, matched) {
                    let ctx = Arc::clone(self);
                    tasks.spawn(async move { ctx.finish_download(&event, job).await });
                }
            }
            Disposition::Options(request) => {
                let ctx = Arc::clone(self);
                tasks.spawn(async move { ctx.handle_options(&event, request).await });
            }
            Disposition::NotFound(request) => {
                info!(track = %request.label, "bot has no results");
                self.fail_track(&request.track.id, &request.label, NOT_FOUND_REASON);
            }
            Disposition::Text => {
                debug!(message_id = event.message_id, text = ?event.text, "bot message");
            }
            Disposition::Unmatched(kind) => {
                warn!(message_id = event.message_id, ?kind, "unmatched bot event");
                self.engine.trim_overflow();
            }
        }
    }

    async fn handle_options(&self, event: &BotEvent, request: PendingRequest) {
        debug!(
            track = %request.label,
            options = event.options.len(),
            "selecting first option"
        );
        let ctx = self;
        let selected = self
            .send_paced(&request.label, move || ctx.transport.select_option(&ctx.bot, event, 0))
            .await;
        if let Err(err) = selected {
            self.engine.cancel(&request.token);
            self.fail_track(
                &request.track.id,
                &request.label,
                &format!("Failed to select option: {err}"),
            );
        }
    }

    /// Marks the matched track DOWNLOADING. Returns `None` when the track
    /// was already resolved elsewhere.
    fn begin_download(&self, event: &BotEvent, matched: FileMatch) -> Option<DownloadJob> {
        let FileMatch { request, score } = matched;
        let attachment = event.file.as_ref()?;
        let label = request.label;

        match score {
            Some(score) => info!(track = %label, score, "file matched by content"),
            None => info!(track = %label, "file matched by arrival order"),
        }

        if !self.record(self.tracker.mark_downloading(&request.track.id)) {
            return None;
        }
        self.observer.on_event(&ProgressEvent::TrackDownloading {
            track_id: request.track.id.clone(),
            label: label.clone(),
        });

        let filename = attachment.effective_name(&label);
        let temp_path = self.organizer.temp_dir().join(format!(
            "{}_{}",
            request.token,
            sanitize_component(&filename, MAX_FILENAME_LEN)
        ));
        Some(DownloadJob {
            track: request.track,
            label,
            filename,
            temp_path,
        })
    }

    async fn finish_download(&self, event: &BotEvent, job: DownloadJob) {
        let DownloadJob {
            track,
            label,
            filename,
            temp_path,
        } = job;

        if let Err(reason) = self.download(event, &temp_path).await {
            remove_partial(&temp_path).await;
            self.fail_track(&track.id, &label, &reason);
            return;
        }

        // A batch timeout may have failed the track while it transferred.
        let status = self.tracker.status_of(&track.id);
        if status != Some(TrackStatus::Downloading) {
            info!(track = %label, ?status, "track resolved during download, discarding file");
            remove_partial(&temp_path).await;
            return;
        }

        let organizer = Arc::clone(&self.organizer);
        let move_track = track.clone();
        let move_from = temp_path.clone();
        let placed = tokio::task::spawn_blocking(move || {
            organizer.move_to_organized_location(&move_from, &move_track, Some(filename.as_str()))
        })
        .await;

        let outcome: Result<MoveOutcome, String> = match placed {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => Err(format!("Could not organize file: {err}")),
            Err(join) => Err(format!("Could not organize file: {join}")),
        };

        match outcome {
            Ok(outcome) => {
                let completed = self.tracker.mark_completed(&track.id, &outcome.final_path, outcome.size);
                if self.record(completed) {
                    self.observer.on_event(&ProgressEvent::TrackCompleted {
                        track_id: track.id.clone(),
                        label,
                        path: outcome.final_path,
                        size: outcome.size,
                        duplicate: outcome.already_existed,
                    });
                }
            }
            Err(reason) => {
                remove_partial(&temp_path).await;
                self.fail_track(&track.id, &label, &reason);
            }
        }
    }

    async fn download(&self, event: &BotEvent, dest: &Path) -> Result<u64, String> {
        match tokio::time::timeout(self.download_timeout, self.transport.download(event, dest)).await {
            Ok(Ok(0)) => Err("Downloaded file is empty".to_string()),
            Ok(Ok(size)) => {
                debug!(path = %dest.display(), size, "download finished");
                Ok(size)
            }
            Ok(Err(err)) => Err(format!("Download failed: {err}")),
            Err(_) => Err(format!(
                "Download timeout after {}s",
                self.download_timeout.as_secs()
            )),
        }
    }

    /// Fails tracks whose request expired without any reply.
    ///
    /// Only tracks still SENT_TO_BOT are touched; anything further along
    /// was answered. Returns how many tracks were failed.
    pub(crate) fn sweep_stale(&self) -> usize {
        let mut failed = 0;
        for request in self.engine.expire_stale() {
            if self.tracker.status_of(&request.track.id) == Some(TrackStatus::SentToBot)
                && !self.engine.is_pending(&request.track.id)
            {
                self.fail_track(&request.track.id, &request.label, NO_RESPONSE_REASON);
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed, "requests expired without a reply");
        }
        failed
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "could not remove partial download");
    }
}

/// Aborts the wrapped task when dropped, so a cancelled run stops its pump.
pub(crate) struct PumpGuard(JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A matched file waiting to be fetched.
struct DownloadJob {
    track: Track,
    label: String,
    filename: String,
    temp_path: PathBuf,
}

/// Spawns the task that feeds every inbound event through `ctx`.
///
/// Transfers run in a [`JoinSet`] owned by the pump, so aborting the pump
/// aborts them too.
pub(crate) fn spawn_event_pump(
    ctx: Arc<EventContext>,
    mut events: mpsc::Receiver<BotEvent>,
) -> PumpGuard {
    PumpGuard(tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => ctx.route(event, &mut tasks),
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            }
        }
        debug!(in_flight = tasks.len(), "event stream closed");
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    }))
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined
        && !err.is_cancelled()
    {
        error!(error = %err, "event task panicked");
    }
}
