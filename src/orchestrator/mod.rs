//! Batch orchestration: driving a whole track list through the bot.
//!
//! # Overview
//!
//! [`BatchOrchestrator::run`] resolves the tracks (or resumes a persisted
//! session), then dispatches them either one at a time or in fixed-size
//! batches. Inbound bot events are handled concurrently by an event pump
//! task that owns nothing but shared handles to the [`CorrelationEngine`],
//! the [`SessionTracker`] and the [`FileOrganizer`].
//!
//! ```text
//! run ─┬─ resolve / resume ─ start_session
//!      ├─ batch: send, send, ... ─ wait until resolved or "Batch timeout"
//!      ├─ ...
//!      └─ drain in-flight ─ complete_session
//! pump ── dispatch(event) ─┬─ task: download ─ organize ─ mark_completed
//!                          └─ task: select option (paced)
//! ```
//!
//! Send failures, timeouts and "not found" replies become FAILED tracks;
//! only metadata, persistence and transport start-up failures abort a run.

mod error;
mod handler;
pub mod observer;
pub mod options;
pub mod retry;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::correlation::CorrelationEngine;
use crate::extractor::{PlaylistInfo, TrackSource};
use crate::organizer::{EXISTING_MATCH_THRESHOLD, ExistingIndex, FileOrganizer};
use crate::pacing::SendPacer;
use crate::session::{SessionError, SessionStats, SessionTracker, TrackStatus};
use crate::track::Track;
use crate::transport::Transport;

use handler::{EventContext, spawn_event_pump};

pub use error::OrchestratorError;
pub use observer::{ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver};
pub use options::{DRY_RUN_PREVIEW_LIMIT, OrchestratorConfig, RunRequest};
pub use retry::{FailureType, RetryDecision, SendRetryPolicy, classify_error};

/// Reason recorded for tracks unresolved when a batch times out.
pub const BATCH_TIMEOUT_REASON: &str = "Batch timeout";

/// Reason recorded in sequential mode when a track times out.
pub const TRACK_TIMEOUT_REASON: &str = "Track timeout";

/// Reason recorded for tracks skipped by the existing-file check.
pub const EXISTING_FILE_REASON: &str = "File already exists";

/// What a dry run would process.
#[derive(Debug, Clone, PartialEq)]
pub struct DryRunListing {
    pub playlist: PlaylistInfo,
    /// Tracks after `start_from` / `limit`.
    pub total: usize,
    /// Labels of the first [`DRY_RUN_PREVIEW_LIMIT`] tracks.
    pub preview: Vec<String>,
    pub remaining: usize,
}

/// One track as seen by [`check_missing`].
#[derive(Debug, Clone, PartialEq)]
pub struct MissingEntry {
    /// 1-based position in the full track list.
    pub position: usize,
    pub label: String,
    /// Closest existing file, if the output tree has any audio at all.
    pub best_match: Option<PathBuf>,
    /// Similarity of `best_match` (0-100).
    pub score: f64,
}

/// Which tracks of a collection are already in the output tree.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingReport {
    pub playlist: PlaylistInfo,
    /// Audio files indexed in the output tree.
    pub scanned_files: usize,
    pub found: Vec<MissingEntry>,
    pub missing: Vec<MissingEntry>,
}

impl MissingReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.found.len() + self.missing.len()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    DryRun(DryRunListing),
    /// The persisted session for this URL had nothing left to do.
    AlreadyCompleted(SessionStats),
    Finished(SessionStats),
}

/// Drives tracks from a [`TrackSource`] through a [`Transport`].
pub struct BatchOrchestrator {
    config: OrchestratorConfig,
    source: Arc<dyn TrackSource>,
    transport: Arc<dyn Transport>,
    tracker: Arc<SessionTracker>,
    organizer: Arc<FileOrganizer>,
    engine: Arc<CorrelationEngine>,
    pacer: Arc<SendPacer>,
    retry: SendRetryPolicy,
    observer: Arc<dyn ProgressObserver>,
}

impl BatchOrchestrator {
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] for unusable settings.
    pub fn new(
        config: OrchestratorConfig,
        source: Arc<dyn TrackSource>,
        transport: Arc<dyn Transport>,
        tracker: Arc<SessionTracker>,
        organizer: Arc<FileOrganizer>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let engine = Arc::new(CorrelationEngine::new(config.correlation.clone()));
        let pacer = Arc::new(SendPacer::new(config.send_delay));
        let retry = SendRetryPolicy::new(
            config.send_retries,
            config.flood_wait_multiplier,
            config.transient_backoff,
        );
        Ok(Self {
            config,
            source,
            transport,
            tracker,
            organizer,
            engine,
            pacer,
            retry,
            observer: Arc::new(NoopObserver),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Discards in-flight requests after an interrupt. Persisted progress
    /// is left as last committed. Returns how many requests were dropped.
    pub fn shutdown(&self) -> usize {
        let dropped = self.engine.discard_all();
        if dropped > 0 {
            info!(dropped, "discarded in-flight requests");
        }
        dropped
    }

    /// Runs one request to completion.
    ///
    /// Dropping the returned future cancels the run; the event pump stops
    /// with it and no track is failed by the cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] for session-level failures only.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, OrchestratorError> {
        if request.dry_run {
            return dry_run_listing(self.source.as_ref(), request)
                .await
                .map(RunOutcome::DryRun);
        }

        let (tracks, resumed) = match self.resume_tracks(request)? {
            Some(ResumePlan::NothingToDo(stats)) => {
                info!(session = %stats.session_id, "session already completed");
                return Ok(RunOutcome::AlreadyCompleted(stats));
            }
            Some(ResumePlan::Tracks(tracks)) => (tracks, true),
            None => (self.start_fresh(request).await?, false),
        };

        self.organizer.prepare()?;
        self.organizer.cleanup_temp_files()?;

        let tracks = self.skip_resolved(tracks, request.check_existing).await?;

        if let Some(session) = self.tracker.snapshot() {
            self.observer.on_event(&ProgressEvent::SessionStarted {
                session_id: session.session_id,
                playlist_name: session.playlist_name,
                to_process: tracks.len(),
                resumed,
            });
        }

        if !tracks.is_empty() {
            let events = self.transport.subscribe().await?;
            let ctx = Arc::new(EventContext::new(
                Arc::clone(&self.engine),
                Arc::clone(&self.tracker),
                Arc::clone(&self.transport),
                Arc::clone(&self.organizer),
                Arc::clone(&self.observer),
                Arc::clone(&self.pacer),
                self.retry.clone(),
                self.config.bot_username.clone(),
                self.config.download_timeout,
            ));
            let _pump = spawn_event_pump(Arc::clone(&ctx), events);

            if request.sequential {
                self.run_sequential(&ctx, &tracks).await?;
            } else {
                self.run_batches(&ctx, &tracks).await?;
            }
            self.drain(&ctx, &tracks).await?;
        }

        self.tracker.complete_session()?;
        let stats = self
            .tracker
            .get_session_stats()
            .ok_or(SessionError::NoSession)?;
        info!(
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            success_rate = stats.success_rate,
            duration = %stats.duration,
            "session finished"
        );
        self.observer.on_event(&ProgressEvent::SessionFinished {
            stats: stats.clone(),
        });
        Ok(RunOutcome::Finished(stats))
    }

    /// Tracks to dispatch when a persisted session for the same URL exists.
    fn resume_tracks(&self, request: &RunRequest) -> Result<Option<ResumePlan>, OrchestratorError> {
        if !request.resume || !self.tracker.load_session()? {
            return Ok(None);
        }
        let Some(session) = self.tracker.snapshot() else {
            return Ok(None);
        };
        if session.playlist_url != request.url {
            debug!(previous = %session.playlist_url, "persisted session is for another URL");
            return Ok(None);
        }

        let interrupted = session.count(TrackStatus::SentToBot) + session.count(TrackStatus::Downloading);
        let retryable = self.tracker.retryable_tracks(self.config.max_attempts).len();
        if session.count(TrackStatus::Pending) + interrupted + retryable == 0 {
            let stats = self
                .tracker
                .get_session_stats()
                .ok_or(SessionError::NoSession)?;
            return Ok(Some(ResumePlan::NothingToDo(stats)));
        }

        self.tracker.requeue_interrupted()?;
        self.tracker.reset_for_retry(self.config.max_attempts)?;
        let tracks: Vec<Track> = self
            .tracker
            .tracks_by_status(TrackStatus::Pending)
            .iter()
            .map(|t| t.to_track())
            .collect();
        info!(
            session = %session.session_id,
            tracks = tracks.len(),
            "resuming session"
        );
        Ok(Some(ResumePlan::Tracks(tracks)))
    }

    async fn start_fresh(&self, request: &RunRequest) -> Result<Vec<Track>, OrchestratorError> {
        let playlist = self.source.get_playlist_info(&request.url).await?;
        let all = self.source.extract_tracks(&request.url).await?;
        if all.is_empty() {
            return Err(OrchestratorError::EmptyCollection {
                url: request.url.clone(),
            });
        }
        let tracks = request.slice(&all)?.to_vec();
        let session_id = self
            .tracker
            .start_session(&request.url, &playlist.name, &tracks)?;
        info!(
            session = %session_id,
            playlist = %playlist.name,
            owner = %playlist.owner,
            tracks = tracks.len(),
            "session started"
        );
        Ok(tracks)
    }

    /// Drops tracks that need no dispatch: repeats, anything not PENDING,
    /// and with `check_existing` anything already in the output tree.
    async fn skip_resolved(
        &self,
        tracks: Vec<Track>,
        check_existing: bool,
    ) -> Result<Vec<Track>, OrchestratorError> {
        let index = if check_existing {
            let organizer = Arc::clone(&self.organizer);
            let scanned = tokio::task::spawn_blocking(move || organizer.scan_existing()).await;
            match scanned {
                Ok(result) => Some(result?),
                Err(join) => {
                    warn!(error = %join, "existing-file scan did not finish");
                    None
                }
            }
        } else {
            None
        };

        let mut seen = HashSet::new();
        let mut remaining = Vec::with_capacity(tracks.len());
        for track in tracks {
            if !seen.insert(track.id.clone()) {
                continue;
            }
            match self.tracker.status_of(&track.id) {
                Some(TrackStatus::Pending) => {}
                Some(status) => {
                    debug!(track = %track.label(), %status, "already resolved, not dispatching");
                    continue;
                }
                None => continue,
            }

            if let Some(index) = &index {
                let existing = self
                    .organizer
                    .find_existing(&track)
                    .or_else(|| index.find(&track).map(Path::to_path_buf));
                if let Some(path) = existing {
                    let label = track.label();
                    info!(track = %label, path = %path.display(), "file already exists");
                    self.tracker.mark_skipped(&track.id, EXISTING_FILE_REASON)?;
                    self.observer.on_event(&ProgressEvent::TrackSkipped {
                        track_id: track.id.clone(),
                        label,
                        reason: EXISTING_FILE_REASON.to_string(),
                    });
                    continue;
                }
            }
            remaining.push(track);
        }
        Ok(remaining)
    }

    async fn run_batches(&self, ctx: &EventContext, tracks: &[Track]) -> Result<(), OrchestratorError> {
        let total_batches = tracks.len().div_ceil(self.config.batch_size);
        for (i, batch) in tracks.chunks(self.config.batch_size).enumerate() {
            let index = i + 1;
            info!(batch = index, total_batches, size = batch.len(), "dispatching batch");
            self.observer.on_event(&ProgressEvent::BatchStarted {
                index,
                total_batches,
                size: batch.len(),
            });

            let mut sent = Vec::with_capacity(batch.len());
            for track in batch {
                if self.send_track(ctx, track).await? {
                    sent.push(track.id.clone());
                }
                if let Some(err) = ctx.take_fatal() {
                    return Err(err.into());
                }
            }

            self.wait_for(
                ctx,
                &sent,
                self.config.batch_timeout,
                self.config.batch_poll,
                BATCH_TIMEOUT_REASON,
            )
            .await?;

            let resolved = batch
                .iter()
                .filter(|t| self.tracker.status_of(&t.id).is_some_and(TrackStatus::is_terminal))
                .count();
            self.observer.on_event(&ProgressEvent::BatchFinished {
                index,
                total_batches,
                resolved,
                size: batch.len(),
            });
        }
        Ok(())
    }

    async fn run_sequential(&self, ctx: &EventContext, tracks: &[Track]) -> Result<(), OrchestratorError> {
        for (i, track) in tracks.iter().enumerate() {
            debug!(position = i + 1, total = tracks.len(), track = %track.label(), "sequential dispatch");
            if self.send_track(ctx, track).await? {
                self.wait_for(
                    ctx,
                    std::slice::from_ref(&track.id),
                    self.config.track_timeout,
                    self.config.sequential_poll,
                    TRACK_TIMEOUT_REASON,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Sends one track, retrying flood waits and transient errors.
    ///
    /// Returns whether the track is now awaiting a reply. A send that
    /// exhausts its retries fails the track, not the run.
    async fn send_track(&self, ctx: &EventContext, track: &Track) -> Result<bool, OrchestratorError> {
        let label = track.label();
        self.tracker.mark_sent(&track.id)?;

        let (engine, transport) = (&self.engine, &self.transport);
        let (bot, name) = (self.config.bot_username.as_str(), label.as_str());
        let sent = ctx
            .send_paced(name, move || async move {
                let token = engine.register(track.clone(), name);
                match transport.send(bot, &track.url).await {
                    Ok(message_id) => Ok((token, message_id)),
                    Err(err) => {
                        engine.cancel(&token);
                        Err(err)
                    }
                }
            })
            .await;

        match sent {
            Ok((token, message_id)) => {
                self.engine.attach_handle(&token, message_id);
                info!(track = %label, message_id, "sent to bot");
                self.observer.on_event(&ProgressEvent::TrackSent {
                    track_id: track.id.clone(),
                    label,
                });
                Ok(true)
            }
            Err(err) => {
                ctx.fail_track(&track.id, &label, &format!("Failed to send to bot: {err}"));
                Ok(false)
            }
        }
    }

    /// Waits until every track in `ids` is terminal, failing the rest with
    /// `reason` once `timeout` elapses. Progress is logged on change only.
    async fn wait_for(
        &self,
        ctx: &EventContext,
        ids: &[String],
        timeout: Duration,
        poll: Duration,
        reason: &str,
    ) -> Result<(), OrchestratorError> {
        if ids.is_empty() {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        let mut last_sweep = Instant::now();
        let mut last_resolved = None;

        loop {
            if let Some(err) = ctx.take_fatal() {
                return Err(err.into());
            }
            if last_sweep.elapsed() >= self.config.sweep_interval {
                ctx.sweep_stale();
                last_sweep = Instant::now();
            }

            let resolved = self.resolved_count(ids);
            if resolved == ids.len() {
                return Ok(());
            }
            if last_resolved != Some(resolved) {
                info!(resolved, total = ids.len(), "waiting for replies");
                last_resolved = Some(resolved);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(poll.min(deadline - now)).await;
        }

        for id in ids {
            if self.tracker.status_of(id).is_some_and(|s| !s.is_terminal()) {
                self.engine.cancel_track(id);
                let label = self
                    .tracker
                    .snapshot()
                    .and_then(|s| s.tracks.get(id).map(|t| t.track_name.clone()))
                    .unwrap_or_else(|| id.clone());
                warn!(track = %label, reason, "giving up on track");
                ctx.fail_track(id, &label, reason);
            }
        }
        ctx.take_fatal().map_or(Ok(()), |e| Err(e.into()))
    }

    fn resolved_count(&self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.tracker.status_of(id).is_some_and(TrackStatus::is_terminal))
            .count()
    }

    /// Gives outstanding replies a last chance before the session is closed.
    /// Stragglers stay in their current state and are requeued on resume.
    async fn drain(&self, ctx: &EventContext, tracks: &[Track]) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut last_in_flight = None;
        loop {
            if let Some(err) = ctx.take_fatal() {
                return Err(err.into());
            }
            ctx.sweep_stale();
            let unresolved = tracks
                .iter()
                .filter(|t| {
                    self.tracker
                        .status_of(&t.id)
                        .is_some_and(|s| !s.is_terminal())
                })
                .count();
            let in_flight = self.engine.pending_count().max(unresolved);
            if in_flight == 0 {
                return Ok(());
            }
            if last_in_flight != Some(in_flight) {
                info!(in_flight, "draining outstanding replies");
                self.observer.on_event(&ProgressEvent::Draining { in_flight });
                last_in_flight = Some(in_flight);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(in_flight, "drain timeout, closing session with stragglers");
                return Ok(());
            }
            sleep(self.config.drain_poll.min(deadline - now)).await;
        }
    }
}

/// Resolves and slices the track list without touching any state.
///
/// # Errors
///
/// Returns [`OrchestratorError`] when the link cannot be resolved, resolves
/// to nothing, or `start_from` is out of range.
pub async fn dry_run_listing(
    source: &dyn TrackSource,
    request: &RunRequest,
) -> Result<DryRunListing, OrchestratorError> {
    let playlist = source.get_playlist_info(&request.url).await?;
    let all = source.extract_tracks(&request.url).await?;
    if all.is_empty() {
        return Err(OrchestratorError::EmptyCollection {
            url: request.url.clone(),
        });
    }
    let tracks = request.slice(&all)?;
    let preview: Vec<String> = tracks
        .iter()
        .take(DRY_RUN_PREVIEW_LIMIT)
        .map(Track::label)
        .collect();
    info!(total = tracks.len(), "dry run, nothing will be sent");
    Ok(DryRunListing {
        playlist,
        total: tracks.len(),
        remaining: tracks.len() - preview.len(),
        preview,
    })
}

/// Compares the resolved track list with the audio files already in the
/// output tree. Sends nothing and persists nothing.
///
/// A track counts as found when its best match scores at least
/// [`EXISTING_MATCH_THRESHOLD`]. A missing output directory means every
/// track is missing.
///
/// # Errors
///
/// Returns [`OrchestratorError`] when the link cannot be resolved, resolves
/// to nothing, `start_from` is out of range or the tree cannot be read.
#[instrument(skip_all, fields(url = %request.url))]
pub async fn check_missing(
    source: &dyn TrackSource,
    organizer: Arc<FileOrganizer>,
    request: &RunRequest,
) -> Result<MissingReport, OrchestratorError> {
    let playlist = source.get_playlist_info(&request.url).await?;
    let all = source.extract_tracks(&request.url).await?;
    if all.is_empty() {
        return Err(OrchestratorError::EmptyCollection {
            url: request.url.clone(),
        });
    }
    let tracks = request.slice(&all)?;

    let index = match tokio::task::spawn_blocking(move || organizer.scan_existing()).await {
        Ok(result) => result?,
        Err(join) => {
            warn!(error = %join, "existing-file scan did not finish");
            ExistingIndex::default()
        }
    };

    let mut found = Vec::new();
    let mut missing = Vec::new();
    for (offset, track) in tracks.iter().enumerate() {
        let best = index.best_match(track);
        let entry = MissingEntry {
            position: request.start_from + offset,
            label: track.label(),
            best_match: best.map(|(path, _)| path.to_path_buf()),
            score: best.map_or(0.0, |(_, score)| score),
        };
        if entry.score >= EXISTING_MATCH_THRESHOLD {
            found.push(entry);
        } else {
            missing.push(entry);
        }
    }
    info!(
        found = found.len(),
        missing = missing.len(),
        files = index.len(),
        "missing-track check finished"
    );
    Ok(MissingReport {
        playlist,
        scanned_files: index.len(),
        found,
        missing,
    })
}

enum ResumePlan {
    NothingToDo(SessionStats),
    Tracks(Vec<Track>),
}
