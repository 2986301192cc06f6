//! The session state machine.
//!
//! [`SessionTracker`] owns the active [`SessionProgress`] and applies every
//! status change through [`TrackStatus::can_transition_to`]. Each mutation
//! is applied to a copy, persisted atomically, and only then published, so
//! memory and disk never disagree about the last committed state.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::track::Track;

use super::error::SessionError;
use super::progress::{SessionProgress, TrackProgress};
use super::report;
use super::stats::{ResumeInfo, SessionStats};
use super::status::TrackStatus;
use super::store::ProgressStore;

/// How long computed statistics are reused.
pub const STATS_CACHE_TTL: Duration = Duration::from_secs(5);

/// Default attempt cap for retrying failed tracks.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Default)]
struct State {
    session: Option<SessionProgress>,
    stats_cache: Option<(Instant, SessionStats)>,
}

/// Owns the active session and its persisted copy.
#[derive(Debug)]
pub struct SessionTracker {
    store: ProgressStore,
    state: Mutex<State>,
}

impl SessionTracker {
    /// Creates a tracker with no session loaded.
    #[must_use]
    pub fn new(store: ProgressStore) -> Self {
        Self {
            store,
            state: Mutex::new(State::default()),
        }
    }

    /// Creates a tracker and loads any persisted session.
    pub fn open(store: ProgressStore) -> Result<Self, SessionError> {
        let tracker = Self::new(store);
        tracker.load_session()?;
        Ok(tracker)
    }

    #[must_use]
    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads the persisted session into memory. Returns whether one existed.
    pub fn load_session(&self) -> Result<bool, SessionError> {
        let loaded = self.store.load()?;
        let found = loaded.is_some();
        let mut state = self.lock();
        state.session = loaded;
        state.stats_cache = None;
        Ok(found)
    }

    /// Starts a new session with every track PENDING, replacing any other.
    pub fn start_session(
        &self,
        url: &str,
        name: &str,
        tracks: &[Track],
    ) -> Result<String, SessionError> {
        let session = SessionProgress::new(url, name, tracks, Utc::now());
        self.store.save(&session)?;
        let id = session.session_id.clone();
        info!(session_id = %id, playlist = name, tracks = session.total_tracks, "session started");
        let mut state = self.lock();
        state.session = Some(session);
        state.stats_cache = None;
        Ok(id)
    }

    #[must_use]
    pub fn has_session(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Copy of the active session.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionProgress> {
        self.lock().session.clone()
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut SessionProgress, DateTime<Utc>) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut state = self.lock();
        let current = state.session.as_ref().ok_or(SessionError::NoSession)?;
        let mut next = current.clone();
        let now = Utc::now();
        let value = apply(&mut next, now)?;
        next.last_updated = now;
        self.store.save(&next)?;
        state.session = Some(next);
        state.stats_cache = None;
        Ok(value)
    }

    fn transition(
        &self,
        track_id: &str,
        to: TrackStatus,
        apply: impl FnOnce(&mut TrackProgress, DateTime<Utc>),
    ) -> Result<(), SessionError> {
        self.mutate(|session, now| {
            let track = session
                .tracks
                .get_mut(track_id)
                .ok_or_else(|| SessionError::unknown_track(track_id))?;
            if !track.status.can_transition_to(to) {
                return Err(SessionError::InvalidTransition {
                    track_id: track_id.to_string(),
                    from: track.status,
                    to,
                });
            }
            track.status = to;
            track.last_attempt = Some(now);
            apply(track, now);
            Ok(())
        })?;
        debug!(track_id, status = %to, "track status updated");
        Ok(())
    }

    pub fn mark_sent(&self, track_id: &str) -> Result<(), SessionError> {
        self.transition(track_id, TrackStatus::SentToBot, |t, now| {
            t.sent_to_bot_at = Some(now);
        })
    }

    pub fn mark_downloading(&self, track_id: &str) -> Result<(), SessionError> {
        self.transition(track_id, TrackStatus::Downloading, |_, _| {})
    }

    /// Marks the track completed, storing its final location and size.
    pub fn mark_completed(
        &self,
        track_id: &str,
        file_path: &Path,
        file_size: u64,
    ) -> Result<(), SessionError> {
        self.transition(track_id, TrackStatus::Completed, |t, now| {
            t.completed_at = Some(now);
            t.file_path = Some(file_path.display().to_string());
            t.file_size = Some(file_size);
            t.error_message = None;
            t.download_time = t.sent_to_bot_at.map(|sent| {
                #[allow(clippy::cast_precision_loss)]
                let secs = (now - sent).num_milliseconds() as f64 / 1000.0;
                secs
            });
        })
    }

    /// Marks the track failed and counts the attempt.
    pub fn mark_failed(&self, track_id: &str, reason: &str) -> Result<(), SessionError> {
        let result = self.transition(track_id, TrackStatus::Failed, |t, _| {
            t.attempts += 1;
            t.error_message = Some(reason.to_string());
        });
        if result.is_ok() {
            warn!(track_id, reason, "track failed");
        }
        result
    }

    /// Marks the track skipped; the reason is kept as its message.
    pub fn mark_skipped(&self, track_id: &str, reason: &str) -> Result<(), SessionError> {
        self.transition(track_id, TrackStatus::Skipped, |t, _| {
            t.error_message = Some(reason.to_string());
        })
    }

    /// Moves FAILED tracks under the attempt cap back to PENDING.
    ///
    /// Returns the ids that were reset.
    pub fn reset_for_retry(&self, max_attempts: u32) -> Result<Vec<String>, SessionError> {
        let ids = self.mutate(|session, _| {
            let mut ids = Vec::new();
            for track in session.tracks.values_mut() {
                if track.status == TrackStatus::Failed && track.attempts < max_attempts {
                    track.status = TrackStatus::Pending;
                    ids.push(track.track_id.clone());
                }
            }
            Ok(ids)
        })?;
        if !ids.is_empty() {
            info!(count = ids.len(), "failed tracks queued for retry");
        }
        Ok(ids)
    }

    /// Requeues tracks left SENT_TO_BOT or DOWNLOADING by an interrupted run.
    ///
    /// This is the only backwards edge besides FAILED -> PENDING and is used
    /// on resume only. The unanswered attempt is not counted.
    pub fn requeue_interrupted(&self) -> Result<Vec<String>, SessionError> {
        let ids = self.mutate(|session, _| {
            let mut ids = Vec::new();
            for track in session.tracks.values_mut() {
                if matches!(
                    track.status,
                    TrackStatus::SentToBot | TrackStatus::Downloading
                ) {
                    track.status = TrackStatus::Pending;
                    track.error_message = Some("Interrupted".to_string());
                    ids.push(track.track_id.clone());
                }
            }
            Ok(ids)
        })?;
        if !ids.is_empty() {
            info!(count = ids.len(), "interrupted tracks requeued");
        }
        Ok(ids)
    }

    /// Stamps the session as finished.
    pub fn complete_session(&self) -> Result<(), SessionError> {
        self.mutate(|session, now| {
            session.completed_at = Some(now);
            Ok(())
        })
    }

    #[must_use]
    pub fn status_of(&self, track_id: &str) -> Option<TrackStatus> {
        self.lock()
            .session
            .as_ref()
            .and_then(|s| s.tracks.get(track_id))
            .map(|t| t.status)
    }

    /// Tracks in `status`, in playlist order.
    #[must_use]
    pub fn tracks_by_status(&self, status: TrackStatus) -> Vec<TrackProgress> {
        let state = self.lock();
        state.session.as_ref().map_or_else(Vec::new, |s| {
            s.ordered()
                .into_iter()
                .filter(|t| t.status == status)
                .cloned()
                .collect()
        })
    }

    /// FAILED tracks that have not reached `max_attempts`.
    #[must_use]
    pub fn retryable_tracks(&self, max_attempts: u32) -> Vec<TrackProgress> {
        self.tracks_by_status(TrackStatus::Failed)
            .into_iter()
            .filter(|t| t.attempts < max_attempts)
            .collect()
    }

    /// Aggregate statistics, reused for [`STATS_CACHE_TTL`].
    #[must_use]
    pub fn get_session_stats(&self) -> Option<SessionStats> {
        let mut state = self.lock();
        if let Some((at, stats)) = &state.stats_cache
            && at.elapsed() < STATS_CACHE_TTL
        {
            return Some(stats.clone());
        }
        let stats = SessionStats::compute(state.session.as_ref()?, Utc::now());
        state.stats_cache = Some((Instant::now(), stats.clone()));
        Some(stats)
    }

    /// Resume summary; `None` without a session or when fully processed.
    #[must_use]
    pub fn get_resume_info(&self) -> Option<ResumeInfo> {
        self.lock()
            .session
            .as_ref()
            .and_then(ResumeInfo::from_session)
    }

    /// Deletes persisted progress and forgets the session.
    pub fn reset_progress(&self) -> Result<(), SessionError> {
        self.store.delete()?;
        let mut state = self.lock();
        state.session = None;
        state.stats_cache = None;
        info!(path = %self.store.path().display(), "progress reset");
        Ok(())
    }

    /// Renders the text report, writing it to `path` when given.
    pub fn export_report(&self, path: Option<&Path>) -> Result<String, SessionError> {
        let session = self.snapshot().ok_or(SessionError::NoSession)?;
        let stats = SessionStats::compute(&session, Utc::now());
        let text = report::render(&session, &stats);
        if let Some(path) = path {
            std::fs::write(path, &text).map_err(|e| SessionError::io(path, e))?;
            info!(path = %path.display(), "report written");
        }
        Ok(text)
    }
}
