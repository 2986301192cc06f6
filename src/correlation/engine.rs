//! Pending-request store and event matching.
//!
//! [`CorrelationEngine`] is shared (behind an `Arc`) between the dispatch
//! path, which registers requests, and the event pump, which consumes them.
//! Every public operation takes the internal lock exactly once and finishes
//! its whole read-modify-write under it, so interleaved callers can never
//! observe or consume the same request twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use crate::track::Track;

use super::event::{BotEvent, EventKind, FileAttachment};
use super::similarity::{self, SimilarityWeights};

/// Default window in which a bot reply is attributed to a request.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default minimum similarity score for a content match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 70.0;

/// Pending-set size above which [`CorrelationEngine::trim_overflow`] trims.
pub const DEFAULT_MAX_PENDING: usize = 50;

/// Number of most recent requests kept by an overflow trim.
pub const DEFAULT_RETAIN_ON_OVERFLOW: usize = 30;

/// Tunables for matching.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub response_timeout: Duration,
    pub similarity_threshold: f64,
    pub weights: SimilarityWeights,
    pub max_pending: usize,
    pub retain_on_overflow: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            weights: SimilarityWeights::default(),
            max_pending: DEFAULT_MAX_PENDING,
            retain_on_overflow: DEFAULT_RETAIN_ON_OVERFLOW,
        }
    }
}

/// One track dispatched to the bot and awaiting a reply.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub token: String,
    pub track: Track,
    /// `"artist - title"`.
    pub label: String,
    pub sent_at: Instant,
    /// Outbound message id once the send has gone through.
    pub handle: Option<i64>,
    seq: u64,
}

impl PendingRequest {
    /// Registration order, used to break `sent_at` ties.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    fn order_key(&self) -> (Instant, u64) {
        (self.sent_at, self.seq)
    }
}

/// A file event matched to its request.
#[derive(Debug, Clone)]
pub struct FileMatch {
    pub request: PendingRequest,
    /// Similarity score when the match was content based, `None` for FIFO.
    pub score: Option<f64>,
}

/// Outcome of routing one inbound event.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// A file answering the request.
    File(FileMatch),
    /// An option prompt; carries the re-registered request.
    Options(PendingRequest),
    /// The bot has nothing for this request.
    NotFound(PendingRequest),
    /// Plain text; never consumes a request.
    Text,
    /// Nothing was pending for an event of this kind.
    Unmatched(EventKind),
}

#[derive(Debug, Default)]
struct Inner {
    pending: HashMap<String, PendingRequest>,
    expired: Vec<PendingRequest>,
}

/// Thread-safe correlation store.
#[derive(Debug)]
pub struct CorrelationEngine {
    config: CorrelationConfig,
    inner: Mutex<Inner>,
    next_seq: AtomicU64,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

impl CorrelationEngine {
    #[must_use]
    pub fn new(config: CorrelationConfig) -> Self {
        debug!(
            timeout_secs = config.response_timeout.as_secs(),
            threshold = config.similarity_threshold,
            "creating correlation engine"
        );
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            next_seq: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_token(seq: u64, track_id: &str) -> String {
        let fragment: String = track_id.chars().take(8).collect();
        format!("req{seq}-{fragment}")
    }

    fn insert(&self, inner: &mut Inner, track: Track, label: String, handle: Option<i64>) -> PendingRequest {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let token = Self::make_token(seq, &track.id);
        let request = PendingRequest {
            token: token.clone(),
            track,
            label,
            sent_at: Instant::now(),
            handle,
            seq,
        };
        inner.pending.insert(token, request.clone());
        request
    }

    /// Stores a new pending request and returns its token.
    pub fn register(&self, track: Track, label: impl Into<String>) -> String {
        let mut inner = self.lock();
        let request = self.insert(&mut inner, track, label.into(), None);
        debug!(token = %request.token, track = %request.label, pending = inner.pending.len(), "registered request");
        request.token
    }

    /// Records the outbound message id and restarts the response window.
    ///
    /// Returns `false` if the token is no longer pending.
    pub fn attach_handle(&self, token: &str, handle: i64) -> bool {
        let mut inner = self.lock();
        match inner.pending.get_mut(token) {
            Some(request) => {
                request.handle = Some(handle);
                request.sent_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes a request without treating it as answered.
    pub fn cancel(&self, token: &str) -> Option<PendingRequest> {
        self.lock().pending.remove(token)
    }

    /// Removes every pending request for `track_id`.
    pub fn cancel_track(&self, track_id: &str) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        let tokens: Vec<String> = inner
            .pending
            .values()
            .filter(|r| r.track.id == track_id)
            .map(|r| r.token.clone())
            .collect();
        tokens
            .iter()
            .filter_map(|t| inner.pending.remove(t))
            .collect()
    }

    /// Whether a request for `track_id` is currently pending.
    #[must_use]
    pub fn is_pending(&self, track_id: &str) -> bool {
        self.lock().pending.values().any(|r| r.track.id == track_id)
    }

    /// Classifies `event` and performs the matching step for its kind.
    pub fn dispatch(&self, event: &BotEvent) -> Disposition {
        let kind = event.kind();
        let outcome = match kind {
            EventKind::File => event
                .file
                .as_ref()
                .and_then(|file| self.match_file(file))
                .map(Disposition::File),
            EventKind::Options => self.match_button_prompt(event).map(Disposition::Options),
            EventKind::NotFound => self.match_not_found(event).map(Disposition::NotFound),
            EventKind::Text => Some(Disposition::Text),
        };
        outcome.unwrap_or(Disposition::Unmatched(kind))
    }

    /// Matches a file event, by content first and FIFO second.
    ///
    /// Returns `None` for events without a file.
    pub fn match_event(&self, event: &BotEvent) -> Option<PendingRequest> {
        let file = event.file.as_ref()?;
        self.match_file(file).map(|m| m.request)
    }

    #[instrument(skip(self, file), fields(file_name = ?file.file_name))]
    fn match_file(&self, file: &FileAttachment) -> Option<FileMatch> {
        let mut inner = self.lock();
        self.purge_expired(&mut inner, Instant::now());

        let best = inner
            .pending
            .values()
            .filter_map(|r| {
                similarity::score(file, &r.track, &self.config.weights).map(|s| (s, r))
            })
            .filter(|(s, _)| *s >= self.config.similarity_threshold)
            .max_by(|(sa, ra), (sb, rb)| {
                sa.total_cmp(sb)
                    .then_with(|| rb.order_key().cmp(&ra.order_key()))
            })
            .map(|(s, r)| (s, r.token.clone()));

        if let Some((score, token)) = best
            && let Some(request) = inner.pending.remove(&token)
        {
            debug!(token = %token, score, track = %request.label, "content match");
            return Some(FileMatch {
                request,
                score: Some(score),
            });
        }

        let request = Self::take_oldest(&mut inner)?;
        debug!(token = %request.token, track = %request.label, "fifo match");
        Some(FileMatch {
            request,
            score: None,
        })
    }

    /// Matches an option prompt by FIFO and re-registers the request with a
    /// fresh timestamp under a new token.
    pub fn match_button_prompt(&self, event: &BotEvent) -> Option<PendingRequest> {
        let mut inner = self.lock();
        self.purge_expired(&mut inner, Instant::now());
        let original = Self::take_oldest(&mut inner)?;
        let handle = original.handle;
        let renewed = self.insert(&mut inner, original.track, original.label, handle);
        debug!(
            message_id = event.message_id,
            old_token = %original.token,
            new_token = %renewed.token,
            "option prompt matched, awaiting file"
        );
        Some(renewed)
    }

    /// Matches a "nothing found" reply by FIFO.
    pub fn match_not_found(&self, event: &BotEvent) -> Option<PendingRequest> {
        let mut inner = self.lock();
        self.purge_expired(&mut inner, Instant::now());
        let request = Self::take_oldest(&mut inner)?;
        debug!(message_id = event.message_id, track = %request.label, "not-found matched");
        Some(request)
    }

    /// Purges requests older than the response timeout and returns them,
    /// together with any purged earlier as a side effect of matching.
    pub fn expire_stale(&self) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        self.purge_expired(&mut inner, Instant::now());
        std::mem::take(&mut inner.expired)
    }

    /// Pending count after purging expired entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let mut inner = self.lock();
        self.purge_expired(&mut inner, Instant::now());
        inner.pending.len()
    }

    /// Keeps only the most recent requests once the cap is exceeded.
    ///
    /// Returns the number of dropped requests.
    pub fn trim_overflow(&self) -> usize {
        let mut inner = self.lock();
        if inner.pending.len() <= self.config.max_pending {
            return 0;
        }
        let mut keys: Vec<((Instant, u64), String)> = inner
            .pending
            .values()
            .map(|r| (r.order_key(), r.token.clone()))
            .collect();
        keys.sort();
        let drop_count = keys.len().saturating_sub(self.config.retain_on_overflow);
        for (_, token) in keys.into_iter().take(drop_count) {
            inner.pending.remove(&token);
        }
        warn!(
            dropped = drop_count,
            retained = inner.pending.len(),
            "pending request overflow, dropped oldest requests"
        );
        drop_count
    }

    /// Drops every pending request (shutdown). Returns how many were held.
    pub fn discard_all(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.pending.len();
        inner.pending.clear();
        inner.expired.clear();
        count
    }

    fn purge_expired(&self, inner: &mut Inner, now: Instant) {
        let timeout = self.config.response_timeout;
        let stale: Vec<String> = inner
            .pending
            .values()
            .filter(|r| now.saturating_duration_since(r.sent_at) > timeout)
            .map(|r| r.token.clone())
            .collect();
        for token in stale {
            if let Some(request) = inner.pending.remove(&token) {
                trace!(token = %token, track = %request.label, "request expired");
                inner.expired.push(request);
            }
        }
    }

    fn take_oldest(inner: &mut Inner) -> Option<PendingRequest> {
        let token = inner
            .pending
            .values()
            .min_by_key(|r| r.order_key())
            .map(|r| r.token.clone())?;
        inner.pending.remove(&token)
    }
}
