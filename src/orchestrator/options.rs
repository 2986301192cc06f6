//! Orchestrator settings and per-run requests.

use std::time::Duration;

use crate::correlation::CorrelationConfig;
use crate::session::DEFAULT_MAX_ATTEMPTS;

use super::error::OrchestratorError;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_SEQUENTIAL_POLL: Duration = Duration::from_secs(2);
pub const DEFAULT_TRACK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_BATCH_POLL: Duration = Duration::from_secs(2);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_secs(5);
pub const DEFAULT_SEND_RETRIES: u32 = 3;
pub const DEFAULT_FLOOD_WAIT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Tracks listed by a dry run.
pub const DRY_RUN_PREVIEW_LIMIT: usize = 20;

/// Timing, batching and retry settings for a run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Username (or chat id) of the correspondent bot.
    pub bot_username: String,
    pub batch_size: usize,
    /// Minimum spacing between two outbound messages.
    pub send_delay: Duration,
    pub sequential_poll: Duration,
    /// Sequential mode: wait per track before giving up.
    pub track_timeout: Duration,
    pub batch_timeout: Duration,
    pub batch_poll: Duration,
    pub drain_timeout: Duration,
    pub drain_poll: Duration,
    /// Send attempts per track, including the first.
    pub send_retries: u32,
    pub flood_wait_multiplier: f64,
    /// Base back-off after a transient send error.
    pub transient_backoff: Duration,
    pub download_timeout: Duration,
    /// FAILED tracks below this attempt count are retried on resume.
    pub max_attempts: u32,
    pub sweep_interval: Duration,
    pub correlation: CorrelationConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bot_username: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            send_delay: DEFAULT_SEND_DELAY,
            sequential_poll: DEFAULT_SEQUENTIAL_POLL,
            track_timeout: DEFAULT_TRACK_TIMEOUT,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            batch_poll: DEFAULT_BATCH_POLL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            drain_poll: DEFAULT_DRAIN_POLL,
            send_retries: DEFAULT_SEND_RETRIES,
            flood_wait_multiplier: DEFAULT_FLOOD_WAIT_MULTIPLIER,
            transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            correlation: CorrelationConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn new(bot_username: impl Into<String>) -> Self {
        Self {
            bot_username: bot_username.into(),
            ..Self::default()
        }
    }

    /// Rejects settings the run loop cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] naming the setting.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.bot_username.trim().is_empty() {
            return Err(OrchestratorError::invalid_config(
                "bot username is empty (set EXTERNAL_BOT_USERNAME or bot_username)",
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(OrchestratorError::invalid_config(format!(
                "batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.send_retries == 0 {
            return Err(OrchestratorError::invalid_config("send retries must be at least 1"));
        }
        if !self.flood_wait_multiplier.is_finite() || self.flood_wait_multiplier < 1.0 {
            return Err(OrchestratorError::invalid_config(format!(
                "flood wait multiplier must be at least 1.0, got {}",
                self.flood_wait_multiplier
            )));
        }
        if self.batch_poll.is_zero() || self.sequential_poll.is_zero() || self.drain_poll.is_zero() {
            return Err(OrchestratorError::invalid_config("poll intervals must be non-zero"));
        }
        Ok(())
    }
}

/// What to do in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub url: String,
    /// List the tracks without sending anything.
    pub dry_run: bool,
    /// Continue a persisted session for the same URL when there is one.
    pub resume: bool,
    /// One track at a time instead of batches.
    pub sequential: bool,
    /// 1-based index of the first track to process.
    pub start_from: usize,
    pub limit: Option<usize>,
    /// Skip tracks whose file is already in the output tree.
    pub check_existing: bool,
}

impl RunRequest {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dry_run: false,
            resume: true,
            sequential: false,
            start_from: 1,
            limit: None,
            check_existing: false,
        }
    }

    /// Applies `start_from` and `limit` to a resolved track list.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidStart`] when `start_from` is 0 or
    /// past the end of the list.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> Result<&'a [T], OrchestratorError> {
        if self.start_from == 0 || self.start_from > items.len() {
            return Err(OrchestratorError::InvalidStart {
                start: self.start_from,
                total: items.len(),
            });
        }
        let rest = &items[self.start_from - 1..];
        let end = self.limit.map_or(rest.len(), |limit| limit.min(rest.len()));
        Ok(&rest[..end])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::new("@music_bot");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.send_delay, Duration::from_secs(3));
        assert_eq!(config.batch_timeout, Duration::from_secs(600));
        assert_eq!(config.drain_poll, Duration::from_secs(5));
        assert_eq!(config.send_retries, 3);
        assert!((config.flood_wait_multiplier - 1.5).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_err());

        let mut config = OrchestratorConfig::new("bot");
        config.batch_size = 51;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::new("bot");
        config.flood_wait_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::new("bot");
        config.flood_wait_multiplier = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_slice_start_and_limit() {
        let items = [1, 2, 3, 4, 5];
        let mut request = RunRequest::new("u");
        assert_eq!(request.slice(&items).unwrap(), &[1, 2, 3, 4, 5]);

        request.start_from = 2;
        request.limit = Some(2);
        assert_eq!(request.slice(&items).unwrap(), &[2, 3]);

        request.start_from = 5;
        request.limit = Some(10);
        assert_eq!(request.slice(&items).unwrap(), &[5]);
    }

    #[test]
    fn test_slice_out_of_range_is_error() {
        let items = [1, 2, 3];
        let mut request = RunRequest::new("u");
        request.start_from = 4;
        assert!(matches!(
            request.slice(&items),
            Err(OrchestratorError::InvalidStart { start: 4, total: 3 })
        ));
        request.start_from = 0;
        assert!(request.slice(&items).is_err());
    }
}
