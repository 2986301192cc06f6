//! Retry decisions for outbound sends.
//!
//! A failed send is classified into a [`FailureType`]:
//! - [`FailureType::FloodControl`] - the server imposed a cooldown; wait it
//!   out (scaled by a safety factor) and try again
//! - [`FailureType::Transient`] - timeouts and connection errors; back off
//!   exponentially with jitter
//! - [`FailureType::NeedsAuth`] / [`FailureType::Permanent`] - retrying
//!   cannot help
//!
//! Every retry counts against the same per-track attempt cap.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::transport::TransportError;

/// Upper bound for transient back-off.
const MAX_TRANSIENT_DELAY: Duration = Duration::from_secs(60);

/// Maximum jitter added to transient delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a send failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Server-imposed cooldown with a known duration.
    FloodControl,
    /// May succeed on retry (timeouts, connection errors, 5xx).
    Transient,
    /// Credentials were rejected.
    NeedsAuth,
    /// Will fail again (bad request, unknown chat).
    Permanent,
}

/// Whether and when to retry a failed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// The attempt about to be made (1-indexed).
        attempt: u32,
    },
    DoNotRetry {
        reason: String,
    },
}

/// Retry policy for bot sends.
#[derive(Debug, Clone)]
pub struct SendRetryPolicy {
    max_attempts: u32,
    flood_multiplier: f64,
    transient_base: Duration,
    jitter: bool,
}

impl SendRetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, flood_multiplier: f64, transient_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            flood_multiplier: flood_multiplier.max(1.0),
            transient_base,
            jitter: true,
        }
    }

    /// Disables random jitter, for deterministic delays.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after attempt number `attempt` failed with `error`.
    #[instrument(skip(self, error), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, error: &TransportError, attempt: u32) -> RetryDecision {
        let failure = classify_error(error);
        match failure {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "credentials rejected".to_string(),
                };
            }
            FailureType::FloodControl | FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, "max send attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = match error.flood_wait_duration() {
            Some(wait) => self.flood_delay(wait),
            None => self.transient_delay(attempt),
        };
        debug!(attempt, delay_ms = delay.as_millis(), ?failure, "will retry send");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Server cooldown scaled by the safety factor.
    #[must_use]
    pub fn flood_delay(&self, wait: Duration) -> Duration {
        wait.mul_f64(self.flood_multiplier)
    }

    fn transient_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .transient_base
            .saturating_mul(1 << exponent)
            .min(MAX_TRANSIENT_DELAY);
        if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }
}

/// Classifies a transport error for retry decisions.
#[must_use]
pub fn classify_error(error: &TransportError) -> FailureType {
    match error {
        TransportError::FloodWait { .. } => FailureType::FloodControl,
        TransportError::Timeout { .. } | TransportError::Network { .. } => FailureType::Transient,
        TransportError::Api { code, .. } if *code >= 500 => FailureType::Transient,
        TransportError::Unauthorized { .. } => FailureType::NeedsAuth,
        TransportError::Api { .. }
        | TransportError::Io { .. }
        | TransportError::EmptyFile { .. }
        | TransportError::MissingAttachment { .. }
        | TransportError::NoSuchOption { .. }
        | TransportError::Closed => FailureType::Permanent,
    }
}
