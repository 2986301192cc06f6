//! Minimum-interval pacing for outbound requests.
//!
//! [`SendPacer`] serializes callers so that consecutive acquisitions are at
//! least `min_interval` apart. It is used for bot messages (abuse avoidance
//! on the messaging side) and for catalog API calls.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use relay_core::SendPacer;
//!
//! # async fn example() {
//! let pacer = SendPacer::new(Duration::from_secs(3));
//! pacer.acquire().await; // immediate
//! pacer.acquire().await; // waits ~3s
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Cumulative flood wait above which a warning is logged.
const CUMULATIVE_FLOOD_WARNING_THRESHOLD: Duration = Duration::from_secs(300);

/// Enforces a minimum interval between outbound requests.
#[derive(Debug)]
pub struct SendPacer {
    min_interval: Duration,
    disabled: bool,
    last: Mutex<Option<Instant>>,
    cumulative_flood_ms: AtomicU64,
}

impl SendPacer {
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = min_interval.as_millis()))]
    pub fn new(min_interval: Duration) -> Self {
        debug!("creating send pacer");
        Self {
            min_interval,
            disabled: min_interval.is_zero(),
            last: Mutex::new(None),
            cumulative_flood_ms: AtomicU64::new(0),
        }
    }

    /// A pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the interval since the previous acquisition has passed.
    ///
    /// The first acquisition proceeds immediately.
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }
        // Held across the sleep so concurrent callers queue behind each other.
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let delay = self.min_interval.saturating_sub(elapsed);
                debug!(delay_ms = delay.as_millis(), "pacing outbound request");
                tokio::time::sleep(delay).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Records a transport-mandated cooldown and returns the running total.
    #[instrument(skip(self))]
    pub fn record_flood_wait(&self, wait: Duration) -> Duration {
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        let total = self
            .cumulative_flood_ms
            .fetch_add(wait_ms, Ordering::SeqCst)
            .saturating_add(wait_ms);
        let total = Duration::from_millis(total);
        if total >= CUMULATIVE_FLOOD_WARNING_THRESHOLD {
            warn!(
                cumulative_secs = total.as_secs(),
                "excessive flood control - consider a larger send delay"
            );
        }
        total
    }

    /// Total cooldown recorded so far.
    #[must_use]
    pub fn cumulative_flood_wait(&self) -> Duration {
        Duration::from_millis(self.cumulative_flood_ms.load(Ordering::SeqCst))
    }
}
