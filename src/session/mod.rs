//! Session progress: per-track lifecycle, aggregate statistics and
//! resumable persistence.
//!
//! # Overview
//!
//! - [`TrackStatus`] - the six lifecycle states and their legal edges
//! - [`SessionProgress`] / [`TrackProgress`] - the persisted document
//! - [`ProgressStore`] - atomic JSON reads and writes
//! - [`SessionTracker`] - the state machine that ties them together

mod error;
pub mod progress;
pub mod report;
pub mod stats;
pub mod status;
pub mod store;
mod tracker;

pub use error::SessionError;
pub use progress::{FORMAT_VERSION, SessionProgress, TrackProgress};
pub use stats::{ResumeInfo, SessionStats};
pub use status::TrackStatus;
pub use store::ProgressStore;
pub use tracker::{DEFAULT_MAX_ATTEMPTS, STATS_CACHE_TTL, SessionTracker};
