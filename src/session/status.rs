//! Per-track lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one track within a session.
///
/// ```text
/// PENDING -> SENT_TO_BOT -> DOWNLOADING -> COMPLETED
///    \            \               \
///     +------------+---------------+--> FAILED | SKIPPED
/// FAILED -> PENDING (explicit retry)
/// ```
///
/// Persisted as a snake_case string. Older progress files used a few other
/// spellings; those are accepted on load and written back canonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrackStatus {
    Pending,
    SentToBot,
    Downloading,
    Completed,
    Failed,
    Skipped,
}

impl TrackStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::SentToBot,
        Self::Downloading,
        Self::Completed,
        Self::Failed,
        Self::Skipped,
    ];

    /// Canonical persisted form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SentToBot => "sent_to_bot",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Completed, failed and skipped tracks count as processed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::SentToBot)
            | (Self::SentToBot, Self::Downloading)
            | (Self::Downloading, Self::Completed)
            | (Self::Failed, Self::Pending) => true,
            (from, Self::Failed | Self::Skipped) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sent_to_bot" | "sent" => Ok(Self::SentToBot),
            "downloading" | "in_progress" => Ok(Self::Downloading),
            "completed" | "done" | "success" => Ok(Self::Completed),
            "failed" | "error" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown track status: {other}")),
        }
    }
}

impl TryFrom<String> for TrackStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrackStatus> for String {
    fn from(value: TrackStatus) -> Self {
        value.as_str().to_string()
    }
}
