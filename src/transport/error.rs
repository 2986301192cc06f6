//! Error types for the messaging transport.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`super::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server asked us to slow down.
    #[error("flood control: retry after {seconds}s")]
    FloodWait { seconds: u64 },

    /// An operation did not finish in time.
    #[error("timeout during {operation}")]
    Timeout { operation: String },

    /// Connection-level failure.
    #[error("network error during {operation}: {source}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with an error.
    #[error("{method} failed ({code}): {description}")]
    Api {
        method: String,
        code: i64,
        description: String,
    },

    /// The credentials were rejected.
    #[error(
        "[AUTH] transport rejected credentials: {description}\n  Suggestion: check TELEGRAM_BOT_TOKEN"
    )]
    Unauthorized { description: String },

    /// Writing a downloaded file failed.
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A download finished with zero bytes.
    #[error("downloaded file {path} is empty")]
    EmptyFile { path: PathBuf },

    /// The event has no attachment to download.
    #[error("message {message_id} has no file attachment")]
    MissingAttachment { message_id: i64 },

    /// The requested option index does not exist.
    #[error("message {message_id} has no option {index}")]
    NoSuchOption { message_id: i64, index: usize },

    /// The event stream was already taken or has shut down.
    #[error("event stream unavailable")]
    Closed,
}

impl TransportError {
    #[must_use]
    pub fn flood_wait(seconds: u64) -> Self {
        Self::FloodWait { seconds }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn network(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The server-mandated cooldown, for flood-control errors.
    #[must_use]
    pub fn flood_wait_duration(&self) -> Option<Duration> {
        match self {
            Self::FloodWait { seconds } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flood_wait_duration() {
        assert_eq!(
            TransportError::flood_wait(12).flood_wait_duration(),
            Some(Duration::from_secs(12))
        );
        assert_eq!(TransportError::Closed.flood_wait_duration(), None);
    }

    #[test]
    fn test_unauthorized_message_has_suggestion() {
        let err = TransportError::Unauthorized {
            description: "Unauthorized".to_string(),
        };
        assert!(err.to_string().contains("Suggestion"));
    }
}
