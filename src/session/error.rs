//! Error types for session progress tracking.

use std::path::PathBuf;

use thiserror::Error;

use super::status::TrackStatus;

/// Errors raised by [`super::SessionTracker`] and [`super::ProgressStore`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading or writing the progress file failed.
    #[error("IO error on progress file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The progress file exists but is not a valid session document.
    #[error(
        "progress file {path} is corrupt: {source}\n  Suggestion: inspect the file or run `spotify-relay reset`"
    )]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing the in-memory session failed.
    #[error("failed to serialize session: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The progress file was written by a newer version of this tool.
    #[error("progress file {path} has unsupported format version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    /// An operation needs a session but none is active.
    #[error("no active session")]
    NoSession,

    /// The track id is not part of the active session.
    #[error("track {track_id} is not part of the active session")]
    UnknownTrack { track_id: String },

    /// The requested status change is not an edge of the lifecycle.
    #[error("track {track_id} cannot move from {from} to {to}")]
    InvalidTransition {
        track_id: String,
        from: TrackStatus,
        to: TrackStatus,
    },
}

impl SessionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unknown_track(track_id: impl Into<String>) -> Self {
        Self::UnknownTrack {
            track_id: track_id.into(),
        }
    }
}
