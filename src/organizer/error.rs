//! Error types for the file organizer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while placing downloaded files.
#[derive(Debug, Error)]
pub enum OrganizerError {
    /// A filesystem operation failed.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The downloaded file to place does not exist.
    #[error("downloaded file not found: {path}")]
    MissingSource { path: PathBuf },

    /// The placed file failed post-move validation.
    #[error("file validation failed for {path}: {reason}")]
    Validation { path: PathBuf, reason: String },

    /// The output directory could not be used.
    #[error(
        "output directory {path} is not usable: {reason}\n  Suggestion: pass a writable directory with --output-dir"
    )]
    OutputDir { path: PathBuf, reason: String },
}

impl OrganizerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
