//! Session-level errors for the batch orchestrator.
//!
//! Track-level failures never surface here; they are recorded as FAILED
//! tracks. These variants abort a run.

use thiserror::Error;

use crate::extractor::ExtractorError;
use crate::organizer::OrganizerError;
use crate::session::SessionError;
use crate::transport::TransportError;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The link could not be resolved to tracks.
    #[error("could not resolve tracks: {0}")]
    Extractor(#[from] ExtractorError),

    /// Progress could not be read or persisted.
    #[error("progress tracking failed: {0}")]
    Session(#[from] SessionError),

    /// The transport could not be started.
    #[error("transport unavailable: {0}")]
    Transport(#[from] TransportError),

    /// The output tree could not be prepared.
    #[error("output directory unavailable: {0}")]
    Organizer(#[from] OrganizerError),

    /// The collection resolved to zero tracks.
    #[error("no tracks found at {url}")]
    EmptyCollection { url: String },

    /// `start_from` lies outside the track list.
    #[error(
        "start position {start} is out of range (1..={total})\n  Suggestion: pass --start-from between 1 and {total}"
    )]
    InvalidStart { start: usize, total: usize },

    /// An orchestrator setting is unusable.
    #[error("invalid orchestrator configuration: {message}")]
    InvalidConfig { message: String },
}

impl OrchestratorError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
