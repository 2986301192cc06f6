//! Spotify Relay Core Library
//!
//! This library relays Spotify playlists, albums and tracks to a Telegram
//! music bot, one text query per track, and files the audio the bot sends
//! back into an organized local tree.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`track`] - Track metadata value type
//! - [`extractor`] - Spotify link parsing and Web API metadata extraction
//! - [`transport`] - Messaging transport trait and Telegram Bot API client
//! - [`correlation`] - Matching asynchronous bot replies to outstanding requests
//! - [`session`] - Per-track lifecycle, statistics and resumable persistence
//! - [`organizer`] - Naming, placing and de-duplicating downloaded files
//! - [`pacing`] - Minimum spacing between outbound requests
//! - [`orchestrator`] - Batch/sequential run loop tying everything together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod correlation;
pub mod extractor;
pub mod orchestrator;
pub mod organizer;
pub mod pacing;
pub mod session;
pub mod track;
pub mod transport;

// Re-export commonly used types
pub use correlation::{BotEvent, CorrelationConfig, CorrelationEngine, Disposition, EventKind};
pub use extractor::{ExtractorError, PlaylistInfo, SpotifyClient, SpotifyConfig, TrackSource};
pub use orchestrator::{
    BatchOrchestrator, ChannelObserver, DryRunListing, MissingEntry, MissingReport,
    OrchestratorConfig, OrchestratorError, ProgressEvent, ProgressObserver, RunOutcome, RunRequest,
    check_missing, dry_run_listing,
};
pub use organizer::{FileOrganizer, OrganizeScheme, OrganizerConfig, OrganizerError};
pub use pacing::SendPacer;
pub use session::{ProgressStore, SessionError, SessionStats, SessionTracker, TrackStatus};
pub use track::Track;
pub use transport::{TelegramConfig, TelegramTransport, Transport, TransportError};
