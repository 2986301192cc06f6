//! Metadata extraction: resolving a playlist/album/track link to tracks.

mod error;
pub mod link;
pub mod spotify;

use async_trait::async_trait;
use serde::Serialize;

use crate::track::Track;

pub use error::ExtractorError;
pub use link::{ContentType, SpotifyLink, detect_content_type, looks_like_spotify_link};
pub use spotify::{SpotifyClient, SpotifyConfig};

/// Summary of the resolved collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistInfo {
    pub name: String,
    /// Playlist owner, or the album's artists.
    pub owner: String,
    pub total_tracks: usize,
}

/// Source of ordered track listings.
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn get_playlist_info(&self, url: &str) -> Result<PlaylistInfo, ExtractorError>;

    /// All tracks of the collection, in order.
    async fn extract_tracks(&self, url: &str) -> Result<Vec<Track>, ExtractorError>;
}
