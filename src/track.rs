//! Track value type shared by the extractor, correlation engine and organizer.

use serde::{Deserialize, Serialize};

/// Artist placeholder used when a stored label carries no artist part.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// A single resolved song with identifying catalog metadata.
///
/// Tracks are produced by a [`crate::extractor::TrackSource`] and are
/// read-only for the rest of the crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Catalog identifier (Spotify track id).
    pub id: String,
    /// Track title.
    pub name: String,
    /// Ordered artist names.
    pub artists: Vec<String>,
    /// Album title, empty when unknown.
    pub album: String,
    /// Canonical track URL sent to the bot.
    pub url: String,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Release date as reported by the catalog (`YYYY`, `YYYY-MM` or `YYYY-MM-DD`).
    pub release_date: Option<String>,
    /// International Standard Recording Code.
    pub isrc: Option<String>,
}

impl Track {
    /// Creates a track with the required fields; optional metadata is empty.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        artists: Vec<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artists,
            album: String::new(),
            url: url.into(),
            duration_ms: 0,
            release_date: None,
            isrc: None,
        }
    }

    /// Rebuilds a minimal stand-in from a stored `"artist - title"` label.
    ///
    /// The label is split once on `" - "`; multiple artists are separated by
    /// `", "`. A label without the separator becomes the title and the artist
    /// is [`UNKNOWN_ARTIST`].
    ///
    /// # Example
    ///
    /// ```
    /// use relay_core::Track;
    ///
    /// let track = Track::from_label("id1", "Daft Punk, Pharrell - Get Lucky", "https://x");
    /// assert_eq!(track.artists, vec!["Daft Punk", "Pharrell"]);
    /// assert_eq!(track.name, "Get Lucky");
    /// ```
    #[must_use]
    pub fn from_label(id: impl Into<String>, label: &str, url: impl Into<String>) -> Self {
        let (artists, name) = match label.split_once(" - ") {
            Some((artist_part, title)) => {
                let artists = artist_part
                    .split(", ")
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>();
                (artists, title.trim().to_string())
            }
            None => (Vec::new(), label.trim().to_string()),
        };
        let artists = if artists.is_empty() {
            vec![UNKNOWN_ARTIST.to_string()]
        } else {
            artists
        };
        Self::new(id, name, artists, url)
    }

    /// Artists joined with `", "`.
    #[must_use]
    pub fn artist_string(&self) -> String {
        self.artists.join(", ")
    }

    /// First listed artist, or [`UNKNOWN_ARTIST`].
    #[must_use]
    pub fn primary_artist(&self) -> &str {
        self.artists
            .first()
            .map_or(UNKNOWN_ARTIST, String::as_str)
    }

    /// Human-readable `"artist - title"` label.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist_string(), self.name)
    }

    /// Duration as `M:SS`.
    #[must_use]
    pub fn duration_formatted(&self) -> String {
        let total_secs = self.duration_ms / 1000;
        format!("{}:{:02}", total_secs / 60, total_secs % 60)
    }

    /// Leading four-digit year of the release date, if present.
    #[must_use]
    pub fn release_year(&self) -> Option<&str> {
        let date = self.release_date.as_deref()?;
        let year = date.get(..4)?;
        year.chars().all(|c| c.is_ascii_digit()).then_some(year)
    }
}
