//! Spotify link recognition.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::error::ExtractorError;

/// Prefix every accepted web link starts with.
pub const SPOTIFY_WEB_PREFIX: &str = "https://open.spotify.com/";

/// Path of an `open.spotify.com` link, optionally locale-prefixed.
#[allow(clippy::expect_used)]
static WEB_PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:intl-[a-zA-Z-]+/)?(playlist|album|track)/([A-Za-z0-9]+)/?$")
        .expect("web path regex is valid") // Static pattern, safe to panic
});

/// `spotify:<kind>:<id>` URI.
#[allow(clippy::expect_used)]
static URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^spotify:(playlist|album|track):([A-Za-z0-9]+)$")
        .expect("URI regex is valid") // Static pattern, safe to panic
});

/// Kind of catalog resource a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Playlist,
    Album,
    Track,
}

impl ContentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Album => "album",
            Self::Track => "track",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "playlist" => Some(Self::Playlist),
            "album" => Some(Self::Album),
            "track" => Some(Self::Track),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognized link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyLink {
    pub kind: ContentType,
    pub id: String,
}

impl SpotifyLink {
    /// Parses a web link or `spotify:` URI. Query strings are ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_core::extractor::{ContentType, SpotifyLink};
    ///
    /// let link = SpotifyLink::parse("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc").unwrap();
    /// assert_eq!(link.kind, ContentType::Playlist);
    /// assert_eq!(link.id, "37i9dQZF1DXcBWIGoYBM5M");
    /// ```
    pub fn parse(input: &str) -> Result<Self, ExtractorError> {
        let trimmed = input.trim();
        let captures = if trimmed.starts_with("spotify:") {
            URI_PATTERN
                .captures(trimmed)
                .map(|c| (c[1].to_string(), c[2].to_string()))
        } else {
            Url::parse(trimmed)
                .ok()
                .filter(|u| u.scheme() == "https" && u.host_str() == Some("open.spotify.com"))
                .and_then(|u| {
                    WEB_PATH_PATTERN
                        .captures(u.path())
                        .map(|c| (c[1].to_string(), c[2].to_string()))
                })
        };
        let (kind, id) = captures.ok_or_else(|| ExtractorError::invalid_link(trimmed))?;
        let kind = ContentType::parse(&kind).ok_or_else(|| ExtractorError::invalid_link(trimmed))?;
        Ok(Self { kind, id })
    }

    /// Canonical web URL.
    #[must_use]
    pub fn web_url(&self) -> String {
        format!("{SPOTIFY_WEB_PREFIX}{}/{}", self.kind, self.id)
    }
}

/// Cheap pre-check used by the CLI before any network access.
#[must_use]
pub fn looks_like_spotify_link(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.starts_with(SPOTIFY_WEB_PREFIX) || trimmed.starts_with("spotify:")
}

/// Content type of `input`, if it is a recognized link.
#[must_use]
pub fn detect_content_type(input: &str) -> Option<ContentType> {
    SpotifyLink::parse(input).ok().map(|l| l.kind)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_web_links() {
        let album = SpotifyLink::parse("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3").unwrap();
        assert_eq!(album.kind, ContentType::Album);

        let intl = SpotifyLink::parse("https://open.spotify.com/intl-de/track/4uLU6hMCjMI75M1A2tKUQC").unwrap();
        assert_eq!(intl.kind, ContentType::Track);
        assert_eq!(intl.id, "4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn test_parse_uri() {
        let link = SpotifyLink::parse("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M").unwrap();
        assert_eq!(link.kind, ContentType::Playlist);
        assert_eq!(link.web_url(), "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M");
    }

    #[test]
    fn test_reject_other_hosts_and_kinds() {
        assert!(SpotifyLink::parse("https://example.com/playlist/abc").is_err());
        assert!(SpotifyLink::parse("http://open.spotify.com/playlist/abc").is_err());
        assert!(SpotifyLink::parse("https://open.spotify.com/artist/abc").is_err());
        assert!(SpotifyLink::parse("not a url").is_err());
    }

    #[test]
    fn test_detect_and_precheck() {
        assert_eq!(
            detect_content_type("https://open.spotify.com/track/abc"),
            Some(ContentType::Track)
        );
        assert_eq!(detect_content_type("https://open.spotify.com/show/abc"), None);
        assert!(looks_like_spotify_link("  https://open.spotify.com/whatever"));
        assert!(!looks_like_spotify_link("status"));
    }
}
