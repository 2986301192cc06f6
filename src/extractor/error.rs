//! Error types for metadata extraction.

use thiserror::Error;

/// Errors raised while resolving a link to tracks.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The input is not a recognizable Spotify link.
    #[error(
        "not a Spotify playlist, album or track link: {input}\n  Suggestion: use a URL like https://open.spotify.com/playlist/<id>"
    )]
    InvalidLink { input: String },

    /// Client credentials were rejected.
    #[error("[AUTH] Spotify rejected the client credentials: {message}")]
    Auth { message: String },

    /// Connection-level failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// The resource does not exist or is private.
    #[error("Spotify resource not found: {url}")]
    NotFound { url: String },

    /// Rate limited and out of retries.
    #[error("rate limited by Spotify API (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ExtractorError {
    pub fn invalid_link(input: impl Into<String>) -> Self {
        Self::InvalidLink {
            input: input.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_link_suggests_format() {
        let msg = ExtractorError::invalid_link("https://example.com").to_string();
        assert!(msg.contains("https://example.com"));
        assert!(msg.contains("open.spotify.com/playlist"));
    }
}
