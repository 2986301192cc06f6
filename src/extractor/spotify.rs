//! Spotify Web API client using the client-credentials flow.
//!
//! Responses are cached for [`DEFAULT_CACHE_TTL`] and calls are spaced by
//! at least [`DEFAULT_MIN_REQUEST_INTERVAL`]. HTTP 429 responses honour the
//! `Retry-After` header up to [`MAX_RATE_LIMIT_RETRIES`] times.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::pacing::SendPacer;
use crate::track::Track;

use super::error::ExtractorError;
use super::link::{ContentType, SpotifyLink};
use super::{PlaylistInfo, TrackSource};

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const PLAYLIST_PAGE_LIMIT: usize = 100;
const ALBUM_PAGE_LIMIT: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and endpoints for [`SpotifyClient`].
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub token_url: String,
    pub cache_ttl: Duration,
    pub min_request_interval: Duration,
}

impl SpotifyConfig {
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
        }
    }

    /// Points both the API and the token endpoint at `base` (for tests).
    #[must_use]
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.api_base = format!("{base}/v1");
        self.token_url = format!("{base}/api/token");
        self
    }
}

// ==================== API payloads ====================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
    next: Option<String>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    display_name: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackCount {
    total: usize,
}

#[derive(Debug, Deserialize)]
struct PlaylistObject {
    name: String,
    owner: Owner,
    tracks: TrackCount,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<TrackObject>,
    #[serde(default)]
    is_local: bool,
}

#[derive(Debug, Deserialize)]
struct AlbumRef {
    name: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<Named>,
    album: Option<AlbumRef>,
    external_urls: Option<ExternalUrls>,
    #[serde(default)]
    duration_ms: u64,
    external_ids: Option<ExternalIds>,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: String,
    #[serde(default)]
    artists: Vec<Named>,
    release_date: Option<String>,
    total_tracks: usize,
}

impl TrackObject {
    /// Converts to a [`Track`]; local files and id-less items yield `None`.
    fn into_track(self, album_override: Option<(&str, Option<&str>)>) -> Option<Track> {
        let id = self.id?;
        let url = self
            .external_urls
            .and_then(|u| u.spotify)
            .unwrap_or_else(|| format!("https://open.spotify.com/track/{id}"));
        let (album, release_date) = match (album_override, self.album) {
            (Some((name, date)), _) => (name.to_string(), date.map(String::from)),
            (None, Some(album)) => (album.name, album.release_date),
            (None, None) => (String::new(), None),
        };
        Some(Track {
            id,
            name: self.name,
            artists: self.artists.into_iter().map(|a| a.name).collect(),
            album,
            url,
            duration_ms: self.duration_ms,
            release_date,
            isrc: self.external_ids.and_then(|e| e.isrc),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// [`TrackSource`] backed by the Spotify Web API.
#[derive(Debug)]
pub struct SpotifyClient {
    config: SpotifyConfig,
    http: reqwest::Client,
    token: tokio::sync::Mutex<Option<CachedToken>>,
    cache: Mutex<HashMap<String, (Instant, Value)>>,
    pacer: SendPacer,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Result<Self, ExtractorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExtractorError::network(&config.api_base, e))?;
        let pacer = SendPacer::new(config.min_request_interval);
        Ok(Self {
            config,
            http,
            token: tokio::sync::Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
            pacer,
        })
    }

    async fn access_token(&self, force_refresh: bool) -> Result<String, ExtractorError> {
        let mut guard = self.token.lock().await;
        if !force_refresh
            && let Some(token) = guard.as_ref()
            && Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at
        {
            return Ok(token.access_token.clone());
        }

        let url = &self.config.token_url;
        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ExtractorError::network(url, e))?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let message = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Auth { message });
        }
        if !status.is_success() {
            return Err(ExtractorError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExtractorError::network(url, e))?;
        debug!(expires_in = token.expires_in, "spotify access token obtained");
        let cached = CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        };
        let access = cached.access_token.clone();
        *guard = Some(cached);
        Ok(access)
    }

    fn cached(&self, url: &str) -> Option<Value> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(url)
            .filter(|(at, _)| at.elapsed() < self.config.cache_ttl)
            .map(|(_, value)| value.clone())
    }

    fn store(&self, url: &str, value: &Value) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(url.to_string(), (Instant::now(), value.clone()));
    }

    #[instrument(skip(self))]
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExtractorError> {
        let url = format!("{}/{}", self.config.api_base, path.trim_start_matches('/'));
        let value = match self.cached(&url) {
            Some(value) => {
                debug!("cache hit");
                value
            }
            None => {
                let value = self.fetch(&url).await?;
                self.store(&url, &value);
                value
            }
        };
        serde_json::from_value(value).map_err(|e| ExtractorError::Decode {
            url,
            message: e.to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Value, ExtractorError> {
        let mut rate_limit_retries = 0;
        let mut refreshed = false;
        loop {
            self.pacer.acquire().await;
            let token = self.access_token(false).await?;
            let response = self
                .http
                .get(url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| ExtractorError::network(url, e))?;

            match response.status() {
                status if status.is_success() => {
                    return response
                        .json()
                        .await
                        .map_err(|e| ExtractorError::network(url, e));
                }
                StatusCode::UNAUTHORIZED if !refreshed => {
                    refreshed = true;
                    self.access_token(true).await?;
                }
                StatusCode::NOT_FOUND => {
                    return Err(ExtractorError::NotFound {
                        url: url.to_string(),
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .unwrap_or(1);
                    if rate_limit_retries >= MAX_RATE_LIMIT_RETRIES {
                        return Err(ExtractorError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                    }
                    rate_limit_retries += 1;
                    warn!(retry_after_secs = retry_after, attempt = rate_limit_retries, "spotify rate limit");
                    self.pacer.record_flood_wait(Duration::from_secs(retry_after));
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                }
                status => {
                    return Err(ExtractorError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
            }
        }
    }

    async fn playlist_tracks(&self, id: &str) -> Result<Vec<Track>, ExtractorError> {
        let mut tracks = Vec::new();
        let mut offset = 0;
        loop {
            let page: Paging<PlaylistItem> = self
                .get(&format!(
                    "playlists/{id}/tracks?limit={PLAYLIST_PAGE_LIMIT}&offset={offset}"
                ))
                .await?;
            let count = page.items.len();
            tracks.extend(
                page.items
                    .into_iter()
                    .filter(|item| !item.is_local)
                    .filter_map(|item| item.track)
                    .filter_map(|t| t.into_track(None)),
            );
            offset += count;
            if page.next.is_none() || count == 0 || offset >= page.total {
                break;
            }
        }
        Ok(tracks)
    }

    async fn album_tracks(&self, id: &str) -> Result<Vec<Track>, ExtractorError> {
        let album: AlbumObject = self.get(&format!("albums/{id}")).await?;
        let mut tracks = Vec::new();
        let mut offset = 0;
        loop {
            let page: Paging<TrackObject> = self
                .get(&format!(
                    "albums/{id}/tracks?limit={ALBUM_PAGE_LIMIT}&offset={offset}"
                ))
                .await?;
            let count = page.items.len();
            tracks.extend(page.items.into_iter().filter_map(|t| {
                t.into_track(Some((album.name.as_str(), album.release_date.as_deref())))
            }));
            offset += count;
            if page.next.is_none() || count == 0 || offset >= page.total {
                break;
            }
        }
        Ok(tracks)
    }
}

fn join_names(names: &[Named]) -> String {
    names
        .iter()
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl TrackSource for SpotifyClient {
    async fn get_playlist_info(&self, url: &str) -> Result<PlaylistInfo, ExtractorError> {
        let link = SpotifyLink::parse(url)?;
        let info = match link.kind {
            ContentType::Playlist => {
                let playlist: PlaylistObject = self
                    .get(&format!(
                        "playlists/{}?fields=name,owner(display_name,id),tracks(total)",
                        link.id
                    ))
                    .await?;
                PlaylistInfo {
                    name: playlist.name,
                    owner: playlist
                        .owner
                        .display_name
                        .or(playlist.owner.id)
                        .unwrap_or_else(|| "Unknown".to_string()),
                    total_tracks: playlist.tracks.total,
                }
            }
            ContentType::Album => {
                let album: AlbumObject = self.get(&format!("albums/{}", link.id)).await?;
                PlaylistInfo {
                    owner: join_names(&album.artists),
                    name: album.name,
                    total_tracks: album.total_tracks,
                }
            }
            ContentType::Track => {
                let track: TrackObject = self.get(&format!("tracks/{}", link.id)).await?;
                PlaylistInfo {
                    owner: join_names(&track.artists),
                    name: track.name,
                    total_tracks: 1,
                }
            }
        };
        info!(kind = %link.kind, name = %info.name, total = info.total_tracks, "resolved collection");
        Ok(info)
    }

    async fn extract_tracks(&self, url: &str) -> Result<Vec<Track>, ExtractorError> {
        let link = SpotifyLink::parse(url)?;
        let tracks = match link.kind {
            ContentType::Playlist => self.playlist_tracks(&link.id).await?,
            ContentType::Album => self.album_tracks(&link.id).await?,
            ContentType::Track => {
                let track: TrackObject = self.get(&format!("tracks/{}", link.id)).await?;
                track.into_track(None).into_iter().collect()
            }
        };
        info!(kind = %link.kind, count = tracks.len(), "extracted tracks");
        Ok(tracks)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_track_object_conversion() {
        let obj: TrackObject = serde_json::from_value(json!({
            "id": "abc",
            "name": "Song",
            "artists": [{"name": "A"}, {"name": "B"}],
            "album": {"name": "LP", "release_date": "1999-01-01"},
            "external_urls": {"spotify": "https://open.spotify.com/track/abc"},
            "duration_ms": 123000,
            "external_ids": {"isrc": "USX"}
        }))
        .unwrap();
        let track = obj.into_track(None).unwrap();
        assert_eq!(track.label(), "A, B - Song");
        assert_eq!(track.album, "LP");
        assert_eq!(track.release_year(), Some("1999"));
        assert_eq!(track.isrc.as_deref(), Some("USX"));
    }

    #[test]
    fn test_local_track_without_id_is_dropped() {
        let obj: TrackObject =
            serde_json::from_value(json!({"id": null, "name": "Local", "artists": []})).unwrap();
        assert!(obj.into_track(None).is_none());
    }

    #[test]
    fn test_album_override_applies() {
        let obj: TrackObject =
            serde_json::from_value(json!({"id": "t", "name": "S", "artists": [{"name": "A"}]}))
                .unwrap();
        let track = obj.into_track(Some(("Album", Some("2001")))).unwrap();
        assert_eq!(track.album, "Album");
        assert_eq!(track.url, "https://open.spotify.com/track/t");
    }

    #[test]
    fn test_with_base_url() {
        let config = SpotifyConfig::new("id", "secret").with_base_url("http://127.0.0.1:9/");
        assert_eq!(config.api_base, "http://127.0.0.1:9/v1");
        assert_eq!(config.token_url, "http://127.0.0.1:9/api/token");
    }
}
