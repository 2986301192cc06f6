//! Persisted session document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::track::Track;

use super::status::TrackStatus;

/// Current on-disk document version.
pub const FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

/// Mutable per-track record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackProgress {
    pub track_id: String,
    /// `"artist - title"` label.
    pub track_name: String,
    pub track_url: String,
    pub status: TrackStatus,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
    /// Seconds between `sent_to_bot_at` and completion.
    pub download_time: Option<f64>,
    pub sent_to_bot_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Zero-based position in the playlist.
    #[serde(default)]
    pub position: usize,
}

impl TrackProgress {
    /// New PENDING record for `track`.
    #[must_use]
    pub fn new(track: &Track, position: usize) -> Self {
        Self {
            track_id: track.id.clone(),
            track_name: track.label(),
            track_url: track.url.clone(),
            status: TrackStatus::Pending,
            attempts: 0,
            last_attempt: None,
            error_message: None,
            file_path: None,
            file_size: None,
            download_time: None,
            sent_to_bot_at: None,
            completed_at: None,
            position,
        }
    }

    /// Minimal track stand-in rebuilt from the stored label.
    #[must_use]
    pub fn to_track(&self) -> Track {
        Track::from_label(&self.track_id, &self.track_name, &self.track_url)
    }
}

/// One session over a playlist or album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub session_id: String,
    pub playlist_url: String,
    pub playlist_name: String,
    pub total_tracks: usize,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tracks: BTreeMap<String, TrackProgress>,
}

impl SessionProgress {
    /// Creates a session with every track PENDING.
    ///
    /// Duplicate track ids keep their first position.
    #[must_use]
    pub fn new(url: &str, name: &str, tracks: &[Track], now: DateTime<Utc>) -> Self {
        let mut map = BTreeMap::new();
        for (position, track) in tracks.iter().enumerate() {
            map.entry(track.id.clone())
                .or_insert_with(|| TrackProgress::new(track, position));
        }
        Self {
            format_version: FORMAT_VERSION,
            session_id: now.format("session_%Y%m%d_%H%M%S").to_string(),
            playlist_url: url.to_string(),
            playlist_name: name.to_string(),
            total_tracks: map.len(),
            started_at: now,
            last_updated: now,
            completed_at: None,
            tracks: map,
        }
    }

    /// Tracks in playlist order.
    #[must_use]
    pub fn ordered(&self) -> Vec<&TrackProgress> {
        let mut tracks: Vec<&TrackProgress> = self.tracks.values().collect();
        tracks.sort_by_key(|t| t.position);
        tracks
    }

    /// Number of tracks in `status`.
    #[must_use]
    pub fn count(&self, status: TrackStatus) -> usize {
        self.tracks.values().filter(|t| t.status == status).count()
    }
}
