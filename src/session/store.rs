//! Atomic JSON persistence for [`SessionProgress`].

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::error::SessionError;
use super::progress::{FORMAT_VERSION, SessionProgress};

/// Reads and writes the session document at a fixed path.
///
/// Writes go to `<path>.tmp`, are synced, and then renamed over the target,
/// so a reader never sees a half-written document.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Loads the document. A missing file is `Ok(None)`.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Option<SessionProgress>, SessionError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::io(&self.path, e)),
        };
        let session: SessionProgress =
            serde_json::from_str(&raw).map_err(|source| SessionError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if session.format_version > FORMAT_VERSION {
            return Err(SessionError::UnsupportedVersion {
                path: self.path.clone(),
                version: session.format_version,
            });
        }
        debug!(session_id = %session.session_id, tracks = session.tracks.len(), "loaded session");
        Ok(Some(session))
    }

    /// Atomically replaces the document.
    pub fn save(&self, session: &SessionProgress) -> Result<(), SessionError> {
        let json = serde_json::to_vec_pretty(session).map_err(SessionError::Serialize)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;
        }

        let temp = self.temp_path();
        let write_result = (|| {
            let mut file = File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp);
            return Err(SessionError::io(&temp, e));
        }

        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            SessionError::io(&self.path, e)
        })
    }

    /// Deletes the document. Deleting a missing file is not an error.
    pub fn delete(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::io(&self.path, e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::session::status::TrackStatus;
    use crate::track::Track;

    fn session() -> SessionProgress {
        let tracks = vec![
            Track::new("t1", "Song", vec!["Artist".to_string()], "u1"),
            Track::new("t2", "Other", vec!["Band".to_string()], "u2"),
        ];
        SessionProgress::new("https://open.spotify.com/playlist/x", "Mix", &tracks, Utc::now())
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_round_trip_exact() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("nested").join("progress.json"));
        let mut original = session();
        {
            let t = original.tracks.get_mut("t1").unwrap();
            t.status = TrackStatus::Completed;
            t.attempts = 2;
            t.file_path = Some("/music/Artist - Song.flac".to_string());
            t.file_size = Some(31_337);
            t.download_time = Some(12.75);
            t.sent_to_bot_at = Some(Utc::now());
            t.completed_at = Some(Utc::now());
            t.last_attempt = Some(Utc::now());
        }
        original.tracks.get_mut("t2").unwrap().status = TrackStatus::SentToBot;

        store.save(&original).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_error_and_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, b"{\"session_id\": ").unwrap();
        let store = ProgressStore::new(&path);
        assert!(matches!(store.load(), Err(SessionError::Corrupt { .. })));
        assert!(path.exists());
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));
        store.save(&session()).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), raw.replace("\"pending\"", "\"warped\"")).unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("warped"), "{err}");
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));
        let mut s = session();
        s.format_version = FORMAT_VERSION + 1;
        store.save(&s).unwrap();
        assert!(matches!(
            store.load(),
            Err(SessionError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));
        store.save(&session()).unwrap();
        store.delete().unwrap();
        store.delete().unwrap();
        assert!(!store.path().exists());
    }
}
