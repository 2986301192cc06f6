//! Placement of downloaded audio files into the output tree.
//!
//! [`FileOrganizer`] computes the final location of a track from its
//! metadata, moves the downloaded temp file there, resolves name collisions
//! (identical content is treated as a duplicate, different or unhashed
//! content gets a ` (n)` suffix) and validates the result. All operations are blocking
//! filesystem calls; async callers run them on `spawn_blocking`.

mod error;
mod naming;

use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::track::Track;

pub use error::OrganizerError;
pub use naming::{
    ALLOWED_EXTENSIONS, DEFAULT_EXTENSION, MAX_FILENAME_LEN, MAX_FOLDER_LEN, audio_extension,
    has_audio_extension, match_key, sanitize_component, track_filename,
};

/// Name of the staging directory below the output directory.
pub const TEMP_DIR_NAME: &str = "temp";

/// Files smaller than this fail validation.
pub const MIN_FILE_SIZE: u64 = 1024;

/// Above this size, files are not hashed and a name collision is always
/// treated as distinct content.
pub const HASH_SIZE_LIMIT: u64 = 50 * 1024 * 1024;

/// Similarity (0-100) at which an existing file counts as the same track.
pub const EXISTING_MATCH_THRESHOLD: f64 = 90.0;

/// Highest numeric suffix tried before falling back to a timestamp.
const MAX_COLLISION_SUFFIX: u32 = 1000;

const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Directory layout below the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrganizeScheme {
    /// `<artist>/`
    #[default]
    Artist,
    /// `<artist>/<album>/`
    Album,
    /// Everything directly in the output directory.
    Flat,
}

impl OrganizeScheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Flat => "none",
        }
    }
}

impl fmt::Display for OrganizeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizeScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "artist" => Ok(Self::Artist),
            "album" => Ok(Self::Album),
            "none" | "flat" => Ok(Self::Flat),
            other => Err(format!(
                "unknown organization scheme '{other}' (expected artist, album or none)"
            )),
        }
    }
}

/// Where and how files are placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizerConfig {
    pub output_dir: PathBuf,
    pub scheme: OrganizeScheme,
    /// Adds a release-year level (Artist) or a year prefix on the album folder (Album).
    pub year_folders: bool,
}

impl OrganizerConfig {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            scheme: OrganizeScheme::default(),
            year_folders: false,
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: OrganizeScheme) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_year_folders(mut self, enabled: bool) -> Self {
        self.year_folders = enabled;
        self
    }
}

/// Result of placing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub final_path: PathBuf,
    pub size: u64,
    /// An identical file was already in place; the downloaded copy was discarded.
    pub already_existed: bool,
}

/// Counters accumulated over the organizer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrganizerStats {
    pub moved: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub total_bytes: u64,
}

/// Places downloaded files into the organized output tree.
#[derive(Debug)]
pub struct FileOrganizer {
    config: OrganizerConfig,
    stats: Mutex<OrganizerStats>,
}

impl FileOrganizer {
    #[must_use]
    pub fn new(config: OrganizerConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(OrganizerStats::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrganizerConfig {
        &self.config
    }

    /// Staging directory for in-progress downloads.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.config.output_dir.join(TEMP_DIR_NAME)
    }

    /// Creates the output and staging directories.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizerError::OutputDir`] when the output path exists but
    /// is not a directory, or [`OrganizerError::Io`] when creation fails.
    pub fn prepare(&self) -> Result<(), OrganizerError> {
        let output = &self.config.output_dir;
        if output.exists() && !output.is_dir() {
            return Err(OrganizerError::OutputDir {
                path: output.clone(),
                reason: "path exists and is not a directory".to_string(),
            });
        }
        let temp = self.temp_dir();
        fs::create_dir_all(&temp).map_err(|e| OrganizerError::io(&temp, e))
    }

    /// Directory a track's file belongs in.
    #[must_use]
    pub fn organized_dir(&self, track: &Track) -> PathBuf {
        let base = self.config.output_dir.clone();
        if self.config.scheme == OrganizeScheme::Flat {
            return base;
        }

        let artist = base.join(sanitize_component(track.primary_artist(), MAX_FOLDER_LEN));
        let year = track.release_year().filter(|_| self.config.year_folders);
        match self.config.scheme {
            OrganizeScheme::Album => {
                let album = if track.album.trim().is_empty() {
                    UNKNOWN_ALBUM.to_string()
                } else {
                    sanitize_component(&track.album, MAX_FOLDER_LEN)
                };
                match year {
                    Some(year) => artist.join(format!("{year} - {album}")),
                    None => artist.join(album),
                }
            }
            _ => match year {
                Some(year) => artist.join(year),
                None => artist,
            },
        }
    }

    /// Final path for `track`, using the extension of the bot filename when accepted.
    #[must_use]
    pub fn get_download_path(&self, track: &Track, filename: Option<&str>) -> PathBuf {
        self.organized_dir(track).join(track_filename(track, filename))
    }

    /// Moves `temp_path` to the organized location of `track`.
    ///
    /// When a file already occupies the target name, identical content makes
    /// this a no-op (the temp file is removed and the existing path returned);
    /// different content is placed under the next free ` (n)` name. The moved
    /// file is validated and removed again if it fails.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizerError`] when the source is missing, the move fails
    /// or the placed file does not validate.
    pub fn move_to_organized_location(
        &self,
        temp_path: &Path,
        track: &Track,
        filename: Option<&str>,
    ) -> Result<MoveOutcome, OrganizerError> {
        let result = self.place(temp_path, track, filename);
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(outcome) if outcome.already_existed => stats.duplicates += 1,
            Ok(outcome) => {
                stats.moved += 1;
                stats.total_bytes += outcome.size;
            }
            Err(_) => stats.errors += 1,
        }
        result
    }

    fn place(
        &self,
        temp_path: &Path,
        track: &Track,
        filename: Option<&str>,
    ) -> Result<MoveOutcome, OrganizerError> {
        if !temp_path.is_file() {
            return Err(OrganizerError::MissingSource {
                path: temp_path.to_path_buf(),
            });
        }

        let mut target = self.get_download_path(track, filename);
        if target.exists() {
            if files_are_identical(temp_path, &target)? {
                fs::remove_file(temp_path).map_err(|e| OrganizerError::io(temp_path, e))?;
                let size = file_size(&target)?;
                info!(path = %target.display(), "identical file already present");
                return Ok(MoveOutcome {
                    final_path: target,
                    size,
                    already_existed: true,
                });
            }
            target = resolve_collision(&target);
            debug!(path = %target.display(), "name taken, using suffixed path");
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| OrganizerError::io(parent, e))?;
        }
        move_file(temp_path, &target)?;

        match self.validate(&target) {
            Ok(size) => {
                info!(track = %track.label(), path = %target.display(), size, "file organized");
                Ok(MoveOutcome {
                    final_path: target,
                    size,
                    already_existed: false,
                })
            }
            Err(err) => {
                if let Err(e) = fs::remove_file(&target) {
                    warn!(path = %target.display(), error = %e, "could not remove invalid file");
                }
                Err(err)
            }
        }
    }

    /// Checks that `path` exists, is at least [`MIN_FILE_SIZE`] bytes and has
    /// an accepted audio extension. Returns the size.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizerError::Validation`] naming the failed check.
    pub fn validate(&self, path: &Path) -> Result<u64, OrganizerError> {
        let meta = fs::metadata(path)
            .map_err(|_| OrganizerError::validation(path, "file does not exist"))?;
        if !meta.is_file() {
            return Err(OrganizerError::validation(path, "not a regular file"));
        }
        if meta.len() < MIN_FILE_SIZE {
            return Err(OrganizerError::validation(
                path,
                format!("file too small ({} bytes)", meta.len()),
            ));
        }
        if !has_audio_extension(path) {
            return Err(OrganizerError::validation(path, "unsupported file extension"));
        }
        Ok(meta.len())
    }

    /// Organized file of `track` under any accepted extension, if present.
    #[must_use]
    pub fn find_existing(&self, track: &Track) -> Option<PathBuf> {
        let dir = self.organized_dir(track);
        ALLOWED_EXTENSIONS
            .iter()
            .map(|ext| dir.join(track_filename(track, Some(format!("x{ext}").as_str()))))
            .find(|candidate| candidate.is_file())
    }

    /// Indexes every audio file already in the output tree for fuzzy lookups.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizerError::Io`] when a directory cannot be read.
    pub fn scan_existing(&self) -> Result<ExistingIndex, OrganizerError> {
        let temp = self.temp_dir();
        let mut entries = Vec::new();
        let mut queue = VecDeque::from([self.config.output_dir.clone()]);

        while let Some(dir) = queue.pop_front() {
            let read = match fs::read_dir(&dir) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(OrganizerError::io(&dir, e)),
            };
            for entry in read {
                let entry = entry.map_err(|e| OrganizerError::io(&dir, e))?;
                let path = entry.path();
                if path.is_dir() {
                    if path != temp {
                        queue.push_back(path);
                    }
                } else if has_audio_extension(&path)
                    && let Some(name) = path.file_name().and_then(|n| n.to_str())
                {
                    entries.push((match_key(name), path.clone()));
                }
            }
        }

        debug!(files = entries.len(), "indexed existing audio files");
        Ok(ExistingIndex { entries })
    }

    /// Removes every file in the staging directory. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizerError::Io`] when the directory cannot be read.
    pub fn cleanup_temp_files(&self) -> Result<usize, OrganizerError> {
        let temp = self.temp_dir();
        let read = match fs::read_dir(&temp) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(OrganizerError::io(&temp, e)),
        };

        let mut removed = 0;
        for entry in read {
            let path = entry.map_err(|e| OrganizerError::io(&temp, e))?.path();
            if path.is_file() {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "could not remove temp file"),
                }
            }
        }
        if removed > 0 {
            info!(removed, "cleaned up temp files");
        }
        Ok(removed)
    }

    #[must_use]
    pub fn stats(&self) -> OrganizerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of audio files in the output tree, keyed for fuzzy matching.
#[derive(Debug, Clone, Default)]
pub struct ExistingIndex {
    entries: Vec<(String, PathBuf)>,
}

impl ExistingIndex {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best-matching existing file for `track` scoring at least
    /// [`EXISTING_MATCH_THRESHOLD`].
    #[must_use]
    pub fn find(&self, track: &Track) -> Option<&Path> {
        self.best_match(track)
            .filter(|(_, score)| *score >= EXISTING_MATCH_THRESHOLD)
            .map(|(path, _)| path)
    }

    /// Closest existing file for `track` and its similarity (0-100),
    /// whatever the score.
    #[must_use]
    pub fn best_match(&self, track: &Track) -> Option<(&Path, f64)> {
        let wanted = match_key(&track_filename(track, None));
        self.entries
            .iter()
            .map(|(key, path)| (path.as_path(), strsim::normalized_levenshtein(key, &wanted) * 100.0))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// First free `"<stem> (n)<ext>"` next to `target`, or a timestamped name.
fn resolve_collision(target: &Path) -> PathBuf {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(naming::EMPTY_NAME);
    let ext = target
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    for n in 1..MAX_COLLISION_SUFFIX {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let timestamp = chrono::Utc::now().timestamp();
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn move_file(from: &Path, to: &Path) -> Result<(), OrganizerError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems; fall back to copy and delete.
    fs::copy(from, to).map_err(|e| OrganizerError::io(to, e))?;
    fs::remove_file(from).map_err(|e| OrganizerError::io(from, e))
}

fn file_size(path: &Path) -> Result<u64, OrganizerError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| OrganizerError::io(path, e))
}

fn files_are_identical(a: &Path, b: &Path) -> Result<bool, OrganizerError> {
    let size = file_size(a)?;
    if size != file_size(b)? {
        return Ok(false);
    }
    if size > HASH_SIZE_LIMIT {
        return Ok(false);
    }
    Ok(file_hash(a)? == file_hash(b)?)
}

fn file_hash(path: &Path) -> Result<String, OrganizerError> {
    let mut file = File::open(path).map_err(|e| OrganizerError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| OrganizerError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
