//! Filename sanitization and naming rules for organized audio files.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::track::Track;

/// Maximum length of a generated filename, extension included.
pub const MAX_FILENAME_LEN: usize = 200;

/// Maximum length of an artist or album folder name.
pub const MAX_FOLDER_LEN: usize = 50;

/// Audio extensions kept from the bot-provided filename.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".flac", ".mp3", ".wav", ".m4a", ".ogg"];

/// Extension used when the bot filename carries none we accept.
pub const DEFAULT_EXTENSION: &str = ".flac";

/// Replacement for names that sanitize to nothing.
pub const EMPTY_NAME: &str = "untitled";

/// Bracketed or parenthesized qualifiers and "copy" markers ignored when comparing names.
#[allow(clippy::expect_used)]
static QUALIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^)]*\)|\[[^\]]*\]|-\s*copy\b")
        .expect("qualifier regex is valid") // Static pattern, safe to panic
});

/// Makes `value` safe as a single path component.
///
/// Reserved characters (`<>:"/\|?*`) and control characters are removed,
/// whitespace runs collapse to one space and leading/trailing dots and
/// spaces are trimmed. Names longer than `max_len` characters are cut while
/// keeping the extension.
///
/// # Example
///
/// ```
/// use relay_core::organizer::sanitize_component;
///
/// assert_eq!(sanitize_component("AC/DC: Live?  ", 200), "ACDC Live");
/// assert_eq!(sanitize_component("...", 200), "untitled");
/// ```
#[must_use]
pub fn sanitize_component(value: &str, max_len: usize) -> String {
    let stripped: String = value
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ');

    let name = if trimmed.chars().count() > max_len {
        truncate_keeping_extension(trimmed, max_len)
    } else {
        trimmed.to_string()
    };

    if name.is_empty() || name == "." || name == ".." {
        EMPTY_NAME.to_string()
    } else {
        name
    }
}

fn truncate_keeping_extension(name: &str, max_len: usize) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    };
    let ext_len = ext.chars().count();
    if ext_len >= max_len {
        return name.chars().take(max_len).collect();
    }
    let kept: String = stem.chars().take(max_len - ext_len).collect();
    format!("{}{ext}", kept.trim_end())
}

/// Lowercased extension of `filename` when it is an accepted audio type,
/// otherwise [`DEFAULT_EXTENSION`].
#[must_use]
pub fn audio_extension(filename: Option<&str>) -> &'static str {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .and_then(|ext| ALLOWED_EXTENSIONS.iter().copied().find(|allowed| *allowed == ext))
        .unwrap_or(DEFAULT_EXTENSION)
}

/// True when `path` has an accepted audio extension.
#[must_use]
pub fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let dotted = format!(".{}", ext.to_lowercase());
            ALLOWED_EXTENSIONS.contains(&dotted.as_str())
        })
}

/// `"{artists} - {title}{ext}"`, sanitized.
#[must_use]
pub fn track_filename(track: &Track, original: Option<&str>) -> String {
    let artists = if track.artists.is_empty() {
        crate::track::UNKNOWN_ARTIST.to_string()
    } else {
        track.artist_string()
    };
    let title = if track.name.trim().is_empty() {
        "Unknown Track"
    } else {
        track.name.as_str()
    };
    let filename = format!("{artists} - {title}{}", audio_extension(original));
    sanitize_component(&filename, MAX_FILENAME_LEN)
}

/// Comparison key for fuzzy existing-file detection.
///
/// Drops the extension and bracketed qualifiers such as `(Remastered)`, then
/// lowercases and collapses whitespace.
#[must_use]
pub fn match_key(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let lowered = stem.to_lowercase();
    let stripped = QUALIFIER_PATTERN.replace_all(&lowered, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
