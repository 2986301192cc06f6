//! Content-similarity scoring between a received file and a pending track.
//!
//! Four signals are compared after normalization (lowercase, `feat.` →
//! `featuring`, `&` → `and`, collapsed whitespace):
//!
//! | Signal | Left side | Right side | Default weight |
//! |--------|-----------|------------|----------------|
//! | full label | filename | `"artist - title"` | 0.6 |
//! | title | filename | title (best window) | 0.3 |
//! | performer | audio performer | artist string | 0.4 |
//! | title metadata | audio title | title | 0.5 |
//!
//! The score is the weighted average of the signals that are present,
//! scaled to `0..=100`.

use crate::track::Track;

use super::event::FileAttachment;

/// Extensions stripped from filenames before comparison.
const AUDIO_EXTENSIONS: &[&str] = &[".flac", ".mp3", ".wav", ".m4a", ".ogg", ".opus"];

/// Signal weights for [`score`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityWeights {
    pub full_label: f64,
    pub title: f64,
    pub performer: f64,
    pub title_metadata: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            full_label: 0.6,
            title: 0.3,
            performer: 0.4,
            title_metadata: 0.5,
        }
    }
}

/// Normalizes text for comparison.
///
/// # Example
///
/// ```
/// use relay_core::correlation::similarity::normalize;
///
/// assert_eq!(normalize("Simon  &  Garfunkel feat. Someone"), "simon and garfunkel featuring someone");
/// ```
#[must_use]
pub fn normalize(text: &str) -> String {
    let lowered = text
        .to_lowercase()
        .replace("feat.", "featuring")
        .replace('&', " and ")
        .replace('_', " ");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes a trailing audio extension, case-insensitively.
#[must_use]
pub fn strip_audio_extension(file_name: &str) -> &str {
    let lower = file_name.to_ascii_lowercase();
    AUDIO_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map_or(file_name, |ext| &file_name[..file_name.len() - ext.len()])
}

/// Normalized edit similarity in `0.0..=1.0`.
#[must_use]
pub fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Best similarity of the shorter string against every equally long
/// window of the longer one.
#[must_use]
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return if long.is_empty() { 1.0 } else { 0.0 };
    }

    let long_chars: Vec<char> = long.chars().collect();
    let mut best = 0.0_f64;
    for start in 0..=(long_chars.len() - short_len) {
        let window: String = long_chars[start..start + short_len].iter().collect();
        let candidate = ratio(short, &window);
        if candidate > best {
            best = candidate;
            if best >= 1.0 {
                break;
            }
        }
    }
    best
}

/// Scores how well `file` answers a request for `track`.
///
/// Returns `None` when the attachment carries neither a filename nor
/// audio metadata, in which case only time-ordered matching applies.
#[must_use]
pub fn score(file: &FileAttachment, track: &Track, weights: &SimilarityWeights) -> Option<f64> {
    let title = normalize(&track.name);
    let artist = normalize(&track.artist_string());
    let label = normalize(&track.label());

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut add = |value: f64, weight: f64| {
        weighted += value * weight;
        total_weight += weight;
    };

    if let Some(name) = file.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
        let name = normalize(strip_audio_extension(name));
        add(ratio(&name, &label), weights.full_label);
        add(partial_ratio(&name, &title), weights.title);
    }

    if let Some(audio) = &file.audio {
        if let Some(performer) = audio.performer.as_deref().filter(|p| !p.trim().is_empty()) {
            add(ratio(&normalize(performer), &artist), weights.performer);
        }
        if let Some(meta_title) = audio.title.as_deref().filter(|t| !t.trim().is_empty()) {
            add(ratio(&normalize(meta_title), &title), weights.title_metadata);
        }
    }

    (total_weight > 0.0).then(|| weighted / total_weight * 100.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::correlation::event::AudioMetadata;

    fn track(artist: &str, title: &str) -> Track {
        Track::new("id", title, vec![artist.to_string()], "u")
    }

    fn named(name: &str) -> FileAttachment {
        FileAttachment {
            file_id: "f".to_string(),
            file_name: Some(name.to_string()),
            audio: None,
            size: None,
        }
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_normalize_is_case_and_symbol_insensitive() {
        assert_eq!(normalize("A & B"), normalize("a and b"));
        assert_eq!(normalize("X feat. Y"), normalize("x FEATURING y"));
        assert_eq!(normalize("  spaced\tout  "), "spaced out");
    }

    #[test]
    fn test_strip_audio_extension() {
        assert_eq!(strip_audio_extension("Song.FLAC"), "Song");
        assert_eq!(strip_audio_extension("Song.mp3"), "Song");
        assert_eq!(strip_audio_extension("Song.txt"), "Song.txt");
    }

    // ==================== Ratio Tests ====================

    #[test]
    fn test_partial_ratio_finds_substring() {
        assert!((partial_ratio("song y", "artist x - song y") - 1.0).abs() < f64::EPSILON);
        assert!(partial_ratio("zzz", "artist x - song y") < 0.5);
        assert!((partial_ratio("", "") - 1.0).abs() < f64::EPSILON);
    }

    // ==================== Score Tests ====================

    #[test]
    fn test_exact_filename_scores_full() {
        let s = score(
            &named("Artist X - Song Y.flac"),
            &track("Artist X", "Song Y"),
            &SimilarityWeights::default(),
        )
        .unwrap();
        assert!((s - 100.0).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn test_exact_match_beats_near_miss() {
        let weights = SimilarityWeights::default();
        let file = named("Artist X - Song Y.flac");
        let right = score(&file, &track("Artist X", "Song Y"), &weights).unwrap();
        let wrong = score(&file, &track("Artist Z", "Song Q"), &weights).unwrap();
        assert!(right > wrong);
    }

    #[test]
    fn test_unrelated_filename_below_threshold() {
        let s = score(
            &named("Completely Different Thing.mp3"),
            &track("Metallica", "One"),
            &SimilarityWeights::default(),
        )
        .unwrap();
        assert!(s < 70.0, "got {s}");
    }

    #[test]
    fn test_metadata_only_signals() {
        let file = FileAttachment {
            file_id: "f".to_string(),
            file_name: None,
            audio: Some(AudioMetadata {
                title: Some("Get Lucky".to_string()),
                performer: Some("daft punk".to_string()),
                duration_secs: Some(248),
            }),
            size: None,
        };
        let s = score(&file, &track("Daft Punk", "Get Lucky"), &SimilarityWeights::default())
            .unwrap();
        assert!((s - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_signals_returns_none() {
        let file = FileAttachment {
            file_id: "f".to_string(),
            file_name: None,
            audio: Some(AudioMetadata::default()),
            size: None,
        };
        assert!(score(&file, &track("A", "B"), &SimilarityWeights::default()).is_none());
    }

    #[test]
    fn test_score_is_deterministic_under_normalization() {
        let weights = SimilarityWeights::default();
        let t = track("Simon & Garfunkel", "The Boxer");
        let a = score(&named("simon and garfunkel - the boxer.flac"), &t, &weights).unwrap();
        let b = score(&named("SIMON & GARFUNKEL - THE BOXER.flac"), &t, &weights).unwrap();
        assert!((a - b).abs() < f64::EPSILON);
    }
}
