//! Aggregate statistics and resume summaries derived from a session.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::progress::SessionProgress;
use super::status::TrackStatus;

/// Computed aggregate over one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub playlist_name: String,
    pub total: usize,
    pub pending: usize,
    pub sent_to_bot: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Completed + failed + skipped.
    pub processed: usize,
    /// `processed / total * 100`, one decimal.
    pub completion_percentage: f64,
    /// `completed / processed * 100`, one decimal.
    pub success_rate: f64,
    /// Bytes of completed files.
    pub total_size_bytes: u64,
    /// Elapsed time as `H:MM:SS`.
    pub duration: String,
    pub is_completed: bool,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(part as f64 / whole as f64 * 100.0)
    }
}

/// Formats a second count as `H:MM:SS`.
#[must_use]
pub fn format_duration(total_secs: i64) -> String {
    let secs = total_secs.max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl SessionStats {
    /// Computes statistics as of `now`.
    ///
    /// Duration runs to `completed_at` for finished sessions.
    #[must_use]
    pub fn compute(session: &SessionProgress, now: DateTime<Utc>) -> Self {
        let mut counts = [0usize; 6];
        let mut total_size_bytes = 0u64;
        for track in session.tracks.values() {
            let index = TrackStatus::ALL
                .iter()
                .position(|s| *s == track.status)
                .unwrap_or(0);
            counts[index] += 1;
            if track.status == TrackStatus::Completed {
                total_size_bytes += track.file_size.unwrap_or(0);
            }
        }
        let [pending, sent_to_bot, downloading, completed, failed, skipped] = counts;
        let processed = completed + failed + skipped;
        let total = session.total_tracks;
        let end = session.completed_at.unwrap_or(now);

        Self {
            session_id: session.session_id.clone(),
            playlist_name: session.playlist_name.clone(),
            total,
            pending,
            sent_to_bot,
            downloading,
            completed,
            failed,
            skipped,
            processed,
            completion_percentage: percentage(processed, total),
            success_rate: percentage(completed, processed),
            total_size_bytes,
            duration: format_duration((end - session.started_at).num_seconds()),
            is_completed: processed == total,
        }
    }
}

/// Summary of a persisted session that may be resumed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeInfo {
    pub session_id: String,
    pub playlist_name: String,
    pub playlist_url: String,
    pub total_tracks: usize,
    pub pending_count: usize,
    pub failed_count: usize,
    pub completed_count: usize,
    pub started_at: DateTime<Utc>,
    pub can_resume: bool,
}

impl ResumeInfo {
    /// `None` when the session is fully processed.
    #[must_use]
    pub fn from_session(session: &SessionProgress) -> Option<Self> {
        let stats = SessionStats::compute(session, Utc::now());
        if stats.is_completed {
            return None;
        }
        // SENT_TO_BOT and DOWNLOADING tracks were interrupted mid-flight
        // and are sent again on resume.
        let pending_count = stats.pending + stats.sent_to_bot + stats.downloading;
        Some(Self {
            session_id: session.session_id.clone(),
            playlist_name: session.playlist_name.clone(),
            playlist_url: session.playlist_url.clone(),
            total_tracks: stats.total,
            pending_count,
            failed_count: stats.failed,
            completed_count: stats.completed,
            started_at: session.started_at,
            can_resume: pending_count > 0 || stats.failed > 0,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::track::Track;

    fn session_with(statuses: &[TrackStatus]) -> SessionProgress {
        let tracks: Vec<Track> = (0..statuses.len())
            .map(|i| Track::new(format!("t{i}"), "S", vec!["A".to_string()], "u"))
            .collect();
        let mut session = SessionProgress::new("u", "Mix", &tracks, Utc::now());
        for (i, status) in statuses.iter().enumerate() {
            let t = session.tracks.get_mut(&format!("t{i}")).unwrap();
            t.status = *status;
            if *status == TrackStatus::Completed {
                t.file_size = Some(1000);
            }
        }
        session
    }

    #[test]
    fn test_counts_and_rates() {
        use TrackStatus::*;
        let session = session_with(&[Completed, Failed, SentToBot, Completed, Skipped, Pending]);
        let stats = SessionStats::compute(&session, Utc::now());
        assert_eq!(stats.total, 6);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.processed, 4);
        assert!((stats.completion_percentage - 66.7).abs() < 1e-9);
        assert!((stats.success_rate - 50.0).abs() < 1e-9);
        assert_eq!(stats.total_size_bytes, 2000);
        assert!(!stats.is_completed);
        assert_eq!(
            stats.pending + stats.sent_to_bot + stats.downloading + stats.processed,
            stats.total
        );
    }

    #[test]
    fn test_empty_session_rates_are_zero() {
        let session = session_with(&[]);
        let stats = SessionStats::compute(&session, Utc::now());
        assert!(stats.success_rate.abs() < f64::EPSILON);
        assert!(stats.completion_percentage.abs() < f64::EPSILON);
        assert!(stats.is_completed);
    }

    #[test]
    fn test_duration_format() {
        assert_eq!(format_duration(3725), "1:02:05");
        assert_eq!(format_duration(-5), "0:00:00");

        let session = session_with(&[TrackStatus::Pending]);
        let later = session.started_at + Duration::seconds(61);
        assert_eq!(SessionStats::compute(&session, later).duration, "0:01:01");
    }

    #[test]
    fn test_resume_info() {
        use TrackStatus::*;
        assert!(ResumeInfo::from_session(&session_with(&[Completed, Skipped])).is_none());

        let info = ResumeInfo::from_session(&session_with(&[Completed, Failed, Pending])).unwrap();
        assert_eq!(info.pending_count, 1);
        assert_eq!(info.failed_count, 1);
        assert_eq!(info.completed_count, 1);
        assert!(info.can_resume);
    }
}
