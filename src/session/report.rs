//! Plain-text progress report.

use std::fmt::Write as _;

use super::progress::SessionProgress;
use super::stats::SessionStats;
use super::status::TrackStatus;

/// Number of failed tracks listed in a report.
pub const MAX_FAILED_IN_REPORT: usize = 10;

const RULE_WIDTH: usize = 60;

/// Formats a byte count with binary units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Renders the report for `session`.
#[must_use]
pub fn render(session: &SessionProgress, stats: &SessionStats) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "SPOTIFY RELAY PROGRESS REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Session:     {}", session.session_id);
    let _ = writeln!(out, "Playlist:    {}", session.playlist_name);
    let _ = writeln!(out, "URL:         {}", session.playlist_url);
    let _ = writeln!(
        out,
        "Started:     {}",
        session.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(done) = session.completed_at {
        let _ = writeln!(out, "Completed:   {}", done.format("%Y-%m-%d %H:%M:%S"));
    }
    let _ = writeln!(out, "Duration:    {}", stats.duration);
    let _ = writeln!(out);
    let _ = writeln!(out, "SUMMARY");
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    let _ = writeln!(out, "Total tracks:  {}", stats.total);
    let _ = writeln!(out, "Completed:     {}", stats.completed);
    let _ = writeln!(out, "Failed:        {}", stats.failed);
    let _ = writeln!(out, "Skipped:       {}", stats.skipped);
    let _ = writeln!(out, "Pending:       {}", stats.pending);
    let _ = writeln!(out, "In flight:     {}", stats.sent_to_bot + stats.downloading);
    let _ = writeln!(out, "Progress:      {:.1}%", stats.completion_percentage);
    let _ = writeln!(out, "Success rate:  {:.1}%", stats.success_rate);
    let _ = writeln!(out, "Downloaded:    {}", format_bytes(stats.total_size_bytes));

    let failed: Vec<_> = session
        .ordered()
        .into_iter()
        .filter(|t| t.status == TrackStatus::Failed)
        .collect();
    if !failed.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "FAILED TRACKS ({})", failed.len());
        let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
        for track in failed.iter().take(MAX_FAILED_IN_REPORT) {
            let _ = writeln!(out, "- {}", track.track_name);
            let _ = writeln!(
                out,
                "    error: {} (attempts: {})",
                track.error_message.as_deref().unwrap_or("unknown"),
                track.attempts
            );
        }
        if failed.len() > MAX_FAILED_IN_REPORT {
            let _ = writeln!(out, "... and {} more", failed.len() - MAX_FAILED_IN_REPORT);
        }
    }
    let _ = writeln!(out, "{rule}");
    out
}
