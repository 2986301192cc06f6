//! Session maintenance commands: `status`, `reset` and `report`.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};

use relay_core::session::report::format_bytes;
use relay_core::{SessionError, SessionTracker};

use crate::ProcessExit;

pub(crate) const NO_SESSION_MESSAGE: &str = "No active session";

/// Prints where the saved session stands.
pub(crate) fn run_status(tracker: &SessionTracker, out: &mut impl Write) -> Result<ProcessExit> {
    if let Some(info) = tracker.get_resume_info() {
        writeln!(out, "Session:   {}", info.session_id)?;
        writeln!(out, "Playlist:  {}", info.playlist_name)?;
        writeln!(out, "URL:       {}", info.playlist_url)?;
        writeln!(out, "Started:   {}", info.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(
            out,
            "Tracks:    {} total, {} completed, {} pending, {} failed",
            info.total_tracks, info.completed_count, info.pending_count, info.failed_count
        )?;
        if info.can_resume {
            writeln!(out, "Run the same URL again to resume.")?;
        }
    } else if let Some(stats) = tracker.get_session_stats() {
        writeln!(out, "Session:   {} (complete)", stats.session_id)?;
        writeln!(out, "Playlist:  {}", stats.playlist_name)?;
        writeln!(
            out,
            "Tracks:    {} completed, {} failed, {} skipped, {} downloaded",
            stats.completed,
            stats.failed,
            stats.skipped,
            format_bytes(stats.total_size_bytes)
        )?;
    } else {
        writeln!(out, "{NO_SESSION_MESSAGE}")?;
    }
    Ok(ProcessExit::Success)
}

/// Deletes saved progress after confirmation (skipped with `assume_yes`).
pub(crate) fn run_reset(
    tracker: &SessionTracker,
    assume_yes: bool,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<ProcessExit> {
    let Some(session) = tracker.snapshot() else {
        writeln!(out, "{NO_SESSION_MESSAGE}")?;
        return Ok(ProcessExit::Success);
    };

    if !assume_yes {
        write!(
            out,
            "Delete progress for \"{}\" ({} tracks)? [y/N] ",
            session.playlist_name, session.total_tracks
        )?;
        out.flush()?;
        let mut answer = String::new();
        input
            .read_line(&mut answer)
            .context("Failed to read confirmation")?;
        if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            writeln!(out, "Reset cancelled.")?;
            return Ok(ProcessExit::Success);
        }
    }

    tracker.reset_progress()?;
    writeln!(out, "Progress reset.")?;
    Ok(ProcessExit::Success)
}

/// Prints the session report, or writes it to `path`.
pub(crate) fn run_report(
    tracker: &SessionTracker,
    path: Option<&Path>,
    out: &mut impl Write,
) -> Result<ProcessExit> {
    match tracker.export_report(path) {
        Ok(text) => {
            match path {
                Some(path) => writeln!(out, "Report written to {}", path.display())?,
                None => write!(out, "{text}")?,
            }
            Ok(ProcessExit::Success)
        }
        Err(SessionError::NoSession) => {
            writeln!(out, "{NO_SESSION_MESSAGE}")?;
            Ok(ProcessExit::Success)
        }
        Err(err) => Err(err.into()),
    }
}
