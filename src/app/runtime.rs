//! Top-level flow: parse arguments, set up logging, dispatch the target.

use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::{debug, info, warn};

use relay_core::{
    BatchOrchestrator, ChannelObserver, DryRunListing, FileOrganizer, MissingReport, ProgressStore,
    RunOutcome, RunRequest, SessionTracker, SpotifyClient, SpotifyConfig, TelegramConfig,
    TelegramTransport, check_missing, dry_run_listing,
};

use crate::ProcessExit;
use crate::app::config::{self, Settings};
use crate::app::{commands, progress, terminal};
use crate::cli::{Args, Target};

/// Found tracks listed by `--check-missing`; the rest are summarized.
const FOUND_PREVIEW_LIMIT: usize = 5;

pub(crate) async fn run() -> Result<ProcessExit> {
    let args = Args::parse();
    // Credentials may live in a .env file in the working directory.
    let dotenv = dotenvy::dotenv();

    let default_level = terminal::resolve_default_log_level(args.quiet, args.verbose);
    let force_cli_level = args.quiet || args.verbose > 0;
    terminal::init_tracing(
        default_level,
        force_cli_level,
        terminal::is_no_color_requested(&args),
    );
    debug!(?args, "CLI arguments parsed");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "loaded environment file"),
        Err(err) if err.not_found() => {}
        Err(err) => warn!(error = %err, "could not read .env file"),
    }

    let target = args.target()?;
    if target == Target::Help {
        Args::command().print_long_help()?;
        return Ok(ProcessExit::Success);
    }

    let file_config = config::load_default_file_config()?;
    let settings = config::resolve_settings(&args, file_config.as_ref());

    match target {
        Target::Status => {
            let tracker = open_tracker(&settings.progress_file)?;
            commands::run_status(&tracker, &mut io::stdout().lock())
        }
        Target::Reset => {
            let tracker = open_tracker(&settings.progress_file)?;
            commands::run_reset(
                &tracker,
                args.yes,
                &mut io::stdin().lock(),
                &mut io::stdout().lock(),
            )
        }
        Target::Report(path) => {
            let tracker = open_tracker(&settings.progress_file)?;
            commands::run_report(&tracker, path.as_deref(), &mut io::stdout().lock())
        }
        Target::Run(url) => run_relay(&args, settings, url).await,
        Target::Help => Ok(ProcessExit::Success),
    }
}

fn open_tracker(progress_file: &Path) -> Result<SessionTracker> {
    SessionTracker::open(ProgressStore::new(progress_file)).with_context(|| {
        format!(
            "Failed to load session progress from '{}'",
            progress_file.display()
        )
    })
}

fn build_request(args: &Args, url: String) -> RunRequest {
    let mut request = RunRequest::new(url);
    request.dry_run = args.dry_run;
    request.resume = !args.no_resume;
    request.sequential = args.sequential;
    request.start_from = args.start_from();
    request.limit = args.limit();
    request.check_existing = args.check_existing;
    request
}

async fn run_relay(args: &Args, settings: Settings, url: String) -> Result<ProcessExit> {
    let credentials = config::load_credentials(
        |name| std::env::var(name).ok(),
        settings.bot_username.as_deref(),
        !args.dry_run && !args.check_missing,
    )?;
    let spotify = SpotifyClient::new(SpotifyConfig::new(
        credentials.spotify.client_id,
        credentials.spotify.client_secret,
    ))
    .context("Failed to create Spotify client")?;
    let request = build_request(args, url);

    if request.dry_run {
        let listing = dry_run_listing(&spotify, &request).await?;
        print_dry_run(&listing, &mut io::stdout().lock())?;
        return Ok(ProcessExit::Success);
    }
    if args.check_missing {
        let organizer = Arc::new(FileOrganizer::new(settings.organizer));
        let report = check_missing(&spotify, organizer, &request).await?;
        print_missing_report(&report, &mut io::stdout().lock())?;
        return Ok(ProcessExit::Success);
    }

    let telegram = credentials
        .telegram
        .context("Telegram credentials are required for a real run")?;
    let transport = TelegramTransport::new(TelegramConfig::new(
        telegram.token,
        telegram.chat.clone(),
    ))
    .context("Failed to create Telegram client")?;
    let me = transport
        .verify()
        .await
        .context("Telegram authentication failed")?;
    info!(bot = %me, chat = %telegram.chat, "connected to Telegram");

    let tracker = Arc::new(open_tracker(&settings.progress_file)?);
    let organizer = Arc::new(FileOrganizer::new(settings.organizer));
    let mut orchestrator_config = settings.orchestrator;
    orchestrator_config.bot_username = telegram.chat;

    let (observer, events) = ChannelObserver::new();
    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let progress_ui = progress::spawn_progress_ui(use_spinner, events);

    let orchestrator = BatchOrchestrator::new(
        orchestrator_config,
        Arc::new(spotify),
        Arc::new(transport),
        tracker,
        organizer,
    )?
    .with_observer(Arc::new(observer));

    let exit = tokio::select! {
        outcome = orchestrator.run(&request) => {
            print_outcome(&outcome?, &mut io::stdout().lock())?;
            ProcessExit::Success
        }
        _ = tokio::signal::ctrl_c() => {
            orchestrator.shutdown();
            warn!("interrupted; progress is saved, run the same URL again to resume");
            ProcessExit::Interrupted
        }
    };

    drop(orchestrator);
    if let Err(err) = progress_ui.await {
        debug!(error = %err, "progress display task ended abnormally");
    }
    Ok(exit)
}

fn print_dry_run(listing: &DryRunListing, out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "Playlist: {} (by {})",
        listing.playlist.name, listing.playlist.owner
    )?;
    writeln!(out, "Tracks to process: {}", listing.total)?;
    for (index, label) in listing.preview.iter().enumerate() {
        writeln!(out, "{:>4}. {label}", index + 1)?;
    }
    if listing.remaining > 0 {
        writeln!(out, "  ... and {} more", listing.remaining)?;
    }
    writeln!(out, "Dry run: nothing was sent.")?;
    Ok(())
}

fn print_missing_report(report: &MissingReport, out: &mut impl Write) -> Result<()> {
    let total = report.total();
    writeln!(
        out,
        "Playlist: {} (by {})",
        report.playlist.name, report.playlist.owner
    )?;
    writeln!(
        out,
        "Checked {total} tracks against {} audio files (match threshold {:.0}%)",
        report.scanned_files,
        relay_core::organizer::EXISTING_MATCH_THRESHOLD
    )?;

    writeln!(out, "\nFound ({}/{total}):", report.found.len())?;
    for entry in report.found.iter().take(FOUND_PREVIEW_LIMIT) {
        writeln!(out, "  [{:>3}] {} (match: {:.0}%)", entry.position, entry.label, entry.score)?;
    }
    if report.found.len() > FOUND_PREVIEW_LIMIT {
        writeln!(out, "  ... and {} more", report.found.len() - FOUND_PREVIEW_LIMIT)?;
    }

    writeln!(out, "\nMissing ({}/{total}):", report.missing.len())?;
    if report.missing.is_empty() {
        writeln!(out, "  All tracks found.")?;
    }
    for entry in &report.missing {
        match &entry.best_match {
            Some(path) => {
                let name = path.file_name().map_or_else(
                    || path.display().to_string(),
                    |name| name.to_string_lossy().into_owned(),
                );
                writeln!(
                    out,
                    "  [{:>3}] {} (best match: {name} - {:.0}%)",
                    entry.position, entry.label, entry.score
                )?;
            }
            None => writeln!(out, "  [{:>3}] {}", entry.position, entry.label)?,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let percent = |count: usize| count as f64 * 100.0 / total.max(1) as f64;
    writeln!(out, "\nTotal: {total}")?;
    writeln!(out, "Found: {} ({:.1}%)", report.found.len(), percent(report.found.len()))?;
    writeln!(out, "Missing: {} ({:.1}%)", report.missing.len(), percent(report.missing.len()))?;
    Ok(())
}

fn print_outcome(outcome: &RunOutcome, out: &mut impl Write) -> Result<()> {
    match outcome {
        RunOutcome::DryRun(listing) => print_dry_run(listing, out),
        RunOutcome::AlreadyCompleted(stats) => {
            writeln!(
                out,
                "Nothing to do: \"{}\" is already processed ({} completed, {} failed, {} skipped).",
                stats.playlist_name, stats.completed, stats.failed, stats.skipped
            )?;
            writeln!(out, "Use --no-resume to start over.")?;
            Ok(())
        }
        RunOutcome::Finished(stats) => {
            writeln!(
                out,
                "Finished \"{}\" in {}: {} completed, {} failed, {} skipped ({:.1}% success).",
                stats.playlist_name,
                stats.duration,
                stats.completed,
                stats.failed,
                stats.skipped,
                stats.success_rate
            )?;
            if stats.failed > 0 {
                writeln!(out, "Run `spotify-relay report` for the failed tracks.")?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use relay_core::{MissingEntry, PlaylistInfo};

    use super::*;

    #[test]
    fn test_build_request_maps_flags() {
        let args = Args::try_parse_from([
            "spotify-relay",
            "--no-resume",
            "--sequential",
            "--check-existing",
            "--start-from",
            "3",
            "--limit",
            "2",
            "https://open.spotify.com/album/abc",
        ])
        .unwrap();
        let request = build_request(&args, "https://open.spotify.com/album/abc".to_string());
        assert!(!request.resume);
        assert!(request.sequential);
        assert!(request.check_existing);
        assert_eq!(request.start_from, 3);
        assert_eq!(request.limit, Some(2));
        assert!(!request.dry_run);
    }

    #[test]
    fn test_print_dry_run_lists_preview_and_remaining() {
        let listing = DryRunListing {
            playlist: PlaylistInfo {
                name: "Focus".to_string(),
                owner: "spotify".to_string(),
                total_tracks: 25,
            },
            total: 25,
            preview: vec!["A - One".to_string(), "B - Two".to_string()],
            remaining: 23,
        };
        let mut out = Vec::new();
        print_dry_run(&listing, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Playlist: Focus (by spotify)"));
        assert!(text.contains("   1. A - One"));
        assert!(text.contains("... and 23 more"));
    }

    #[test]
    fn test_print_missing_report_lists_found_and_missing() {
        let entry = |position: usize, label: &str, best: Option<&str>, score: f64| MissingEntry {
            position,
            label: label.to_string(),
            best_match: best.map(PathBuf::from),
            score,
        };
        let report = MissingReport {
            playlist: PlaylistInfo {
                name: "Focus".to_string(),
                owner: "spotify".to_string(),
                total_tracks: 8,
            },
            scanned_files: 6,
            found: (1..=6)
                .map(|i| entry(i, &format!("A - Song {i}"), Some("/music/a.flac"), 100.0))
                .collect(),
            missing: vec![
                entry(7, "B - Gone", Some("/music/A/B - Going.flac"), 72.0),
                entry(8, "C - Nowhere", None, 0.0),
            ],
        };
        let mut out = Vec::new();
        print_missing_report(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Found (6/8):"));
        assert!(text.contains("[  1] A - Song 1 (match: 100%)"));
        assert!(!text.contains("A - Song 6"));
        assert!(text.contains("... and 1 more"));
        assert!(text.contains("Missing (2/8):"));
        assert!(text.contains("[  7] B - Gone (best match: B - Going.flac - 72%)"));
        assert!(text.contains("[  8] C - Nowhere\n"));
        assert!(text.contains("Found: 6 (75.0%)"));
        assert!(text.contains("Missing: 2 (25.0%)"));
    }
}
