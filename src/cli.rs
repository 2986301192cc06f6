//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use relay_core::OrganizeScheme;
use relay_core::extractor::looks_like_spotify_link;

/// Relay Spotify playlists to a Telegram music bot.
///
/// Each track is sent to the bot as a text query; the audio files it
/// returns are downloaded and organized under the output directory.
/// Progress is saved so an interrupted run can be resumed.
#[derive(Parser, Debug)]
#[command(name = "spotify-relay")]
#[command(author, version, about)]
pub struct Args {
    /// Spotify playlist/album/track URL, or one of: status, reset, report, help
    pub target: Option<String>,

    /// Output file for `report` (printed to stdout when omitted)
    pub report_file: Option<PathBuf>,

    /// List the tracks that would be processed without sending anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip tracks whose file already exists in the output directory
    #[arg(long)]
    pub check_existing: bool,

    /// List which tracks are missing from the output directory, then exit
    #[arg(long, conflicts_with = "dry_run")]
    pub check_missing: bool,

    /// Tracks sent per batch (1-50) [default: 10]
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=50))]
    pub batch_size: Option<u8>,

    /// Process at most N tracks
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,

    /// Start from the Nth track (1-based)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub start_from: u64,

    /// Send one track at a time and wait for its file
    #[arg(long)]
    pub sequential: bool,

    /// Start a fresh session even if progress exists for this URL
    #[arg(long)]
    pub no_resume: bool,

    /// Folder layout: artist, album or none [default: artist]
    #[arg(long, value_parser = parse_scheme)]
    pub organize_by: Option<OrganizeScheme>,

    /// Add a release-year folder below the artist folder
    #[arg(long)]
    pub year_folders: bool,

    /// Output directory for organized files [default: ./downloads]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Session progress file [default: progress.json]
    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// Do not ask for confirmation on `reset`
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

fn parse_scheme(value: &str) -> Result<OrganizeScheme, String> {
    value.parse()
}

/// What the positional argument asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Run(String),
    Status,
    Reset,
    Report(Option<PathBuf>),
    Help,
}

impl Args {
    /// Interprets the positional arguments.
    ///
    /// # Errors
    ///
    /// Fails when the target is neither a command nor a Spotify link.
    pub fn target(&self) -> Result<Target> {
        let Some(raw) = self.target.as_deref().map(str::trim) else {
            return Ok(Target::Help);
        };
        match raw.to_ascii_lowercase().as_str() {
            "status" => return Ok(Target::Status),
            "reset" => return Ok(Target::Reset),
            "report" => return Ok(Target::Report(self.report_file.clone())),
            "help" => return Ok(Target::Help),
            _ => {}
        }
        if !looks_like_spotify_link(raw) {
            bail!(
                "Invalid Spotify URL: {raw}\n  Suggestion: Use a link like https://open.spotify.com/playlist/<id> or spotify:playlist:<id>"
            );
        }
        if self.report_file.is_some() {
            bail!("Unexpected extra argument after the URL");
        }
        Ok(Target::Run(raw.to_string()))
    }

    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit.and_then(|limit| usize::try_from(limit).ok())
    }

    #[must_use]
    pub fn start_from(&self) -> usize {
        usize::try_from(self.start_from).unwrap_or(usize::MAX)
    }
}
