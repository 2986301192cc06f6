//! Configuration: optional config file, environment credentials, and the
//! merge of both with command-line flags.
//!
//! Precedence is CLI flag, then config file, then built-in default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use relay_core::orchestrator::options::MAX_BATCH_SIZE;
use relay_core::{OrchestratorConfig, OrganizeScheme, OrganizerConfig};

use crate::cli::Args;

pub(crate) const DEFAULT_OUTPUT_DIR: &str = "./downloads";
pub(crate) const DEFAULT_PROGRESS_FILE: &str = "progress.json";
const CONFIG_DIR_NAME: &str = "spotify-relay";

pub(crate) const ENV_SPOTIFY_CLIENT_ID: &str = "SPOTIFY_CLIENT_ID";
pub(crate) const ENV_SPOTIFY_CLIENT_SECRET: &str = "SPOTIFY_CLIENT_SECRET";
pub(crate) const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub(crate) const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub(crate) const ENV_EXTERNAL_BOT_USERNAME: &str = "EXTERNAL_BOT_USERNAME";

/// Values read from `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FileConfig {
    pub(crate) output_dir: Option<PathBuf>,
    pub(crate) progress_file: Option<PathBuf>,
    pub(crate) batch_size: Option<usize>,
    pub(crate) send_delay_ms: Option<u64>,
    /// How long a sent request waits for a reply before it is stale.
    pub(crate) response_timeout_secs: Option<u64>,
    pub(crate) download_timeout_secs: Option<u64>,
    pub(crate) batch_timeout_secs: Option<u64>,
    pub(crate) flood_wait_multiplier: Option<f64>,
    /// 0-100.
    pub(crate) similarity_threshold: Option<f64>,
    pub(crate) organize_by: Option<OrganizeScheme>,
    pub(crate) year_folders: Option<bool>,
    pub(crate) bot_username: Option<String>,
}

impl FileConfig {
    fn validate(&self) -> Result<()> {
        if let Some(batch_size) = self.batch_size
            && !(1..=MAX_BATCH_SIZE).contains(&batch_size)
        {
            bail!(
                "Invalid config value for `batch_size`: {batch_size}. Expected range: 1..={MAX_BATCH_SIZE}"
            );
        }
        if let Some(delay) = self.send_delay_ms
            && delay > 60_000
        {
            bail!("Invalid config value for `send_delay_ms`: {delay}. Expected range: 0..=60000");
        }
        validate_timeout_secs("response_timeout_secs", self.response_timeout_secs)?;
        validate_timeout_secs("download_timeout_secs", self.download_timeout_secs)?;
        validate_timeout_secs("batch_timeout_secs", self.batch_timeout_secs)?;
        if let Some(multiplier) = self.flood_wait_multiplier
            && !(1.0..=10.0).contains(&multiplier)
        {
            bail!(
                "Invalid config value for `flood_wait_multiplier`: {multiplier}. Expected range: 1.0..=10.0"
            );
        }
        if let Some(threshold) = self.similarity_threshold
            && !(0.0..=100.0).contains(&threshold)
        {
            bail!(
                "Invalid config value for `similarity_threshold`: {threshold}. Expected range: 0..=100"
            );
        }
        if self
            .bot_username
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            bail!("Invalid config value for `bot_username`: must not be empty");
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/spotify-relay/config.toml`
/// 2. `$HOME/.config/spotify-relay/config.toml`
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file from the default path if it exists.
pub(crate) fn load_default_file_config() -> Result<Option<FileConfig>> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "progress_file" => {
                cfg.progress_file = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "batch_size" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                cfg.batch_size = Some(usize::try_from(parsed).with_context(context)?);
            }
            "send_delay_ms" => {
                cfg.send_delay_ms = Some(parse_integer_u64(value).with_context(context)?);
            }
            "response_timeout_secs" => {
                cfg.response_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "download_timeout_secs" => {
                cfg.download_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "batch_timeout_secs" => {
                cfg.batch_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "flood_wait_multiplier" => {
                cfg.flood_wait_multiplier = Some(parse_float(value).with_context(context)?);
            }
            "similarity_threshold" => {
                cfg.similarity_threshold = Some(parse_float(value).with_context(context)?);
            }
            "organize_by" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                let scheme = parsed
                    .parse::<OrganizeScheme>()
                    .map_err(anyhow::Error::msg)
                    .with_context(context)?;
                cfg.organize_by = Some(scheme);
            }
            "year_folders" => {
                cfg.year_folders = Some(parse_boolean(value).with_context(context)?);
            }
            "bot_username" => {
                cfg.bot_username = Some(parse_string_literal(value).with_context(context)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_float(raw_value: &str) -> Result<f64> {
    let value = raw_value.trim().parse::<f64>()?;
    if !value.is_finite() {
        bail!("Expected a finite number");
    }
    Ok(value)
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

/// Effective settings for one invocation.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) progress_file: PathBuf,
    pub(crate) organizer: OrganizerConfig,
    /// `bot_username` is filled in from the credentials.
    pub(crate) orchestrator: OrchestratorConfig,
    pub(crate) bot_username: Option<String>,
}

/// Merges CLI flags over the config file over defaults.
pub(crate) fn resolve_settings(args: &Args, file: Option<&FileConfig>) -> Settings {
    let file = file.cloned().unwrap_or_default();

    let output_dir = args
        .output_dir
        .clone()
        .or(file.output_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let progress_file = args
        .progress_file
        .clone()
        .or(file.progress_file)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRESS_FILE));
    let scheme = args.organize_by.or(file.organize_by).unwrap_or_default();
    let year_folders = args.year_folders || file.year_folders.unwrap_or(false);

    let mut orchestrator = OrchestratorConfig::default();
    if let Some(batch_size) = args.batch_size.map(usize::from).or(file.batch_size) {
        orchestrator.batch_size = batch_size;
    }
    if let Some(delay) = file.send_delay_ms {
        orchestrator.send_delay = Duration::from_millis(delay);
    }
    if let Some(secs) = file.response_timeout_secs {
        orchestrator.correlation.response_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.download_timeout_secs {
        orchestrator.download_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.batch_timeout_secs {
        orchestrator.batch_timeout = Duration::from_secs(secs);
    }
    if let Some(multiplier) = file.flood_wait_multiplier {
        orchestrator.flood_wait_multiplier = multiplier;
    }
    if let Some(threshold) = file.similarity_threshold {
        orchestrator.correlation.similarity_threshold = threshold;
    }

    Settings {
        progress_file,
        organizer: OrganizerConfig::new(output_dir)
            .with_scheme(scheme)
            .with_year_folders(year_folders),
        orchestrator,
        bot_username: file.bot_username,
    }
}

/// Spotify Web API credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpotifyCredentials {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
}

/// Telegram credentials plus the chat that receives the queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TelegramCredentials {
    pub(crate) token: String,
    /// `TELEGRAM_CHAT_ID` if set, else the music bot's username.
    pub(crate) chat: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub(crate) spotify: SpotifyCredentials,
    pub(crate) telegram: Option<TelegramCredentials>,
}

/// Reads credentials through `lookup` (normally the process environment).
///
/// Every missing variable is reported in one error. The Telegram pair is
/// only required when `need_telegram` is set.
pub(crate) fn load_credentials(
    lookup: impl Fn(&str) -> Option<String>,
    bot_from_file: Option<&str>,
    need_telegram: bool,
) -> Result<Credentials> {
    let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
    let mut missing = Vec::new();

    let client_id = get(ENV_SPOTIFY_CLIENT_ID);
    let client_secret = get(ENV_SPOTIFY_CLIENT_SECRET);
    if client_id.is_none() {
        missing.push(ENV_SPOTIFY_CLIENT_ID.to_string());
    }
    if client_secret.is_none() {
        missing.push(ENV_SPOTIFY_CLIENT_SECRET.to_string());
    }

    let mut telegram = None;
    if need_telegram {
        let token = get(ENV_TELEGRAM_BOT_TOKEN);
        let chat = get(ENV_TELEGRAM_CHAT_ID)
            .or_else(|| get(ENV_EXTERNAL_BOT_USERNAME))
            .or_else(|| bot_from_file.map(str::to_string));
        if token.is_none() {
            missing.push(ENV_TELEGRAM_BOT_TOKEN.to_string());
        }
        if chat.is_none() {
            missing.push(format!(
                "{ENV_EXTERNAL_BOT_USERNAME} (or {ENV_TELEGRAM_CHAT_ID})"
            ));
        }
        if let (Some(token), Some(chat)) = (token, chat) {
            telegram = Some(TelegramCredentials { token, chat });
        }
    }

    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) if missing.is_empty() => Ok(Credentials {
            spotify: SpotifyCredentials {
                client_id,
                client_secret,
            },
            telegram,
        }),
        _ => bail!(
            "Missing required environment variables: {}\n  Suggestion: Export them in your shell or put them in a .env file in the working directory",
            missing.join(", ")
        ),
    }
}
