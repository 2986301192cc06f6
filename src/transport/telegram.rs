//! Telegram Bot API transport.
//!
//! Outbound messages use `sendMessage`; inbound events come from a
//! long-polling `getUpdates` task that forwards every message from the
//! configured peer into an mpsc channel. Attachments are fetched with
//! `getFile` and streamed to disk.
//!
//! The API base URL is configurable so the same client can target a
//! Bot-API-compatible gateway or a mock server.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::correlation::{AudioMetadata, BotEvent, FileAttachment};

use super::{Transport, TransportError};

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Default long-poll timeout for `getUpdates`.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Default upper bound for a single file transfer.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Back-off after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

/// Connection settings for [`TelegramTransport`].
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot API token.
    pub token: String,
    /// The correspondent: a numeric chat id or `@username`.
    pub peer: String,
    pub api_base: String,
    pub poll_timeout_secs: u64,
    pub download_timeout: Duration,
}

impl TelegramConfig {
    #[must_use]
    pub fn new(token: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            peer: peer.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

// ==================== Bot API payloads ====================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    text: Option<String>,
    caption: Option<String>,
    document: Option<Document>,
    audio: Option<Audio>,
    photo: Option<Vec<Value>>,
    reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    file_id: String,
    file_name: Option<String>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Audio {
    file_id: String,
    file_name: Option<String>,
    title: Option<String>,
    performer: Option<String>,
    duration: Option<u32>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Deserialize)]
struct InlineKeyboardButton {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    username: Option<String>,
}

impl Message {
    fn into_event(self) -> BotEvent {
        let file = match (self.document, self.audio) {
            (_, Some(audio)) => Some(FileAttachment {
                file_id: audio.file_id,
                file_name: audio.file_name,
                audio: Some(AudioMetadata {
                    title: audio.title,
                    performer: audio.performer,
                    duration_secs: audio.duration,
                }),
                size: audio.file_size,
            }),
            (Some(doc), None) => Some(FileAttachment {
                file_id: doc.file_id,
                file_name: doc.file_name,
                audio: None,
                size: doc.file_size,
            }),
            (None, None) => None,
        };
        let options = self
            .reply_markup
            .map(|m| {
                m.inline_keyboard
                    .into_iter()
                    .flatten()
                    .map(|b| b.text)
                    .collect()
            })
            .unwrap_or_default();
        let image_only = file.is_none() && self.photo.is_some_and(|p| !p.is_empty());
        BotEvent {
            message_id: self.message_id,
            file,
            options,
            image_only,
            text: self.text.or(self.caption),
        }
    }
}

fn peer_matches(peer: &str, chat: &Chat) -> bool {
    if let Ok(id) = peer.parse::<i64>() {
        return chat.id == id;
    }
    let wanted = peer.trim_start_matches('@');
    chat.username
        .as_deref()
        .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
}

fn chat_id_value(peer: &str) -> Value {
    peer.parse::<i64>()
        .map_or_else(|_| Value::String(peer.to_string()), Value::from)
}

#[derive(Debug)]
struct Inner {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl Inner {
    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_base, self.config.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::timeout(method)
                } else {
                    TransportError::network(method, e)
                }
            })?;
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TransportError::network(method, e))?;

        if parsed.ok
            && let Some(result) = parsed.result
        {
            return Ok(result);
        }

        let code = parsed.error_code.unwrap_or_default();
        let description = parsed
            .description
            .unwrap_or_else(|| "no description".to_string());
        match code {
            429 => {
                let seconds = parsed
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(1);
                Err(TransportError::flood_wait(seconds))
            }
            401 | 403 => Err(TransportError::Unauthorized { description }),
            _ => Err(TransportError::Api {
                method: method.to_string(),
                code,
                description,
            }),
        }
    }

    async fn poll_loop(self: Arc<Self>, tx: mpsc::Sender<BotEvent>) {
        let mut offset: Option<i64> = None;
        let poll_timeout = self.config.poll_timeout_secs;
        info!(peer = %self.config.peer, "telegram event poller started");

        while !tx.is_closed() {
            let body = json!({
                "offset": offset,
                "timeout": poll_timeout,
                "allowed_updates": ["message"],
            });
            let request_timeout = Duration::from_secs(poll_timeout) + CONNECT_TIMEOUT;
            let updates: Vec<Update> = match self.call("getUpdates", body, request_timeout).await {
                Ok(updates) => updates,
                Err(TransportError::FloodWait { seconds }) => {
                    warn!(retry_after_secs = seconds, "telegram rate limited polling; backing off");
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "telegram getUpdates failed; retrying in 5s");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                if !peer_matches(&self.config.peer, &message.chat) {
                    continue;
                }
                let event = message.into_event();
                debug!(message_id = event.message_id, kind = ?event.kind(), "inbound event");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
        info!("telegram event poller stopped");
    }

    async fn fetch_to(&self, file_id: &str, dest: &Path) -> Result<u64, TransportError> {
        let remote: RemoteFile = self
            .call("getFile", json!({ "file_id": file_id }), REQUEST_TIMEOUT)
            .await?;
        let file_path = remote.file_path.ok_or_else(|| TransportError::Api {
            method: "getFile".to_string(),
            code: 0,
            description: "file has no file_path".to_string(),
        })?;
        let url = format!(
            "{}/file/bot{}/{}",
            self.config.api_base, self.config.token, file_path
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::network("file download", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Api {
                method: "file download".to_string(),
                code: i64::from(status.as_u16()),
                description: status.to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::io(parent, e))?;
        }
        let file = File::create(dest)
            .await
            .map_err(|e| TransportError::io(dest, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::network("file download", e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| TransportError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| TransportError::io(dest, e))?;
        Ok(written)
    }
}

/// [`Transport`] over the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    inner: Arc<Inner>,
    subscribed: Arc<AtomicBool>,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::network("client setup", e))?;
        Ok(Self {
            inner: Arc::new(Inner { config, client }),
            subscribed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Checks the credentials with `getMe` and returns the account name.
    #[instrument(skip(self))]
    pub async fn verify(&self) -> Result<String, TransportError> {
        let me: User = self.inner.call("getMe", json!({}), REQUEST_TIMEOUT).await?;
        let name = me.username.unwrap_or_else(|| "unknown".to_string());
        info!(account = %name, "telegram credentials verified");
        Ok(name)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    #[instrument(skip(self, text))]
    async fn send(&self, bot: &str, text: &str) -> Result<i64, TransportError> {
        let body = json!({ "chat_id": chat_id_value(bot), "text": text });
        let sent: SentMessage = self.inner.call("sendMessage", body, REQUEST_TIMEOUT).await?;
        debug!(message_id = sent.message_id, "message sent");
        Ok(sent.message_id)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<BotEvent>, TransportError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(Arc::clone(&self.inner).poll_loop(tx));
        Ok(rx)
    }

    async fn download(&self, event: &BotEvent, dest: &Path) -> Result<u64, TransportError> {
        let file = event
            .file
            .as_ref()
            .ok_or(TransportError::MissingAttachment {
                message_id: event.message_id,
            })?;

        let timeout = self.inner.config.download_timeout;
        let result = match tokio::time::timeout(timeout, self.inner.fetch_to(&file.file_id, dest)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout("file download")),
        };

        match result {
            Ok(0) => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(TransportError::EmptyFile {
                    path: dest.to_path_buf(),
                })
            }
            Ok(bytes) => {
                debug!(path = %dest.display(), bytes, "file downloaded");
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }

    async fn select_option(
        &self,
        bot: &str,
        event: &BotEvent,
        index: usize,
    ) -> Result<(), TransportError> {
        let option = event
            .options
            .get(index)
            .ok_or(TransportError::NoSuchOption {
                message_id: event.message_id,
                index,
            })?;
        let body = json!({
            "chat_id": chat_id_value(bot),
            "text": option,
            "reply_to_message_id": event.message_id,
        });
        let _: SentMessage = self.inner.call("sendMessage", body, REQUEST_TIMEOUT).await?;
        debug!(message_id = event.message_id, option = %option, "option selected");
        Ok(())
    }
}
