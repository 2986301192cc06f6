//! Messaging transport: the authenticated channel to the correspondent bot.
//!
//! The orchestrator needs four things from a transport: send a message,
//! receive inbound events, download an attached file, and answer an option
//! prompt. [`TelegramTransport`] implements them over the Telegram Bot API.

mod error;
pub mod telegram;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::correlation::BotEvent;

pub use error::TransportError;
pub use telegram::{TelegramConfig, TelegramTransport};

/// Channel to a single correspondent bot.
///
/// Uses `async_trait` so the orchestrator can hold `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `text` to `bot` and returns the outbound message id.
    ///
    /// Fails with [`TransportError::FloodWait`] when the server imposes a
    /// cooldown.
    async fn send(&self, bot: &str, text: &str) -> Result<i64, TransportError>;

    /// Starts delivering inbound events. May be called once.
    async fn subscribe(&self) -> Result<mpsc::Receiver<BotEvent>, TransportError>;

    /// Downloads the attachment of `event` to `dest` and returns the size.
    ///
    /// Partial files are removed on failure and an empty result is an error.
    async fn download(&self, event: &BotEvent, dest: &Path) -> Result<u64, TransportError>;

    /// Answers the option prompt in `event` with the option at `index`.
    async fn select_option(
        &self,
        bot: &str,
        event: &BotEvent,
        index: usize,
    ) -> Result<(), TransportError>;
}
