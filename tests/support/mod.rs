//! Shared fakes for orchestrator integration tests: a scripted bot
//! transport and a fixed track source.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::correlation::{BotEvent, FileAttachment};
use relay_core::extractor::{ExtractorError, PlaylistInfo, TrackSource};
use relay_core::orchestrator::OrchestratorConfig;
use relay_core::transport::{Transport, TransportError};
use relay_core::Track;
use tokio::sync::mpsc;

/// Size of scripted audio payloads; above the organizer's minimum.
pub const AUDIO_SIZE: usize = 2048;

/// How the fake bot answers one query.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Sends an audio document with this filename.
    File(String),
    /// Shows an option prompt; selecting any option yields `then`.
    Options(Vec<String>, Box<Reply>),
    /// Sends an image with no results.
    NotFound,
    /// Plain text chatter.
    Text(String),
    /// Never answers.
    Silence,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, VecDeque<Reply>>,
    send_errors: HashMap<String, VecDeque<TransportError>>,
    select_errors: VecDeque<TransportError>,
    follow_ups: HashMap<i64, Reply>,
    files: HashMap<String, Vec<u8>>,
}

/// In-process stand-in for the bot chat.
pub struct FakeTransport {
    script: Mutex<Script>,
    sent: Mutex<Vec<String>>,
    selections: Mutex<Vec<(i64, usize)>>,
    tx: Mutex<Option<mpsc::Sender<BotEvent>>>,
    next_id: AtomicI64,
    downloads: AtomicUsize,
    reply_delay: Duration,
    download_delay: Duration,
}

impl FakeTransport {
    pub fn new(reply_delay: Duration) -> Arc<Self> {
        Self::with_download_delay(reply_delay, Duration::ZERO)
    }

    /// Like [`FakeTransport::new`], with every download taking `download_delay`.
    pub fn with_download_delay(reply_delay: Duration, download_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::default()),
            sent: Mutex::new(Vec::new()),
            selections: Mutex::new(Vec::new()),
            tx: Mutex::new(None),
            next_id: AtomicI64::new(100),
            downloads: AtomicUsize::new(0),
            reply_delay,
            download_delay,
        })
    }

    /// Queues the reply to the next query with text `query`.
    pub fn reply(&self, query: &str, reply: Reply) {
        self.script
            .lock()
            .unwrap()
            .replies
            .entry(query.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Makes the next send of `query` fail with `error`.
    pub fn fail_send(&self, query: &str, error: TransportError) {
        self.script
            .lock()
            .unwrap()
            .send_errors
            .entry(query.to_string())
            .or_default()
            .push_back(error);
    }

    /// Makes the next option selection fail with `error`.
    pub fn fail_select(&self, error: TransportError) {
        self.script.lock().unwrap().select_errors.push_back(error);
    }

    /// Queries in the order they were sent.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn selections(&self) -> Vec<(i64, usize)> {
        self.selections.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn build_event(&self, reply: Reply) -> Option<BotEvent> {
        let id = self.next_id();
        match reply {
            Reply::File(name) => {
                let file_id = format!("file-{id}");
                self.script
                    .lock()
                    .unwrap()
                    .files
                    .insert(file_id.clone(), vec![0x66; AUDIO_SIZE]);
                Some(BotEvent::with_file(
                    id,
                    FileAttachment {
                        file_id,
                        file_name: Some(name),
                        audio: None,
                        size: Some(AUDIO_SIZE as u64),
                    },
                ))
            }
            Reply::Options(options, then) => {
                self.script.lock().unwrap().follow_ups.insert(id, *then);
                Some(BotEvent::with_options(id, options))
            }
            Reply::NotFound => Some(BotEvent::not_found(id)),
            Reply::Text(text) => Some(BotEvent::text(id, text)),
            Reply::Silence => None,
        }
    }

    fn emit_later(&self, reply: Reply) {
        let Some(event) = self.build_event(reply) else {
            return;
        };
        let Some(tx) = self.tx.lock().unwrap().clone() else {
            return;
        };
        let delay = self.reply_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        });
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, _bot: &str, text: &str) -> Result<i64, TransportError> {
        self.sent.lock().unwrap().push(text.to_string());
        let (error, reply) = {
            let mut script = self.script.lock().unwrap();
            let error = script
                .send_errors
                .get_mut(text)
                .and_then(VecDeque::pop_front);
            let reply = if error.is_none() {
                script.replies.get_mut(text).and_then(VecDeque::pop_front)
            } else {
                None
            };
            (error, reply)
        };
        if let Some(error) = error {
            return Err(error);
        }
        let id = self.next_id();
        if let Some(reply) = reply {
            self.emit_later(reply);
        }
        Ok(id)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<BotEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn download(&self, event: &BotEvent, dest: &Path) -> Result<u64, TransportError> {
        let file = event.file.as_ref().ok_or(TransportError::MissingAttachment {
            message_id: event.message_id,
        })?;
        let bytes = self
            .script
            .lock()
            .unwrap()
            .files
            .get(&file.file_id)
            .cloned()
            .unwrap_or_default();
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::io(parent, e))?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| TransportError::io(dest, e))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(bytes.len() as u64)
    }

    async fn select_option(
        &self,
        _bot: &str,
        event: &BotEvent,
        index: usize,
    ) -> Result<(), TransportError> {
        self.selections
            .lock()
            .unwrap()
            .push((event.message_id, index));
        if let Some(error) = self.script.lock().unwrap().select_errors.pop_front() {
            return Err(error);
        }
        let follow_up = self.script.lock().unwrap().follow_ups.remove(&event.message_id);
        if let Some(reply) = follow_up {
            self.emit_later(reply);
        }
        Ok(())
    }
}

/// Track source with a fixed listing.
pub struct FakeSource {
    pub info: PlaylistInfo,
    pub tracks: Vec<Track>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(name: &str, tracks: Vec<Track>) -> Arc<Self> {
        Arc::new(Self {
            info: PlaylistInfo {
                name: name.to_string(),
                owner: "tester".to_string(),
                total_tracks: tracks.len(),
            },
            tracks,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TrackSource for FakeSource {
    async fn get_playlist_info(&self, _url: &str) -> Result<PlaylistInfo, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.info.clone())
    }

    async fn extract_tracks(&self, _url: &str) -> Result<Vec<Track>, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tracks.clone())
    }
}

/// A track whose query text is its URL.
pub fn track(id: &str, artist: &str, title: &str) -> Track {
    Track::new(
        id,
        title,
        vec![artist.to_string()],
        format!("https://open.spotify.com/track/{id}"),
    )
}

/// Millisecond-scale timings so runs finish quickly.
pub fn fast_config(batch_size: usize) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new("@music_bot");
    config.batch_size = batch_size;
    config.send_delay = Duration::from_millis(100);
    config.sequential_poll = Duration::from_millis(20);
    config.track_timeout = Duration::from_secs(3);
    config.batch_timeout = Duration::from_secs(3);
    config.batch_poll = Duration::from_millis(20);
    config.drain_timeout = Duration::from_secs(1);
    config.drain_poll = Duration::from_millis(20);
    config.transient_backoff = Duration::from_millis(10);
    config.download_timeout = Duration::from_secs(5);
    config.sweep_interval = Duration::from_millis(50);
    config.correlation.response_timeout = Duration::from_secs(5);
    config
}
