//! Inbound bot events as delivered by a messaging transport.

use serde::{Deserialize, Serialize};

/// Structured audio metadata embedded in a document attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub title: Option<String>,
    pub performer: Option<String>,
    pub duration_secs: Option<u32>,
}

/// A downloadable document attached to a bot message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    /// Transport-specific handle used to fetch the content.
    pub file_id: String,
    /// Filename as provided by the bot.
    pub file_name: Option<String>,
    pub audio: Option<AudioMetadata>,
    /// Declared size in bytes.
    pub size: Option<u64>,
}

impl FileAttachment {
    /// Returns the name to store the file under.
    ///
    /// Falls back to `"{audio title}.flac"` and then to `"{fallback}.flac"`.
    #[must_use]
    pub fn effective_name(&self, fallback: &str) -> String {
        if let Some(name) = self.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        if let Some(title) = self
            .audio
            .as_ref()
            .and_then(|a| a.title.as_deref())
            .filter(|t| !t.trim().is_empty())
        {
            return format!("{title}.flac");
        }
        format!("{fallback}.flac")
    }
}

/// One inbound message from the correspondent bot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotEvent {
    /// Transport message id.
    pub message_id: i64,
    pub file: Option<FileAttachment>,
    /// Selectable options (inline keyboard labels).
    pub options: Vec<String>,
    /// The message is an image with no usable content ("nothing found").
    pub image_only: bool,
    pub text: Option<String>,
}

/// Classification of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    File,
    Options,
    NotFound,
    Text,
}

impl BotEvent {
    /// Classifies the event. A file wins over options, options over the
    /// image-only marker, and everything else is plain text.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        if self.file.is_some() {
            EventKind::File
        } else if !self.options.is_empty() {
            EventKind::Options
        } else if self.image_only {
            EventKind::NotFound
        } else {
            EventKind::Text
        }
    }

    /// Builds a file event.
    #[must_use]
    pub fn with_file(message_id: i64, file: FileAttachment) -> Self {
        Self {
            message_id,
            file: Some(file),
            ..Self::default()
        }
    }

    /// Builds an options event.
    #[must_use]
    pub fn with_options(message_id: i64, options: Vec<String>) -> Self {
        Self {
            message_id,
            options,
            ..Self::default()
        }
    }

    /// Builds an image-only "not found" event.
    #[must_use]
    pub fn not_found(message_id: i64) -> Self {
        Self {
            message_id,
            image_only: true,
            ..Self::default()
        }
    }

    /// Builds a plain text event.
    #[must_use]
    pub fn text(message_id: i64, text: impl Into<String>) -> Self {
        Self {
            message_id,
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: Option<&str>, title: Option<&str>) -> FileAttachment {
        FileAttachment {
            file_id: "f1".to_string(),
            file_name: name.map(String::from),
            audio: title.map(|t| AudioMetadata {
                title: Some(t.to_string()),
                ..AudioMetadata::default()
            }),
            size: Some(4096),
        }
    }

    #[test]
    fn test_kind_priority() {
        let mut event = BotEvent::with_file(1, attachment(Some("a.flac"), None));
        event.options = vec!["one".to_string()];
        event.image_only = true;
        assert_eq!(event.kind(), EventKind::File);

        event.file = None;
        assert_eq!(event.kind(), EventKind::Options);

        event.options.clear();
        assert_eq!(event.kind(), EventKind::NotFound);

        event.image_only = false;
        assert_eq!(event.kind(), EventKind::Text);
    }

    #[test]
    fn test_effective_name_fallback_chain() {
        assert_eq!(
            attachment(Some("Artist - Song.mp3"), Some("Other")).effective_name("x"),
            "Artist - Song.mp3"
        );
        assert_eq!(
            attachment(None, Some("Song")).effective_name("x"),
            "Song.flac"
        );
        assert_eq!(
            attachment(Some("  "), None).effective_name("A - B"),
            "A - B.flac"
        );
    }
}
