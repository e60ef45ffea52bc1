//! In-memory fakes shared by the unit tests of this crate.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chatgist_types::chat::{
    Chat, ChatId, FetchedMessages, Message, MessageId, PeerKind, PeerRef, ReadTarget,
};
use chatgist_types::error::{AudioError, TransportError};
use chatgist_types::llm::{ProviderError, SpeechAudio};
use chrono::{TimeZone, Utc};

use crate::audio::AudioTools;
use crate::llm::provider::GistModel;
use crate::transport::ChatTransport;

pub const CHAT_ID: ChatId = 42;

pub fn message(id: i64) -> Message {
    Message {
        id,
        timestamp: Utc.timestamp_opt(1_700_000_000 + id * 60, 0).unwrap(),
        text: format!("message number {id}"),
        sender_id: 1 + id % 3,
        reply_to_msg_id: None,
        is_edited: false,
        is_forwarded: false,
    }
}

pub fn chat(unread: u32) -> Chat {
    Chat::new(CHAT_ID, "Team", PeerKind::Group, unread, 0)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeTransport {
    pub messages: Mutex<HashMap<ChatId, Vec<Message>>>,
    /// Non-text message ids reported for every chat.
    pub skipped: Mutex<Vec<MessageId>>,
    pub chats: Mutex<Vec<Chat>>,
    pub fetch_calls: AtomicUsize,
    pub marks: Mutex<Vec<(ChatId, ReadTarget)>>,
    pub fail_mark_read: AtomicBool,
}

impl FakeTransport {
    /// One chat with `count` unread messages numbered from 1.
    pub fn with_messages(count: i64) -> Self {
        let transport = Self::default();
        let messages: Vec<Message> = (1..=count).map(message).collect();
        transport
            .chats
            .lock()
            .unwrap()
            .push(chat(messages.len() as u32));
        transport.messages.lock().unwrap().insert(CHAT_ID, messages);
        transport
    }
}

impl ChatTransport for FakeTransport {
    fn list_chats(&self) -> impl Future<Output = Result<Vec<Chat>, TransportError>> + Send {
        let chats = self.chats.lock().unwrap().clone();
        async move { Ok(chats) }
    }

    fn fetch_unread_messages(
        &self,
        peer: &PeerRef,
    ) -> impl Future<Output = Result<FetchedMessages, TransportError>> + Send {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let messages: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .get(&peer.chat_id)
            .map(|all| {
                all.iter()
                    .filter(|m| m.id > peer.last_read_message_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let skipped: Vec<MessageId> = self
            .skipped
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|&id| id > peer.last_read_message_id)
            .collect();
        async move { Ok(FetchedMessages { messages, skipped }) }
    }

    fn mark_read(
        &self,
        peer: &PeerRef,
        target: ReadTarget,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let result = if self.fail_mark_read.load(Ordering::SeqCst) {
            Err(TransportError::Rejected("read marker refused".into()))
        } else {
            self.marks.lock().unwrap().push((peer.chat_id, target));
            Ok(())
        };
        async move { result }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub struct FakeModel {
    pub summarize_calls: AtomicUsize,
    pub synthesize_calls: AtomicUsize,
    /// Summarize call index (0-based) that fails with a fatal error.
    pub fail_at: Mutex<Option<usize>>,
    pub summary_len: usize,
    pub speech_bytes: usize,
}

impl Default for FakeModel {
    fn default() -> Self {
        Self {
            summarize_calls: AtomicUsize::new(0),
            synthesize_calls: AtomicUsize::new(0),
            fail_at: Mutex::new(None),
            summary_len: 0,
            speech_bytes: 3_000,
        }
    }
}

impl FakeModel {
    pub fn failing_at(call: usize) -> Self {
        let model = Self::default();
        *model.fail_at.lock().unwrap() = Some(call);
        model
    }
}

impl GistModel for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    fn summarize(
        &self,
        batch: &[Message],
    ) -> impl Future<Output = Result<String, ProviderError>> + Send {
        let call = self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        let fail = *self.fail_at.lock().unwrap() == Some(call);
        let text = if self.summary_len > 0 {
            "s".repeat(self.summary_len)
        } else {
            format!(
                "{} messages up to {}",
                batch.len(),
                batch.last().map_or(0, |m| m.id)
            )
        };
        async move {
            if fail {
                Err(ProviderError::InvalidRequest("batch rejected".into()))
            } else {
                Ok(text)
            }
        }
    }

    fn synthesize(
        &self,
        _text: &str,
    ) -> impl Future<Output = Result<SpeechAudio, ProviderError>> + Send {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        let pcm = vec![7u8; self.speech_bytes];
        async move {
            Ok(SpeechAudio {
                pcm,
                sample_rate: 24_000,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Audio tools
// ---------------------------------------------------------------------------

/// Writes raw bytes as "mp3" files at a fixed bitrate, so sizes and
/// durations are exact.
pub struct FakeAudioTools {
    pub dir: PathBuf,
    pub bits_per_second: u64,
}

impl FakeAudioTools {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            bits_per_second: 8_000,
        }
    }
}

impl AudioTools for FakeAudioTools {
    fn encode_speech(
        &self,
        speech: &SpeechAudio,
        stem: &str,
    ) -> impl Future<Output = Result<PathBuf, AudioError>> + Send {
        let path = self.dir.join(format!("{stem}.mp3"));
        let bytes = speech.pcm.clone();
        async move {
            tokio::fs::write(&path, bytes).await?;
            Ok(path)
        }
    }

    fn concat(
        &self,
        inputs: &[PathBuf],
        stem: &str,
    ) -> impl Future<Output = Result<PathBuf, AudioError>> + Send {
        let path = self.dir.join(format!("{stem}.mp3"));
        let inputs = inputs.to_vec();
        async move {
            let mut joined = Vec::new();
            for input in inputs {
                joined.extend(tokio::fs::read(&input).await?);
            }
            tokio::fs::write(&path, joined).await?;
            Ok(path)
        }
    }

    fn bitrate(&self, _path: &Path) -> impl Future<Output = Result<u64, AudioError>> + Send {
        let bps = self.bits_per_second;
        async move { Ok(bps) }
    }

    fn split(
        &self,
        path: &Path,
        segment: Duration,
    ) -> impl Future<Output = Result<Vec<PathBuf>, AudioError>> + Send {
        let path = path.to_path_buf();
        let chunk = (segment.as_millis() as u64 * self.bits_per_second / 8 / 1000).max(1) as usize;
        async move {
            let bytes = tokio::fs::read(&path).await?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut parts = Vec::new();
            for (i, piece) in bytes.chunks(chunk).enumerate() {
                let part = dir.join(format!("{stem}_{i:03}.mp3"));
                tokio::fs::write(&part, piece).await?;
                parts.push(part);
            }
            tokio::fs::remove_file(&path).await?;
            Ok(parts)
        }
    }
}
