//! Chat aggregate and the records hanging off it.
//!
//! A [`Chat`] is owned by the chat cache. Other components never poke at its
//! fields directly when changing read state or gists; they go through the
//! commands defined here ([`Chat::append_gist`], [`Chat::apply_read`]) so the
//! ordering invariants stay in one place.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GistError;

pub type ChatId = i64;
pub type MessageId = i64;

/// Kind of remote peer, resolved once by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    User,
    Group,
    Channel,
}

impl std::fmt::Display for PeerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerKind::User => write!(f, "user"),
            PeerKind::Group => write!(f, "group"),
            PeerKind::Channel => write!(f, "channel"),
        }
    }
}

/// A single text message. Immutable once fetched.
///
/// The serialized JSON form of this struct is what the batch partitioner
/// measures and what the model receives, so field names are kept short and
/// stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub sender_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_forwarded: bool,
}

/// One rendered speech artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioGist {
    pub artifact_path: PathBuf,
    pub caption: String,
}

/// Summary of one contiguous batch of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchGist {
    pub first_message_time: DateTime<Utc>,
    pub last_message_id: MessageId,
    pub last_message_time: DateTime<Utc>,
    pub message_count: usize,
    pub gist_text: String,
    #[serde(default)]
    pub audio: Vec<AudioGist>,
}

/// Addressing information the transport needs to talk about a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRef {
    pub chat_id: ChatId,
    pub kind: PeerKind,
    pub last_read_message_id: MessageId,
}

/// How far a mark-read request reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// Everything currently in the chat.
    All,
    /// Up to and including this message id.
    UpTo(MessageId),
}

/// Result of fetching unread messages from the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedMessages {
    /// Chronological, ascending by id.
    pub messages: Vec<Message>,
    /// Ids of the non-text messages the transport dropped, ascending.
    pub skipped: Vec<MessageId>,
}

/// Lightweight listing row for chat views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatOverview {
    pub id: ChatId,
    pub title: String,
    pub kind: PeerKind,
    pub unread_count: u32,
    pub is_favorite: bool,
    pub gist_batches: usize,
}

/// Per-chat state: read marker, buffered messages, gists and audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    pub kind: PeerKind,
    pub unread_count: u32,
    pub is_favorite: bool,
    pub last_read_message_id: MessageId,
    /// `None` until the first fetch; `Some(vec![])` means fetched and empty.
    pub messages: Option<Vec<Message>>,
    /// Unread non-text message ids; they count toward the batch they fall in.
    pub skipped: Vec<MessageId>,
    pub gist: Vec<BatchGist>,
    pub audio: Vec<AudioGist>,
    /// Last message id covered by `audio`.
    pub audio_through: Option<MessageId>,
}

impl Chat {
    pub fn new(
        id: ChatId,
        title: impl Into<String>,
        kind: PeerKind,
        unread_count: u32,
        last_read_message_id: MessageId,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            kind,
            unread_count,
            is_favorite: false,
            last_read_message_id,
            messages: None,
            skipped: Vec::new(),
            gist: Vec::new(),
            audio: Vec::new(),
            audio_through: None,
        }
    }

    pub fn peer(&self) -> PeerRef {
        PeerRef {
            chat_id: self.id,
            kind: self.kind,
            last_read_message_id: self.last_read_message_id,
        }
    }

    pub fn overview(&self) -> ChatOverview {
        ChatOverview {
            id: self.id,
            title: self.title.clone(),
            kind: self.kind,
            unread_count: self.unread_count,
            is_favorite: self.is_favorite,
            gist_batches: self.gist.len(),
        }
    }

    /// Store a freshly fetched message buffer.
    pub fn load_messages(&mut self, fetched: FetchedMessages) {
        self.messages = Some(fetched.messages);
        self.skipped = fetched.skipped;
    }

    /// Buffered messages that no existing gist covers yet.
    pub fn uncovered_messages(&self) -> &[Message] {
        let Some(messages) = self.messages.as_deref() else {
            return &[];
        };
        match self.gist.last() {
            Some(last) => {
                let start = messages.partition_point(|m| m.id <= last.last_message_id);
                &messages[start..]
            }
            None => messages,
        }
    }

    /// Where the next batch starts: after the last gist, or after the read
    /// marker when nothing is summarized yet.
    pub fn coverage_start(&self) -> MessageId {
        self.gist
            .last()
            .map_or(self.last_read_message_id, |g| g.last_message_id)
    }

    /// Skipped messages with ids in `(after, through]`.
    pub fn skipped_between(&self, after: MessageId, through: MessageId) -> usize {
        let from = self.skipped.partition_point(|&id| id <= after);
        let to = self.skipped.partition_point(|&id| id <= through);
        to.saturating_sub(from)
    }

    /// Append a completed batch gist.
    ///
    /// Rejects a gist whose `last_message_id` does not advance past the
    /// previous one.
    pub fn append_gist(&mut self, gist: BatchGist) -> Result<(), GistError> {
        if let Some(last) = self.gist.last()
            && gist.last_message_id <= last.last_message_id
        {
            return Err(GistError::InvariantViolation(format!(
                "gist for message {} does not follow gist for message {}",
                gist.last_message_id, last.last_message_id
            )));
        }
        self.gist.push(gist);
        Ok(())
    }

    /// Attach rendered audio to the batch ending at `last_message_id`.
    pub fn attach_batch_audio(
        &mut self,
        last_message_id: MessageId,
        audio: Vec<AudioGist>,
    ) -> Result<(), GistError> {
        let gist = self
            .gist
            .iter_mut()
            .find(|g| g.last_message_id == last_message_id)
            .ok_or_else(|| {
                GistError::InvariantViolation(format!(
                    "no batch ends at message {last_message_id}"
                ))
            })?;
        gist.audio = audio;
        Ok(())
    }

    /// Attach whole-chat audio rendered from every batch up to `through`.
    pub fn attach_chat_audio(&mut self, through: MessageId, audio: Vec<AudioGist>) {
        self.audio = audio;
        self.audio_through = Some(through);
    }

    /// Whole-chat audio, if it was rendered from the current batch list.
    pub fn current_chat_audio(&self) -> Option<&[AudioGist]> {
        let last = self.gist.last()?.last_message_id;
        let current = !self.audio.is_empty() && self.audio_through == Some(last);
        current.then_some(self.audio.as_slice())
    }

    /// Detach whole-chat audio that no longer covers every batch.
    pub fn take_stale_chat_audio(&mut self) -> Vec<PathBuf> {
        if self.current_chat_audio().is_some() {
            return Vec::new();
        }
        self.audio_through = None;
        self.audio.drain(..).map(|a| a.artifact_path).collect()
    }

    /// Resolve a 1-indexed batch page (0 = whole chat) into a read target.
    pub fn read_target(&self, page: usize) -> Result<ReadTarget, GistError> {
        if page == 0 {
            return Ok(ReadTarget::All);
        }
        self.gist
            .get(page - 1)
            .map(|g| ReadTarget::UpTo(g.last_message_id))
            .ok_or(GistError::BatchOutOfRange {
                requested: page,
                available: self.gist.len(),
            })
    }

    /// Highest message id this chat knows about, if any.
    pub fn highest_known_message_id(&self) -> Option<MessageId> {
        let buffered = self
            .messages
            .as_ref()
            .and_then(|m| m.last())
            .map(|m| m.id);
        let gisted = self.gist.last().map(|g| g.last_message_id);
        buffered.max(gisted)
    }

    /// Detach every audio artifact (whole-chat and per-batch) from this chat.
    pub fn take_artifacts(&mut self) -> Vec<PathBuf> {
        self.audio_through = None;
        let mut paths: Vec<PathBuf> = self.audio.drain(..).map(|a| a.artifact_path).collect();
        for gist in &mut self.gist {
            paths.extend(gist.audio.drain(..).map(|a| a.artifact_path));
        }
        paths
    }

    /// Apply a read that the remote side has already accepted.
    ///
    /// Returns the artifact paths that are no longer owned by anything and
    /// should be deleted by the caller.
    pub fn apply_read(&mut self, target: ReadTarget) -> Vec<PathBuf> {
        match target {
            ReadTarget::All => {
                if let Some(highest) = self.highest_known_message_id() {
                    self.last_read_message_id = self.last_read_message_id.max(highest);
                }
                let orphaned = self.take_artifacts();
                self.unread_count = 0;
                self.messages = None;
                self.skipped.clear();
                self.gist.clear();
                orphaned
            }
            ReadTarget::UpTo(id) => {
                let mut orphaned: Vec<PathBuf> =
                    self.audio.drain(..).map(|a| a.artifact_path).collect();
                self.audio_through = None;
                self.last_read_message_id = self.last_read_message_id.max(id);
                let marker = self.last_read_message_id;

                if let Some(messages) = self.messages.as_mut() {
                    messages.retain(|m| m.id > marker);
                }
                self.skipped.retain(|&id| id > marker);

                let keep_from = self.gist.partition_point(|g| g.last_message_id <= marker);
                let mut pruned_messages: usize = 0;
                for gist in self.gist.drain(..keep_from) {
                    pruned_messages += gist.message_count;
                    orphaned.extend(gist.audio.into_iter().map(|a| a.artifact_path));
                }
                let pruned = u32::try_from(pruned_messages).unwrap_or(u32::MAX);
                self.unread_count = self.unread_count.saturating_sub(pruned);
                orphaned
            }
        }
    }
}
