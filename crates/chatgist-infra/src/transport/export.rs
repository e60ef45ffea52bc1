//! JsonExportTransport -- [`ChatTransport`] over a chat export on disk.
//!
//! The export is one JSON document:
//!
//! ```json
//! { "chats": [ { "id": 1, "title": "Team", "kind": "group",
//!                "last_read_message_id": 0,
//!                "messages": [ { "id": 1, "timestamp": "2024-05-01T09:00:00Z",
//!                                "text": "hi", "sender_id": 7 } ] } ] }
//! ```
//!
//! Messages without text (media, service entries) are never handed to the
//! summarizer; they are reported by id as skipped. Read markers are written
//! back to the same file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use chatgist_core::transport::ChatTransport;
use chatgist_types::chat::{
    Chat, ChatId, FetchedMessages, Message, MessageId, PeerKind, PeerRef, ReadTarget,
};
use chatgist_types::error::TransportError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportFile {
    #[serde(default)]
    pub chats: Vec<ExportChat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportChat {
    pub id: ChatId,
    pub title: String,
    pub kind: PeerKind,
    #[serde(default)]
    pub last_read_message_id: MessageId,
    #[serde(default)]
    pub messages: Vec<ExportMessage>,
}

/// A message as it appears in the export. Unlike [`Message`], text is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<MessageId>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_forwarded: bool,
}

impl ExportMessage {
    fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    fn to_message(&self) -> Message {
        Message {
            id: self.id,
            timestamp: self.timestamp,
            text: self.text.clone(),
            sender_id: self.sender_id,
            reply_to_msg_id: self.reply_to_msg_id,
            is_edited: self.is_edited,
            is_forwarded: self.is_forwarded,
        }
    }
}

impl ExportChat {
    fn unread_count(&self) -> u32 {
        let unread = self
            .messages
            .iter()
            .filter(|m| m.id > self.last_read_message_id)
            .count();
        u32::try_from(unread).unwrap_or(u32::MAX)
    }

    fn latest_message_id(&self) -> Option<MessageId> {
        self.messages.iter().map(|m| m.id).max()
    }
}

pub struct JsonExportTransport {
    path: PathBuf,
    export: Mutex<ExportFile>,
}

impl JsonExportTransport {
    /// Load the export at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let path = path.into();
        let raw = tokio::fs::read_to_string(&path).await?;
        let export: ExportFile = serde_json::from_str(&raw)
            .map_err(|e| TransportError::Malformed(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), chats = export.chats.len(), "Chat export loaded");
        Ok(Self {
            path,
            export: Mutex::new(export),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the export back, replacing the file atomically.
    async fn persist(&self, export: &ExportFile) -> Result<(), TransportError> {
        let body = serde_json::to_vec_pretty(export)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

impl ChatTransport for JsonExportTransport {
    async fn list_chats(&self) -> Result<Vec<Chat>, TransportError> {
        let export = self.export.lock().await;
        Ok(export
            .chats
            .iter()
            .map(|c| {
                Chat::new(
                    c.id,
                    c.title.clone(),
                    c.kind,
                    c.unread_count(),
                    c.last_read_message_id,
                )
            })
            .collect())
    }

    async fn fetch_unread_messages(&self, peer: &PeerRef) -> Result<FetchedMessages, TransportError> {
        let export = self.export.lock().await;
        let chat = export
            .chats
            .iter()
            .find(|c| c.id == peer.chat_id)
            .ok_or(TransportError::ChatNotFound(peer.chat_id))?;

        let mut unread: Vec<&ExportMessage> = chat
            .messages
            .iter()
            .filter(|m| m.id > peer.last_read_message_id)
            .collect();
        unread.sort_by_key(|m| m.id);

        let skipped: Vec<MessageId> = unread
            .iter()
            .filter(|m| !m.has_text())
            .map(|m| m.id)
            .collect();
        let messages: Vec<Message> = unread
            .into_iter()
            .filter(|m| m.has_text())
            .map(ExportMessage::to_message)
            .collect();

        tracing::debug!(
            chat_id = peer.chat_id,
            messages = messages.len(),
            skipped = skipped.len(),
            "Fetched unread messages"
        );
        Ok(FetchedMessages { messages, skipped })
    }

    async fn mark_read(&self, peer: &PeerRef, target: ReadTarget) -> Result<(), TransportError> {
        let mut export = self.export.lock().await;
        let chat = export
            .chats
            .iter_mut()
            .find(|c| c.id == peer.chat_id)
            .ok_or(TransportError::ChatNotFound(peer.chat_id))?;

        let marker = match target {
            ReadTarget::All => chat.latest_message_id().unwrap_or(0),
            ReadTarget::UpTo(id) => id,
        };
        if marker <= chat.last_read_message_id {
            return Ok(());
        }
        let previous = chat.last_read_message_id;
        chat.last_read_message_id = marker;

        if let Err(err) = self.persist(&export).await {
            if let Some(chat) = export.chats.iter_mut().find(|c| c.id == peer.chat_id) {
                chat.last_read_message_id = previous;
            }
            return Err(err);
        }
        tracing::debug!(chat_id = peer.chat_id, marker, "Read marker persisted");
        Ok(())
    }
}
