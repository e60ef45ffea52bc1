//! Read-state invalidator.
//!
//! Marking a page read persists the marker remotely first. Only when the
//! transport accepts it does the chat advance its marker, drop the covered
//! gists and buffered messages, and delete the artifacts nothing owns
//! anymore. A rejected remote call leaves the chat exactly as it was.

use std::sync::Arc;
use std::time::Duration;

use chatgist_types::chat::Chat;
use chatgist_types::error::GistError;

use crate::audio::AudioTools;
use crate::cache::ChatSlot;
use crate::context::OperationContext;
use crate::transport::ChatTransport;

pub struct ReadStateInvalidator<T, A> {
    transport: Arc<T>,
    tools: Arc<A>,
    request_timeout: Duration,
}

impl<T, A> ReadStateInvalidator<T, A>
where
    T: ChatTransport,
    A: AudioTools,
{
    pub fn new(transport: Arc<T>, tools: Arc<A>, request_timeout: Duration) -> Self {
        Self {
            transport,
            tools,
            request_timeout,
        }
    }

    /// Mark batches `1..=page` read, or the whole chat when `page` is 0.
    #[tracing::instrument(skip(self, slot, ctx))]
    pub async fn mark_as_read(
        &self,
        slot: &ChatSlot,
        page: usize,
        ctx: &OperationContext,
    ) -> Result<Chat, GistError> {
        let (peer, target) = slot
            .read(|c| c.read_target(page).map(|target| (c.peer(), target)))
            .await?;

        ctx.with_timeout(self.request_timeout)
            .run(self.transport.mark_read(&peer, target))
            .await
            .map_err(|i| i.into_gist_error("mark_read"))?
            .map_err(|source| {
                tracing::warn!(chat_id = peer.chat_id, error = %source, "Remote mark-read failed");
                GistError::Transport {
                    operation: "mark_read",
                    source,
                }
            })?;

        let (orphaned, chat) = slot
            .update(|c| {
                let orphaned = c.apply_read(target);
                (orphaned, c.clone())
            })
            .await;

        for path in &orphaned {
            if let Err(err) = self.tools.remove(path).await {
                tracing::warn!(path = %path.display(), error = %err, "Failed to delete audio artifact");
            }
        }
        tracing::info!(
            chat_id = chat.id,
            last_read = chat.last_read_message_id,
            unread = chat.unread_count,
            removed_artifacts = orphaned.len(),
            "Chat marked read"
        );

        Ok(chat)
    }
}
