//! Drives the partitioner and the retry engine across a chat's unread
//! messages, appending one `BatchGist` per batch.
//!
//! Only messages not covered by an existing gist are summarized, so calling
//! `summarize` again after a partial failure resumes where it stopped and a
//! repeat call on a finished chat costs no model calls. Callers hold the
//! chat's lease for the duration of a call.
//!
//! A batch's `message_count` includes the skipped non-text messages whose ids
//! fall inside it, so marking the batch read clears them from the unread
//! count too.

use std::sync::Arc;
use std::time::Duration;

use chatgist_types::chat::{BatchGist, Message};
use chatgist_types::config::GistConfig;
use chatgist_types::error::GistError;

use crate::batch::{BatchBudget, partition};
use crate::cache::ChatSlot;
use crate::context::OperationContext;
use crate::llm::provider::GistModel;
use crate::llm::retry::RetryPolicy;
use crate::llm::rotation::{CredentialCursor, call_with_rotation};
use crate::transport::ChatTransport;

use super::progress::ProgressSink;

#[derive(Debug, Clone, PartialEq)]
pub struct GistSettings {
    pub budget: BatchBudget,
    pub retry: RetryPolicy,
    pub max_gist_chars: usize,
    /// Upper bound for a single transport call.
    pub request_timeout: Duration,
}

impl GistSettings {
    pub fn from_config(config: &GistConfig) -> Self {
        Self {
            budget: BatchBudget::from_config(&config.batching),
            retry: RetryPolicy::from_config(&config.retry),
            max_gist_chars: config.batching.max_gist_chars,
            request_timeout: Duration::from_secs(config.cache.request_timeout_secs),
        }
    }
}

/// Cap a summary at `max_chars` characters, noting how much was dropped.
pub fn crop_gist(text: String, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n\ncropped, {} characters omitted", total - max_chars)
}

pub struct GistPipeline<T, M> {
    transport: Arc<T>,
    model: Arc<M>,
    settings: GistSettings,
}

impl<T, M> GistPipeline<T, M>
where
    T: ChatTransport,
    M: GistModel,
{
    pub fn new(transport: Arc<T>, model: Arc<M>, settings: GistSettings) -> Self {
        Self {
            transport,
            model,
            settings,
        }
    }

    /// Summarize every uncovered unread message of the chat in `slot` and
    /// return the chat's full gist list.
    ///
    /// On failure after at least one batch, returns `GistError::Incomplete`
    /// carrying the batches produced by this call; they also stay on the chat.
    #[tracing::instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn summarize(
        &self,
        slot: &ChatSlot,
        progress: &dyn ProgressSink,
        ctx: &OperationContext,
    ) -> Result<Vec<BatchGist>, GistError> {
        let (peer, needs_fetch) = slot.read(|c| (c.peer(), c.messages.is_none())).await;
        if needs_fetch {
            let fetched = ctx
                .with_timeout(self.settings.request_timeout)
                .run(self.transport.fetch_unread_messages(&peer))
                .await
                .map_err(|i| i.into_gist_error("fetch_unread_messages"))?
                .map_err(|source| GistError::Transport {
                    operation: "fetch_unread_messages",
                    source,
                })?;
            tracing::debug!(
                chat_id = peer.chat_id,
                messages = fetched.messages.len(),
                skipped = fetched.skipped.len(),
                "Fetched unread messages"
            );
            slot.update(|c| c.load_messages(fetched)).await;
        }

        let (pending, mut covered_through): (Vec<Message>, _) = slot
            .read(|c| (c.uncovered_messages().to_vec(), c.coverage_start()))
            .await;
        if pending.is_empty() {
            return Ok(slot.read(|c| c.gist.clone()).await);
        }

        let ranges = partition(&pending, &self.settings.budget);
        let total = pending.len();
        let batches = ranges.len();
        tracing::info!(chat_id = peer.chat_id, messages = total, batches, "Summarizing chat");
        progress.report("Summarizing", 0);

        let mut cursor = CredentialCursor::for_model(self.model.as_ref());
        let mut completed: Vec<BatchGist> = Vec::with_capacity(batches);
        let mut processed = 0usize;

        for (index, range) in ranges.into_iter().enumerate() {
            if let Err(interrupted) = ctx.check() {
                return Err(incomplete(completed, interrupted.into_gist_error("summarize")));
            }

            let batch = &pending[range];
            let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
                continue;
            };
            let model = self.model.as_ref();
            let summary = match call_with_rotation(
                model,
                &mut cursor,
                &self.settings.retry,
                ctx,
                "summarize",
                || model.summarize(batch),
            )
            .await
            {
                Ok(retried) => retried,
                Err(err) => {
                    tracing::warn!(batch = index + 1, error = %err, "Batch summarization failed");
                    return Err(incomplete(completed, err));
                }
            };

            let skipped = slot
                .read(|c| c.skipped_between(covered_through, last.id))
                .await;
            covered_through = last.id;
            let gist = BatchGist {
                first_message_time: first.timestamp,
                last_message_id: last.id,
                last_message_time: last.timestamp,
                message_count: batch.len() + skipped,
                gist_text: crop_gist(summary.value, self.settings.max_gist_chars),
                audio: Vec::new(),
            };
            if let Err(err) = slot.update(|c| c.append_gist(gist.clone())).await {
                return Err(incomplete(completed, err));
            }
            completed.push(gist);

            processed += batch.len();
            let percent = (processed * 100 / total) as u8;
            tracing::debug!(
                batch = index + 1,
                batches,
                attempts = summary.attempts,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                percent,
                "Batch summarized"
            );
            progress.report(&format!("Summarized batch {}/{batches}", index + 1), percent);
        }

        Ok(slot.read(|c| c.gist.clone()).await)
    }
}

fn incomplete(completed: Vec<BatchGist>, err: GistError) -> GistError {
    if completed.is_empty() {
        err
    } else {
        GistError::Incomplete {
            completed,
            source: Box::new(err),
        }
    }
}
