//! GistService: the operations the front-end calls.
//!
//! Wires the chat cache, summarization pipeline, audio manager and read-state
//! invalidator around one transport, one model and one audio toolchain.
//! Every long operation holds the chat's lease, runs under the configured
//! flow timeout and sits behind a panic boundary, so a bug in one chat's
//! generation surfaces as `GistError::Panicked` instead of tearing down the
//! caller.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chatgist_types::chat::{AudioGist, BatchGist, Chat, ChatId, ChatOverview};
use chatgist_types::config::GistConfig;
use chatgist_types::error::GistError;
use futures_util::FutureExt;

use crate::audio::{AudioManager, AudioSettings, AudioTools};
use crate::cache::{ChatCache, ChatLease, RefreshPolicy};
use crate::context::OperationContext;
use crate::gist::{GistPipeline, GistSettings, ProgressSink};
use crate::llm::provider::GistModel;
use crate::read_state::ReadStateInvalidator;
use crate::transport::ChatTransport;

pub struct GistService<T, M, A> {
    transport: Arc<T>,
    tools: Arc<A>,
    cache: ChatCache,
    pipeline: GistPipeline<T, M>,
    audio: AudioManager<M, A>,
    invalidator: ReadStateInvalidator<T, A>,
    unread_threshold: u32,
    flow_timeout: Duration,
    request_timeout: Duration,
}

impl<T, M, A> GistService<T, M, A>
where
    T: ChatTransport,
    M: GistModel,
    A: AudioTools,
{
    pub fn new(transport: Arc<T>, model: Arc<M>, tools: Arc<A>, config: &GistConfig) -> Self {
        let request_timeout = Duration::from_secs(config.cache.request_timeout_secs);
        Self {
            cache: ChatCache::new(Duration::from_secs(config.cache.chat_list_ttl_secs))
                .with_favorites(config.cache.favorites.iter().copied()),
            pipeline: GistPipeline::new(
                Arc::clone(&transport),
                Arc::clone(&model),
                GistSettings::from_config(config),
            ),
            audio: AudioManager::new(
                Arc::clone(&model),
                Arc::clone(&tools),
                AudioSettings::from_config(config),
            ),
            invalidator: ReadStateInvalidator::new(
                Arc::clone(&transport),
                Arc::clone(&tools),
                request_timeout,
            ),
            transport,
            tools,
            unread_threshold: config.cache.unread_threshold,
            flow_timeout: Duration::from_secs(config.retry.flow_timeout_secs),
            request_timeout,
        }
    }

    // -----------------------------------------------------------------------
    // Chat views
    // -----------------------------------------------------------------------

    /// All chats, most unread first. Refreshes the listing once its TTL lapses.
    pub async fn list_chats(&self, ctx: &OperationContext) -> Result<Vec<ChatOverview>, GistError> {
        self.refresh(RefreshPolicy::IfStale, ctx).await?;
        Ok(self.cache.list().await)
    }

    /// Chats at or above the configured unread threshold.
    pub async fn unread_chats(
        &self,
        ctx: &OperationContext,
    ) -> Result<Vec<ChatOverview>, GistError> {
        self.refresh(RefreshPolicy::IfStale, ctx).await?;
        Ok(self.cache.unread(self.unread_threshold).await)
    }

    pub async fn favorite_chats(
        &self,
        ctx: &OperationContext,
    ) -> Result<Vec<ChatOverview>, GistError> {
        self.refresh(RefreshPolicy::IfStale, ctx).await?;
        Ok(self.cache.favorites().await)
    }

    pub async fn chat_detail(
        &self,
        chat_id: ChatId,
        ctx: &OperationContext,
    ) -> Result<Chat, GistError> {
        self.refresh(RefreshPolicy::IfEmpty, ctx).await?;
        Ok(self.cache.get(chat_id)?.snapshot().await)
    }

    /// Toggle the favorite flag; returns the new value.
    pub async fn change_favorite(
        &self,
        chat_id: ChatId,
        ctx: &OperationContext,
    ) -> Result<bool, GistError> {
        self.refresh(RefreshPolicy::IfEmpty, ctx).await?;
        self.cache.toggle_favorite(chat_id).await
    }

    // -----------------------------------------------------------------------
    // Gist operations
    // -----------------------------------------------------------------------

    pub async fn chat_gist(
        &self,
        chat_id: ChatId,
        progress: &dyn ProgressSink,
        ctx: &OperationContext,
    ) -> Result<Vec<BatchGist>, GistError> {
        let lease = self.lease(chat_id, ctx).await?;
        let flow = ctx.with_timeout(self.flow_timeout);
        guarded("chat_gist", self.pipeline.summarize(&lease, progress, &flow)).await
    }

    pub async fn audio_gist(
        &self,
        chat_id: ChatId,
        batch: usize,
        ctx: &OperationContext,
    ) -> Result<Vec<AudioGist>, GistError> {
        let lease = self.lease(chat_id, ctx).await?;
        let flow = ctx.with_timeout(self.flow_timeout);
        guarded("audio_gist", self.audio.get_audio(&lease, batch, &flow)).await
    }

    pub async fn mark_as_read(
        &self,
        chat_id: ChatId,
        page: usize,
        ctx: &OperationContext,
    ) -> Result<Chat, GistError> {
        let lease = self.lease(chat_id, ctx).await?;
        guarded("mark_as_read", self.invalidator.mark_as_read(&lease, page, ctx)).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn lease(&self, chat_id: ChatId, ctx: &OperationContext) -> Result<ChatLease, GistError> {
        self.refresh(RefreshPolicy::IfEmpty, ctx).await?;
        ctx.run(self.cache.lease(chat_id))
            .await
            .map_err(|i| i.into_gist_error("lease"))?
    }

    async fn refresh(&self, policy: RefreshPolicy, ctx: &OperationContext) -> Result<(), GistError> {
        let outcome = self
            .cache
            .refresh(policy, || async {
                ctx.with_timeout(self.request_timeout)
                    .run(self.transport.list_chats())
                    .await
                    .map_err(|i| i.into_gist_error("list_chats"))?
                    .map_err(|source| GistError::Transport {
                        operation: "list_chats",
                        source,
                    })
            })
            .await?;

        for path in &outcome.orphaned {
            if let Err(err) = self.tools.remove(path).await {
                tracing::warn!(path = %path.display(), error = %err, "Failed to delete audio artifact");
            }
        }
        Ok(())
    }
}

/// Run `fut`, turning a panic inside it into `GistError::Panicked`.
async fn guarded<R>(
    operation: &'static str,
    fut: impl Future<Output = Result<R, GistError>>,
) -> Result<R, GistError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(operation, %message, "Operation panicked");
            Err(GistError::Panicked { operation, message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guarded_converts_panics() {
        let exploding = async {
            let batches: Vec<u8> = Vec::new();
            if batches.is_empty() {
                panic!("model exploded");
            }
            Ok(())
        };
        let result: Result<(), GistError> = guarded("boom", exploding).await;
        match result {
            Err(GistError::Panicked { operation, message }) => {
                assert_eq!(operation, "boom");
                assert_eq!(message, "model exploded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn guarded_passes_results_through() {
        let ok: Result<u8, GistError> = guarded("fine", async { Ok(3) }).await;
        assert_eq!(ok.unwrap(), 3);
        let err: Result<u8, GistError> = guarded("fine", async { Err(GistError::EmptyGist) }).await;
        assert!(matches!(err, Err(GistError::EmptyGist)));
    }
}
