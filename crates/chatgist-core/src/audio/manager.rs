//! Audio artifact manager.
//!
//! Renders batch gists to speech, keeps every artifact under the configured
//! size cap by splitting it into equal-duration parts, and joins all batch
//! artifacts into one whole-chat artifact on demand. Rendered artifacts are
//! cached on the chat and reused until the read-state invalidator prunes them;
//! whole-chat audio is also rebuilt once a newer batch has been appended.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatgist_types::chat::{AudioGist, BatchGist, Chat, ChatId};
use chatgist_types::config::GistConfig;
use chatgist_types::error::{AudioError, GistError};

use crate::cache::ChatSlot;
use crate::context::OperationContext;
use crate::llm::provider::GistModel;
use crate::llm::retry::RetryPolicy;
use crate::llm::rotation::{CredentialCursor, call_with_rotation};

use super::caption::{batch_caption, chat_caption};
use super::tools::AudioTools;

/// Parts are cut at this share of the duration that would exactly hit the
/// cap, since compressed frames do not split evenly.
const SPLIT_HEADROOM_PERCENT: u64 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub max_file_bytes: u64,
    pub retry: RetryPolicy,
}

impl AudioSettings {
    pub fn from_config(config: &GistConfig) -> Self {
        Self {
            max_file_bytes: config.audio.max_file_size_bytes(),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

pub struct AudioManager<M, A> {
    model: Arc<M>,
    tools: Arc<A>,
    settings: AudioSettings,
}

impl<M, A> AudioManager<M, A>
where
    M: GistModel,
    A: AudioTools,
{
    pub fn new(model: Arc<M>, tools: Arc<A>, settings: AudioSettings) -> Self {
        Self {
            model,
            tools,
            settings,
        }
    }

    /// Audio for batch `batch` (1-indexed), or for the whole chat when
    /// `batch` is 0.
    #[tracing::instrument(skip(self, slot, ctx))]
    pub async fn get_audio(
        &self,
        slot: &ChatSlot,
        batch: usize,
        ctx: &OperationContext,
    ) -> Result<Vec<AudioGist>, GistError> {
        let (chat_id, title, gists) = slot
            .read(|c| (c.id, c.title.clone(), c.gist.clone()))
            .await;
        let Some(through) = gists.last().map(|g| g.last_message_id) else {
            return Err(GistError::EmptyGist);
        };
        if batch > gists.len() {
            return Err(GistError::BatchOutOfRange {
                requested: batch,
                available: gists.len(),
            });
        }

        let mut cursor = CredentialCursor::for_model(self.model.as_ref());

        if batch > 0 {
            let gist = &gists[batch - 1];
            return self
                .batch_audio(slot, chat_id, &title, gist, &mut cursor, ctx)
                .await;
        }

        let stale = slot.update(Chat::take_stale_chat_audio).await;
        if !stale.is_empty() {
            tracing::debug!(chat_id, stale = stale.len(), "Whole-chat audio outdated");
            self.remove_all(&stale).await;
        }
        if let Some(current) = slot
            .read(|c| c.current_chat_audio().map(<[AudioGist]>::to_vec))
            .await
        {
            return Ok(current);
        }

        let mut inputs: Vec<PathBuf> = Vec::new();
        for gist in &gists {
            let parts = self
                .batch_audio(slot, chat_id, &title, gist, &mut cursor, ctx)
                .await?;
            inputs.extend(parts.into_iter().map(|a| a.artifact_path));
        }

        let joined = ctx
            .run(self.tools.concat(&inputs, &chat_id.to_string()))
            .await
            .map_err(|i| i.into_gist_error("concat"))??;
        let files = self.fit_to_cap(joined, ctx).await?;
        let split = files.len() > 1;
        let audio: Vec<AudioGist> = files
            .into_iter()
            .enumerate()
            .map(|(i, artifact_path)| AudioGist {
                caption: chat_caption(&title, &gists, split.then_some(i + 1)),
                artifact_path,
            })
            .collect();

        tracing::info!(chat_id, parts = audio.len(), "Whole-chat audio ready");
        slot.update(|c| c.attach_chat_audio(through, audio.clone()))
            .await;
        Ok(audio)
    }

    async fn batch_audio(
        &self,
        slot: &ChatSlot,
        chat_id: ChatId,
        title: &str,
        gist: &BatchGist,
        cursor: &mut CredentialCursor,
        ctx: &OperationContext,
    ) -> Result<Vec<AudioGist>, GistError> {
        if !gist.audio.is_empty() {
            return Ok(gist.audio.clone());
        }

        let model = self.model.as_ref();
        let speech = call_with_rotation(
            model,
            cursor,
            &self.settings.retry,
            ctx,
            "synthesize",
            || model.synthesize(&gist.gist_text),
        )
        .await?;
        tracing::debug!(
            chat_id,
            last_message_id = gist.last_message_id,
            attempts = speech.attempts,
            speech_secs = speech.value.duration().as_secs(),
            "Speech synthesized"
        );

        let stem = format!("{chat_id}_{}", gist.last_message_id);
        let encoded = ctx
            .run(self.tools.encode_speech(&speech.value, &stem))
            .await
            .map_err(|i| i.into_gist_error("encode_speech"))??;
        let files = self.fit_to_cap(encoded, ctx).await?;
        let split = files.len() > 1;
        let audio: Vec<AudioGist> = files
            .into_iter()
            .enumerate()
            .map(|(i, artifact_path)| AudioGist {
                caption: batch_caption(title, gist, split.then_some(i + 1)),
                artifact_path,
            })
            .collect();

        slot.update(|c| c.attach_batch_audio(gist.last_message_id, audio.clone()))
            .await?;
        Ok(audio)
    }

    /// Keep `path` as is when it fits the cap, otherwise split it into parts
    /// short enough that none exceeds the cap.
    async fn fit_to_cap(
        &self,
        path: PathBuf,
        ctx: &OperationContext,
    ) -> Result<Vec<PathBuf>, GistError> {
        let size = self.tools.file_size(&path).await?;
        let cap = self.settings.max_file_bytes;
        if size <= cap {
            return Ok(vec![path]);
        }

        let bitrate = self.tools.bitrate(&path).await?.max(1);
        let segment_ms = (cap * 8 * 1000 / bitrate * SPLIT_HEADROOM_PERCENT / 100).max(1);
        tracing::info!(
            path = %path.display(),
            size,
            cap,
            bitrate,
            segment_ms,
            "Splitting oversized audio"
        );

        let parts = ctx
            .run(self.tools.split(&path, Duration::from_millis(segment_ms)))
            .await
            .map_err(|i| i.into_gist_error("split"))??;
        if parts.is_empty() {
            return Err(AudioError::NoOutput {
                tool: "split".into(),
            }
            .into());
        }
        for (part, part_size) in self.oversized(&parts).await? {
            tracing::warn!(
                path = %part.display(),
                size = part_size,
                cap,
                "Split part still exceeds the size cap"
            );
        }
        Ok(parts)
    }

    /// Parts above the size cap. Variable-bitrate encodes can run denser
    /// than the probed average in places.
    async fn oversized(&self, parts: &[PathBuf]) -> Result<Vec<(PathBuf, u64)>, GistError> {
        let mut over = Vec::new();
        for part in parts {
            let size = self.tools.file_size(part).await?;
            if size > self.settings.max_file_bytes {
                over.push((part.clone(), size));
            }
        }
        Ok(over)
    }

    async fn remove_all(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(err) = self.tools.remove(path).await {
                tracing::warn!(path = %path.display(), error = %err, "Failed to delete audio artifact");
            }
        }
    }
}
