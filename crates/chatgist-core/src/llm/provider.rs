//! GistModel trait definition.
//!
//! This is the abstraction every summarization/speech backend implements.
//! Uses RPITIT (Rust 2024 edition) for the async calls.
//!
//! Implementations live in chatgist-infra (e.g. `GeminiModel`).

use std::future::Future;

use chatgist_types::chat::Message;
use chatgist_types::llm::{ProviderError, SpeechAudio};

pub trait GistModel: Send + Sync {
    /// Human-readable backend name (e.g. "gemini").
    fn name(&self) -> &str;

    /// Summarize one batch of messages into plain text.
    fn summarize(
        &self,
        batch: &[Message],
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Render text to speech.
    fn synthesize(&self, text: &str)
    -> impl Future<Output = Result<SpeechAudio, ProviderError>> + Send;

    /// Number of credentials this backend can rotate through.
    fn credential_count(&self) -> usize {
        1
    }

    /// Index of the credential currently in use.
    fn active_credential(&self) -> usize {
        0
    }

    /// Switch subsequent calls to the credential at `index`.
    fn select_credential(&self, _index: usize) {}
}
