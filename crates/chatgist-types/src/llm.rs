//! Model-facing types: provider errors and synthesized speech.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a single model call.
///
/// The retry engine classifies these into retryable, quota and fatal
/// buckets; adapters should map their wire errors onto the most specific
/// variant they can.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("no choices in completion")]
    NoChoices,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Quota for the active credential is spent.
    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Provider-supplied delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after_ms }
            | ProviderError::Http { retry_after_ms, .. } => {
                retry_after_ms.map(Duration::from_millis)
            }
            _ => None,
        }
    }
}

/// Raw speech returned by a synthesis call: signed 16-bit little-endian
/// mono PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

impl SpeechAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = self.pcm.len() as u64 / 2;
        Duration::from_millis(samples * 1000 / u64::from(self.sample_rate))
    }
}
