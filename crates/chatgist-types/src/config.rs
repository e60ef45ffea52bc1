//! Configuration types for chatgist.
//!
//! `GistConfig` mirrors the `chatgist.toml` file. Every field has a default so
//! an empty or partial file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chat::ChatId;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GistConfig {
    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,
}

/// Batch sizing for summarization requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Model context window in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Safety margin subtracted from the context window, in percent.
    #[serde(default = "default_drift_percent")]
    pub drift_percent: usize,

    /// Approximate characters per token.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Hard cap on messages in one batch.
    #[serde(default = "default_messages_per_batch")]
    pub messages_per_batch: usize,

    /// Longest summary kept per batch before cropping.
    #[serde(default = "default_max_gist_chars")]
    pub max_gist_chars: usize,
}

fn default_context_window() -> usize {
    32_000
}

fn default_drift_percent() -> usize {
    20
}

fn default_chars_per_token() -> usize {
    3
}

fn default_messages_per_batch() -> usize {
    500
}

fn default_max_gist_chars() -> usize {
    3_900
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            drift_percent: default_drift_percent(),
            chars_per_token: default_chars_per_token(),
            messages_per_batch: default_messages_per_batch(),
            max_gist_chars: default_max_gist_chars(),
        }
    }
}

/// Retry and timeout settings for model calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single model call.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Upper bound for a whole service operation (all batches).
    #[serde(default = "default_flow_timeout_secs")]
    pub flow_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    7
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_flow_timeout_secs() -> u64 {
    900
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            flow_timeout_secs: default_flow_timeout_secs(),
        }
    }
}

/// Where audio artifacts go and how large they may get.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_audio_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("audio")
}

fn default_max_file_size_mb() -> u64 {
    45
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl AudioConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            dir: default_audio_dir(),
            max_file_size_mb: default_max_file_size_mb(),
            tool_timeout_secs: default_tool_timeout_secs(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// Chat list caching and view filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_chat_list_ttl_secs")]
    pub chat_list_ttl_secs: u64,

    /// Minimum unread count for a chat to show up in the unread view.
    #[serde(default = "default_unread_threshold")]
    pub unread_threshold: u32,

    /// Upper bound for a single transport call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Chats flagged favorite at startup.
    #[serde(default)]
    pub favorites: Vec<ChatId>,
}

fn default_chat_list_ttl_secs() -> u64 {
    300
}

fn default_unread_threshold() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chat_list_ttl_secs: default_chat_list_ttl_secs(),
            unread_threshold: default_unread_threshold(),
            request_timeout_secs: default_request_timeout_secs(),
            favorites: Vec::new(),
        }
    }
}

/// Gemini model selection. API keys are not part of the file; they come
/// from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_tts_model")]
    pub tts_model: String,

    #[serde(default = "default_gemini_voice")]
    pub voice: String,

    #[serde(default = "default_gemini_language_code")]
    pub language_code: String,
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_gemini_voice() -> String {
    "Kore".to_string()
}

fn default_gemini_language_code() -> String {
    "en-US".to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
            tts_model: default_gemini_tts_model(),
            voice: default_gemini_voice(),
            language_code: default_gemini_language_code(),
        }
    }
}
