//! GeminiModel -- concrete [`GistModel`] implementation for Google Gemini.
//!
//! Sends `generateContent` requests with the `x-goog-api-key` header. The
//! key pool is rotated by the core rotation engine through
//! [`GistModel::select_credential`]; keys are wrapped in [`SecretString`]
//! and only exposed when building request headers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};

use chatgist_core::llm::provider::GistModel;
use chatgist_types::chat::Message;
use chatgist_types::config::GistConfig;
use chatgist_types::llm::{ProviderError, SpeechAudio};

use super::types::{
    Content, ErrorEnvelope, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    PrebuiltVoiceConfig, SpeechConfig, VoiceConfig,
};

/// Sample rate assumed when the audio mime type does not carry one.
const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Google Gemini model backend.
///
/// Holds a pool of API keys; the active index survives between calls so a
/// key that ran out of quota stays retired until the pool wraps around.
pub struct GeminiModel {
    client: reqwest::Client,
    keys: Vec<SecretString>,
    active: AtomicUsize,
    base_url: String,
    model: String,
    tts_model: String,
    voice: String,
    language_code: String,
    target_chars: usize,
}

impl GeminiModel {
    /// Create a Gemini backend over `keys`, which must not be empty.
    pub fn new(keys: Vec<SecretString>, config: &GistConfig) -> anyhow::Result<Self> {
        if keys.is_empty() {
            bail!("at least one Gemini API key is required");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.retry.attempt_timeout_secs))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            keys,
            active: AtomicUsize::new(0),
            base_url: config.gemini.base_url.trim_end_matches('/').to_string(),
            model: config.gemini.model.clone(),
            tts_model: config.gemini.tts_model.clone(),
            voice: config.gemini.voice.clone(),
            language_code: config.gemini.language_code.clone(),
            target_chars: config.batching.max_gist_chars,
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }

    fn api_key(&self) -> &SecretString {
        &self.keys[self.active.load(Ordering::Relaxed) % self.keys.len()]
    }

    fn summary_request(&self, batch: &[Message]) -> Result<GenerateContentRequest, ProviderError> {
        let history = serde_json::to_string(batch).map_err(|e| {
            ProviderError::InvalidRequest(format!("failed to serialize messages: {e}"))
        })?;
        Ok(GenerateContentRequest {
            system_instruction: Some(Content::system(summary_instruction(self.target_chars))),
            contents: vec![Content::user(format!(
                "Message history (chronological):\n{history}"
            ))],
            generation_config: None,
        })
    }

    fn speech_request(&self, text: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: None,
            contents: vec![Content::user(text)],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                    language_code: self.language_code.clone(),
                }),
            }),
        }
    }

    async fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let response = self
            .client
            .post(self.url(model))
            .header("x-goog-api-key", self.api_key().expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::DeadlineExceeded
                } else {
                    ProviderError::Provider {
                        message: format!("HTTP request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let err = map_error(status.as_u16(), &error_body);
            tracing::debug!(model, status = status.as_u16(), error = %err, "Gemini request failed");
            return Err(err);
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ProviderError::Deserialization(format!("failed to parse response: {e}")))
    }
}

// GeminiModel intentionally does not derive Debug; the key pool stays out of logs.

impl GistModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn summarize(&self, batch: &[Message]) -> Result<String, ProviderError> {
        let body = self.summary_request(batch)?;
        let response = self.generate(&self.model, &body).await?;
        response.text().ok_or(ProviderError::NoChoices)
    }

    async fn synthesize(&self, text: &str) -> Result<SpeechAudio, ProviderError> {
        let body = self.speech_request(text);
        let response = self.generate(&self.tts_model, &body).await?;
        let inline = response.inline_data().ok_or(ProviderError::NoChoices)?;
        decode_speech(&inline.mime_type, &inline.data)
    }

    fn credential_count(&self) -> usize {
        self.keys.len()
    }

    fn active_credential(&self) -> usize {
        self.active.load(Ordering::Relaxed) % self.keys.len()
    }

    fn select_credential(&self, index: usize) {
        let index = index % self.keys.len();
        self.active.store(index, Ordering::Relaxed);
        tracing::info!(index, pool = self.keys.len(), "Switched Gemini API key");
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn summary_instruction(target_chars: usize) -> String {
    format!(
        "You are given the message history of a chat. Each message carries its text, send \
         time, sender id and service flags (edited, forwarded, reply target).\n\
         Write a SHORT, coherent digest of the conversation in plain prose, at most \
         {target_chars} characters.\n\
         Focus on the main events, decisions, questions and answers. Mention service flags \
         only when they change the meaning.\n\
         Keep a neutral tone so a reader quickly understands what was discussed.\n\
         Reply with the digest only, without preamble or formatting."
    )
}

/// Map a non-2xx status and its body onto a [`ProviderError`].
fn map_error(status: u16, body: &str) -> ProviderError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();
    let message = if error.message.is_empty() {
        body.trim().to_string()
    } else {
        error.message.clone()
    };

    if error.status == "RESOURCE_EXHAUSTED" {
        return ProviderError::ResourceExhausted { message };
    }
    match status {
        401 | 403 => ProviderError::AuthenticationFailed,
        400 => ProviderError::InvalidRequest(message),
        429 | 502 | 503 => ProviderError::Http {
            status,
            message,
            retry_after_ms: error.retry_delay_ms(),
        },
        _ => ProviderError::Http {
            status,
            message,
            retry_after_ms: None,
        },
    }
}

/// Decode base64 PCM and read the sample rate from a mime type such as
/// `audio/L16;codec=pcm;rate=24000`.
fn decode_speech(mime_type: &str, data: &str) -> Result<SpeechAudio, ProviderError> {
    let pcm = STANDARD
        .decode(data)
        .map_err(|e| ProviderError::Deserialization(format!("invalid audio payload: {e}")))?;
    if pcm.is_empty() {
        return Err(ProviderError::NoChoices);
    }
    Ok(SpeechAudio {
        pcm,
        sample_rate: sample_rate(mime_type).unwrap_or(DEFAULT_SAMPLE_RATE),
    })
}

fn sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
