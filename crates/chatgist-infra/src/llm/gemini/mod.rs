//! Google Gemini model adapter.
//!
//! This module provides the [`GeminiModel`] which implements the
//! [`GistModel`](chatgist_core::llm::provider::GistModel) trait over the
//! Gemini REST API: batch summaries through `generateContent` and speech
//! through a TTS model with an audio response modality.

pub mod client;
pub mod types;

pub use client::GeminiModel;
