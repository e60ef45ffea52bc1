//! Infrastructure layer for chatgist.
//!
//! Contains implementations of the traits defined in `chatgist-core`:
//! the Gemini model adapter, the ffmpeg audio toolchain, the JSON chat export
//! transport, and the configuration loader.

pub mod audio;
pub mod config;
pub mod llm;
pub mod transport;
