//! Core logic for chatgist.
//!
//! This crate defines the ports the rest of the system plugs into
//! (`ChatTransport`, `GistModel`, `AudioTools`) and the pipelines that drive
//! them: batch partitioning, retry with backoff and credential rotation,
//! summarization, audio artifacts, read-state invalidation and the chat
//! cache. Infrastructure implementations live in chatgist-infra.

pub mod audio;
pub mod batch;
pub mod cache;
pub mod context;
pub mod gist;
pub mod llm;
pub mod read_state;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
