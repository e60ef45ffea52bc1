//! Shared domain types for chatgist.
//!
//! This crate contains the domain model used across the workspace: chats,
//! messages, batch gists, audio artifacts, configuration and the error
//! taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
