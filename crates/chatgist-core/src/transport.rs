//! ChatTransport trait: the remote chat service.
//!
//! Uses RPITIT like the model trait. Implementations live in chatgist-infra
//! (e.g. `JsonExportTransport`); tests use in-memory fakes.

use std::future::Future;

use chatgist_types::chat::{Chat, FetchedMessages, PeerRef, ReadTarget};
use chatgist_types::error::TransportError;

pub trait ChatTransport: Send + Sync {
    /// All chats with their unread counters. Messages are not populated.
    fn list_chats(&self) -> impl Future<Output = Result<Vec<Chat>, TransportError>> + Send;

    /// Unread messages after the peer's read marker, ascending by id.
    fn fetch_unread_messages(
        &self,
        peer: &PeerRef,
    ) -> impl Future<Output = Result<FetchedMessages, TransportError>> + Send;

    /// Persist a read marker on the remote side.
    fn mark_read(
        &self,
        peer: &PeerRef,
        target: ReadTarget,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
