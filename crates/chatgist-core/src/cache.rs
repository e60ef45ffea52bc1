//! In-memory chat cache.
//!
//! Chats live in a `DashMap` of per-chat slots. Each slot guards its [`Chat`]
//! with an async `RwLock` for short read/modify commands. Long-running work
//! (summarize, audio, mark-read) goes through a [`ChatLease`], which holds
//! the chat's operation `Mutex`. Operation locks are keyed by chat id, so
//! they outlive the slots a refresh swaps out.
//!
//! The chat listing is refreshed from the transport when its TTL lapses.
//! A refresh replaces every idle slot; a chat with an operation in flight
//! keeps its slot until a later refresh. Favorite flags are kept beside the
//! map and re-applied so they survive.

use std::collections::HashSet;
use std::future::Future;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatgist_types::chat::{Chat, ChatId, ChatOverview};
use chatgist_types::error::GistError;
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// ChatSlot
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ChatSlot {
    chat: RwLock<Chat>,
}

impl ChatSlot {
    pub fn new(chat: Chat) -> Self {
        Self {
            chat: RwLock::new(chat),
        }
    }

    pub async fn snapshot(&self) -> Chat {
        self.chat.read().await.clone()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&Chat) -> R) -> R {
        f(&*self.chat.read().await)
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut Chat) -> R) -> R {
        f(&mut *self.chat.write().await)
    }
}

/// Exclusive right to run a long operation on one chat.
///
/// While a lease is alive no other lease for the same chat id is handed out
/// and refreshes leave the leased slot in place.
#[derive(Debug)]
pub struct ChatLease {
    slot: Arc<ChatSlot>,
    _operation: OwnedMutexGuard<()>,
}

impl Deref for ChatLease {
    type Target = ChatSlot;

    fn deref(&self) -> &ChatSlot {
        &self.slot
    }
}

// ---------------------------------------------------------------------------
// ChatCache
// ---------------------------------------------------------------------------

/// When a listing refresh should hit the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Only when the TTL has lapsed (or nothing was loaded yet).
    IfStale,
    /// Only when nothing was loaded yet.
    IfEmpty,
}

#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub refreshed: bool,
    /// Artifacts owned by chats the refresh discarded.
    pub orphaned: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct ChatCache {
    chats: DashMap<ChatId, Arc<ChatSlot>>,
    operations: DashMap<ChatId, Arc<Mutex<()>>>,
    favorites: DashSet<ChatId>,
    refreshed_at: Mutex<Option<Instant>>,
    ttl: Duration,
}

impl ChatCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            chats: DashMap::new(),
            operations: DashMap::new(),
            favorites: DashSet::new(),
            refreshed_at: Mutex::new(None),
            ttl,
        }
    }

    /// Seed the favorite set; applied to chats as they are loaded.
    pub fn with_favorites(self, favorites: impl IntoIterator<Item = ChatId>) -> Self {
        for id in favorites {
            self.favorites.insert(id);
        }
        self
    }

    /// Reload the listing through `fetch` if `policy` says so.
    ///
    /// Concurrent callers wait for one refresh instead of issuing their own.
    pub async fn refresh<F, Fut, E>(
        &self,
        policy: RefreshPolicy,
        fetch: F,
    ) -> Result<RefreshOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Chat>, E>>,
    {
        let mut refreshed_at = self.refreshed_at.lock().await;
        let due = match (*refreshed_at, policy) {
            (None, _) => true,
            (Some(at), RefreshPolicy::IfStale) => at.elapsed() >= self.ttl,
            (Some(_), RefreshPolicy::IfEmpty) => false,
        };
        if !due {
            return Ok(RefreshOutcome::default());
        }

        let fresh = fetch().await?;

        let old_ids: Vec<ChatId> = self.chats.iter().map(|e| *e.key()).collect();
        let mut held = Vec::with_capacity(old_ids.len());
        let mut retired = Vec::with_capacity(old_ids.len());
        let mut busy = HashSet::new();
        for id in old_ids {
            match self.operation_lock(id).try_lock_owned() {
                Ok(guard) => {
                    if let Some((_, slot)) = self.chats.remove(&id) {
                        retired.push(slot);
                    }
                    held.push(guard);
                }
                Err(_) => {
                    busy.insert(id);
                }
            }
        }
        for chat in fresh {
            if !busy.contains(&chat.id) {
                self.insert(chat);
            }
        }
        self.operations.retain(|id, _| self.chats.contains_key(id));
        drop(held);
        *refreshed_at = Some(Instant::now());

        let mut orphaned = Vec::new();
        for slot in retired {
            orphaned.extend(slot.update(Chat::take_artifacts).await);
        }
        tracing::debug!(
            chats = self.chats.len(),
            kept_busy = busy.len(),
            orphaned = orphaned.len(),
            "Chat list refreshed"
        );

        Ok(RefreshOutcome {
            refreshed: true,
            orphaned,
        })
    }

    pub fn insert(&self, mut chat: Chat) -> Arc<ChatSlot> {
        let id = chat.id;
        chat.is_favorite = self.favorites.contains(&id);
        let slot = Arc::new(ChatSlot::new(chat));
        self.chats.insert(id, Arc::clone(&slot));
        slot
    }

    fn operation_lock(&self, id: ChatId) -> Arc<Mutex<()>> {
        Arc::clone(self.operations.entry(id).or_default().value())
    }

    /// Wait for exclusive access to chat `id` and return its current slot.
    pub async fn lease(&self, id: ChatId) -> Result<ChatLease, GistError> {
        self.get(id)?;
        let operation = self.operation_lock(id).lock_owned().await;
        let slot = self.get(id)?;
        Ok(ChatLease {
            slot,
            _operation: operation,
        })
    }

    pub fn get(&self, id: ChatId) -> Result<Arc<ChatSlot>, GistError> {
        self.chats
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(GistError::ChatNotFound(id))
    }

    /// Every cached chat, most unread first.
    pub async fn list(&self) -> Vec<ChatOverview> {
        let slots: Vec<Arc<ChatSlot>> = self.chats.iter().map(|e| Arc::clone(e.value())).collect();
        let mut rows = Vec::with_capacity(slots.len());
        for slot in slots {
            rows.push(slot.read(Chat::overview).await);
        }
        rows.sort_by(|a, b| b.unread_count.cmp(&a.unread_count).then(a.id.cmp(&b.id)));
        rows
    }

    /// Chats with at least `threshold` unread messages.
    pub async fn unread(&self, threshold: u32) -> Vec<ChatOverview> {
        let mut rows = self.list().await;
        rows.retain(|c| c.unread_count > 0 && c.unread_count >= threshold);
        rows
    }

    pub async fn favorites(&self) -> Vec<ChatOverview> {
        let mut rows = self.list().await;
        rows.retain(|c| c.is_favorite);
        rows
    }

    /// Flip the favorite flag and return the new value.
    pub async fn toggle_favorite(&self, id: ChatId) -> Result<bool, GistError> {
        let slot = self.get(id)?;
        let now_favorite = if self.favorites.remove(&id).is_some() {
            false
        } else {
            self.favorites.insert(id);
            true
        };
        slot.update(|chat| chat.is_favorite = now_favorite).await;
        Ok(now_favorite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgist_types::chat::PeerKind;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chats() -> Vec<Chat> {
        vec![
            Chat::new(1, "quiet", PeerKind::User, 0, 0),
            Chat::new(2, "busy", PeerKind::Group, 40, 0),
            Chat::new(3, "news", PeerKind::Channel, 7, 0),
        ]
    }

    async fn load(cache: &ChatCache, calls: &AtomicUsize, policy: RefreshPolicy) -> bool {
        cache
            .refresh(policy, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(chats())
            })
            .await
            .unwrap()
            .refreshed
    }

    #[tokio::test(start_paused = true)]
    async fn listing_respects_ttl() {
        let cache = ChatCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        assert!(load(&cache, &calls, RefreshPolicy::IfStale).await);
        assert!(!load(&cache, &calls, RefreshPolicy::IfStale).await);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!load(&cache, &calls, RefreshPolicy::IfEmpty).await);
        assert!(load(&cache, &calls, RefreshPolicy::IfStale).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn list_is_sorted_by_unread_descending() {
        let cache = ChatCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        load(&cache, &calls, RefreshPolicy::IfStale).await;

        let ids: Vec<_> = cache.list().await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        let unread: Vec<_> = cache.unread(10).await.iter().map(|c| c.id).collect();
        assert_eq!(unread, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn favorites_survive_refresh() {
        let cache = ChatCache::new(Duration::from_secs(1));
        let calls = AtomicUsize::new(0);
        load(&cache, &calls, RefreshPolicy::IfStale).await;

        assert!(cache.toggle_favorite(3).await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(load(&cache, &calls, RefreshPolicy::IfStale).await);

        let favs: Vec<_> = cache.favorites().await.iter().map(|c| c.id).collect();
        assert_eq!(favs, vec![3]);
        assert!(cache.get(3).unwrap().read(|c| c.is_favorite).await);

        assert!(!cache.toggle_favorite(3).await.unwrap());
        assert!(cache.favorites().await.is_empty());
    }

    #[tokio::test]
    async fn seeded_favorites_apply_on_load() {
        let cache = ChatCache::new(Duration::from_secs(60)).with_favorites([1, 77]);
        let calls = AtomicUsize::new(0);
        load(&cache, &calls, RefreshPolicy::IfEmpty).await;

        let favs: Vec<_> = cache.favorites().await.iter().map(|c| c.id).collect();
        assert_eq!(favs, vec![1]);
    }

    #[tokio::test]
    async fn missing_chat_is_not_found() {
        let cache = ChatCache::new(Duration::from_secs(1));
        assert!(matches!(cache.get(99), Err(GistError::ChatNotFound(99))));
        assert!(cache.toggle_favorite(99).await.is_err());
    }

    #[tokio::test]
    async fn slot_update_is_visible_to_snapshots() {
        let cache = ChatCache::new(Duration::from_secs(1));
        let slot = cache.insert(Chat::new(5, "x", PeerKind::User, 3, 0));
        slot.update(|c| c.unread_count = 1).await;
        assert_eq!(cache.get(5).unwrap().snapshot().await.unread_count, 1);
    }

    #[tokio::test]
    async fn leases_on_one_chat_are_exclusive() {
        let cache = ChatCache::new(Duration::from_secs(60));
        cache.insert(Chat::new(5, "x", PeerKind::User, 3, 0));

        let first = cache.lease(5).await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(20), cache.lease(5)).await;
        assert!(waiting.is_err());

        drop(first);
        assert!(cache.lease(5).await.is_ok());
        assert!(matches!(cache.lease(6).await, Err(GistError::ChatNotFound(6))));
    }

    #[tokio::test]
    async fn refresh_keeps_leased_slot() {
        let cache = ChatCache::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);
        load(&cache, &calls, RefreshPolicy::IfStale).await;

        let lease = cache.lease(2).await.unwrap();
        lease.update(|c| c.unread_count = 1).await;
        let idle = cache.get(3).unwrap();

        assert!(load(&cache, &calls, RefreshPolicy::IfStale).await);
        assert!(Arc::ptr_eq(&cache.get(2).unwrap(), &lease.slot));
        assert!(!Arc::ptr_eq(&cache.get(3).unwrap(), &idle));
        drop(lease);

        assert_eq!(cache.get(2).unwrap().read(|c| c.unread_count).await, 1);
        assert!(load(&cache, &calls, RefreshPolicy::IfStale).await);
        assert_eq!(cache.get(2).unwrap().read(|c| c.unread_count).await, 40);
    }
}
