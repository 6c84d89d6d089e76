//! Paging cache protocol.
//!
//! A [`PagingCache`] persists the paged item list and the remote cursors
//! between runs. All calls are made by the pager under its own mutex, so
//! implementations get exclusive-access semantics for free; they only have
//! to execute the primitives.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::page::PagingRemoteState;

/// Callback fired when cached data changed behind the pager's back.
pub type InvalidationListener = Arc<dyn Fn() + Send + Sync>;

/// Persistent storage for paged items and remote cursors.
#[async_trait]
pub trait PagingCache<T, K>: Send + Sync {
    /// Reads up to `max_items` items from the front, in display order.
    async fn read(&self, max_items: usize) -> Vec<T>;

    /// Inserts items in front of the cached list.
    async fn prepend(&self, items: Vec<T>);

    /// Appends items behind the cached list.
    async fn append(&self, items: Vec<T>);

    /// Deletes every cached item equal to any of `items`.
    async fn delete(&self, items: Vec<T>);

    /// Deletes all cached items.
    async fn delete_all(&self);

    /// Persists the remote cursors.
    async fn write_state(&self, state: PagingRemoteState<K>);

    /// Reads the persisted remote cursors, if any.
    async fn read_state(&self) -> Option<PagingRemoteState<K>>;

    /// Registers the listener notified when the cache contents changed
    /// outside the pager (external writes, process-level invalidation).
    fn set_invalidation_listener(&self, listener: InvalidationListener);
}

#[async_trait]
impl<T, K, C> PagingCache<T, K> for Arc<C>
where
    T: Send + 'static,
    K: Send + 'static,
    C: PagingCache<T, K> + ?Sized,
{
    async fn read(&self, max_items: usize) -> Vec<T> {
        self.as_ref().read(max_items).await
    }

    async fn prepend(&self, items: Vec<T>) {
        self.as_ref().prepend(items).await;
    }

    async fn append(&self, items: Vec<T>) {
        self.as_ref().append(items).await;
    }

    async fn delete(&self, items: Vec<T>) {
        self.as_ref().delete(items).await;
    }

    async fn delete_all(&self) {
        self.as_ref().delete_all().await;
    }

    async fn write_state(&self, state: PagingRemoteState<K>) {
        self.as_ref().write_state(state).await;
    }

    async fn read_state(&self) -> Option<PagingRemoteState<K>> {
        self.as_ref().read_state().await
    }

    fn set_invalidation_listener(&self, listener: InvalidationListener) {
        self.as_ref().set_invalidation_listener(listener);
    }
}

struct MemoryPagingState<T, K> {
    items: Vec<T>,
    remote: Option<PagingRemoteState<K>>,
    listener: Option<InvalidationListener>,
}

/// In-memory [`PagingCache`] reference implementation.
///
/// Item equality drives `delete`. Mostly useful in tests and as a template
/// for real storage adapters.
pub struct MemoryPagingCache<T, K> {
    state: Mutex<MemoryPagingState<T, K>>,
}

impl<T, K> MemoryPagingCache<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    /// Empty cache.
    pub fn new() -> Self {
        MemoryPagingCache {
            state: Mutex::new(MemoryPagingState { items: Vec::new(), remote: None, listener: None }),
        }
    }

    /// Cache pre-populated with items and cursors.
    pub fn with_contents(items: Vec<T>, remote: Option<PagingRemoteState<K>>) -> Self {
        MemoryPagingCache {
            state: Mutex::new(MemoryPagingState { items, remote, listener: None }),
        }
    }

    /// Replaces the cached items directly and fires the invalidation
    /// listener, simulating an external writer.
    pub fn invalidate_with(&self, items: Vec<T>) {
        let listener = {
            let mut state = self.lock();
            state.items = items;
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Snapshot of the cached items.
    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryPagingState<T, K>> {
        self.state.lock().expect("paging cache lock poisoned")
    }
}

impl<T, K> Default for MemoryPagingCache<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        MemoryPagingCache::new()
    }
}

#[async_trait]
impl<T, K> PagingCache<T, K> for MemoryPagingCache<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    async fn read(&self, max_items: usize) -> Vec<T> {
        let state = self.lock();
        state.items.iter().take(max_items).cloned().collect()
    }

    async fn prepend(&self, items: Vec<T>) {
        let mut state = self.lock();
        let mut merged = items;
        merged.append(&mut state.items);
        state.items = merged;
    }

    async fn append(&self, mut items: Vec<T>) {
        self.lock().items.append(&mut items);
    }

    async fn delete(&self, items: Vec<T>) {
        self.lock().items.retain(|existing| !items.contains(existing));
    }

    async fn delete_all(&self) {
        self.lock().items.clear();
    }

    async fn write_state(&self, state: PagingRemoteState<K>) {
        self.lock().remote = Some(state);
    }

    async fn read_state(&self) -> Option<PagingRemoteState<K>> {
        self.lock().remote.clone()
    }

    fn set_invalidation_listener(&self, listener: InvalidationListener) {
        self.lock().listener = Some(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn primitives_keep_display_order() {
        let cache: MemoryPagingCache<i32, u8> = MemoryPagingCache::new();
        cache.append(vec![3, 4]).await;
        cache.prepend(vec![1, 2]).await;
        assert_eq!(cache.read(10).await, vec![1, 2, 3, 4]);
        assert_eq!(cache.read(3).await, vec![1, 2, 3]);

        cache.delete(vec![2, 4]).await;
        assert_eq!(cache.read(10).await, vec![1, 3]);

        cache.delete_all().await;
        assert!(cache.read(10).await.is_empty());
    }

    #[tokio::test]
    async fn state_round_trips() {
        let cache: MemoryPagingCache<i32, u8> = MemoryPagingCache::new();
        assert_eq!(cache.read_state().await, None);

        let remote = PagingRemoteState { has_next: false, next_key: Some(7), refresh_key: None };
        cache.write_state(remote.clone()).await;
        assert_eq!(cache.read_state().await, Some(remote));
    }
}
