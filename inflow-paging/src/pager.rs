//! The pager.
//!
//! Coordinates three parties under one mutex: the in-memory item list
//! shown to observers, an optional persistent [`PagingCache`], and an
//! optional remote [`PageLoader`]. Refresh and load-next never overlap;
//! every cache mutation mirrors the local one while the mutex is held.
//!
//! A full replacement bumps an atomic generation counter. Queued
//! refresh/load-next calls capture the generation before waiting for the
//! mutex and are dropped when it moved on, so an action premised on
//! replaced contents never runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::stream::{self, BoxStream, StreamExt};
use smol_str::SmolStr;
use tokio::sync::{Mutex, OnceCell, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use inflow_core::BoxError;

use crate::cache::PagingCache;
use crate::identity::IdentityProvider;
use crate::merge::MergeStrategy;
use crate::page::{PageLoader, PageParams, PageResult, PagingRemoteState};
use crate::paged::Paged;

struct LocalState<T, K> {
    items: Vec<T>,
    /// Whether the cache holds more items than are currently shown.
    local_has_more: bool,
    remote: PagingRemoteState<K>,
}

struct PagerInner<T, K> {
    loader: Option<Arc<dyn PageLoader<T, K>>>,
    cache: Option<Arc<dyn PagingCache<T, K>>>,
    identity: Option<Arc<dyn IdentityProvider<T>>>,
    merger: Option<Arc<dyn MergeStrategy<T, K>>>,
    page_size: usize,
    state: Mutex<LocalState<T, K>>,
    display: watch::Sender<Paged<T>>,
    generation: AtomicU64,
    init: OnceCell<()>,
    log_id: SmolStr,
}

/// Coordinator of local paged display, persistent cache, and remote pages.
pub struct Pager<T, K> {
    inner: Arc<PagerInner<T, K>>,
}

impl<T, K> Clone for Pager<T, K> {
    fn clone(&self) -> Self {
        Pager { inner: Arc::clone(&self.inner) }
    }
}

/// Configures a [`Pager`].
pub struct PagerBuilder<T, K> {
    loader: Option<Arc<dyn PageLoader<T, K>>>,
    cache: Option<Arc<dyn PagingCache<T, K>>>,
    identity: Option<Arc<dyn IdentityProvider<T>>>,
    merger: Option<Arc<dyn MergeStrategy<T, K>>>,
    page_size: usize,
    log_id: SmolStr,
}

impl<T, K> PagerBuilder<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    /// Page size requested from the cache and the loader. Default 20.
    ///
    /// # Panics
    ///
    /// Panics if `page_size == 0`.
    pub fn page_size(mut self, page_size: usize) -> Self {
        assert!(page_size >= 1, "page size must be at least 1");
        self.page_size = page_size;
        self
    }

    /// The remote page loader. Optional: a loader-less pager pages through
    /// its cache only.
    pub fn loader(mut self, loader: impl PageLoader<T, K> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// The persistent cache. Optional: a cache-less pager keeps pages in
    /// memory only.
    pub fn cache(mut self, cache: impl PagingCache<T, K> + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Identity provider for deduplicating overlapping pages. Required
    /// when a merge strategy is set.
    pub fn identity(mut self, identity: impl IdentityProvider<T> + 'static) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Merge strategy placing fresh pages against the local list.
    pub fn merger(mut self, merger: impl MergeStrategy<T, K> + 'static) -> Self {
        self.merger = Some(Arc::new(merger));
        self
    }

    /// Log id for this pager's events.
    pub fn log_id(mut self, log_id: impl AsRef<str>) -> Self {
        self.log_id = SmolStr::new(log_id.as_ref());
        self
    }

    /// Builds the pager.
    ///
    /// # Panics
    ///
    /// Panics if a merge strategy was configured without an identity
    /// provider: merging needs to remove overlapping items and cannot
    /// without an identity.
    pub fn build(self) -> Pager<T, K> {
        assert!(
            self.merger.is_none() || self.identity.is_some(),
            "a merge strategy requires an identity provider"
        );
        let (display, _rx) = watch::channel(Paged::empty());
        Pager {
            inner: Arc::new(PagerInner {
                loader: self.loader,
                cache: self.cache,
                identity: self.identity,
                merger: self.merger,
                page_size: self.page_size,
                state: Mutex::new(LocalState {
                    items: Vec::new(),
                    local_has_more: false,
                    remote: PagingRemoteState::default(),
                }),
                display,
                generation: AtomicU64::new(0),
                init: OnceCell::new(),
                log_id: self.log_id,
            }),
        }
    }
}

impl<T, K> Pager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    /// Starts building a pager.
    pub fn builder() -> PagerBuilder<T, K> {
        PagerBuilder {
            loader: None,
            cache: None,
            identity: None,
            merger: None,
            page_size: 20,
            log_id: SmolStr::new_static("NO_ID"),
        }
    }

    /// The current display stream: the cache-backed contents first (read
    /// lazily on first use), then every later change.
    pub fn display(&self) -> BoxStream<'static, Paged<T>> {
        let pager = self.clone();
        Box::pin(
            stream::once(async move {
                pager.ensure_initialized().await;
                WatchStream::new(pager.inner.display.subscribe())
            })
            .flatten(),
        )
    }

    /// The current snapshot without subscribing.
    pub fn current(&self) -> Paged<T> {
        self.inner.display.borrow().clone()
    }

    /// Loads newer items (or the first page) and prepends them.
    ///
    /// Returns the updated snapshot. Serialized against `load_next`; a
    /// call queued before a full replacement is dropped unchanged.
    pub async fn refresh(&self) -> Result<Paged<T>, BoxError> {
        self.ensure_initialized().await;
        let queued_at = self.inner.generation.load(Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;
        if self.inner.generation.load(Ordering::SeqCst) != queued_at {
            debug!(id = %self.inner.log_id, "dropping refresh queued before a replace");
            return Ok(snapshot(&state));
        }

        let Some(loader) = &self.inner.loader else {
            self.reload_from_cache(&mut state).await;
            return Ok(self.push_display(&state));
        };

        let requested_key = state.remote.refresh_key.clone();
        let result = loader
            .load(PageParams::Refresh { key: requested_key.clone(), count: self.inner.page_size })
            .await?;
        self.apply_refresh(&mut state, requested_key, result).await;
        Ok(self.push_display(&state))
    }

    /// Extends the display with more items: from the local cache while it
    /// has them, from the remote loader afterwards.
    pub async fn load_next(&self) -> Result<Paged<T>, BoxError> {
        self.ensure_initialized().await;
        let queued_at = self.inner.generation.load(Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;
        if self.inner.generation.load(Ordering::SeqCst) != queued_at {
            debug!(id = %self.inner.log_id, "dropping load-next queued before a replace");
            return Ok(snapshot(&state));
        }

        if state.local_has_more && self.inner.cache.is_some() {
            let wanted = state.items.len() + self.inner.page_size;
            self.read_into(&mut state, wanted).await;
            return Ok(self.push_display(&state));
        }

        let (Some(loader), true) = (&self.inner.loader, state.remote.has_next) else {
            return Ok(snapshot(&state));
        };

        let requested_key = state.remote.next_key.clone();
        let result = loader
            .load(PageParams::Next { key: requested_key.clone(), count: self.inner.page_size })
            .await?;
        self.apply_append(&mut state, requested_key, result).await;
        Ok(self.push_display(&state))
    }

    /// Replaces everything with `result` and drops queued actions.
    pub async fn replace(&self, result: PageResult<T, K>) -> Paged<T> {
        self.ensure_initialized().await;
        let mut state = self.inner.state.lock().await;
        self.replace_locked(&mut state, result).await;
        self.push_display(&state)
    }

    async fn ensure_initialized(&self) {
        self.inner
            .init
            .get_or_init(|| async {
                let Some(cache) = self.inner.cache.clone() else { return };

                {
                    let mut state = self.inner.state.lock().await;
                    self.read_into(&mut state, self.inner.page_size).await;
                    if let Some(remote) = cache.read_state().await {
                        state.remote = remote;
                    }
                    self.push_display(&state);
                }

                // Route cache invalidations through a channel; the watcher
                // task holds only a weak handle so an abandoned pager can
                // shut down.
                let (tx, mut rx) = mpsc::unbounded_channel();
                cache.set_invalidation_listener(Arc::new(move || {
                    let _ = tx.send(());
                }));
                let weak = Arc::downgrade(&self.inner);
                tokio::spawn(async move {
                    while rx.recv().await.is_some() {
                        let Some(inner) = weak.upgrade() else { break };
                        Pager { inner }.handle_invalidation().await;
                    }
                });
            })
            .await;
    }

    /// Re-reads cache contents and cursors after an external change.
    async fn handle_invalidation(&self) {
        let Some(cache) = &self.inner.cache else { return };
        let mut state = self.inner.state.lock().await;
        let wanted = state.items.len().max(self.inner.page_size);
        self.read_into(&mut state, wanted).await;
        if let Some(remote) = cache.read_state().await {
            state.remote = remote;
        }
        debug!(id = %self.inner.log_id, items = state.items.len(), "reloaded after cache invalidation");
        self.push_display(&state);
    }

    /// Reads up to `wanted` items from the cache into the local list,
    /// probing one further item to learn whether the cache has more.
    async fn read_into(&self, state: &mut LocalState<T, K>, wanted: usize) {
        let Some(cache) = &self.inner.cache else { return };
        let mut read = cache.read(wanted + 1).await;
        state.local_has_more = read.len() > wanted;
        read.truncate(wanted);
        state.items = read;
    }

    async fn reload_from_cache(&self, state: &mut LocalState<T, K>) {
        let wanted = state.items.len().max(self.inner.page_size);
        self.read_into(state, wanted).await;
    }

    async fn apply_refresh(
        &self,
        state: &mut LocalState<T, K>,
        requested_key: Option<K>,
        result: PageResult<T, K>,
    ) {
        if result.force_clear_cache_on_refresh {
            return self.replace_locked(state, result).await;
        }

        let Some(merger) = &self.inner.merger else {
            if requested_key.is_none() {
                return self.replace_locked(state, result).await;
            }
            // Keyed refresh without a merger: prepend as-is.
            if let Some(cache) = &self.inner.cache {
                cache.prepend(result.items.clone()).await;
            }
            let mut items = result.items;
            items.append(&mut state.items);
            state.items = items;
            state.remote.refresh_key = result.refresh_key;
            self.write_state(state).await;
            return;
        };

        let index =
            merger.find_prepend_index(&result.items, &state.items, requested_key.as_ref());
        if index < 0 {
            return self.replace_locked(state, result).await;
        }

        let boundary = (index as usize).min(state.items.len());
        let superseded: Vec<T> = state.items.drain(..boundary).collect();

        // Dedupe the fresh items and the superseded prefix out of the
        // remainder.
        let identity = self.inner.identity.as_ref().expect("identity provider checked at build");
        let mut reference = result.items.clone();
        reference.extend(superseded.iter().cloned());
        let remainder = identity.delete(std::mem::take(&mut state.items), &reference);

        if let Some(cache) = &self.inner.cache {
            cache.delete(reference).await;
            cache.prepend(result.items.clone()).await;
        }

        state.items = result.items;
        state.items.extend(remainder);
        // Keep the pagination tail, adopt the new refresh cursor.
        state.remote.refresh_key = result.refresh_key;
        self.write_state(state).await;
    }

    async fn apply_append(
        &self,
        state: &mut LocalState<T, K>,
        requested_key: Option<K>,
        result: PageResult<T, K>,
    ) {
        let Some(merger) = &self.inner.merger else {
            if let Some(cache) = &self.inner.cache {
                cache.append(result.items.clone()).await;
            }
            state.items.extend(result.items);
            state.remote.has_next = result.next_key.is_some();
            state.remote.next_key = result.next_key;
            self.write_state(state).await;
            return;
        };

        let index = merger.find_append_index(&state.items, &result.items, requested_key.as_ref());
        if index < 0 {
            return self.replace_locked(state, result).await;
        }

        let boundary = (index as usize).min(state.items.len());
        let superseded: Vec<T> = state.items.drain(boundary..).collect();

        let identity = self.inner.identity.as_ref().expect("identity provider checked at build");
        let mut reference = result.items.clone();
        reference.extend(superseded.iter().cloned());
        let remainder = identity.delete(std::mem::take(&mut state.items), &result.items);

        if let Some(cache) = &self.inner.cache {
            cache.delete(reference).await;
            cache.append(result.items.clone()).await;
        }

        state.items = remainder;
        state.items.extend(result.items);
        state.remote.has_next = result.next_key.is_some();
        state.remote.next_key = result.next_key;
        self.write_state(state).await;
    }

    async fn replace_locked(&self, state: &mut LocalState<T, K>, result: PageResult<T, K>) {
        if let Some(cache) = &self.inner.cache {
            cache.delete_all().await;
            cache.append(result.items.clone()).await;
        }
        state.items = result.items;
        state.local_has_more = false;
        state.remote = PagingRemoteState {
            has_next: result.next_key.is_some(),
            next_key: result.next_key,
            refresh_key: result.refresh_key,
        };
        self.write_state(state).await;
        self.skip_pending_actions();
    }

    async fn write_state(&self, state: &LocalState<T, K>) {
        if let Some(cache) = &self.inner.cache {
            cache.write_state(state.remote.clone()).await;
        }
    }

    fn push_display(&self, state: &LocalState<T, K>) -> Paged<T> {
        let paged = snapshot(state);
        self.inner.display.send_replace(paged.clone());
        paged
    }

    /// Invalidates queued-but-not-started refresh/load-next calls.
    fn skip_pending_actions(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(id = %self.inner.log_id, generation, "cache replaced, dropping pending actions");
    }
}

fn snapshot<T, K>(state: &LocalState<T, K>) -> Paged<T>
where
    T: Clone,
{
    Paged::new(state.items.clone(), state.local_has_more || state.remote.has_next)
}
