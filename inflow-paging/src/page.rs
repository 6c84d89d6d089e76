//! Page parameters, results, and the remote page loader seam.

use std::future::Future;

use async_trait::async_trait;

use inflow_core::BoxError;

/// Parameters of a remote page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageParams<K> {
    /// Fetch newer items (or the first page when `key` is `None`).
    Refresh {
        /// The refresh cursor from the previous refresh result.
        key: Option<K>,
        /// Requested page size.
        count: usize,
    },
    /// Fetch the next (older) page.
    Next {
        /// The next cursor from the previous page result.
        key: Option<K>,
        /// Requested page size.
        count: usize,
    },
}

impl<K> PageParams<K> {
    /// The cursor of either variant.
    pub fn key(&self) -> Option<&K> {
        match self {
            PageParams::Refresh { key, .. } | PageParams::Next { key, .. } => key.as_ref(),
        }
    }

    /// The requested page size of either variant.
    pub fn count(&self) -> usize {
        match self {
            PageParams::Refresh { count, .. } | PageParams::Next { count, .. } => *count,
        }
    }
}

/// A page returned by the remote loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult<T, K> {
    /// The page items, in display order.
    pub items: Vec<T>,
    /// Cursor for the following page; `None` means no more remote data.
    pub next_key: Option<K>,
    /// Cursor for the next refresh; `None` keeps refreshes at the first
    /// page.
    pub refresh_key: Option<K>,
    /// Forces a full cache replacement when this result is applied to a
    /// refresh.
    pub force_clear_cache_on_refresh: bool,
}

impl<T, K> PageResult<T, K> {
    /// Result with the given items and no cursors.
    pub fn new(items: Vec<T>) -> Self {
        PageResult { items, next_key: None, refresh_key: None, force_clear_cache_on_refresh: false }
    }

    /// Sets the next-page cursor.
    pub fn next_key(mut self, key: impl Into<Option<K>>) -> Self {
        self.next_key = key.into();
        self
    }

    /// Sets the refresh cursor.
    pub fn refresh_key(mut self, key: impl Into<Option<K>>) -> Self {
        self.refresh_key = key.into();
        self
    }

    /// Requests a full cache replacement on refresh.
    pub fn force_clear_cache_on_refresh(mut self) -> Self {
        self.force_clear_cache_on_refresh = true;
        self
    }
}

/// The remote pagination cursors, persisted alongside the cached items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingRemoteState<K> {
    /// Whether the remote has more pages.
    pub has_next: bool,
    /// Cursor for the next page.
    pub next_key: Option<K>,
    /// Cursor for the next refresh.
    pub refresh_key: Option<K>,
}

impl<K> Default for PagingRemoteState<K> {
    /// Before anything was loaded more remote data must be assumed.
    fn default() -> Self {
        PagingRemoteState { has_next: true, next_key: None, refresh_key: None }
    }
}

/// Loads pages from the remote source.
#[async_trait]
pub trait PageLoader<T, K>: Send + Sync {
    /// Loads one page.
    async fn load(&self, params: PageParams<K>) -> Result<PageResult<T, K>, BoxError>;
}

/// Adapter turning an async closure into a [`PageLoader`].
pub struct FnPageLoader<F> {
    load: F,
}

impl<F> FnPageLoader<F> {
    /// Wraps a closure `Fn(PageParams<K>) -> Future<Output = Result<PageResult>>`.
    pub fn new<T, K, Fut>(load: F) -> Self
    where
        F: Fn(PageParams<K>) -> Fut,
        Fut: Future<Output = Result<PageResult<T, K>, BoxError>>,
    {
        FnPageLoader { load }
    }
}

#[async_trait]
impl<T, K, F, Fut> PageLoader<T, K> for FnPageLoader<F>
where
    K: Send + 'static,
    F: Fn(PageParams<K>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PageResult<T, K>, BoxError>> + Send,
{
    async fn load(&self, params: PageParams<K>) -> Result<PageResult<T, K>, BoxError> {
        (self.load)(params).await
    }
}
