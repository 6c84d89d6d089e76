//! Builder wiring a [`Pager`] into an `Inflow<Paged<T>>`.
//!
//! The pager plugs into the core runtime as both cache and loaders: its
//! display stream is the cache source (the pager persists its own
//! results, so no cache writer is configured), `refresh` backs the
//! refresh loader, and `load_next` backs the load-next loader. The
//! resulting inflow shares, coalesces, schedules, and reports state like
//! any other.

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

use inflow::{Inflow, InflowSettings};
use inflow_core::{
    BoxError, CacheSource, CacheStream, Connectivity, Expiration, Loader, Never, ProgressTracker,
};

use crate::cache::PagingCache;
use crate::identity::{IdentityProvider, KeyIdentity};
use crate::merge::{MergeByKeys, MergeStrategy, MergeWithComparator};
use crate::page::PageLoader;
use crate::paged::Paged;
use crate::pager::{Pager, PagerBuilder};

/// Configures an `Inflow<Paged<T>>`.
pub struct PagedInflowBuilder<T, K> {
    pager: PagerBuilder<T, K>,
    expiration: Option<Box<dyn Expiration<Paged<T>>>>,
    connectivity: Option<Box<dyn Connectivity>>,
    settings: InflowSettings,
    scope: CancellationToken,
    log_id: SmolStr,
}

impl<T, K> PagedInflowBuilder<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    /// Starts building a paged inflow.
    pub fn new() -> Self {
        PagedInflowBuilder {
            pager: Pager::builder(),
            expiration: None,
            connectivity: None,
            settings: InflowSettings::default(),
            scope: CancellationToken::new(),
            log_id: SmolStr::new_static("NO_ID"),
        }
    }

    /// Page size requested from the cache and the loader. Default 20.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.pager = self.pager.page_size(page_size);
        self
    }

    /// The remote page loader.
    pub fn loader(mut self, loader: impl PageLoader<T, K> + 'static) -> Self {
        self.pager = self.pager.loader(loader);
        self
    }

    /// The persistent paging cache.
    pub fn cache(mut self, cache: impl PagingCache<T, K> + 'static) -> Self {
        self.pager = self.pager.cache(cache);
        self
    }

    /// Identity provider for page deduplication.
    pub fn identity(mut self, identity: impl IdentityProvider<T> + 'static) -> Self {
        self.pager = self.pager.identity(identity);
        self
    }

    /// Item identity by an extracted key.
    pub fn identity_by<Id>(self, key: impl Fn(&T) -> Id + Send + Sync + 'static) -> Self
    where
        Id: PartialEq,
    {
        self.identity(KeyIdentity::new(key))
    }

    /// Merge strategy placing fresh pages against the local list.
    pub fn merger(mut self, merger: impl MergeStrategy<T, K> + 'static) -> Self {
        self.pager = self.pager.merger(merger);
        self
    }

    /// Ordering-aware merging by an item comparator.
    pub fn merge_ordered(
        self,
        comparator: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
        unique: bool,
    ) -> Self {
        self.merger(MergeWithComparator::new(comparator, unique))
    }

    /// Ordering-aware merging by the extracted cursor key.
    ///
    /// Non-unique keys are supported under the loader contract documented
    /// on [`MergeByKeys`].
    pub fn merge_by_key(self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self
    where
        K: Ord,
    {
        self.merger(MergeByKeys::new(key, |left: &K, right: &K| left.cmp(right)))
    }

    /// Expiration policy over the paged snapshot. Default: [`Never`]
    /// (refreshes are explicit).
    ///
    /// The policy must accept every loader result as non-expired, or the
    /// refresh contract assertion fires.
    pub fn expiration(mut self, policy: impl Expiration<Paged<T>> + 'static) -> Self {
        self.expiration = Some(Box::new(policy));
        self
    }

    /// Connectivity provider for retrying failed refreshes.
    pub fn connectivity(mut self, connectivity: impl Connectivity + 'static) -> Self {
        self.connectivity = Some(Box::new(connectivity));
        self
    }

    /// Quiet period the display stays subscribed after the last observer.
    pub fn keep_cache_subscribed_timeout(mut self, timeout: Duration) -> Self {
        self.settings.keep_subscribed_timeout = timeout;
        self
    }

    /// Delay before a failed refresh is retried. Must be positive.
    pub fn retry_time(mut self, retry: Duration) -> Self {
        self.settings.retry_time = retry;
        self
    }

    /// Cancellation scope for all background work.
    pub fn scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    /// Log id attached to pager and inflow events.
    pub fn log_id(mut self, log_id: impl AsRef<str>) -> Self {
        self.log_id = SmolStr::new(log_id.as_ref());
        self
    }

    /// Builds the paged inflow.
    pub fn build(self) -> Inflow<Paged<T>> {
        self.build_with_pager().0
    }

    /// Builds the paged inflow and returns the pager alongside, for
    /// direct `replace` / `display` access.
    pub fn build_with_pager(self) -> (Inflow<Paged<T>>, Pager<T, K>) {
        let pager = self.pager.log_id(self.log_id.as_str()).build();

        let mut builder = Inflow::builder()
            .data_stream(
                PagerSource { pager: pager.clone() },
                PagerRefreshLoader { pager: pager.clone() },
            )
            .load_next(PagerNextLoader { pager: pager.clone() })
            .settings(self.settings)
            .scope(self.scope)
            .log_id(self.log_id.as_str());

        builder = match self.expiration {
            Some(policy) => builder.expiration(policy),
            None => builder.expiration(Never),
        };
        if let Some(connectivity) = self.connectivity {
            builder = builder.connectivity(connectivity);
        }

        (builder.build(), pager)
    }
}

impl<T, K> Default for PagedInflowBuilder<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        PagedInflowBuilder::new()
    }
}

struct PagerSource<T, K> {
    pager: Pager<T, K>,
}

impl<T, K> CacheSource<Paged<T>> for PagerSource<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    fn stream(&self) -> CacheStream<Paged<T>> {
        self.pager.display().map(Ok).boxed()
    }
}

struct PagerRefreshLoader<T, K> {
    pager: Pager<T, K>,
}

#[async_trait]
impl<T, K> Loader<Paged<T>> for PagerRefreshLoader<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    async fn load(&self, _tracker: ProgressTracker) -> Result<Paged<T>, BoxError> {
        self.pager.refresh().await
    }
}

struct PagerNextLoader<T, K> {
    pager: Pager<T, K>,
}

#[async_trait]
impl<T, K> Loader<Paged<T>> for PagerNextLoader<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    async fn load(&self, _tracker: ProgressTracker) -> Result<Paged<T>, BoxError> {
        self.pager.load_next().await
    }
}
