//! Builder for [`Inflow`].
//!
//! Misconfiguration (missing `data`, repeated `data`, invalid numeric
//! ranges) is a programmer error and panics synchronously at build time.

use std::sync::Arc;
use std::time::Duration;

use smol_str::SmolStr;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use inflow_core::{
    AlwaysConnected, CacheSource, CacheWriter, Connectivity, Expiration, Loader, MemoryCache,
    Never,
};

use crate::dispatch::Dispatcher;
use crate::inflow::{Inflow, InflowInner};
use crate::invalidation::invalidate;
use crate::loading::LoadCoalescer;
use crate::scheduler::{self, Activation};
use crate::settings::InflowSettings;
use crate::shared::{SharedCache, StreamFactory};

const DEFAULT_LOG_ID: &str = "NO_ID";

struct DataConfig<T> {
    source: Arc<dyn CacheSource<T>>,
    writer: Option<Arc<dyn CacheWriter<T>>>,
    loader: Arc<dyn Loader<T>>,
}

/// Configures and creates an [`Inflow`].
///
/// ```rust,ignore
/// let inflow = Inflow::builder()
///     .data_in_memory(None, loader)
///     .expiration(IfEmpty::new(Option::is_none))
///     .retry_time(Duration::from_secs(5))
///     .build();
/// ```
pub struct InflowBuilder<T> {
    data: Option<DataConfig<T>>,
    expiration: Arc<dyn Expiration<T>>,
    invalidation: Option<(T, Arc<dyn Expiration<T>>)>,
    settings: InflowSettings,
    connectivity: Arc<dyn Connectivity>,
    log_id: SmolStr,
    cache_dispatcher: Dispatcher,
    load_dispatcher: Dispatcher,
    scope: CancellationToken,
    next_loader: Option<Arc<dyn Loader<T>>>,
}

impl<T> InflowBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        InflowBuilder {
            data: None,
            expiration: Arc::new(Never),
            invalidation: None,
            settings: InflowSettings::default(),
            connectivity: Arc::new(AlwaysConnected::new()),
            log_id: SmolStr::new_static(DEFAULT_LOG_ID),
            cache_dispatcher: Dispatcher::default(),
            load_dispatcher: Dispatcher::default(),
            scope: CancellationToken::new(),
            next_loader: None,
        }
    }

    /// Sets the cache source, cache writer, and loader. Required, exactly
    /// once.
    ///
    /// # Panics
    ///
    /// Panics if data was already configured.
    pub fn data(
        mut self,
        source: impl CacheSource<T> + 'static,
        writer: impl CacheWriter<T> + 'static,
        loader: impl Loader<T> + 'static,
    ) -> Self {
        self.set_data(DataConfig {
            source: Arc::new(source),
            writer: Some(Arc::new(writer)),
            loader: Arc::new(loader),
        });
        self
    }

    /// Sets an in-memory cache (starting at `initial`) and a loader.
    ///
    /// The memory cache acts as both source and writer.
    ///
    /// # Panics
    ///
    /// Panics if data was already configured.
    pub fn data_in_memory(mut self, initial: T, loader: impl Loader<T> + 'static) -> Self {
        let cache = MemoryCache::new(initial);
        self.set_data(DataConfig {
            source: Arc::new(cache.clone()),
            writer: Some(Arc::new(cache)),
            loader: Arc::new(loader),
        });
        self
    }

    /// Sets a writer-less cache source and a loader.
    ///
    /// For sources that persist loader results themselves (the paging
    /// pager does).
    ///
    /// # Panics
    ///
    /// Panics if data was already configured.
    pub fn data_stream(
        mut self,
        source: impl CacheSource<T> + 'static,
        loader: impl Loader<T> + 'static,
    ) -> Self {
        self.set_data(DataConfig {
            source: Arc::new(source),
            writer: None,
            loader: Arc::new(loader),
        });
        self
    }

    fn set_data(&mut self, data: DataConfig<T>) {
        assert!(self.data.is_none(), "data(...) can only be configured once");
        self.data = Some(data);
    }

    /// Sets the expiration policy. Default: [`Never`].
    pub fn expiration(mut self, policy: impl Expiration<T> + 'static) -> Self {
        self.expiration = Arc::new(policy);
        self
    }

    /// Enables the invalidation gate: observers see `empty_value` whenever
    /// the latest cached value is invalid under `policy`.
    pub fn invalidation(mut self, empty_value: T, policy: impl Expiration<T> + 'static) -> Self {
        self.invalidation = Some((empty_value, Arc::new(policy)));
        self
    }

    /// Quiet period the shared cache stays subscribed after the last
    /// observer. Default 1 s.
    pub fn keep_cache_subscribed_timeout(mut self, timeout: Duration) -> Self {
        self.settings.keep_subscribed_timeout = timeout;
        self
    }

    /// Delay before a failed load is retried. Must be positive;
    /// `Duration::MAX` disables retries. Default 60 s.
    pub fn retry_time(mut self, retry: Duration) -> Self {
        self.settings.retry_time = retry;
        self
    }

    /// Replaces both timer knobs at once.
    pub fn settings(mut self, settings: InflowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the connectivity provider. Default: [`AlwaysConnected`].
    pub fn connectivity(mut self, connectivity: impl Connectivity + 'static) -> Self {
        self.connectivity = Arc::new(connectivity);
        self
    }

    /// Sets the id attached to log events. Default `"NO_ID"`.
    pub fn log_id(mut self, log_id: impl AsRef<str>) -> Self {
        self.log_id = SmolStr::new(log_id.as_ref());
        self
    }

    /// Runtime handle for cache reads and timers.
    pub fn cache_dispatcher(mut self, handle: Handle) -> Self {
        self.cache_dispatcher = Dispatcher::runtime(handle);
        self
    }

    /// Runtime handle for loader invocations.
    pub fn load_dispatcher(mut self, handle: Handle) -> Self {
        self.load_dispatcher = Dispatcher::runtime(handle);
        self
    }

    /// Cancellation scope all background work is parented to.
    pub fn scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    /// Sets a dedicated load-next loader (paging support).
    ///
    /// Load-next results are not written through the cache writer; the
    /// loader owns its persistence.
    pub fn load_next(mut self, loader: impl Loader<T> + 'static) -> Self {
        self.next_loader = Some(Arc::new(loader));
        self
    }

    /// Builds the inflow.
    ///
    /// # Panics
    ///
    /// Panics if `data(...)` was never configured or a numeric knob is out
    /// of range.
    pub fn build(self) -> Inflow<T> {
        let data = self.data.expect("data(...) is required to build an inflow");
        self.settings.validate();

        let log_id = self.log_id;
        let factory: StreamFactory<T> = match self.invalidation {
            Some((empty, policy)) => {
                if self.expiration.expires_in(&empty) > 0 {
                    warn!(
                        id = %log_id,
                        "invalidation empty value never expires; it will not trigger automatic refresh"
                    );
                }
                let source = data.source;
                Arc::new(move || invalidate(source.stream(), policy.clone(), empty.clone()))
            }
            None => {
                let source = data.source;
                Arc::new(move || source.stream())
            }
        };

        let shared = SharedCache::new(
            factory,
            self.settings.keep_subscribed_timeout,
            self.scope.clone(),
            self.cache_dispatcher.clone(),
            log_id.clone(),
        );

        let refresh = LoadCoalescer::new(
            data.loader,
            data.writer,
            self.expiration.clone(),
            self.scope.clone(),
            self.load_dispatcher.clone(),
            log_id.clone(),
        );

        let next = self.next_loader.map(|loader| {
            LoadCoalescer::new(
                loader,
                None,
                Arc::new(Never),
                self.scope.clone(),
                self.load_dispatcher.clone(),
                log_id.clone(),
            )
        });

        let refresh_activation = {
            let shared = shared.clone();
            let coalescer = refresh.clone();
            let expiration = self.expiration.clone();
            let retry_time = self.settings.retry_time;
            let connectivity = self.connectivity;
            let dispatcher = self.cache_dispatcher;
            let scheduler_log_id = log_id.clone();
            Activation::new(self.scope.clone(), move |stop| {
                dispatcher.spawn(scheduler::run(
                    shared.clone(),
                    coalescer.clone(),
                    expiration.clone(),
                    retry_time,
                    connectivity.clone(),
                    stop,
                    scheduler_log_id.clone(),
                ));
            })
        };

        Inflow::from_inner(InflowInner {
            shared,
            refresh,
            next,
            refresh_activation,
            expiration: self.expiration,
            scope: self.scope,
            load_dispatcher: self.load_dispatcher,
            log_id,
        })
    }
}
