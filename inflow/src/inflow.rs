//! The [`Inflow`] facade.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

use inflow_core::{Deferred, Expiration, Idle, InflowError, LoadError, LoadState};

use crate::dispatch::Dispatcher;
use crate::loading::LoadCoalescer;
use crate::params::{DataParam, LoadParam, StateParam};
use crate::scheduler::{Activation, ActivationGuard};
use crate::shared::SharedCache;

/// Stream of cached values returned by [`Inflow::data`].
///
/// Yields `Ok(value)` for every observed cache emission (at least one per
/// subscription), and terminates after yielding `Err` on a cache failure
/// or scope cancellation.
pub struct DataStream<T> {
    inner: BoxStream<'static, Result<T, InflowError>>,
    _activation: Option<ActivationGuard>,
}

impl<T> DataStream<T> {
    pub(crate) fn from_stream(inner: BoxStream<'static, Result<T, InflowError>>) -> Self {
        DataStream { inner, _activation: None }
    }

    pub(crate) fn attach(&mut self, activation: ActivationGuard) {
        self._activation = Some(activation);
    }
}

impl<T> Stream for DataStream<T> {
    type Item = Result<T, InflowError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Stream of [`LoadState`] returned by [`Inflow::state`].
///
/// Always replays the current state to a new observer first.
pub struct StateStream {
    inner: BoxStream<'static, LoadState>,
}

impl StateStream {
    pub(crate) fn from_stream(inner: BoxStream<'static, LoadState>) -> Self {
        StateStream { inner }
    }
}

impl Stream for StateStream {
    type Item = LoadState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

pub(crate) struct InflowInner<T> {
    pub(crate) shared: SharedCache<T>,
    pub(crate) refresh: LoadCoalescer<T>,
    pub(crate) next: Option<LoadCoalescer<T>>,
    pub(crate) refresh_activation: Activation,
    pub(crate) expiration: Arc<dyn Expiration<T>>,
    pub(crate) scope: CancellationToken,
    pub(crate) load_dispatcher: Dispatcher,
    pub(crate) log_id: SmolStr,
}

/// A reusable, observable, self-refreshing view over a cache and loader.
///
/// Cheap to clone; all clones share the same cache subscription, state
/// channel, and scheduler. Create through [`Inflow::builder`].
pub struct Inflow<T> {
    inner: Arc<InflowInner<T>>,
}

impl<T> Clone for Inflow<T> {
    fn clone(&self) -> Self {
        Inflow { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Inflow<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts building an inflow.
    pub fn builder() -> crate::builder::InflowBuilder<T> {
        crate::builder::InflowBuilder::new()
    }

    pub(crate) fn from_inner(inner: InflowInner<T>) -> Self {
        Inflow { inner: Arc::new(inner) }
    }

    /// Subscribes to cached values.
    ///
    /// With [`DataParam::AutoRefresh`] the returned stream also keeps the
    /// background refresh scheduler alive; with [`DataParam::CacheOnly`]
    /// values are observed without any refresh scheduling. Either way the
    /// stream emits the current value first.
    pub fn data(&self, param: DataParam) -> DataStream<T> {
        let mut stream = self.inner.shared.subscribe();
        if param == DataParam::AutoRefresh {
            stream.attach(self.inner.refresh_activation.acquire());
        }
        stream
    }

    /// Subscribes to the loading state machine.
    ///
    /// The current state is replayed first; the initial state of a fresh
    /// inflow is `Idle(Initial)`.
    pub fn state(&self, param: StateParam) -> StateStream {
        let coalescer = match param {
            StateParam::Refresh => &self.inner.refresh,
            StateParam::LoadNext => self.inner.next.as_ref().unwrap_or(&self.inner.refresh),
        };
        StateStream::from_stream(coalescer.states().subscribe())
    }

    /// Triggers (or joins) a load.
    ///
    /// Never blocks; the returned [`Deferred`] resolves when the load
    /// settles. See [`LoadParam`] for the variants.
    pub fn load(&self, param: LoadParam) -> Deferred<T> {
        match param {
            LoadParam::Refresh => self.inner.refresh.load(),
            LoadParam::RefreshForced => self.inner.refresh.load_forced(),
            LoadParam::LoadNext => {
                self.inner.next.as_ref().unwrap_or(&self.inner.refresh).load()
            }
            LoadParam::RefreshIfExpired(bound) => {
                assert!(bound >= 0, "expiration bound must not be negative");
                self.load_if_expired(bound)
            }
        }
    }

    fn load_if_expired(&self, bound: i64) -> Deferred<T> {
        let deferred = Deferred::new();
        let inner = Arc::clone(&self.inner);
        let out = deferred.clone();
        let spawned = self.inner.load_dispatcher.spawn(async move {
            // An infinite bound accepts any cached value; otherwise the
            // value must outlive the bound to be served without a load.
            let result = match inner.shared.first_value().await {
                Ok(value) if bound == i64::MAX || inner.expiration.expires_in(&value) > bound => {
                    Ok(value)
                }
                Ok(_) => inner.refresh.load().result().await,
                Err(error) => Err(error),
            };
            out.complete(result);
        });
        if spawned.is_none() {
            deferred.complete(Err(InflowError::Cancelled));
        }
        deferred
    }

    /// Loader errors not yet handled by any other observer.
    ///
    /// Every error carries a unique id and a shared handled flag; of all
    /// concurrent collectors, exactly one observes each error. Useful for
    /// "show this failure once" UI semantics.
    pub fn unhandled_errors(&self) -> BoxStream<'static, LoadError> {
        self.state(StateParam::Refresh)
            .filter_map(|state| async move {
                match state {
                    LoadState::Idle(Idle::Error(error)) if error.mark_handled() => Some(error),
                    _ => None,
                }
            })
            .boxed()
    }

    /// Whether two handles refer to the same inflow.
    pub fn ptr_eq(left: &Inflow<T>, right: &Inflow<T>) -> bool {
        Arc::ptr_eq(&left.inner, &right.inner)
    }

    /// The cancellation scope governing this inflow's work.
    pub fn scope(&self) -> &CancellationToken {
        &self.inner.scope
    }

    /// The id attached to this inflow's log events.
    pub fn log_id(&self) -> &str {
        &self.inner.log_id
    }
}

impl<T> std::fmt::Debug for Inflow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflow").field("log_id", &self.inner.log_id).finish_non_exhaustive()
    }
}
