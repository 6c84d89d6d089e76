//! Parameter-driven inflow composition.
//!
//! A [`MergedInflow`] resolves a stream of parameters through an
//! [`InflowFamily`] and behaves as a single inflow that always reflects
//! the *latest* parameter:
//!
//! - `data`/`state` switch to the newest parameter's inflow, dropping the
//!   previous subscription arm (`state` also deduplicates consecutive
//!   equal states so no `Idle → Idle` is visible across switches);
//! - `load` resolves the first parameter and delegates; an issued load is
//!   not cancelled by later parameter switches.
//!
//! The parameter-to-inflow resolution is itself multiplexed through a
//! shared-hot stream, so any number of observers share one parameter
//! subscription and one family lookup sequence.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

use inflow_core::{CacheSource, Deferred, InflowError, LoadState};

use crate::dispatch::Dispatcher;
use crate::family::InflowFamily;
use crate::inflow::{DataStream, Inflow, StateStream};
use crate::params::{DataParam, LoadParam, StateParam};
use crate::shared::{SharedCache, StreamFactory};

struct MergedInner<T> {
    shared: SharedCache<Inflow<T>>,
    scope: CancellationToken,
    dispatcher: Dispatcher,
}

/// An inflow view that follows a parameter stream.
pub struct MergedInflow<T> {
    inner: Arc<MergedInner<T>>,
}

impl<T> Clone for MergedInflow<T> {
    fn clone(&self) -> Self {
        MergedInflow { inner: Arc::clone(&self.inner) }
    }
}

/// Configures a [`MergedInflow`].
pub struct MergedBuilder<P, T> {
    params: Arc<dyn CacheSource<P>>,
    family: Arc<InflowFamily<P, T>>,
    keep_subscribed_timeout: Duration,
    scope: CancellationToken,
    log_id: SmolStr,
    dispatcher: Dispatcher,
}

impl<P, T> MergedBuilder<P, T>
where
    P: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Quiet period the parameter subscription outlives its observers.
    pub fn keep_subscribed_timeout(mut self, timeout: Duration) -> Self {
        self.keep_subscribed_timeout = timeout;
        self
    }

    /// Cancellation scope of the merged view.
    pub fn scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    /// Log id for the merged view's own events.
    pub fn log_id(mut self, log_id: impl AsRef<str>) -> Self {
        self.log_id = SmolStr::new(log_id.as_ref());
        self
    }

    /// Runtime handle the parameter pump runs on.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Builds the merged view.
    pub fn build(self) -> MergedInflow<T> {
        let params = self.params;
        let family = self.family;
        let factory: StreamFactory<Inflow<T>> = Arc::new(move || {
            let family = Arc::clone(&family);
            let mut last: Option<Inflow<T>> = None;
            params
                .stream()
                .filter_map(move |item| {
                    let output = match item {
                        Ok(param) => {
                            let inflow = family.get(&param);
                            let duplicate =
                                last.as_ref().is_some_and(|prev| Inflow::ptr_eq(prev, &inflow));
                            if duplicate {
                                None
                            } else {
                                last = Some(inflow.clone());
                                Some(Ok(inflow))
                            }
                        }
                        Err(error) => Some(Err(error)),
                    };
                    async move { output }
                })
                .boxed()
        });

        let shared = SharedCache::new(
            factory,
            self.keep_subscribed_timeout,
            self.scope.clone(),
            self.dispatcher.clone(),
            self.log_id,
        );

        MergedInflow {
            inner: Arc::new(MergedInner {
                shared,
                scope: self.scope,
                dispatcher: self.dispatcher,
            }),
        }
    }
}

impl<T> MergedInflow<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts building a merged view over `params` and `family`.
    ///
    /// Parameters come from a [`CacheSource`] (a [`MemoryCache`] works
    /// well as a mutable parameter holder) so the parameter stream is
    /// restartable like any cache stream.
    ///
    /// [`MemoryCache`]: inflow_core::MemoryCache
    pub fn builder<P>(
        params: impl CacheSource<P> + 'static,
        family: InflowFamily<P, T>,
    ) -> MergedBuilder<P, T>
    where
        P: Eq + Hash + Clone + Send + Sync + 'static,
    {
        MergedBuilder {
            params: Arc::new(params),
            family: Arc::new(family),
            keep_subscribed_timeout: Duration::from_millis(1000),
            scope: CancellationToken::new(),
            log_id: SmolStr::new_static("NO_ID"),
            dispatcher: Dispatcher::default(),
        }
    }

    /// Subscribes to the latest parameter's cached values.
    pub fn data(&self, param: DataParam) -> DataStream<T> {
        let outer = self.inner.shared.subscribe();
        DataStream::from_stream(switch(outer, move |inflow| inflow.data(param)))
    }

    /// Subscribes to the latest parameter's loading state.
    ///
    /// Consecutive equal states are filtered, so observers never see
    /// `Idle → Idle` across a parameter switch.
    pub fn state(&self, param: StateParam) -> StateStream {
        let outer = self.inner.shared.subscribe();
        let switched = switch(outer, move |inflow| {
            inflow.state(param).map(Ok::<LoadState, InflowError>).boxed()
        });
        let mut last: Option<LoadState> = None;
        StateStream::from_stream(
            switched
                .filter_map(move |item| {
                    let output = match item {
                        Ok(state) if last.as_ref() != Some(&state) => {
                            last = Some(state.clone());
                            Some(state)
                        }
                        _ => None,
                    };
                    async move { output }
                })
                .boxed(),
        )
    }

    /// Resolves the first parameter's inflow and delegates the load.
    ///
    /// If the scope is cancelled before a parameter resolves, the returned
    /// deferred fails with cancellation. Later parameter switches do not
    /// cancel the delegated load.
    pub fn load(&self, param: LoadParam) -> Deferred<T> {
        if self.inner.scope.is_cancelled() {
            return Deferred::completed(Err(InflowError::Cancelled));
        }
        let deferred = Deferred::new();
        let out = deferred.clone();
        let shared = self.inner.shared.clone();
        let scope = self.inner.scope.clone();
        let spawned = self.inner.dispatcher.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = scope.cancelled() => Err(InflowError::Cancelled),
                first = shared.first_value() => match first {
                    Ok(inflow) => inflow.load(param).result().await,
                    Err(error) => Err(error),
                },
            };
            out.complete(result);
        });
        if spawned.is_none() {
            deferred.complete(Err(InflowError::Cancelled));
        }
        deferred
    }
}

struct Switch<T, S> {
    outer: DataStream<Inflow<T>>,
    inner: Option<S>,
    outer_done: bool,
    done: bool,
}

enum Step<T, I> {
    Switched(Inflow<T>),
    OuterFailed(InflowError),
    OuterDone,
    Item(I),
    InnerDone,
}

/// Flat-map-latest: follows the newest inflow from `outer`, dropping the
/// previous inner subscription on every switch.
fn switch<T, I, S, F>(
    outer: DataStream<Inflow<T>>,
    subscribe: F,
) -> BoxStream<'static, Result<I, InflowError>>
where
    T: Clone + Send + Sync + 'static,
    I: Send + 'static,
    S: stream::Stream<Item = Result<I, InflowError>> + Send + Unpin + 'static,
    F: Fn(&Inflow<T>) -> S + Send + 'static,
{
    let state = Switch { outer, inner: None, outer_done: false, done: false };

    Box::pin(stream::unfold((state, subscribe), |(mut state, subscribe)| async move {
        loop {
            if state.done {
                return None;
            }
            let step = if state.inner.is_none() {
                if state.outer_done {
                    return None;
                }
                match state.outer.next().await {
                    Some(Ok(inflow)) => Step::Switched(inflow),
                    Some(Err(error)) => Step::OuterFailed(error),
                    None => return None,
                }
            } else if state.outer_done {
                let inner: &mut S = state.inner.as_mut().expect("inner stream present");
                match inner.next().await {
                    Some(item) => Step::Item(item),
                    None => return None,
                }
            } else {
                let Switch { outer, inner, .. } = &mut state;
                let inner_stream = inner.as_mut().expect("inner stream present");
                tokio::select! {
                    biased;
                    switched = outer.next() => match switched {
                        Some(Ok(inflow)) => Step::Switched(inflow),
                        Some(Err(error)) => Step::OuterFailed(error),
                        None => Step::OuterDone,
                    },
                    item = inner_stream.next() => match item {
                        Some(item) => Step::Item(item),
                        None => Step::InnerDone,
                    },
                }
            };
            match step {
                Step::Switched(inflow) => state.inner = Some(subscribe(&inflow)),
                Step::OuterFailed(error) => {
                    state.done = true;
                    return Some((Err(error), (state, subscribe)));
                }
                Step::OuterDone => state.outer_done = true,
                Step::Item(item) => return Some((item, (state, subscribe))),
                Step::InnerDone => state.inner = None,
            }
        }
    }))
}
