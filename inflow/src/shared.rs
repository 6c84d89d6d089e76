//! Shared-hot cache multiplexer.
//!
//! Wraps a cold cache stream factory into a hot, replay-1 view shared by
//! every observer of one inflow:
//!
//! - the first subscriber starts an upstream pump task on the cache
//!   dispatcher, later subscribers replay the latest value and then follow
//!   live emissions;
//! - when the last subscriber is gone a quiet-period timer is armed; if no
//!   subscriber returns within `keep_subscribed_timeout` the pump is
//!   cancelled and the replay cache discarded. The timer path runs even
//!   for a zero timeout, so teardown/re-subscribe races are always
//!   resolved under the registry lock: a generation counter identifies the
//!   pump a timer intends to stop, an idle-epoch counter invalidates stale
//!   timers once a newer quiet period begins;
//! - upstream errors are broadcast to all current subscribers and the pump
//!   retires; the next subscription opens a fresh upstream stream;
//! - scope cancellation terminates every subscriber stream with
//!   [`InflowError::Cancelled`], and a late subscriber to a cancelled
//!   scope observes cancellation as its first emission.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use smol_str::SmolStr;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use inflow_core::{CacheStream, InflowError, SourceError};

use crate::dispatch::Dispatcher;
use crate::inflow::DataStream;
use crate::replay::lock;

/// Factory producing a fresh cold cache stream per pump start.
pub(crate) type StreamFactory<T> =
    Arc<dyn Fn() -> CacheStream<T> + Send + Sync>;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
enum Event<T> {
    Value(T),
    Failed(SourceError),
}

struct Registry<T> {
    subscribers: usize,
    generation: u64,
    idle_epoch: u64,
    pump: Option<CancellationToken>,
    latest: Option<T>,
}

struct Shared<T> {
    factory: StreamFactory<T>,
    keep_subscribed: Duration,
    scope: CancellationToken,
    dispatcher: Dispatcher,
    log_id: SmolStr,
    tx: broadcast::Sender<Event<T>>,
    registry: Mutex<Registry<T>>,
}

/// Reference-counted hot view over a cold cache stream.
pub(crate) struct SharedCache<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Clone for SharedCache<T> {
    fn clone(&self) -> Self {
        SharedCache { inner: Arc::clone(&self.inner) }
    }
}

impl<T> SharedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        factory: StreamFactory<T>,
        keep_subscribed: Duration,
        scope: CancellationToken,
        dispatcher: Dispatcher,
        log_id: SmolStr,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        SharedCache {
            inner: Arc::new(Shared {
                factory,
                keep_subscribed,
                scope,
                dispatcher,
                log_id,
                tx,
                registry: Mutex::new(Registry {
                    subscribers: 0,
                    generation: 0,
                    idle_epoch: 0,
                    pump: None,
                    latest: None,
                }),
            }),
        }
    }

    /// Subscribes to the hot view.
    pub(crate) fn subscribe(&self) -> DataStream<T> {
        let inner = Arc::clone(&self.inner);

        if inner.scope.is_cancelled() {
            return DataStream::from_stream(
                stream::once(async { Err(InflowError::Cancelled) }).boxed(),
            );
        }

        let (rx, replay, guard) = {
            let mut registry = lock(&inner.registry);
            registry.subscribers += 1;
            if registry.pump.is_none() {
                registry.generation += 1;
                let generation = registry.generation;
                let stop = inner.scope.child_token();
                registry.pump = Some(stop.clone());
                let pump_inner = Arc::clone(&inner);
                debug!(id = %inner.log_id, generation, "starting cache upstream");
                inner.dispatcher.spawn(pump(pump_inner, stop, generation));
            }
            (
                inner.tx.subscribe(),
                registry.latest.clone(),
                SubscriberGuard { inner: Arc::clone(&inner) },
            )
        };

        let scope = inner.scope.clone();
        let state = SubscriberState { rx, replay, scope, guard, done: false };

        DataStream::from_stream(Box::pin(stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            if let Some(value) = state.replay.take() {
                if state.scope.is_cancelled() {
                    state.done = true;
                    return Some((Err(InflowError::Cancelled), state));
                }
                return Some((Ok(value), state));
            }
            loop {
                tokio::select! {
                    biased;
                    _ = state.scope.cancelled() => {
                        state.done = true;
                        return Some((Err(InflowError::Cancelled), state));
                    }
                    received = state.rx.recv() => match received {
                        Ok(Event::Value(value)) => return Some((Ok(value), state)),
                        Ok(Event::Failed(error)) => {
                            state.done = true;
                            return Some((Err(InflowError::Cache(error)), state));
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "slow cache subscriber lagged, resuming");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })))
    }

    /// First value observed by a fresh subscription.
    pub(crate) async fn first_value(&self) -> Result<T, InflowError> {
        let mut subscription = self.subscribe();
        match subscription.next().await {
            Some(result) => result,
            None => Err(InflowError::Cancelled),
        }
    }
}

struct SubscriberState<T: Send + Sync + 'static> {
    rx: broadcast::Receiver<Event<T>>,
    replay: Option<T>,
    scope: CancellationToken,
    guard: SubscriberGuard<T>,
    done: bool,
}

struct SubscriberGuard<T: Send + Sync + 'static> {
    inner: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> Drop for SubscriberGuard<T> {
    fn drop(&mut self) {
        let inner = &self.inner;
        let timer = {
            let mut registry = lock(&inner.registry);
            registry.subscribers -= 1;
            if registry.subscribers == 0 && registry.pump.is_some() {
                registry.idle_epoch += 1;
                Some((registry.generation, registry.idle_epoch))
            } else {
                None
            }
        };

        let Some((generation, idle_epoch)) = timer else { return };
        let timeout = inner.keep_subscribed;
        let timer_inner = Arc::clone(inner);
        let spawned = inner.dispatcher.spawn(async move {
            if !timeout.is_zero() {
                tokio::time::sleep(timeout).await;
            } else {
                tokio::task::yield_now().await;
            }
            try_teardown(&timer_inner, generation, idle_epoch);
        });
        if spawned.is_none() {
            // No runtime left to host the timer: tear down immediately.
            try_teardown(inner, generation, idle_epoch);
        }
    }
}

fn try_teardown<T>(inner: &Shared<T>, generation: u64, idle_epoch: u64) {
    let mut registry = lock(&inner.registry);
    if registry.generation == generation
        && registry.idle_epoch == idle_epoch
        && registry.subscribers == 0
        && let Some(stop) = registry.pump.take()
    {
        debug!(id = %inner.log_id, generation, "stopping idle cache upstream");
        stop.cancel();
        registry.latest = None;
    }
}

async fn pump<T>(inner: Arc<Shared<T>>, stop: CancellationToken, generation: u64)
where
    T: Clone + Send + Sync + 'static,
{
    let mut upstream = (inner.factory)();
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            item = upstream.next() => match item {
                Some(Ok(value)) => {
                    let mut registry = lock(&inner.registry);
                    if registry.generation != generation {
                        return;
                    }
                    registry.latest = Some(value.clone());
                    // Send under the lock: replay and live emissions must
                    // not race for new subscribers.
                    let _ = inner.tx.send(Event::Value(value));
                }
                Some(Err(error)) => {
                    warn!(id = %inner.log_id, %error, "cache upstream failed");
                    let mut registry = lock(&inner.registry);
                    if registry.generation == generation {
                        registry.latest = None;
                        registry.pump = None;
                    }
                    let _ = inner.tx.send(Event::Failed(error));
                    return;
                }
                None => {
                    // Upstream completed; keep the replay value, retire the
                    // pump so the next subscription starts a fresh stream.
                    let mut registry = lock(&inner.registry);
                    if registry.generation == generation {
                        registry.pump = None;
                    }
                    return;
                }
            }
        }
    }
}
