//! Loader coalescer.
//!
//! Enforces at-most-one loader call per inflow, publishes the loading
//! state machine, and implements repeat-if-running:
//!
//! - `load` joins the running call if any, otherwise starts one;
//! - `load_forced` marks the running call for one more run after it
//!   finishes; the extra run starts immediately and no intermediate idle
//!   state is published in between.
//!
//! State transitions and the active-deferred slot are updated under one
//! lock, so observers always see a valid walk of the state machine:
//! `Idle → Loading(Started) → Loading(Progress)* → Idle(Success | Error)`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use inflow_core::{
    CacheWriter, Deferred, Expiration, Idle, InflowError, LoadError, LoadState, Loader, Loading,
    ProgressTracker,
};

use crate::dispatch::Dispatcher;
use crate::replay::{ReplayChannel, lock};

struct CoalescerInner<T> {
    loader: Arc<dyn Loader<T>>,
    writer: Option<Arc<dyn CacheWriter<T>>>,
    expiration: Arc<dyn Expiration<T>>,
    states: ReplayChannel<LoadState>,
    active: Mutex<Option<Deferred<T>>>,
    error_seq: AtomicU64,
    scope: CancellationToken,
    dispatcher: Dispatcher,
    log_id: SmolStr,
}

/// Serializes loader calls and publishes their state.
pub(crate) struct LoadCoalescer<T> {
    inner: Arc<CoalescerInner<T>>,
}

impl<T> Clone for LoadCoalescer<T> {
    fn clone(&self) -> Self {
        LoadCoalescer { inner: Arc::clone(&self.inner) }
    }
}

impl<T> LoadCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        loader: Arc<dyn Loader<T>>,
        writer: Option<Arc<dyn CacheWriter<T>>>,
        expiration: Arc<dyn Expiration<T>>,
        scope: CancellationToken,
        dispatcher: Dispatcher,
        log_id: SmolStr,
    ) -> Self {
        LoadCoalescer {
            inner: Arc::new(CoalescerInner {
                loader,
                writer,
                expiration,
                states: ReplayChannel::with_initial(LoadState::initial()),
                active: Mutex::new(None),
                error_seq: AtomicU64::new(0),
                scope,
                dispatcher,
                log_id,
            }),
        }
    }

    pub(crate) fn states(&self) -> &ReplayChannel<LoadState> {
        &self.inner.states
    }

    /// Starts a load, or joins the one already running.
    pub(crate) fn load(&self) -> Deferred<T> {
        self.start(false)
    }

    /// Starts a load; if one is already running, requests one more run
    /// after it finishes and returns the same deferred.
    pub(crate) fn load_forced(&self) -> Deferred<T> {
        self.start(true)
    }

    fn start(&self, forced: bool) -> Deferred<T> {
        let inner = &self.inner;
        if inner.scope.is_cancelled() {
            return Deferred::completed(Err(InflowError::Cancelled));
        }

        let deferred = {
            let mut active = lock(&inner.active);
            if let Some(current) = active.as_ref() {
                if forced {
                    debug!(id = %inner.log_id, "load already running, marking for repeat");
                    current.mark_repeat();
                }
                return current.clone();
            }
            let deferred = Deferred::new();
            *active = Some(deferred.clone());
            // Published under the active lock: keeps the state sequence
            // serialized against the idle transition of the previous run.
            inner.states.publish(LoadState::Loading(Loading::Started));
            deferred
        };

        let run_inner = Arc::clone(inner);
        let run_deferred = deferred.clone();
        let spawned = inner.dispatcher.spawn(run(run_inner, run_deferred));
        if spawned.is_none() {
            // No runtime to host the load.
            finish(inner, &deferred, Err(InflowError::Cancelled), |_| {});
        }
        deferred
    }
}

async fn run<T>(inner: Arc<CoalescerInner<T>>, deferred: Deferred<T>)
where
    T: Clone + Send + Sync + 'static,
{
    loop {
        let states = inner.states.clone();
        let tracker = ProgressTracker::new(move |current, total| {
            states.publish(LoadState::Loading(Loading::Progress { current, total }));
        });

        let outcome = tokio::select! {
            biased;
            _ = inner.scope.cancelled() => None,
            result = inner.loader.load(tracker.clone()) => Some(result),
        };
        tracker.disable();

        let Some(result) = outcome else {
            debug!(id = %inner.log_id, "load cancelled by scope");
            finish(&inner, &deferred, Err(InflowError::Cancelled), |_| {});
            return;
        };

        match result {
            Ok(value) => {
                assert!(
                    inner.expiration.expires_in(&value) > 0,
                    "loader returned an already-expired value; automatic refresh would never settle"
                );
                if let Some(writer) = &inner.writer {
                    writer.write(value.clone()).await;
                }
                if deferred.take_repeat() {
                    debug!(id = %inner.log_id, "running repeated load");
                    continue;
                }
                finish(&inner, &deferred, Ok(value), |states| {
                    states.publish(LoadState::Idle(Idle::Success));
                });
                return;
            }
            Err(error) => {
                if deferred.take_repeat() {
                    debug!(id = %inner.log_id, %error, "load failed, running repeated load");
                    continue;
                }
                let id = inner.error_seq.fetch_add(1, Ordering::Relaxed);
                let load_error = LoadError::new(Arc::from(error), id);
                warn!(id = %inner.log_id, error = %load_error, error_id = load_error.id(), "load failed");
                let published = load_error.clone();
                finish(&inner, &deferred, Err(InflowError::Load(load_error)), move |states| {
                    states.publish(LoadState::Idle(Idle::Error(published)));
                });
                return;
            }
        }
    }
}

fn finish<T>(
    inner: &CoalescerInner<T>,
    deferred: &Deferred<T>,
    result: Result<T, InflowError>,
    publish: impl FnOnce(&ReplayChannel<LoadState>),
) where
    T: Clone + Send + Sync + 'static,
{
    let mut active = lock(&inner.active);
    *active = None;
    publish(&inner.states);
    drop(active);
    deferred.complete(result);
}
