//! Background refresh scheduler.
//!
//! Watches the shared cache and triggers loads when the current value is
//! expired, with a retry timer and connectivity-triggered restarts. Runs
//! only while the auto-refresh data stream has subscribers; the
//! [`Activation`] refcount launches it on the first subscriber and cancels
//! it after the last one.

use std::future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use smol_str::SmolStr;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use inflow_core::{Connectivity, Expiration, signals};

use crate::loading::LoadCoalescer;
use crate::replay::lock;
use crate::shared::SharedCache;

type Launcher = Box<dyn Fn(CancellationToken) + Send + Sync>;

struct ActivationInner {
    count: Mutex<(usize, Option<CancellationToken>)>,
    scope: CancellationToken,
    launch: Launcher,
}

/// Refcount binding a background task to subscriber presence.
pub(crate) struct Activation {
    inner: Arc<ActivationInner>,
}

impl Clone for Activation {
    fn clone(&self) -> Self {
        Activation { inner: Arc::clone(&self.inner) }
    }
}

impl Activation {
    pub(crate) fn new(
        scope: CancellationToken,
        launch: impl Fn(CancellationToken) + Send + Sync + 'static,
    ) -> Self {
        Activation {
            inner: Arc::new(ActivationInner {
                count: Mutex::new((0, None)),
                scope,
                launch: Box::new(launch),
            }),
        }
    }

    /// Acquires an activation; launches the task on the 0 → 1 transition.
    pub(crate) fn acquire(&self) -> ActivationGuard {
        let mut state = lock(&self.inner.count);
        state.0 += 1;
        if state.0 == 1 {
            let stop = self.inner.scope.child_token();
            state.1 = Some(stop.clone());
            (self.inner.launch)(stop);
        }
        ActivationGuard { inner: Arc::clone(&self.inner) }
    }
}

/// Releases the activation (cancelling the task on 1 → 0) when dropped.
pub(crate) struct ActivationGuard {
    inner: Arc<ActivationInner>,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.inner.count);
        state.0 -= 1;
        if state.0 == 0
            && let Some(stop) = state.1.take()
        {
            stop.cancel();
        }
    }
}

/// The scheduler loop.
///
/// Restart-on-signal semantics: the evaluation of the current cache value
/// restarts on every fresh cache emission and on every connectivity
/// signal (the signal stream emits once immediately, so the first
/// iteration always runs). Per value:
///
/// - `expires_in == i64::MAX` parks until something restarts it;
/// - `expires_in > 0` sleeps that long and re-evaluates (interval
///   policies re-check on their own cadence);
/// - expired triggers a load and *waits for it to finish* (the await is
///   the zero-capacity backpressure keeping the retry timer from racing a
///   slow loader), then sleeps `retry_time` and repeats until fresh data
///   restarts the iteration.
pub(crate) async fn run<T>(
    shared: SharedCache<T>,
    coalescer: LoadCoalescer<T>,
    expiration: Arc<dyn Expiration<T>>,
    retry_time: Duration,
    connectivity: Arc<dyn Connectivity>,
    stop: CancellationToken,
    log_id: SmolStr,
) where
    T: Clone + Send + Sync + 'static,
{
    let mut signal = signals(&connectivity);

    'resubscribe: loop {
        let mut values = shared.subscribe();
        let mut current: Option<T> = None;

        loop {
            let value = current.clone();
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                item = values.next() => match item {
                    Some(Ok(fresh)) => {
                        current = Some(fresh);
                        // Restart evaluation with the fresh value.
                    }
                    Some(Err(error)) => {
                        if error.is_cancelled() {
                            return;
                        }
                        debug!(id = %log_id, %error, "scheduler lost the cache stream, resubscribing");
                        tokio::select! {
                            _ = stop.cancelled() => return,
                            _ = sleep(retry_time.min(Duration::from_secs(3600))) => {}
                        }
                        continue 'resubscribe;
                    }
                    None => return,
                },
                _ = signal.next() => {
                    // Connectivity came back: re-evaluate from the start.
                }
                _ = evaluate(value.as_ref(), &expiration, &coalescer, retry_time, &log_id) => {
                    // Evaluation never completes on its own.
                }
            }
        }
    }
}

async fn evaluate<T>(
    value: Option<&T>,
    expiration: &Arc<dyn Expiration<T>>,
    coalescer: &LoadCoalescer<T>,
    retry_time: Duration,
    log_id: &SmolStr,
) where
    T: Clone + Send + Sync + 'static,
{
    let Some(value) = value else {
        return future::pending().await;
    };
    loop {
        let expires_in = expiration.expires_in(value);
        if expires_in == i64::MAX {
            return future::pending().await;
        }
        if expires_in > 0 {
            sleep(Duration::from_millis(expires_in as u64)).await;
            continue;
        }

        debug!(id = %log_id, "cached value expired, loading");
        let handle = coalescer.load();
        handle.join().await;

        if retry_time == Duration::MAX {
            return future::pending().await;
        }
        sleep(retry_time).await;
    }
}
