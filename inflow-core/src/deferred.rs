//! Shareable handles onto in-flight loads.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::error::InflowError;

struct DeferredInner<T> {
    result: watch::Sender<Option<Result<T, InflowError>>>,
    repeat: AtomicBool,
}

/// A one-shot load result that any number of holders can await.
///
/// Returned by every `load(...)` call. Concurrent callers may receive the
/// same deferred (the runtime coalesces loads), so completion is
/// broadcast: the first `complete` wins and all waiters observe it.
///
/// Awaiting:
///
/// - [`Deferred::result`] (or plain `.await` via `IntoFuture`) yields the
///   loaded value, re-throws the loader's error, or reports cancellation;
/// - [`Deferred::join`] waits for completion and discards the outcome.
pub struct Deferred<T> {
    inner: Arc<DeferredInner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an incomplete deferred.
    pub fn new() -> Self {
        let (result, _rx) = watch::channel(None);
        Deferred {
            inner: Arc::new(DeferredInner { result, repeat: AtomicBool::new(false) }),
        }
    }

    /// A deferred already completed with `result`.
    pub fn completed(result: Result<T, InflowError>) -> Self {
        let deferred = Deferred::new();
        deferred.complete(result);
        deferred
    }

    /// Waits for the result.
    ///
    /// Returns the loaded value, the loader's error, or
    /// [`InflowError::Cancelled`] when the owning scope was cancelled.
    pub async fn result(&self) -> Result<T, InflowError> {
        let mut rx = self.inner.result.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().as_ref() {
                return result.clone();
            }
            if rx.changed().await.is_err() {
                // Sender kept alive by `self`; unreachable in practice.
                return Err(InflowError::Cancelled);
            }
        }
    }

    /// Waits for completion, ignoring the outcome.
    ///
    /// Returns immediately on an already-completed (or cancelled)
    /// deferred.
    pub async fn join(&self) {
        let _ = self.result().await;
    }

    /// Completes the deferred; only the first call has any effect.
    ///
    /// Returns whether this call set the result.
    pub fn complete(&self, result: Result<T, InflowError>) -> bool {
        self.inner.result.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(result);
                true
            } else {
                false
            }
        })
    }

    /// Whether the deferred is completed.
    pub fn is_completed(&self) -> bool {
        self.inner.result.borrow().is_some()
    }

    /// Requests one more loader run after the current one finishes.
    pub fn mark_repeat(&self) {
        self.inner.repeat.store(true, Ordering::Release);
    }

    /// Consumes the repeat request, if any.
    pub fn take_repeat(&self) -> bool {
        self.inner.repeat.swap(false, Ordering::AcqRel)
    }
}

impl<T> Default for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Deferred::new()
    }
}

impl<T> IntoFuture for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, InflowError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.result().await })
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("completed", &self.inner.result.borrow().is_some())
            .finish()
    }
}
