//! Remote loader seam.
//!
//! A [`Loader`] fetches a fresh value from wherever fresh values come from
//! (network, disk, computation). The runtime guarantees at most one call
//! is in flight per inflow; the loader only has to do the fetching.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::progress::ProgressTracker;

/// Fetches a fresh value, optionally reporting progress.
#[async_trait]
pub trait Loader<T>: Send + Sync {
    /// Loads a fresh value.
    ///
    /// The `tracker` publishes loading progress on the state stream while
    /// this call is running; calls made after the load finished are
    /// silently discarded.
    async fn load(&self, tracker: ProgressTracker) -> Result<T, BoxError>;
}

#[async_trait]
impl<T, L> Loader<T> for Arc<L>
where
    L: Loader<T> + ?Sized,
{
    async fn load(&self, tracker: ProgressTracker) -> Result<T, BoxError> {
        self.as_ref().load(tracker).await
    }
}

/// Adapter turning an async closure into a [`Loader`].
///
/// ```ignore
/// let loader = FnLoader::new(|_tracker| async { Ok(fetch().await?) });
/// ```
pub struct FnLoader<F> {
    load: F,
}

impl<F> FnLoader<F> {
    /// Wraps a closure `Fn(ProgressTracker) -> Future<Output = Result<T>>`.
    pub fn new<T, Fut>(load: F) -> Self
    where
        F: Fn(ProgressTracker) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        FnLoader { load }
    }
}

#[async_trait]
impl<T, F, Fut> Loader<T> for FnLoader<F>
where
    F: Fn(ProgressTracker) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, BoxError>> + Send,
{
    async fn load(&self, tracker: ProgressTracker) -> Result<T, BoxError> {
        (self.load)(tracker).await
    }
}
