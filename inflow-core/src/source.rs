//! Cache source and writer seams.
//!
//! The runtime never owns storage. It reads a user-supplied
//! [`CacheSource`], a restartable stream of cached values, and writes
//! loader results back through a user-supplied [`CacheWriter`].
//!
//! The stream contract is small but strict:
//!
//! - every fresh stream must emit at least once (an "empty marker" value
//!   if no real data exists yet), so observers always have a current
//!   value;
//! - each call to [`CacheSource::stream`] returns a *fresh* stream; the
//!   shared-cache layer decides when to subscribe and for how long.
//!
//! [`MemoryCache`] is the built-in in-memory implementation of both seams,
//! backed by a watch channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::SourceError;

/// Stream of cached values produced by a [`CacheSource`].
pub type CacheStream<T> = BoxStream<'static, Result<T, SourceError>>;

/// A restartable source of cached values.
pub trait CacheSource<T>: Send + Sync {
    /// Opens a fresh stream over the cache.
    ///
    /// The stream must emit the current value (or an empty marker) before
    /// anything else.
    fn stream(&self) -> CacheStream<T>;
}

impl<T, S> CacheSource<T> for Arc<S>
where
    S: CacheSource<T> + ?Sized,
{
    fn stream(&self) -> CacheStream<T> {
        self.as_ref().stream()
    }
}

/// Writes freshly loaded values back into the cache.
#[async_trait]
pub trait CacheWriter<T>: Send + Sync {
    /// Stores a newly loaded value.
    ///
    /// Infallible from the runtime's point of view; implementations should
    /// log their own failures.
    async fn write(&self, value: T);
}

#[async_trait]
impl<T, W> CacheWriter<T> for Arc<W>
where
    T: Send + 'static,
    W: CacheWriter<T> + ?Sized,
{
    async fn write(&self, value: T) {
        self.as_ref().write(value).await;
    }
}

/// Adapter turning a stream-factory closure into a [`CacheSource`].
pub struct FnSource<F> {
    factory: F,
}

impl<F> FnSource<F> {
    /// Wraps a closure producing a fresh cache stream per call.
    pub fn new<T>(factory: F) -> Self
    where
        F: Fn() -> CacheStream<T>,
    {
        FnSource { factory }
    }
}

impl<T, F> CacheSource<T> for FnSource<F>
where
    F: Fn() -> CacheStream<T> + Send + Sync,
{
    fn stream(&self) -> CacheStream<T> {
        (self.factory)()
    }
}

/// In-memory cache backed by a watch channel.
///
/// Emits the current value immediately on every fresh stream, then every
/// subsequent write. Useful both as the simplest cache for an inflow and
/// as a parameter holder for merged inflows.
#[derive(Debug, Clone)]
pub struct MemoryCache<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates the cache holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        MemoryCache { tx: Arc::new(tx) }
    }

    /// Returns a clone of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replaces the current value, notifying all streams.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }
}

impl<T> CacheSource<T> for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn stream(&self) -> CacheStream<T> {
        WatchStream::new(self.tx.subscribe()).map(Ok).boxed()
    }
}

#[async_trait]
impl<T> CacheWriter<T> for MemoryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn write(&self, value: T) {
        self.set(value);
    }
}
