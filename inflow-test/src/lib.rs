//! Test helpers shared across the inflow workspace.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::time::sleep;

use inflow_core::{BoxError, Idle, LoadState, Loader, Loading, ProgressTracker};

/// A scripted loader with call counting and concurrency tracking.
///
/// Each call sleeps `delay`, then produces `produce(call_index)` (indices
/// start at 0). An internal gauge asserts that calls never overlap, which
/// every test using this loader checks for free.
pub struct TestLoader<T> {
    delay: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    produce: Arc<dyn Fn(usize) -> Result<T, BoxError> + Send + Sync>,
}

impl<T> Clone for TestLoader<T> {
    fn clone(&self) -> Self {
        TestLoader {
            delay: self.delay,
            calls: self.calls.clone(),
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
            produce: self.produce.clone(),
        }
    }
}

impl<T> TestLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Loader producing `produce(call_index)` after `delay`.
    pub fn new(
        delay: Duration,
        produce: impl Fn(usize) -> Result<T, BoxError> + Send + Sync + 'static,
    ) -> Self {
        TestLoader {
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            produce: Arc::new(produce),
        }
    }

    /// Loader that always fails with `message`.
    pub fn failing(delay: Duration, message: &'static str) -> Self {
        TestLoader::new(delay, move |_| Err(message.into()))
    }

    /// Number of started calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping calls ever observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T> Loader<T> for TestLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn load(&self, _tracker: ProgressTracker) -> Result<T, BoxError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.produce)(index)
    }
}

/// Collects the next `count` items of a stream.
pub async fn collect<S>(stream: &mut S, count: usize) -> Vec<S::Item>
where
    S: Stream + Unpin,
{
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        match stream.next().await {
            Some(item) => items.push(item),
            None => break,
        }
    }
    items
}

/// Asserts that `states` is a valid walk of the loading state machine:
/// loading runs are bracketed, progress only happens inside a run, and no
/// two idle states follow each other directly.
pub fn assert_valid_walk(states: &[LoadState]) {
    let mut loading = false;
    for (position, state) in states.iter().enumerate() {
        match state {
            LoadState::Loading(Loading::Started) => {
                loading = true;
            }
            LoadState::Loading(Loading::Progress { .. }) => {
                assert!(loading, "progress outside of a loading run at #{position}: {states:?}");
            }
            LoadState::Idle(Idle::Initial) => {
                assert_eq!(position, 0, "initial state after #{position}: {states:?}");
            }
            LoadState::Idle(_) => {
                assert!(loading, "idle -> idle transition at #{position}: {states:?}");
                loading = false;
            }
        }
    }
}
