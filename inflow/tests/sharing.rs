//! Shared-hot cache behavior: sharing, teardown, errors, cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use inflow::{
    BoxError, CacheStream, DataParam, FnLoader, FnSource, Inflow, MemoryCache, SourceError,
};

fn idle_loader() -> FnLoader<impl Fn(inflow::ProgressTracker) -> std::future::Ready<Result<i32, BoxError>>> {
    FnLoader::new(|_| std::future::ready(Ok(0i32)))
}

#[tokio::test(start_paused = true)]
async fn joint_subscribers_observe_the_same_suffix() {
    let cache = MemoryCache::new(0);
    let inflow = Inflow::builder().data(cache.clone(), cache.clone(), idle_loader()).build();

    let mut first = inflow.data(DataParam::CacheOnly);
    assert_eq!(first.next().await.unwrap().unwrap(), 0);

    let mut second = inflow.data(DataParam::CacheOnly);
    assert_eq!(second.next().await.unwrap().unwrap(), 0);

    let mut first_seen = Vec::new();
    let mut second_seen = Vec::new();
    for value in 1..=5 {
        cache.set(value);
        first_seen.push(first.next().await.unwrap().unwrap());
        second_seen.push(second.next().await.unwrap().unwrap());
    }
    assert_eq!(first_seen, second_seen);
    assert_eq!(first_seen, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn upstream_stays_subscribed_through_the_quiet_period() {
    let opened = Arc::new(AtomicUsize::new(0));
    let source_opened = opened.clone();
    let source = FnSource::new(move || -> CacheStream<i32> {
        source_opened.fetch_add(1, Ordering::SeqCst);
        stream::iter(vec![Ok(1)]).chain(stream::pending()).boxed()
    });
    let inflow = Inflow::builder()
        .data_stream(source, idle_loader())
        .keep_cache_subscribed_timeout(Duration::from_millis(500))
        .build();

    let mut data = inflow.data(DataParam::CacheOnly);
    assert_eq!(data.next().await.unwrap().unwrap(), 1);
    drop(data);

    // Re-subscribe within the quiet period: the same upstream serves.
    sleep(Duration::from_millis(100)).await;
    let mut data = inflow.data(DataParam::CacheOnly);
    assert_eq!(data.next().await.unwrap().unwrap(), 1);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    drop(data);

    // Past the quiet period the upstream is released and reopened.
    sleep(Duration::from_millis(600)).await;
    let mut data = inflow.data(DataParam::CacheOnly);
    assert_eq!(data.next().await.unwrap().unwrap(), 1);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_quiet_period_survives_subscribe_churn() {
    let opened = Arc::new(AtomicUsize::new(0));
    let source_opened = opened.clone();
    let source = FnSource::new(move || -> CacheStream<i32> {
        source_opened.fetch_add(1, Ordering::SeqCst);
        stream::iter(vec![Ok(7)]).chain(stream::pending()).boxed()
    });
    let inflow = Inflow::builder()
        .data_stream(source, idle_loader())
        .keep_cache_subscribed_timeout(Duration::ZERO)
        .build();

    for _ in 0..3 {
        let mut data = inflow.data(DataParam::CacheOnly);
        assert_eq!(data.next().await.unwrap().unwrap(), 7);
        drop(data);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    assert!(opened.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn upstream_error_reaches_all_subscribers_then_recovers() {
    let opened = Arc::new(AtomicUsize::new(0));
    let source_opened = opened.clone();
    let source = FnSource::new(move || -> CacheStream<i32> {
        let attempt = source_opened.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            let error: SourceError = Arc::new(std::io::Error::other("disk gone"));
            stream::iter(vec![Ok(1), Err(error)]).boxed()
        } else {
            stream::iter(vec![Ok(2)]).chain(stream::pending()).boxed()
        }
    });
    let inflow = Inflow::builder().data_stream(source, idle_loader()).build();

    let mut first = inflow.data(DataParam::CacheOnly);
    let mut second = inflow.data(DataParam::CacheOnly);

    assert_eq!(first.next().await.unwrap().unwrap(), 1);
    assert!(matches!(first.next().await, Some(Err(inflow::InflowError::Cache(_)))));
    assert!(first.next().await.is_none());

    // The second subscriber sees the same error (possibly after the
    // replayed value, depending on when it caught up).
    let mut saw_error = false;
    while let Some(item) = second.next().await {
        if item.is_err() {
            saw_error = true;
        }
    }
    assert!(saw_error);

    // A fresh subscription opens a fresh upstream.
    let mut recovered = inflow.data(DataParam::CacheOnly);
    assert_eq!(recovered.next().await.unwrap().unwrap(), 2);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_reaches_live_and_late_subscribers() {
    let scope = CancellationToken::new();
    let cache = MemoryCache::new(0);
    let inflow = Inflow::builder()
        .data(cache.clone(), cache.clone(), idle_loader())
        .scope(scope.clone())
        .build();

    let mut live = inflow.data(DataParam::CacheOnly);
    assert_eq!(live.next().await.unwrap().unwrap(), 0);

    scope.cancel();
    assert!(matches!(live.next().await, Some(Err(inflow::InflowError::Cancelled))));
    assert!(live.next().await.is_none());

    // A late subscriber observes cancellation as its first emission.
    let mut late = inflow.data(DataParam::CacheOnly);
    assert!(matches!(late.next().await, Some(Err(inflow::InflowError::Cancelled))));

    // A load after cancellation resolves promptly with cancellation.
    let error = inflow.load(inflow::LoadParam::Refresh).result().await.unwrap_err();
    assert!(error.is_cancelled());
}
