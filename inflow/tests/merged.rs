//! Merged inflows, families, and the invalidation gate end-to-end.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;

use inflow::{
    BoxError, DataParam, FnLoader, Idle, IfEmpty, Inflow, InflowFamily, LoadState, LruCache,
    MemoryCache, MergedInflow, StateParam,
};

fn family_of_counters(built: Arc<AtomicUsize>) -> InflowFamily<u32, u32> {
    InflowFamily::with_cache(
        move |param: &u32| {
            built.fetch_add(1, Ordering::SeqCst);
            let param = *param;
            Inflow::builder()
                .data_in_memory(param, FnLoader::new(move |_| async move {
                    Ok::<_, BoxError>(param + 1)
                }))
                .build()
        },
        LruCache::new(1, None),
    )
}

#[tokio::test(start_paused = true)]
async fn family_rebuilds_evicted_parameters() {
    let built = Arc::new(AtomicUsize::new(0));
    let family = family_of_counters(built.clone());

    let first = family.get(&1);
    let again = family.get(&1);
    assert!(Inflow::ptr_eq(&first, &again));
    assert_eq!(built.load(Ordering::SeqCst), 1);

    // Capacity 1: parameter 2 evicts 1; asking for 1 again rebuilds.
    let _second = family.get(&2);
    let rebuilt = family.get(&1);
    assert!(!Inflow::ptr_eq(&first, &rebuilt));
    assert_eq!(built.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn switching_parameters_drops_the_previous_subscription() {
    let built = Arc::new(AtomicUsize::new(0));
    let family = family_of_counters(built.clone());
    let params = MemoryCache::new(1u32);
    let merged: MergedInflow<u32> = MergedInflow::builder(params.clone(), family).build();

    let mut data = merged.data(DataParam::CacheOnly);
    assert_eq!(data.next().await.unwrap().unwrap(), 1);

    params.set(2);
    assert_eq!(data.next().await.unwrap().unwrap(), 2);

    // Re-emitting the same parameter resolves the same inflow and is
    // filtered; only the switch to 3 is visible.
    params.set(2);
    sleep(Duration::from_millis(10)).await;
    params.set(3);
    assert_eq!(data.next().await.unwrap().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn merged_state_never_shows_idle_idle_across_switches() {
    let built = Arc::new(AtomicUsize::new(0));
    let family = family_of_counters(built);
    let params = MemoryCache::new(1u32);
    let merged: MergedInflow<u32> = MergedInflow::builder(params.clone(), family).build();

    let mut states = merged.state(StateParam::Refresh);
    assert_eq!(states.next().await.unwrap(), LoadState::Idle(Idle::Initial));

    // Every switch lands on another idle-initial inflow; the dedup hides
    // them all, so the next observed state is the load of parameter 3.
    params.set(2);
    sleep(Duration::from_millis(10)).await;
    params.set(3);
    sleep(Duration::from_millis(10)).await;

    merged.load(inflow::LoadParam::Refresh).result().await.unwrap();
    let next = states.next().await.unwrap();
    assert!(next.is_loading(), "expected a loading state, got {next:?}");
}

#[tokio::test(start_paused = true)]
async fn invalid_values_show_the_empty_marker_and_refresh() {
    // -1 is stale garbage, 0 is the empty marker, the loader has 7.
    let cache = MemoryCache::new(-1);
    let calls = Arc::new(AtomicUsize::new(0));
    let loader_calls = calls.clone();
    let inflow = Inflow::builder()
        .data(
            cache.clone(),
            cache.clone(),
            FnLoader::new(move |_| {
                loader_calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, BoxError>(7i32) }
            }),
        )
        .invalidation(0, IfEmpty::new(|value: &i32| *value < 0))
        .expiration(IfEmpty::new(|value: &i32| *value <= 0))
        .build();

    let mut data = inflow.data(DataParam::AutoRefresh);

    // The stale value is never shown; the marker is, then the fresh value.
    assert_eq!(data.next().await.unwrap().unwrap(), 0);
    assert_eq!(data.next().await.unwrap().unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
