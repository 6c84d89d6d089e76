//! End-to-end scenarios across the whole stack, driven on paused time.

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use inflow::{
    After, DataParam, Idle, IfEmpty, Inflow, InflowFamily, LoadParam, LoadState, Loading,
    ManualConnectivity, MemoryCache, MergedInflow, StateParam,
};
use inflow_paging::{FnPageLoader, MergeWithComparator, KeyIdentity, PageResult, PagedInflowBuilder};
use inflow_test::{TestLoader, assert_valid_walk, collect};

#[tokio::test(start_paused = true)]
async fn expired_initial_value_is_refreshed_once() {
    let loader = TestLoader::new(Duration::from_millis(100), |_| Ok(Some(0)));
    let inflow = Inflow::builder()
        .data_in_memory(None, loader.clone())
        .expiration(IfEmpty::new(Option::is_none))
        .build();

    let mut data = inflow.data(DataParam::AutoRefresh);
    assert_eq!(data.next().await.unwrap().unwrap(), None);
    assert_eq!(data.next().await.unwrap().unwrap(), Some(0));
    assert_eq!(loader.calls(), 1);

    // The loaded value is not empty anymore, so nothing else happens.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(loader.calls(), 1);
    assert_eq!(loader.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_repeats_without_intermediate_idle() {
    let loader = TestLoader::new(Duration::from_millis(100), |index| Ok(index as i64));
    let inflow = Inflow::builder().data_in_memory(-1, loader.clone()).build();

    let mut data = inflow.data(DataParam::CacheOnly);
    assert_eq!(data.next().await.unwrap().unwrap(), -1);

    let mut states = inflow.state(StateParam::Refresh);

    let refresh = inflow.load(LoadParam::Refresh);
    sleep(Duration::from_millis(50)).await;
    let forced = inflow.load(LoadParam::RefreshForced);

    // First run lands its value, the repeated run lands the second one.
    assert_eq!(data.next().await.unwrap().unwrap(), 0);
    assert_eq!(data.next().await.unwrap().unwrap(), 1);
    assert_eq!(refresh.result().await.unwrap(), 1);
    assert_eq!(forced.result().await.unwrap(), 1);
    assert_eq!(loader.calls(), 2);

    // One loading bracket around both runs: no intermediate idle.
    let walk = collect(&mut states, 3).await;
    assert_eq!(
        walk,
        vec![
            LoadState::Idle(Idle::Initial),
            LoadState::Loading(Loading::Started),
            LoadState::Idle(Idle::Success),
        ]
    );
    assert_valid_walk(&walk);
}

#[tokio::test(start_paused = true)]
async fn refresh_if_expired_short_circuits_on_fresh_values() {
    let loaded_at = Utc::now().timestamp_millis();
    let loader = TestLoader::new(Duration::ZERO, |_| Ok(0i64));
    let inflow = Inflow::builder()
        .data_in_memory(-1, loader.clone())
        .expiration(After::new(10_000, move |_: &i64| loaded_at))
        .build();

    // Valid for ~10s: a zero bound serves the cached value.
    let cached = inflow.load(LoadParam::refresh_if_expired(0)).result().await.unwrap();
    assert_eq!(cached, -1);
    assert_eq!(loader.calls(), 0);

    // An infinite bound accepts anything.
    let cached = inflow.load(LoadParam::refresh_if_expired(i64::MAX)).result().await.unwrap();
    assert_eq!(cached, -1);
    assert_eq!(loader.calls(), 0);

    // A bound beyond the validity forces the load.
    let fresh = inflow.load(LoadParam::refresh_if_expired(20_000)).result().await.unwrap();
    assert_eq!(fresh, 0);
    assert_eq!(loader.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn connectivity_edge_retries_failed_load() {
    let connectivity = ManualConnectivity::new(true);
    let loader = TestLoader::<Option<i32>>::failing(Duration::from_millis(10), "offline");
    let inflow = Inflow::builder()
        .data_in_memory(None, loader.clone())
        .expiration(IfEmpty::new(Option::is_none))
        .retry_time(Duration::MAX)
        .connectivity(connectivity.clone())
        .build();

    let _data = inflow.data(DataParam::AutoRefresh);

    // Initial subscription triggers exactly one load; with retries
    // disabled the failure is not retried on its own.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(loader.calls(), 1);

    // A falling edge alone changes nothing.
    connectivity.set(false);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(loader.calls(), 1);

    // The rising edge forces a fresh attempt.
    connectivity.set(true);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(loader.calls(), 2);
    assert_eq!(loader.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn merged_inflow_follows_parameters() {
    let family = InflowFamily::new(|param: &i32| {
        let param = *param;
        Inflow::builder()
            .data_in_memory(param, TestLoader::new(Duration::ZERO, move |_| Ok(param + 1)))
            .log_id(format!("param-{param}"))
            .build()
    });
    let params = MemoryCache::new(0);
    let merged: MergedInflow<i32> = MergedInflow::builder(params.clone(), family).build();

    let mut data = merged.data(DataParam::CacheOnly);
    let mut states = merged.state(StateParam::Refresh);

    assert_eq!(data.next().await.unwrap().unwrap(), 0);
    sleep(Duration::from_millis(100)).await;
    params.set(100);
    assert_eq!(data.next().await.unwrap().unwrap(), 100);
    sleep(Duration::from_millis(100)).await;
    params.set(200);
    assert_eq!(data.next().await.unwrap().unwrap(), 200);

    // No loads ran, so the states across all three inflows collapse into
    // the single replayed idle state.
    assert_eq!(collect(&mut states, 1).await, vec![LoadState::Idle(Idle::Initial)]);
}

#[tokio::test(start_paused = true)]
async fn merged_load_targets_first_resolved_inflow() {
    let family = InflowFamily::new(|param: &i32| {
        let param = *param;
        Inflow::builder()
            .data_in_memory(param, TestLoader::new(Duration::ZERO, move |_| Ok(param + 1)))
            .build()
    });
    let params = MemoryCache::new(7);
    let merged: MergedInflow<i32> = MergedInflow::builder(params, family).build();

    assert_eq!(merged.load(LoadParam::Refresh).result().await.unwrap(), 8);
}

#[tokio::test(start_paused = true)]
async fn merged_load_fails_fast_on_cancelled_scope() {
    let scope = CancellationToken::new();
    let family = InflowFamily::new(|param: &i32| {
        let param = *param;
        Inflow::builder()
            .data_in_memory(param, TestLoader::new(Duration::ZERO, move |_| Ok(param)))
            .build()
    });
    let merged: MergedInflow<i32> =
        MergedInflow::builder(MemoryCache::new(1), family).scope(scope.clone()).build();

    scope.cancel();
    let error = merged.load(LoadParam::Refresh).result().await.unwrap_err();
    assert!(error.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn paged_inflow_appends_ordered_unique_pages() {
    let pages = vec![
        PageResult::new(vec![1, 2, 3]).next_key(1usize),
        PageResult::new(vec![4, 5, 6]),
    ];
    let loader = FnPageLoader::new(move |params| {
        let pages = pages.clone();
        async move {
            let index = params.key().copied().unwrap_or(0);
            Ok(pages[index].clone())
        }
    });

    let feed = PagedInflowBuilder::new()
        .page_size(3)
        .loader(loader)
        .merger(MergeWithComparator::new(|a: &i32, b: &i32| a.cmp(b), true))
        .identity(KeyIdentity::new(|item: &i32| *item))
        .build();

    let mut data = feed.data(DataParam::CacheOnly);
    assert!(data.next().await.unwrap().unwrap().is_empty());

    let first = feed.load(LoadParam::LoadNext).result().await.unwrap();
    assert_eq!(first.items, vec![1, 2, 3]);
    assert!(first.has_next);

    let second = feed.load(LoadParam::LoadNext).result().await.unwrap();
    assert_eq!(second.items, vec![1, 2, 3, 4, 5, 6]);
    assert!(!second.has_next);

    let shown = data.next().await.unwrap().unwrap();
    assert_eq!(shown.items, vec![1, 2, 3]);
    let shown = data.next().await.unwrap().unwrap();
    assert_eq!(shown.items, vec![1, 2, 3, 4, 5, 6]);
    assert!(!shown.has_next);
}
