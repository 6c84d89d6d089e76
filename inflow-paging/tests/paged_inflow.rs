//! The paged inflow facade: separate refresh / load-next states, cache
//! wiring, and display sharing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;

use inflow::{DataParam, Idle, LoadParam, LoadState, Loading, StateParam};
use inflow_paging::{
    FnPageLoader, MemoryPagingCache, PageParams, PageResult, PagedInflowBuilder,
    PagingRemoteState,
};

#[tokio::test(start_paused = true)]
async fn load_next_state_is_separate_from_refresh_state() {
    let loader = FnPageLoader::new(|params: PageParams<i32>| async move {
        match params {
            PageParams::Refresh { .. } => Ok(PageResult::new(vec![0]).refresh_key(0)),
            PageParams::Next { .. } => Ok(PageResult::new(vec![1, 2])),
        }
    });
    let feed = PagedInflowBuilder::new().page_size(2).loader(loader).build();

    let mut refresh_states = feed.state(StateParam::Refresh);
    let mut next_states = feed.state(StateParam::LoadNext);
    assert_eq!(refresh_states.next().await.unwrap(), LoadState::Idle(Idle::Initial));
    assert_eq!(next_states.next().await.unwrap(), LoadState::Idle(Idle::Initial));

    feed.load(LoadParam::LoadNext).result().await.unwrap();

    // Only the load-next machine moved.
    assert_eq!(next_states.next().await.unwrap(), LoadState::Loading(Loading::Started));
    assert_eq!(next_states.next().await.unwrap(), LoadState::Idle(Idle::Success));

    feed.load(LoadParam::Refresh).result().await.unwrap();
    assert_eq!(refresh_states.next().await.unwrap(), LoadState::Loading(Loading::Started));
    assert_eq!(refresh_states.next().await.unwrap(), LoadState::Idle(Idle::Success));
}

#[tokio::test(start_paused = true)]
async fn display_subscribers_share_one_pager() {
    let cache = Arc::new(MemoryPagingCache::<i32, i32>::with_contents(
        vec![1, 2, 3, 4],
        Some(PagingRemoteState { has_next: false, next_key: None, refresh_key: None }),
    ));
    let feed = PagedInflowBuilder::<i32, i32>::new()
        .page_size(2)
        .cache(cache.clone())
        .build();

    let mut first = feed.data(DataParam::CacheOnly);
    let mut second = feed.data(DataParam::CacheOnly);

    let initial = first.next().await.unwrap().unwrap();
    assert_eq!(initial.items, vec![1, 2]);
    assert!(initial.has_next);
    assert_eq!(second.next().await.unwrap().unwrap().items, vec![1, 2]);

    feed.load(LoadParam::LoadNext).result().await.unwrap();

    assert_eq!(first.next().await.unwrap().unwrap().items, vec![1, 2, 3, 4]);
    assert_eq!(second.next().await.unwrap().unwrap().items, vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_load_next_calls_are_coalesced() {
    let calls = Arc::new(AtomicUsize::new(0));
    let loader_calls = calls.clone();
    let loader = FnPageLoader::new(move |_params: PageParams<i32>| {
        let calls = loader_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(PageResult::new(vec![1, 2]))
        }
    });
    let feed = PagedInflowBuilder::<i32, i32>::new().page_size(2).loader(loader).build();

    let first = feed.load(LoadParam::LoadNext);
    let second = feed.load(LoadParam::LoadNext);

    let page = first.result().await.unwrap();
    assert_eq!(page.items, vec![1, 2]);
    second.join().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
