//! Replay-1 broadcast channel.
//!
//! A broadcast sender paired with a latest-value cell, both updated under
//! one lock so a new subscriber sees every emission exactly once: either
//! as the replayed latest value or through its receiver, never both.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 64;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("inflow lock poisoned")
}

struct ReplayShared<V> {
    tx: broadcast::Sender<V>,
    latest: Mutex<Option<V>>,
}

/// Hot channel that replays its latest value to new subscribers.
pub(crate) struct ReplayChannel<V> {
    shared: Arc<ReplayShared<V>>,
}

impl<V> Clone for ReplayChannel<V> {
    fn clone(&self) -> Self {
        ReplayChannel { shared: Arc::clone(&self.shared) }
    }
}

impl<V> ReplayChannel<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        ReplayChannel {
            shared: Arc::new(ReplayShared { tx, latest: Mutex::new(None) }),
        }
    }

    pub(crate) fn with_initial(initial: V) -> Self {
        let channel = ReplayChannel::new();
        channel.publish(initial);
        channel
    }

    pub(crate) fn publish(&self, value: V) {
        let mut latest = lock(&self.shared.latest);
        *latest = Some(value.clone());
        // Send under the lock so replay and live emissions stay ordered.
        let _ = self.shared.tx.send(value);
    }

    pub(crate) fn latest(&self) -> Option<V> {
        lock(&self.shared.latest).clone()
    }

    /// Subscribes, replaying the latest value first.
    ///
    /// The stream ends when the channel (all publisher handles) is gone.
    pub(crate) fn subscribe(&self) -> BoxStream<'static, V> {
        let (rx, replay) = {
            let latest = lock(&self.shared.latest);
            (self.shared.tx.subscribe(), latest.clone())
        };

        Box::pin(stream::unfold((rx, replay), |(mut rx, mut replay)| async move {
            if let Some(value) = replay.take() {
                return Some((value, (rx, replay)));
            }
            loop {
                match rx.recv().await {
                    Ok(value) => return Some((value, (rx, replay))),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "slow state subscriber lagged, resuming");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_latest_then_streams() {
        let channel = ReplayChannel::with_initial(1);
        channel.publish(2);

        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, Some(2));

        channel.publish(3);
        assert_eq!(sub.next().await, Some(3));
        assert_eq!(channel.latest(), Some(3));
    }

    #[tokio::test]
    async fn ends_when_publishers_are_gone() {
        let channel = ReplayChannel::with_initial("only");
        let mut sub = channel.subscribe();
        drop(channel);

        assert_eq!(sub.next().await, Some("only"));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn no_duplicate_between_replay_and_live() {
        let channel = ReplayChannel::new();
        channel.publish(10);
        let mut sub = channel.subscribe();
        channel.publish(11);

        assert_eq!(sub.next().await, Some(10));
        assert_eq!(sub.next().await, Some(11));
    }
}
