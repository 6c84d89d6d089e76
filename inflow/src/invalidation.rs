//! Invalidation gate.
//!
//! Rewrites a cache stream so that observers see a designated empty value
//! whenever the latest cached value is invalid under a separate
//! expiration policy. Unlike expiration proper this has no refresh
//! semantics: the gate only swaps what is *shown*.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;

use inflow_core::{CacheStream, Expiration};

struct Gate<T> {
    upstream: CacheStream<T>,
    policy: Arc<dyn Expiration<T>>,
    empty: T,
    /// Value currently shown and being timed; `None` while only waiting
    /// for the next upstream emission.
    current: Option<T>,
    upstream_done: bool,
}

/// Applies the invalidation gate to a cache stream.
///
/// Per upstream value: if the policy reports it invalid, emit the empty
/// value instead; otherwise emit the value and re-evaluate when the policy
/// says it expires (interval policies re-check periodically), emitting the
/// empty value once it does. Any new upstream value resets the gate.
pub(crate) fn invalidate<T>(
    upstream: CacheStream<T>,
    policy: Arc<dyn Expiration<T>>,
    empty: T,
) -> CacheStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    let gate = Gate { upstream, policy, empty, current: None, upstream_done: false };

    Box::pin(stream::unfold(gate, |mut gate| async move {
        loop {
            match gate.current.take() {
                None => {
                    if gate.upstream_done {
                        return None;
                    }
                    match gate.upstream.next().await {
                        Some(Ok(value)) => {
                            if gate.policy.expires_in(&value) <= 0 {
                                return Some((Ok(gate.empty.clone()), gate));
                            }
                            gate.current = Some(value.clone());
                            return Some((Ok(value), gate));
                        }
                        Some(Err(error)) => return Some((Err(error), gate)),
                        None => return None,
                    }
                }
                Some(value) => {
                    let expires_in = gate.policy.expires_in(&value);
                    if expires_in <= 0 {
                        // Keep waiting for upstream only; the empty value
                        // is shown until real data arrives.
                        return Some((Ok(gate.empty.clone()), gate));
                    }
                    if expires_in == i64::MAX {
                        // Valid forever: nothing to time, wait for upstream.
                        match gate.upstream.next().await {
                            Some(Ok(next)) => {
                                if gate.policy.expires_in(&next) <= 0 {
                                    return Some((Ok(gate.empty.clone()), gate));
                                }
                                gate.current = Some(next.clone());
                                return Some((Ok(next), gate));
                            }
                            Some(Err(error)) => return Some((Err(error), gate)),
                            None => return None,
                        }
                    }
                    tokio::select! {
                        item = gate.upstream.next() => match item {
                            Some(Ok(next)) => {
                                if gate.policy.expires_in(&next) <= 0 {
                                    return Some((Ok(gate.empty.clone()), gate));
                                }
                                gate.current = Some(next.clone());
                                return Some((Ok(next), gate));
                            }
                            Some(Err(error)) => return Some((Err(error), gate)),
                            None => {
                                // Upstream gone; keep timing the last value.
                                gate.upstream_done = true;
                                gate.current = Some(value);
                            }
                        },
                        _ = sleep(Duration::from_millis(expires_in as u64)) => {
                            // Re-evaluate: interval policies may extend.
                            gate.current = Some(value);
                        }
                    }
                }
            }
        }
    }))
}
