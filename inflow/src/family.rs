//! Parametrized inflow families with LRU retention.
//!
//! [`LruCache`] is a small, deterministic, access-ordered bounded map:
//! eviction happens synchronously inside `get_or_insert`, walking entries
//! from least-recently-used, with an optional removal listener for
//! caller-managed teardown. [`InflowFamily`] puts it to work mapping
//! parameters to lazily-built [`Inflow`] instances.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::inflow::Inflow;
use crate::replay::lock;

type RemovalListener<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

struct LruEntry<V> {
    value: V,
    seq: u64,
    accessed: Instant,
}

struct LruState<K, V> {
    map: HashMap<K, LruEntry<V>>,
    seq: u64,
}

/// Thread-safe bounded map with access-order eviction.
pub struct LruCache<K, V> {
    max_size: usize,
    expire_after_access: Option<Duration>,
    state: Mutex<LruState<K, V>>,
    on_remove: Mutex<Option<RemovalListener<K, V>>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates the cache.
    ///
    /// `expire_after_access` additionally evicts entries not accessed for
    /// the given duration.
    ///
    /// # Panics
    ///
    /// Panics if `max_size == 0`.
    pub fn new(max_size: usize, expire_after_access: Option<Duration>) -> Self {
        assert!(max_size >= 1, "cache size must be at least 1");
        LruCache {
            max_size,
            expire_after_access,
            state: Mutex::new(LruState { map: HashMap::new(), seq: 0 }),
            on_remove: Mutex::new(None),
        }
    }

    /// Registers a removal observer, invoked (outside the cache lock) for
    /// every evicted or cleared entry.
    pub fn set_removal_listener(&self, listener: impl Fn(&K, &V) + Send + Sync + 'static) {
        *lock(&self.on_remove) = Some(Box::new(listener));
    }

    /// Returns the cached value for `key`, building and inserting it on a
    /// miss.
    ///
    /// A hit moves the entry to the most-recently-used position. After the
    /// lookup, entries expired by access time are evicted (walking from
    /// least-recent, stopping at the first live entry), then entries over
    /// capacity.
    pub fn get_or_insert(&self, key: &K, build: impl FnOnce() -> V) -> V {
        let mut removed = Vec::new();
        let value = {
            let mut state = lock(&self.state);
            state.seq += 1;
            let seq = state.seq;
            let now = Instant::now();

            self.evict_expired(&mut state, now, &mut removed);

            let value = if let Some(entry) = state.map.get_mut(key) {
                entry.seq = seq;
                entry.accessed = now;
                entry.value.clone()
            } else {
                let value = build();
                state
                    .map
                    .insert(key.clone(), LruEntry { value: value.clone(), seq, accessed: now });
                value
            };

            while state.map.len() > self.max_size {
                match take_least_recent(&mut state) {
                    Some(evicted) => removed.push(evicted),
                    None => break,
                }
            }
            value
        };
        self.notify_removed(&removed);
        value
    }

    /// Evicts all entries, notifying the removal observer for each.
    pub fn clear(&self) {
        let removed: Vec<(K, V)> = {
            let mut state = lock(&self.state);
            state.map.drain().map(|(key, entry)| (key, entry.value)).collect()
        };
        self.notify_removed(&removed);
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        lock(&self.state).map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self, state: &mut LruState<K, V>, now: Instant, removed: &mut Vec<(K, V)>) {
        let Some(expire_after) = self.expire_after_access else { return };
        loop {
            let expired = least_recent_key(state).is_some_and(|key| {
                let entry = &state.map[&key];
                now.duration_since(entry.accessed) >= expire_after
            });
            if !expired {
                // Walk stops at the first non-expired entry.
                return;
            }
            match take_least_recent(state) {
                Some(evicted) => removed.push(evicted),
                None => return,
            }
        }
    }

    fn notify_removed(&self, removed: &[(K, V)]) {
        if removed.is_empty() {
            return;
        }
        let listener = lock(&self.on_remove);
        if let Some(listener) = listener.as_ref() {
            for (key, value) in removed {
                listener(key, value);
            }
        }
    }
}

fn least_recent_key<K, V>(state: &LruState<K, V>) -> Option<K>
where
    K: Eq + Hash + Clone,
{
    state
        .map
        .iter()
        .min_by_key(|(_, entry)| entry.seq)
        .map(|(key, _)| key.clone())
}

fn take_least_recent<K, V>(state: &mut LruState<K, V>) -> Option<(K, V)>
where
    K: Eq + Hash + Clone,
{
    let key = least_recent_key(state)?;
    state.map.remove(&key).map(|entry| (key, entry.value))
}

/// Maps parameters to independent [`Inflow`] instances with LRU retention.
///
/// Parameters are used as map keys and must have stable equality and
/// hashing. Building is lazy: the factory runs once per retained
/// parameter; an evicted parameter gets a fresh inflow next time.
pub struct InflowFamily<P, T> {
    factory: Box<dyn Fn(&P) -> Inflow<T> + Send + Sync>,
    cache: LruCache<P, Inflow<T>>,
}

impl<P, T> InflowFamily<P, T>
where
    P: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    /// Default retention: 10 inflows, no access expiry.
    pub fn new(factory: impl Fn(&P) -> Inflow<T> + Send + Sync + 'static) -> Self {
        InflowFamily::with_cache(factory, LruCache::new(10, None))
    }

    /// Family with explicit retention.
    pub fn with_cache(
        factory: impl Fn(&P) -> Inflow<T> + Send + Sync + 'static,
        cache: LruCache<P, Inflow<T>>,
    ) -> Self {
        InflowFamily { factory: Box::new(factory), cache }
    }

    /// Resolves the inflow for `param`, building it on first use.
    pub fn get(&self, param: &P) -> Inflow<T> {
        self.cache.get_or_insert(param, || (self.factory)(param))
    }

    /// Evicts all retained inflows.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Observer for evicted inflows (e.g. to cancel their scopes).
    pub fn set_removal_listener(
        &self,
        listener: impl Fn(&P, &Inflow<T>) + Send + Sync + 'static,
    ) {
        self.cache.set_removal_listener(listener);
    }

    /// Number of retained inflows.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no inflow is retained.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hit_moves_entry_to_most_recent() {
        let cache: LruCache<u32, u32> = LruCache::new(2, None);
        cache.get_or_insert(&1, || 10);
        cache.get_or_insert(&2, || 20);
        // Touch 1, making 2 the eviction candidate.
        cache.get_or_insert(&1, || 99);
        cache.get_or_insert(&3, || 30);

        let rebuilt = Arc::new(AtomicUsize::new(0));
        let marker = rebuilt.clone();
        assert_eq!(cache.get_or_insert(&1, move || { marker.fetch_add(1, Ordering::SeqCst); 0 }), 10);
        assert_eq!(rebuilt.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn capacity_eviction_notifies_listener() {
        let cache: LruCache<u32, u32> = LruCache::new(1, None);
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        cache.set_removal_listener(move |key, value| sink.lock().unwrap().push((*key, *value)));

        cache.get_or_insert(&1, || 10);
        cache.get_or_insert(&2, || 20);

        assert_eq!(*removed.lock().unwrap(), vec![(1, 10)]);
    }

    #[test]
    fn expire_after_access_walk_stops_at_live_entry() {
        let cache: LruCache<u32, u32> = LruCache::new(8, Some(Duration::from_millis(50)));
        cache.get_or_insert(&1, || 10);
        std::thread::sleep(Duration::from_millis(60));
        cache.get_or_insert(&2, || 20);

        // Entry 1 expired and was evicted during the second get.
        assert_eq!(cache.len(), 1);

        let rebuilt = Arc::new(AtomicUsize::new(0));
        let marker = rebuilt.clone();
        cache.get_or_insert(&1, move || { marker.fetch_add(1, Ordering::SeqCst); 11 });
        assert_eq!(rebuilt.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_notifies_all() {
        let cache: LruCache<u32, u32> = LruCache::new(4, None);
        let removed = Arc::new(AtomicUsize::new(0));
        let sink = removed.clone();
        cache.set_removal_listener(move |_, _| { sink.fetch_add(1, Ordering::SeqCst); });

        cache.get_or_insert(&1, || 1);
        cache.get_or_insert(&2, || 2);
        cache.clear();

        assert_eq!(removed.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn zero_capacity_is_rejected() {
        let _: LruCache<u32, u32> = LruCache::new(0, None);
    }
}
