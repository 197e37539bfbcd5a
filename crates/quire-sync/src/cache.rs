//! TTL read cache with in-flight request coalescing
//!
//! A fan-out read costs one chain request per known publisher, so two
//! callers asking for the same key at the same time must share one fetch.
//! [`ReadCache::get_or_fetch`] returns a fresh stored entry if there is one,
//! joins the fetch already running for the key if there is one, and only
//! otherwise starts a new fetch.
//!
//! Fetches run as spawned tasks: a caller that gives up waiting does not
//! cancel the read for everyone else, and the in-flight slot is always
//! released when the fetch resolves or fails.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};

/// A stored read result
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

type SharedFetch<V> = Shared<BoxFuture<'static, SyncResult<V>>>;

struct InFlight<V> {
    id: u64,
    future: SharedFetch<V>,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    in_flight: HashMap<K, InFlight<V>>,
    /// Bumped by `invalidate` so a fetch started earlier cannot store stale data
    generations: HashMap<K, u64>,
    /// Bumped by `invalidate_all`
    epoch: u64,
    next_fetch_id: u64,
}

impl<K: Eq + Hash, V> CacheState<K, V> {
    fn generation_of(&self, key: &K) -> (u64, u64) {
        (self.epoch, self.generations.get(key).copied().unwrap_or(0))
    }
}

/// TTL cache keyed by `K`
pub struct ReadCache<K, V> {
    ttl: Duration,
    state: Arc<Mutex<CacheState<K, V>>>,
}

impl<K, V> ReadCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                generations: HashMap::new(),
                epoch: 0,
                next_fetch_id: 0,
            })),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        match state.entries.get(key) {
            Some(entry) if entry.is_fresh(self.ttl) => Some(entry.data.clone()),
            Some(_) => {
                state.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `data` for `key`, replacing any previous entry
    pub fn set(&self, key: K, data: V) {
        self.state.lock().entries.insert(
            key,
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for `key`
    ///
    /// A fetch already running for the key keeps running for the callers
    /// that joined it, but its result is not stored and later callers start
    /// a new fetch.
    pub fn invalidate(&self, key: &K) {
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.in_flight.remove(key);
        *state.generations.entry(key.clone()).or_insert(0) += 1;
        trace!(key = ?key, "Invalidated cache entry");
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
        state.epoch += 1;
        debug!("Invalidated all cache entries");
    }

    /// Number of stored entries, fresh or not
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch is currently running for `key`
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.state.lock().in_flight.contains_key(key)
    }

    /// Cached value, joined in-flight fetch, or a new fetch
    ///
    /// `force_refresh` skips the stored entry but still joins a fetch that is
    /// already running. Successful results are stored; failures are not.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, force_refresh: bool, fetch: F) -> SyncResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<V>> + Send + 'static,
    {
        let shared = {
            let mut state = self.state.lock();

            if !force_refresh {
                if let Some(entry) = state.entries.get(&key) {
                    if entry.is_fresh(self.ttl) {
                        trace!(key = ?key, "Cache hit");
                        return Ok(entry.data.clone());
                    }
                }
            }

            if let Some(in_flight) = state.in_flight.get(&key) {
                trace!(key = ?key, "Joining in-flight fetch");
                in_flight.future.clone()
            } else {
                let id = state.next_fetch_id;
                state.next_fetch_id += 1;
                let generation = state.generation_of(&key);
                let future = self.spawn_fetch(key.clone(), id, generation, fetch());
                state.in_flight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        future: future.clone(),
                    },
                );
                debug!(key = ?key, force_refresh, "Starting fetch");
                future
            }
        };

        shared.await
    }

    fn spawn_fetch<Fut>(&self, key: K, id: u64, generation: (u64, u64), fetch: Fut) -> SharedFetch<V>
    where
        Fut: Future<Output = SyncResult<V>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let result = fetch.await;

            let mut state = state.lock();
            if let Ok(data) = &result {
                if state.generation_of(&key) == generation {
                    state.entries.insert(
                        key.clone(),
                        CacheEntry {
                            data: data.clone(),
                            stored_at: Instant::now(),
                        },
                    );
                } else {
                    trace!(key = ?key, "Discarding fetch result invalidated mid-flight");
                }
            }
            if state.in_flight.get(&key).map(|f| f.id) == Some(id) {
                state.in_flight.remove(&key);
            }
            result
        });

        async move { handle.await.unwrap_or(Err(SyncError::WorkerStopped)) }
            .boxed()
            .shared()
    }
}

impl<K, V> std::fmt::Debug for ReadCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReadCache")
            .field("ttl", &self.ttl)
            .field("entries", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = SyncResult<u32>> + Send + use<> {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache: ReadCache<&'static str, u32> = ReadCache::new(Duration::from_secs(30));
        cache.set("likes", 3);
        assert_eq!(cache.get(&"likes"), Some(3));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(&"likes"), Some(3));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"likes"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_coalesce() {
        let cache: ReadCache<&'static str, u32> = ReadCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get_or_fetch("posts", false, || counting_fetch(&calls, 1)),
            cache.get_or_fetch("posts", false, || counting_fetch(&calls, 2)),
        );

        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_in_flight(&"posts"));

        // Served from the stored entry
        let c = cache
            .get_or_fetch("posts", false, || counting_fetch(&calls, 3))
            .await;
        assert_eq!(c.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_bypasses_entry_but_coalesces() {
        let cache: ReadCache<&'static str, u32> = ReadCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));
        cache.set("posts", 1);

        let (a, b) = tokio::join!(
            cache.get_or_fetch("posts", true, || counting_fetch(&calls, 5)),
            cache.get_or_fetch("posts", true, || counting_fetch(&calls, 6)),
        );

        assert_eq!(a.unwrap(), 5);
        assert_eq!(b.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"posts"), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_shared_and_not_stored() {
        let cache: ReadCache<&'static str, u32> = ReadCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>(SyncError::UnknownSchema("0x01".into()))
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("posts", false, failing),
            cache.get_or_fetch("posts", false, failing),
        );
        assert_eq!(a, Err(SyncError::UnknownSchema("0x01".into())));
        assert_eq!(b, a);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_in_flight(&"posts"));
        assert!(cache.get(&"posts").is_none());

        let retry = cache
            .get_or_fetch("posts", false, || counting_fetch(&calls, 9))
            .await;
        assert_eq!(retry.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_fetch_discards_result() {
        let cache: Arc<ReadCache<&'static str, u32>> =
            Arc::new(ReadCache::new(Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let early = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("posts", false, || counting_fetch(&calls, 1))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_in_flight(&"posts"));

        cache.invalidate(&"posts");
        assert!(!cache.is_in_flight(&"posts"));

        assert_eq!(early.await.unwrap().unwrap(), 1);
        assert!(cache.get(&"posts").is_none());

        let fresh = cache
            .get_or_fetch("posts", false, || counting_fetch(&calls, 2))
            .await;
        assert_eq!(fresh.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_all_clears_everything() {
        let cache: ReadCache<u8, u32> = ReadCache::new(Duration::from_secs(30));
        cache.set(1, 10);
        cache.set(2, 20);
        assert_eq!(cache.len(), 2);

        cache.invalidate_all();
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_none());
    }
}
