// Keyed stale-while-revalidate cache
// Backs the catalog, ledger and availability caches. Each key holds the last fetched value
// and a staleness flag; concurrent revalidations of one key collapse into a single fetch.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::config::{CacheConfig, RetryConfig};
use crate::error::ApiError;

/// Loads the value for a key from the remote authority.
pub type Fetcher<K, V> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, ApiError>> + Send + Sync>;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ApiError>>>;

pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub fetch_count: AtomicUsize,
    pub deduplicated_count: AtomicUsize,
    pub abandoned_count: AtomicUsize,
    pub failure_count: AtomicUsize,
    pub invalidated_count: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub hit_count: usize,
    pub miss_count: usize,
    pub fetch_count: usize,
    pub deduplicated_count: usize,
    pub abandoned_count: usize,
    pub failure_count: usize,
    pub invalidated_count: usize,
    pub items_count: usize,
    pub in_flight_count: usize,
}

/// A cached value as seen by a reader.
#[derive(Debug, Clone)]
pub struct Cached<V> {
    pub value: V,
    pub stale: bool,
    pub fetched_at: Instant,
}

struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
    stale: bool,
}

impl<V> CacheEntry<V> {
    fn is_stale(&self, stale_after: Option<Duration>) -> bool {
        self.stale || stale_after.map_or(false, |ttl| self.fetched_at.elapsed() > ttl)
    }
}

struct InFlight<V> {
    id: u64,
    fetch: SharedFetch<V>,
}

struct Inner<K, V> {
    name: &'static str,
    entries: DashMap<K, CacheEntry<V>>,
    in_flight: DashMap<K, InFlight<V>>,
    fetcher: Fetcher<K, V>,
    config: CacheConfig,
    retry: RetryConfig,
    next_fetch_id: AtomicU64,
    stats: CacheStats,
}

pub struct KeyedCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for KeyedCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        config: CacheConfig,
        retry: RetryConfig,
        fetcher: Fetcher<K, V>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                fetcher,
                config,
                retry,
                next_fetch_id: AtomicU64::new(1),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// The cached value without any I/O, stale or not.
    pub fn peek(&self, key: &K) -> Option<Cached<V>> {
        self.inner.entries.get(key).map(|entry| Cached {
            value: entry.value.clone(),
            stale: entry.is_stale(self.inner.config.stale_after),
            fetched_at: entry.fetched_at,
        })
    }

    /// Stale-while-revalidate read: returns whatever is cached right away and
    /// schedules a revalidation when the entry is missing or stale.
    pub fn read(&self, key: &K) -> Option<Cached<V>> {
        let cached = self.peek(key);
        match &cached {
            Some(c) if !c.stale => {
                self.inner.stats.hit_count.fetch_add(1, Ordering::SeqCst);
            }
            _ => {
                self.inner.stats.miss_count.fetch_add(1, Ordering::SeqCst);
                self.revalidate_in_background(key);
            }
        }
        cached
    }

    /// A fresh value: served from the cache when it is not stale, fetched otherwise.
    pub async fn get(&self, key: &K) -> Result<V, ApiError> {
        if let Some(cached) = self.peek(key).filter(|c| !c.stale) {
            self.inner.stats.hit_count.fetch_add(1, Ordering::SeqCst);
            return Ok(cached.value);
        }

        self.inner.stats.miss_count.fetch_add(1, Ordering::SeqCst);
        self.revalidate(key).await
    }

    /// Fetch the key, joining a fetch already in flight for it.
    pub async fn revalidate(&self, key: &K) -> Result<V, ApiError> {
        self.join_or_start(key).await
    }

    /// Fire-and-forget revalidation. The fetch runs on its own task, so it
    /// completes even when nobody waits for it.
    pub fn revalidate_in_background(&self, key: &K) {
        drop(self.join_or_start(key));
    }

    /// Mark every entry whose key satisfies `predicate` as stale and schedule
    /// its revalidation. Returns the number of entries invalidated.
    pub fn invalidate<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let keys: Vec<K> = self
            .inner
            .entries
            .iter_mut()
            .filter(|entry| predicate(entry.key()))
            .map(|mut entry| {
                entry.stale = true;
                entry.key().clone()
            })
            .collect();

        self.inner
            .stats
            .invalidated_count
            .fetch_add(keys.len(), Ordering::SeqCst);
        debug!(cache = self.inner.name, count = keys.len(), "invalidated entries");

        for key in &keys {
            self.revalidate_in_background(key);
        }
        keys.len()
    }

    /// Detach in-flight fetches for matching keys. They still complete, and
    /// their waiters still receive the outcome, but nothing is written back.
    pub fn abandon<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let before = self.inner.in_flight.len();
        self.inner.in_flight.retain(|key, _| !predicate(key));
        let abandoned = before.saturating_sub(self.inner.in_flight.len());
        if abandoned > 0 {
            debug!(cache = self.inner.name, abandoned, "abandoned in-flight fetches");
        }
        abandoned
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.abandon(|k| k == key);
        self.inner.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn clear(&self) {
        self.abandon(|_| true);
        self.inner.entries.clear();
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn is_fetching(&self, key: &K) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    pub fn stats(&self) -> CacheStatsReport {
        let stats = &self.inner.stats;
        CacheStatsReport {
            hit_count: stats.hit_count.load(Ordering::SeqCst),
            miss_count: stats.miss_count.load(Ordering::SeqCst),
            fetch_count: stats.fetch_count.load(Ordering::SeqCst),
            deduplicated_count: stats.deduplicated_count.load(Ordering::SeqCst),
            abandoned_count: stats.abandoned_count.load(Ordering::SeqCst),
            failure_count: stats.failure_count.load(Ordering::SeqCst),
            invalidated_count: stats.invalidated_count.load(Ordering::SeqCst),
            items_count: self.inner.entries.len(),
            in_flight_count: self.inner.in_flight.len(),
        }
    }

    fn join_or_start(&self, key: &K) -> SharedFetch<V> {
        match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                self.inner
                    .stats
                    .deduplicated_count
                    .fetch_add(1, Ordering::SeqCst);
                existing.get().fetch.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.inner.next_fetch_id.fetch_add(1, Ordering::SeqCst);
                let fetch = Self::fetch_and_apply(self.inner.clone(), key.clone(), id)
                    .boxed()
                    .shared();
                slot.insert(InFlight {
                    id,
                    fetch: fetch.clone(),
                });

                // drive the fetch independently of whoever asked for it
                tokio::spawn(fetch.clone().map(|_| ()));
                fetch
            }
        }
    }

    async fn fetch_and_apply(inner: Arc<Inner<K, V>>, key: K, id: u64) -> Result<V, ApiError> {
        debug!(cache = inner.name, ?key, "fetch started");
        let result = Self::fetch_with_retry(&inner, &key).await;

        // only the fetch still registered for the key may write it back
        let current = inner
            .in_flight
            .remove_if(&key, |_, in_flight| in_flight.id == id)
            .is_some();

        if !current {
            inner.stats.abandoned_count.fetch_add(1, Ordering::SeqCst);
            debug!(cache = inner.name, ?key, "fetch abandoned, result discarded");
            return result;
        }

        match &result {
            Ok(value) => {
                inner.entries.insert(
                    key.clone(),
                    CacheEntry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                        stale: false,
                    },
                );
                debug!(cache = inner.name, ?key, "fetch applied");
            }
            Err(e) => {
                // keep serving the previous value, still marked stale
                inner.stats.failure_count.fetch_add(1, Ordering::SeqCst);
                warn!(cache = inner.name, ?key, error = %e, "fetch failed");
            }
        }
        result
    }

    async fn fetch_with_retry(inner: &Inner<K, V>, key: &K) -> Result<V, ApiError> {
        let mut attempt = 0;
        loop {
            inner.stats.fetch_count.fetch_add(1, Ordering::SeqCst);
            match (inner.fetcher)(key.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < inner.retry.max_retries => {
                    let backoff = inner.retry.backoff(attempt);
                    warn!(
                        cache = inner.name,
                        ?key,
                        error = %e,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
