// Copyright 2026 rowcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    borrow::Cow,
    fmt::Debug,
    future::Future,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use equivalent::Equivalent;
use parking_lot::Mutex;
use rowcache_common::{
    error::{Error, Result},
    hasher::XxHash64Builder,
    metrics::{registry::noop::NoopMetricsRegistry, BoxedRegistry, Metrics},
    spawn::{SpawnHandle, Spawner},
};
use tokio::time::Instant;

use crate::{
    reaper::Reaper,
    segment::{Lookup, Probe, RecencyPolicy, Segment},
};

/// Default segment count.
pub const DEFAULT_SHARDS: usize = 256;
/// Default max entry count of each segment.
pub const DEFAULT_SHARD_CAPACITY: usize = 10_000;
/// Default interval between two expiry sweeps of a segment.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(3600);

/// Builder for [`Cache`].
pub struct CacheBuilder<K, V, S = XxHash64Builder> {
    name: Cow<'static, str>,
    shards: usize,
    shard_capacity: usize,
    reap_interval: Duration,
    recency_policy: RecencyPolicy,
    single_flight: bool,
    hash_builder: S,
    registry: BoxedRegistry,
    spawner: Option<Spawner>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V> {
    /// Create a cache builder with the default settings.
    pub fn new() -> Self {
        Self {
            name: "rowcache".into(),
            shards: DEFAULT_SHARDS,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            reap_interval: DEFAULT_REAP_INTERVAL,
            recency_policy: RecencyPolicy::default(),
            single_flight: true,
            hash_builder: XxHash64Builder::default(),
            registry: Box::new(NoopMetricsRegistry),
            spawner: None,
            _marker: PhantomData,
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Set the name of the cache. It is used as the `name` label of the metrics.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the segment count. It is fixed for the lifetime of the cache.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the max entry count of each segment.
    pub fn with_shard_capacity(mut self, shard_capacity: usize) -> Self {
        self.shard_capacity = shard_capacity;
        self
    }

    /// Set the interval between two expiry sweeps of a segment.
    pub fn with_reap_interval(mut self, reap_interval: Duration) -> Self {
        self.reap_interval = reap_interval;
        self
    }

    /// Set which operations refresh the recency of an entry.
    pub fn with_recency_policy(mut self, recency_policy: RecencyPolicy) -> Self {
        self.recency_policy = recency_policy;
        self
    }

    /// Enable or disable fetch deduplication of concurrent misses on the same key.
    pub fn with_single_flight(mut self, single_flight: bool) -> Self {
        self.single_flight = single_flight;
        self
    }

    /// Set the hash builder that routes keys to segments.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> CacheBuilder<K, V, OS>
    where
        OS: BuildHasher + Send + Sync + 'static,
    {
        CacheBuilder {
            name: self.name,
            shards: self.shards,
            shard_capacity: self.shard_capacity,
            reap_interval: self.reap_interval,
            recency_policy: self.recency_policy,
            single_flight: self.single_flight,
            hash_builder,
            registry: self.registry,
            spawner: self.spawner,
            _marker: PhantomData,
        }
    }

    /// Set the metrics registry.
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the spawner for the reapers. The runtime of the caller is used if not set.
    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Build the cache and start a reaper for each segment.
    pub fn build(self) -> Result<Cache<K, V, S>> {
        if self.shards == 0 {
            return Err(Error::config("shard count must be greater than zero"));
        }
        if self.shard_capacity == 0 {
            return Err(Error::config("shard capacity must be greater than zero"));
        }
        if self.reap_interval.is_zero() {
            return Err(Error::config("reap interval must be greater than zero"));
        }
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Spawner::try_current()?,
        };

        let metrics = Arc::new(Metrics::new(self.name.clone(), self.registry.as_ref()));

        let segments = (0..self.shards)
            .map(|id| {
                Arc::new(Mutex::new(Segment::new(
                    id,
                    self.shard_capacity,
                    self.recency_policy,
                    metrics.clone(),
                )))
            })
            .collect::<Vec<_>>();

        let reapers = segments
            .iter()
            .map(|segment| spawner.spawn(Reaper::new(segment, self.reap_interval).run()))
            .collect::<Vec<_>>();

        tracing::info!(
            name = %self.name,
            shards = self.shards,
            shard_capacity = self.shard_capacity,
            reap_interval = ?self.reap_interval,
            "[cache]: cache built"
        );

        Ok(Cache {
            inner: Arc::new(CacheInner {
                name: self.name,
                segments,
                hash_builder: self.hash_builder,
                shard_capacity: self.shard_capacity,
                single_flight: self.single_flight,
                closed: AtomicBool::new(false),
                reapers: Mutex::new(reapers),
                metrics,
            }),
        })
    }
}

struct CacheInner<K, V, S> {
    name: Cow<'static, str>,
    segments: Vec<Arc<Mutex<Segment<K, V>>>>,
    hash_builder: S,
    shard_capacity: usize,
    single_flight: bool,
    closed: AtomicBool,
    reapers: Mutex<Vec<SpawnHandle<()>>>,
    metrics: Arc<Metrics>,
}

/// A sharded lru cache with per-entry ttl and populate-on-miss lookups.
///
/// Each key is routed to exactly one segment by its hash. Operations on different segments never contend.
///
/// The cache is cheap to clone. Dropping the last clone without [`Cache::destroy`] stops the reapers as well.
pub struct Cache<K, V, S = XxHash64Builder> {
    inner: Arc<CacheInner<K, V, S>>,
}

impl<K, V, S> Clone for Cache<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, S> Debug for Cache<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("shards", &self.inner.segments.len())
            .field("shard_capacity", &self.inner.shard_capacity)
            .field("single_flight", &self.inner.single_flight)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

struct InflightGuard<'a, K, V, Q>
where
    K: Hash + Eq + Clone,
    V: Clone,
    Q: Hash + Equivalent<K> + ?Sized,
{
    segment: &'a Mutex<Segment<K, V>>,
    key: &'a Q,
    id: Option<u64>,
}

impl<K, V, Q> Drop for InflightGuard<'_, K, V, Q>
where
    K: Hash + Eq + Clone,
    V: Clone,
    Q: Hash + Equivalent<K> + ?Sized,
{
    fn drop(&mut self) {
        // The fetch is cancelled. Closing the notifiers lets the waiters retry.
        if let Some(id) = self.id.take() {
            let notifiers = self.segment.lock().abandon(self.key, id);
            drop(notifiers);
        }
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Look up `key` in its segment.
    pub fn get<Q>(&self, key: &Q) -> Result<Lookup<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        if self.is_closed() {
            return Err(Error::closed());
        }
        self.segment(key).lock().get(key, Instant::now())
    }

    /// Insert or replace `key` with a ttl in seconds. `0` means the entry never expires.
    pub fn set(&self, key: K, value: V, ttl_secs: u64) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed());
        }
        self.segment(&key).lock().set(key, value, ttl_secs, Instant::now())
    }

    /// Remove `key` regardless of its ttl.
    pub fn remove<Q>(&self, key: &Q) -> Result<Option<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        if self.is_closed() {
            return Err(Error::closed());
        }
        self.segment(key).lock().remove(key)
    }

    /// Return the cached value of `key`, or call `fetch` and cache its value for `ttl_secs`.
    ///
    /// `fetch` is only called on a miss, and never while a segment lock is held. A failed fetch is returned as an
    /// [`ErrorKind::External`](rowcache_common::error::ErrorKind::External) error with the fetch error as its source,
    /// and nothing is cached.
    ///
    /// With single-flight enabled, concurrent misses on the same key share one fetch. If the fetching caller is
    /// cancelled, the waiting callers start over.
    pub async fn query_cache<Q, F, FU, ER>(&self, key: &Q, ttl_secs: u64, fetch: F) -> Result<V>
    where
        Q: Hash + Equivalent<K> + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> FU,
        FU: Future<Output = std::result::Result<V, ER>>,
        ER: Into<anyhow::Error>,
    {
        let segment = self.segment(key);

        let id = loop {
            if self.is_closed() {
                return Err(Error::closed());
            }
            let probe = segment.lock().probe(key, Instant::now(), self.inner.single_flight)?;
            match probe {
                Probe::Hit(value) => return Ok(value),
                Probe::Lead(id) => break id,
                Probe::Wait(waiter) => match waiter.await {
                    Ok(res) => return res,
                    // The fetching caller is gone, or the cache has been destroyed.
                    Err(_) => continue,
                },
            }
        };

        let mut guard = InflightGuard { segment, key, id };

        self.inner.metrics.cache_fetch.increase(1);
        let start = Instant::now();
        let res = fetch().await;
        self.inner
            .metrics
            .cache_fetch_duration
            .record(start.elapsed().as_secs_f64());

        let id = guard.id.take();
        drop(guard);

        match res {
            Ok(value) => {
                let notifiers = segment
                    .lock()
                    .fill(key.to_owned(), value.clone(), ttl_secs, Instant::now(), id)?;
                for notifier in notifiers {
                    let _ = notifier.send(Ok(value.clone()));
                }
                Ok(value)
            }
            Err(e) => {
                let err = Error::external(e);
                self.inner.metrics.cache_fetch_error.increase(1);
                tracing::debug!(name = %self.inner.name, ?err, "[cache]: fetch failed");
                let notifiers = id.map(|id| segment.lock().abandon(key, id)).unwrap_or_default();
                for notifier in notifiers {
                    let _ = notifier.send(Err(err.clone()));
                }
                Err(err)
            }
        }
    }

    /// Destroy every segment and wait for all reapers to stop.
    ///
    /// After it returns, every operation fails with a closed error. Destroying a destroyed cache is a no-op.
    ///
    /// Only the first caller waits for the reapers. Every reaper is awaited even if one fails to join, and the first
    /// join error is returned. A concurrent or later caller returns `Ok(())` at once, possibly before the reapers
    /// have stopped.
    pub async fn destroy(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for segment in self.inner.segments.iter() {
            segment.lock().destroy();
        }

        let reapers = std::mem::take(&mut *self.inner.reapers.lock());
        let mut res = Ok(());
        for reaper in reapers {
            if let Err(e) = reaper.await {
                tracing::warn!(name = %self.inner.name, ?e, "[cache]: reaper failed to join");
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }

        tracing::info!(name = %self.inner.name, "[cache]: cache destroyed");
        res
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Segment count.
    pub fn shards(&self) -> usize {
        self.inner.segments.len()
    }

    /// Max entry count of each segment.
    pub fn shard_capacity(&self) -> usize {
        self.inner.shard_capacity
    }

    /// Max entry count of the cache.
    pub fn capacity(&self) -> usize {
        self.inner.segments.len() * self.inner.shard_capacity
    }

    /// Count of cached entries.
    pub fn len(&self) -> usize {
        self.inner.segments.iter().map(|s| s.lock().len()).sum()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the cache has been destroyed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Metrics of the cache.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    fn segment<Q>(&self, key: &Q) -> &Mutex<Segment<K, V>>
    where
        Q: Hash + ?Sized,
    {
        let hash = self.inner.hash_builder.hash_one(key);
        &self.inner.segments[hash as usize % self.inner.segments.len()]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures_util::future::join_all;
    use rowcache_common::{error::ErrorKind, hasher::IdentityHasher};

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Cache<u64, u64>>();
        is_send_sync_static::<Cache<String, Arc<Vec<u8>>, IdentityHasher>>();
    }

    fn identity_cache(shards: usize, shard_capacity: usize) -> Cache<u64, u64, IdentityHasher> {
        CacheBuilder::new()
            .with_shards(shards)
            .with_shard_capacity(shard_capacity)
            .with_hash_builder(IdentityHasher::default())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_outside_runtime() {
        let err = CacheBuilder::<u64, u64>::new().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test_log::test(tokio::test)]
    async fn test_build_validation() {
        let err = CacheBuilder::<u64, u64>::new().with_shards(0).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = CacheBuilder::<u64, u64>::new().with_shard_capacity(0).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = CacheBuilder::<u64, u64>::new()
            .with_reap_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test_log::test(tokio::test)]
    async fn test_defaults() {
        let cache = CacheBuilder::<String, u64>::new().build().unwrap();
        assert_eq!(cache.shards(), 256);
        assert_eq!(cache.shard_capacity(), 10_000);
        assert_eq!(cache.capacity(), 2_560_000);
        assert!(cache.is_empty());
        cache.destroy().await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_route_by_hash() {
        let cache = identity_cache(4, 1);

        cache.set(1, 1, 0).unwrap();
        cache.set(0, 0, 0).unwrap();
        // `4` shares the segment of `0` and evicts it.
        cache.set(4, 4, 0).unwrap();

        assert_eq!(cache.get(&0u64).unwrap(), Lookup::NotFound);
        assert_eq!(cache.get(&1u64).unwrap(), Lookup::Found(1));
        assert_eq!(cache.get(&4u64).unwrap(), Lookup::Found(4));
        assert_eq!(cache.len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_set_get_remove() {
        let cache = CacheBuilder::<String, u64>::new().with_shards(4).build().unwrap();

        cache.set("a".to_string(), 1u64, 0).unwrap();
        assert_eq!(cache.get("a").unwrap(), Lookup::Found(1));
        assert_eq!(cache.remove("a").unwrap(), Some(1));
        assert_eq!(cache.get("a").unwrap(), Lookup::NotFound);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_expire() {
        let cache = CacheBuilder::<String, u64>::new().with_shards(4).build().unwrap();

        cache.set("x".to_string(), 1u64, 1).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("x").unwrap(), Lookup::Expired);
        assert_eq!(cache.get("x").unwrap(), Lookup::NotFound);
    }

    #[test_log::test(tokio::test)]
    async fn test_query_cache_hit_skips_fetch() {
        let cache = CacheBuilder::<String, u64>::new().with_shards(4).build().unwrap();
        let fetches = AtomicUsize::new(0);

        for _ in 0..4 {
            let v = cache
                .query_cache("k", 0, || {
                    fetches.fetch_add(1, Ordering::Relaxed);
                    async { Ok::<_, std::io::Error>(42u64) }
                })
                .await
                .unwrap();
            assert_eq!(v, 42);
        }
        assert_eq!(fetches.load(Ordering::Relaxed), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_query_cache_refetch_after_expire() {
        let cache = CacheBuilder::<String, u64>::new().with_shards(4).build().unwrap();
        let fetches = AtomicUsize::new(0);

        let fetch = || {
            let n = fetches.fetch_add(1, Ordering::Relaxed) as u64;
            async move { Ok::<_, std::io::Error>(n) }
        };

        assert_eq!(cache.query_cache("k", 1, fetch).await.unwrap(), 0);
        assert_eq!(cache.query_cache("k", 1, fetch).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.query_cache("k", 1, fetch).await.unwrap(), 1);
        assert_eq!(fetches.load(Ordering::Relaxed), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_query_cache_error_not_cached() {
        let cache = CacheBuilder::<String, u64>::new().with_shards(4).build().unwrap();

        let err = cache
            .query_cache("k", 0, || async {
                Err::<u64, _>(std::io::Error::new(std::io::ErrorKind::TimedOut, "store timeout"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        let source = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(source.kind(), std::io::ErrorKind::TimedOut);

        assert_eq!(cache.get("k").unwrap(), Lookup::NotFound);
        assert!(cache.is_empty());

        let v = cache
            .query_cache("k", 0, || async { Ok::<_, std::io::Error>(1) })
            .await
            .unwrap();
        assert_eq!(v, 1);
    }

    async fn concurrent_misses(single_flight: bool) -> (Vec<Result<u64>>, usize) {
        let cache = CacheBuilder::<String, u64>::new()
            .with_shards(4)
            .with_single_flight(single_flight)
            .build()
            .unwrap();
        let fetches = AtomicUsize::new(0);

        let res = join_all((0..16).map(|_| {
            cache.query_cache("hot", 0, || {
                fetches.fetch_add(1, Ordering::Relaxed);
                async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, std::io::Error>(7u64)
                }
            })
        }))
        .await;

        (res, fetches.load(Ordering::Relaxed))
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_single_flight() {
        let (res, fetches) = concurrent_misses(true).await;
        assert_eq!(fetches, 1);
        assert!(res.into_iter().all(|r| r.unwrap() == 7));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_without_single_flight() {
        let (res, fetches) = concurrent_misses(false).await;
        assert_eq!(fetches, 16);
        assert!(res.into_iter().all(|r| r.unwrap() == 7));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_single_flight_error_fan_out() {
        let cache = CacheBuilder::<String, u64>::new().with_shards(4).build().unwrap();
        let fetches = AtomicUsize::new(0);

        let res = join_all((0..8).map(|_| {
            cache.query_cache("hot", 0, || {
                fetches.fetch_add(1, Ordering::Relaxed);
                async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Err::<u64, _>(std::io::Error::other("boom"))
                }
            })
        }))
        .await;

        assert_eq!(fetches.load(Ordering::Relaxed), 1);
        for r in res {
            let err = r.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::External);
            assert!(err.downcast_ref::<std::io::Error>().is_some());
        }
        assert!(cache.is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_waiter_retries_after_leader_cancelled() {
        let cache = CacheBuilder::<u64, u64>::new().with_shards(4).build().unwrap();

        let c = cache.clone();
        let leader = tokio::spawn(async move {
            c.query_cache(&1u64, 0, std::future::pending::<std::result::Result<u64, std::io::Error>>)
                .await
        });
        tokio::task::yield_now().await;

        let c = cache.clone();
        let waiter = tokio::spawn(async move {
            c.query_cache(&1u64, 0, || async { Ok::<_, std::io::Error>(42) }).await
        });
        tokio::task::yield_now().await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        assert_eq!(waiter.await.unwrap().unwrap(), 42);
        assert_eq!(cache.get(&1u64).unwrap(), Lookup::Found(42));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_reaper_sweeps_cache() {
        let cache = CacheBuilder::<u64, u64>::new()
            .with_shards(4)
            .with_reap_interval(Duration::from_secs(10))
            .build()
            .unwrap();

        for i in 0..32u64 {
            cache.set(i, i, if i % 2 == 0 { 1 } else { 0 }).unwrap();
        }
        assert_eq!(cache.len(), 32);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 16);

        cache.destroy().await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_destroy() {
        let cache = identity_cache(4, 4);
        cache.set(1, 1, 0).unwrap();

        cache.destroy().await.unwrap();
        assert!(cache.is_closed());
        assert!(cache.is_empty());
        assert!(cache.inner.reapers.lock().is_empty());

        assert!(cache.get(&1u64).unwrap_err().is_closed());
        assert!(cache.set(1, 1, 0).unwrap_err().is_closed());
        assert!(cache.remove(&1u64).unwrap_err().is_closed());
        let err = cache
            .query_cache(&1u64, 0, || async { Ok::<_, std::io::Error>(1) })
            .await
            .unwrap_err();
        assert!(err.is_closed());

        // Destroying again is a no-op.
        cache.destroy().await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_destroy_joins_every_reaper() {
        let cache = identity_cache(4, 4);
        cache.inner.reapers.lock()[0].abort();

        let err = cache.destroy().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Join);
        assert!(cache.inner.reapers.lock().is_empty());
        assert!(cache.inner.segments.iter().all(|s| s.lock().is_closed()));

        // Later callers return at once.
        cache.destroy().await.unwrap();
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_query_cache_huge_ttl() {
        let cache = identity_cache(4, 4);

        let v = cache
            .query_cache(&1u64, u64::MAX, || async { Ok::<_, std::io::Error>(1) })
            .await
            .unwrap();
        assert_eq!(v, 1);

        tokio::time::advance(Duration::from_secs(30 * 24 * 3600)).await;
        assert_eq!(cache.get(&1u64).unwrap(), Lookup::Found(1));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_destroy_releases_waiters() {
        let cache = CacheBuilder::<u64, u64>::new().with_shards(4).build().unwrap();

        let c = cache.clone();
        let leader = tokio::spawn(async move {
            c.query_cache(&1u64, 0, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, std::io::Error>(1)
            })
            .await
        });
        tokio::task::yield_now().await;

        let c = cache.clone();
        let waiter = tokio::spawn(async move {
            c.query_cache(&1u64, 0, || async { Ok::<_, std::io::Error>(2) }).await
        });
        tokio::task::yield_now().await;

        cache.destroy().await.unwrap();

        assert!(waiter.await.unwrap().unwrap_err().is_closed());
        // The fetch of the leader completes, but it cannot be stored any more.
        assert!(leader.await.unwrap().unwrap_err().is_closed());
    }
}
