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

use std::{fmt::Debug, hash::BuildHasher, sync::Arc, time::Duration};

use rowcache_common::{
    error::Result,
    hasher::XxHash64Builder,
    metrics::{BoxedRegistry, Metrics},
    spawn::Spawner,
};
use rowcache_memory::{Cache, CacheBuilder, Lookup, RecencyPolicy};

use crate::{config::QueryCacheConfig, row::ResultSet, store::QueryExecutor};

/// Builder for [`QueryCache`].
pub struct QueryCacheBuilder<E, S = XxHash64Builder> {
    executor: E,
    builder: CacheBuilder<String, Arc<ResultSet>, S>,
}

impl<E> QueryCacheBuilder<E>
where
    E: QueryExecutor,
{
    /// Create a builder with the default settings in front of `executor`.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            builder: CacheBuilder::new(),
        }
    }

    /// Create a builder in front of `executor` with the settings of `config`.
    pub fn from_config(executor: E, config: &QueryCacheConfig) -> Self {
        Self::new(executor)
            .with_name(config.name.clone())
            .with_shards(config.shards)
            .with_shard_capacity(config.shard_capacity)
            .with_reap_interval(config.reap_interval())
            .with_recency_policy(config.recency_policy)
            .with_single_flight(config.single_flight)
    }
}

impl<E, S> QueryCacheBuilder<E, S>
where
    E: QueryExecutor,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Set the name of the cache. It is used as the `name` label of the metrics.
    ///
    /// Default: `rowcache`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.builder = self.builder.with_name(name.into());
        self
    }

    /// Set the segment count. Each key is routed to one segment by its hash, and operations on different segments
    /// never contend.
    ///
    /// Default: `256`.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.builder = self.builder.with_shards(shards);
        self
    }

    /// Set the max entry count of each segment.
    ///
    /// Default: `10000`.
    pub fn with_shard_capacity(mut self, shard_capacity: usize) -> Self {
        self.builder = self.builder.with_shard_capacity(shard_capacity);
        self
    }

    /// Set the interval between two expiry sweeps of a segment.
    ///
    /// Default: one hour.
    pub fn with_reap_interval(mut self, reap_interval: Duration) -> Self {
        self.builder = self.builder.with_reap_interval(reap_interval);
        self
    }

    /// Set which operations refresh the recency of an entry.
    ///
    /// Default: [`RecencyPolicy::WriteOnly`].
    pub fn with_recency_policy(mut self, recency_policy: RecencyPolicy) -> Self {
        self.builder = self.builder.with_recency_policy(recency_policy);
        self
    }

    /// Share one backing store query among concurrent misses on the same key.
    ///
    /// Default: `true`.
    pub fn with_single_flight(mut self, single_flight: bool) -> Self {
        self.builder = self.builder.with_single_flight(single_flight);
        self
    }

    /// Set the hash builder that routes keys to segments.
    ///
    /// Default: xxhash64 with seed `0`.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> QueryCacheBuilder<E, OS>
    where
        OS: BuildHasher + Send + Sync + 'static,
    {
        QueryCacheBuilder {
            executor: self.executor,
            builder: self.builder.with_hash_builder(hash_builder),
        }
    }

    /// Set the metrics registry.
    ///
    /// Default: no metrics are exported.
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.builder = self.builder.with_metrics_registry(registry);
        self
    }

    /// Set the spawner for the reapers.
    ///
    /// Default: the runtime of the caller of [`QueryCacheBuilder::build`].
    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.builder = self.builder.with_spawner(spawner);
        self
    }

    /// Build the cache.
    pub fn build(self) -> Result<QueryCache<E, S>> {
        let cache = self.builder.build()?;
        Ok(QueryCache {
            executor: Arc::new(self.executor),
            cache,
        })
    }
}

/// A result cache in front of a backing store.
///
/// Results are keyed by a caller-chosen key, not by the query command, so one command may be cached under several
/// keys and vice versa.
pub struct QueryCache<E, S = XxHash64Builder> {
    executor: Arc<E>,
    cache: Cache<String, Arc<ResultSet>, S>,
}

impl<E, S> Clone for QueryCache<E, S> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<E, S> Debug for QueryCache<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache").field("cache", &self.cache).finish()
    }
}

impl<E, S> QueryCache<E, S>
where
    E: QueryExecutor,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Return the cached result of `key`, or run `command` on the backing store and cache its result for
    /// `ttl_secs` seconds. `0` means the result never expires.
    ///
    /// A backing store error is returned as an
    /// [`ErrorKind::External`](rowcache_common::error::ErrorKind::External) error and nothing is cached. The
    /// original error can be recovered with [`Error::downcast_ref`](rowcache_common::error::Error::downcast_ref).
    pub async fn query_cache(&self, key: &str, command: &str, ttl_secs: u64) -> Result<Arc<ResultSet>> {
        self.cache
            .query_cache(key, ttl_secs, || async move {
                tracing::trace!(key, command, "[cache]: query backing store");
                self.executor.query(command).await.map(Arc::new)
            })
            .await
    }

    /// Look up the cached result of `key` without touching the backing store.
    pub fn get(&self, key: &str) -> Result<Lookup<Arc<ResultSet>>> {
        self.cache.get(key)
    }

    /// Cache `rows` under `key` for `ttl_secs` seconds. `0` means the result never expires.
    pub fn set(&self, key: impl Into<String>, rows: ResultSet, ttl_secs: u64) -> Result<()> {
        self.cache.set(key.into(), Arc::new(rows), ttl_secs)
    }

    /// Drop the cached result of `key`. Returns `true` if there was one.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        self.cache.remove(key).map(|rows| rows.is_some())
    }

    /// Drop every cached result and stop the reapers.
    ///
    /// Every later operation fails with a closed error. Destroying twice is a no-op.
    pub async fn destroy(&self) -> Result<()> {
        self.cache.destroy().await
    }

    /// Returns `true` once the cache has been destroyed.
    pub fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }

    /// The backing store.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The underlying sharded cache.
    pub fn cache(&self) -> &Cache<String, Arc<ResultSet>, S> {
        &self.cache
    }

    /// Metrics of the cache.
    pub fn metrics(&self) -> &Arc<Metrics> {
        self.cache.metrics()
    }
}
