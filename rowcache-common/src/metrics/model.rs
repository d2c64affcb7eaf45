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

use std::borrow::Cow;

use super::{BoxedCounter, BoxedGauge, BoxedHistogram, RegistryOps};

/// Metrics of a rowcache instance.
///
/// All metrics are labeled with the cache name, so multiple caches can share one registry.
#[derive(Debug)]
pub struct Metrics {
    /// Lookups that found a live entry.
    pub cache_hit: BoxedCounter,
    /// Lookups that found nothing.
    pub cache_miss: BoxedCounter,
    /// Lookups that found an expired entry and dropped it.
    pub cache_expire: BoxedCounter,
    /// Insertions of new keys.
    pub cache_insert: BoxedCounter,
    /// Insertions that replaced an existing key.
    pub cache_replace: BoxedCounter,
    /// Entries evicted by the lru policy.
    pub cache_evict: BoxedCounter,
    /// Entries removed explicitly.
    pub cache_remove: BoxedCounter,
    /// Entries removed by the reapers.
    pub cache_reap: BoxedCounter,
    /// Backing store fetches issued on a miss.
    pub cache_fetch: BoxedCounter,
    /// Backing store fetches that failed.
    pub cache_fetch_error: BoxedCounter,
    /// Misses that joined an inflight fetch instead of issuing their own.
    pub cache_wait: BoxedCounter,

    /// Cached entry count.
    pub cache_usage: BoxedGauge,

    /// Backing store fetch duration in seconds.
    pub cache_fetch_duration: BoxedHistogram,
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new<R>(name: impl Into<Cow<'static, str>>, registry: &R) -> Self
    where
        R: RegistryOps + ?Sized,
    {
        let name = name.into();

        let rowcache_op_total =
            registry.register_counter_vec("rowcache_op_total".into(), "rowcache operations".into(), &["name", "op"]);
        let rowcache_usage =
            registry.register_gauge_vec("rowcache_usage".into(), "rowcache cached entries".into(), &["name"]);
        let rowcache_fetch_duration = registry.register_histogram_vec(
            "rowcache_fetch_duration".into(),
            "rowcache backing store fetch durations".into(),
            &["name"],
        );

        let op = |op: &'static str| rowcache_op_total.counter(&[name.clone(), op.into()]);

        Self {
            cache_hit: op("hit"),
            cache_miss: op("miss"),
            cache_expire: op("expire"),
            cache_insert: op("insert"),
            cache_replace: op("replace"),
            cache_evict: op("evict"),
            cache_remove: op("remove"),
            cache_reap: op("reap"),
            cache_fetch: op("fetch"),
            cache_fetch_error: op("fetch_error"),
            cache_wait: op("wait"),
            cache_usage: rowcache_usage.gauge(&[name.clone()]),
            cache_fetch_duration: rowcache_fetch_duration.histogram(&[name]),
        }
    }

    /// Build noop metrics.
    pub fn noop() -> Self {
        use super::registry::noop::NoopMetricsRegistry;

        Self::new("noop", &NoopMetricsRegistry)
    }
}
