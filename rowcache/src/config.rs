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

use std::time::Duration;

use rowcache_memory::{RecencyPolicy, DEFAULT_REAP_INTERVAL, DEFAULT_SHARDS, DEFAULT_SHARD_CAPACITY};
use serde::{Deserialize, Serialize};

/// Plain configuration of a [`QueryCache`](crate::QueryCache).
///
/// Every field is optional when deserialized and falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryCacheConfig {
    /// Name of the cache, used as the `name` label of the metrics.
    ///
    /// Default: `rowcache`.
    pub name: String,
    /// Segment count.
    ///
    /// Default: `256`.
    pub shards: usize,
    /// Max entry count of each segment.
    ///
    /// Default: `10000`.
    pub shard_capacity: usize,
    /// Seconds between two expiry sweeps of a segment.
    ///
    /// Default: `3600`.
    pub reap_interval_secs: u64,
    /// Which operations refresh the recency of an entry.
    ///
    /// Default: `write_only`.
    pub recency_policy: RecencyPolicy,
    /// Share one backing store query among concurrent misses on the same key.
    ///
    /// Default: `true`.
    pub single_flight: bool,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            name: "rowcache".to_string(),
            shards: DEFAULT_SHARDS,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            reap_interval_secs: DEFAULT_REAP_INTERVAL.as_secs(),
            recency_policy: RecencyPolicy::default(),
            single_flight: true,
        }
    }
}

impl QueryCacheConfig {
    /// Interval between two expiry sweeps of a segment.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}
