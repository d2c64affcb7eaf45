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

pub use rowcache_common::{
    error::{Error, ErrorKind, Result},
    hasher::{IdentityHasher, XxHash64Builder},
    metrics::{registry::noop::NoopMetricsRegistry, BoxedRegistry, Metrics},
    scope::Scope,
    spawn::{SpawnHandle, Spawner},
};
#[cfg(feature = "prometheus")]
pub use rowcache_common::metrics::registry::prometheus::PrometheusMetricsRegistry;
pub use rowcache_memory::{Cache, CacheBuilder, Lookup, RecencyPolicy};

pub use crate::{
    cache::{QueryCache, QueryCacheBuilder},
    config::QueryCacheConfig,
    row::{ColumnKind, Datum, ResultSet, Row},
    store::QueryExecutor,
};
