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

//! rowcache: a sharded, ttl-aware lru cache for the results of backing store queries.
//!
//! ```no_run
//! use rowcache::{QueryCacheBuilder, QueryExecutor, ResultSet, Row};
//!
//! struct Store;
//!
//! impl QueryExecutor for Store {
//!     type Error = std::io::Error;
//!
//!     async fn query(&self, _: &str) -> Result<ResultSet, Self::Error> {
//!         Ok(vec![Row::new().with_column("id", 1.0).with_column("name", "alice")].into())
//!     }
//! }
//!
//! # async fn run() -> rowcache::Result<()> {
//! let cache = QueryCacheBuilder::new(Store).with_shards(16).build()?;
//! let rows = cache.query_cache("player:1", "SELECT id, name FROM player WHERE id = 1", 60).await?;
//! assert_eq!(rows.len(), 1);
//! cache.destroy().await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod row;
mod store;

/// Frequently used types.
pub mod prelude;
pub use prelude::*;
