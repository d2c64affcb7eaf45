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

use std::{future::Future, sync::Arc};

use crate::row::ResultSet;

/// The backing store that cached queries are issued to.
///
/// Implementations own connection handling and decode rows, e.g. with [`Datum::decode`](crate::row::Datum::decode).
/// The cache never retries a failed query and adds no timeout of its own.
pub trait QueryExecutor: Send + Sync + 'static {
    /// Error raised by the backing store.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run `command` in the query language of the backing store and return its rows.
    fn query(&self, command: &str) -> impl Future<Output = std::result::Result<ResultSet, Self::Error>> + Send;
}

impl<T> QueryExecutor for Arc<T>
where
    T: QueryExecutor,
{
    type Error = T::Error;

    fn query(&self, command: &str) -> impl Future<Output = std::result::Result<ResultSet, Self::Error>> + Send {
        self.as_ref().query(command)
    }
}
