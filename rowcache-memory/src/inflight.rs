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

use std::hash::Hash;

use equivalent::Equivalent;
use hashbrown::HashMap;
use rowcache_common::error::Result;
use tokio::sync::oneshot;

/// Receives the result of a fetch issued by another caller.
pub type Waiter<V> = oneshot::Receiver<Result<V>>;
/// Delivers the result of a fetch to a waiting caller.
pub type Notifier<V> = oneshot::Sender<Result<V>>;

#[derive(Debug)]
struct Inflight<V> {
    id: u64,
    notifiers: Vec<Notifier<V>>,
}

pub enum Enqueue<V> {
    /// No fetch is inflight for the key. The caller leads a new fetch identified by `id`.
    Lead(u64),
    /// A fetch is inflight for the key. The caller waits for its result.
    Wait(Waiter<V>),
}

/// Tracks the fetches in flight for the keys of one segment.
///
/// It lives inside the segment and is only touched under the segment lock, so a lookup and its enqueue happen in the
/// same critical section.
#[derive(Debug)]
pub struct InflightMap<K, V> {
    inflights: HashMap<K, Inflight<V>>,
    next_id: u64,
}

impl<K, V> Default for InflightMap<K, V> {
    fn default() -> Self {
        Self {
            inflights: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<K, V> InflightMap<K, V>
where
    K: Hash + Eq,
{
    pub fn enqueue<Q>(&mut self, key: &Q) -> Enqueue<V>
    where
        Q: Hash + Equivalent<K> + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(inflight) = self.inflights.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            inflight.notifiers.push(tx);
            return Enqueue::Wait(rx);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.inflights.insert(
            key.to_owned(),
            Inflight {
                id,
                notifiers: vec![],
            },
        );
        Enqueue::Lead(id)
    }

    /// Take the notifiers of the fetch `id`.
    ///
    /// Returns `None` if the fetch is no longer tracked, e.g. the segment was destroyed meanwhile.
    pub fn take<Q>(&mut self, key: &Q, id: u64) -> Option<Vec<Notifier<V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self.inflights.get(key) {
            Some(inflight) if inflight.id == id => self.inflights.remove(key).map(|inflight| inflight.notifiers),
            _ => None,
        }
    }

    /// Drop every inflight record. Waiters observe a closed channel.
    pub fn clear(&mut self) {
        self.inflights.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inflights.len()
    }
}
