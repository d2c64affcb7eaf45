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

use std::{hash::Hash, sync::Arc, time::Duration};

use equivalent::Equivalent;
use hashbrown::HashMap;
use itertools::Itertools;
use rowcache_common::{
    error::{Error, Result},
    metrics::Metrics,
};
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, time::Instant};

use crate::{
    inflight::{Enqueue, InflightMap, Notifier, Waiter},
    list::{RecencyList, Token},
};

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// The key is cached and alive.
    Found(V),
    /// The key is not cached.
    NotFound,
    /// The key was cached but its ttl has passed. The entry has been dropped by this lookup.
    Expired,
}

impl<V> Lookup<V> {
    /// Returns `true` on [`Lookup::Found`].
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Decides which operations refresh the recency of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyPolicy {
    /// Only `set` refreshes recency. A hit leaves the entry where it is.
    ///
    /// Eviction order is the order of the last writes.
    #[default]
    WriteOnly,
    /// Both `set` and a hit refresh recency, as a conventional lru does.
    ReadWrite,
}

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    /// `None` means the entry never expires.
    expire_at: Option<Instant>,
}

impl<K, V> Entry<K, V> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expire_at, Some(at) if at <= now)
    }
}

/// A ttl too large to be represented as a deadline never expires, the same as `0`.
fn expire_at(ttl_secs: u64, now: Instant) -> Option<Instant> {
    if ttl_secs == 0 {
        return None;
    }
    now.checked_add(Duration::from_secs(ttl_secs))
}

pub(crate) enum Probe<V> {
    Hit(V),
    /// The caller must fetch. Carries the inflight id if single-flight is enabled.
    Lead(Option<u64>),
    Wait(Waiter<V>),
}

/// An independent lru + ttl partition of the cache.
///
/// The map and the recency list always hold the same keys, and the entry count never exceeds the capacity once an
/// insertion completes.
///
/// A segment is not synchronized by itself. The cache wraps each segment in its own mutex.
#[derive(Debug)]
pub struct Segment<K, V> {
    id: usize,

    map: HashMap<K, Token>,
    list: RecencyList<Entry<K, V>>,

    capacity: usize,
    policy: RecencyPolicy,

    closed: bool,
    inflights: InflightMap<K, V>,
    shutdown: Option<oneshot::Sender<()>>,

    metrics: Arc<Metrics>,
}

impl<K, V> Segment<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a segment that holds at most `capacity` entries.
    pub fn new(id: usize, capacity: usize, policy: RecencyPolicy, metrics: Arc<Metrics>) -> Self {
        assert!(capacity > 0, "segment capacity must be greater than zero");
        Self {
            id,
            map: HashMap::with_capacity(capacity),
            list: RecencyList::with_capacity(capacity),
            capacity,
            policy,
            closed: false,
            inflights: InflightMap::default(),
            shutdown: None,
            metrics,
        }
    }

    pub(crate) fn set_shutdown(&mut self, tx: oneshot::Sender<()>) {
        self.shutdown = Some(tx);
    }

    /// Look up `key` as of `now`.
    ///
    /// An expired entry is dropped and reported as [`Lookup::Expired`]; the next lookup reports
    /// [`Lookup::NotFound`].
    pub fn get<Q>(&mut self, key: &Q, now: Instant) -> Result<Lookup<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        if self.closed {
            return Err(Error::closed());
        }

        let Some(&token) = self.map.get(key) else {
            self.metrics.cache_miss.increase(1);
            return Ok(Lookup::NotFound);
        };

        if self.list[token].is_expired(now) {
            self.map.remove(key);
            self.list.remove(token);
            self.metrics.cache_expire.increase(1);
            self.metrics.cache_usage.decrease(1);
            return Ok(Lookup::Expired);
        }

        if self.policy == RecencyPolicy::ReadWrite {
            self.list.move_to_front(token);
        }
        self.metrics.cache_hit.increase(1);
        Ok(Lookup::Found(self.list[token].value.clone()))
    }

    /// Insert or replace `key`.
    ///
    /// A replaced entry takes the new value and ttl and moves to the front. A new key evicts the least recently
    /// touched entry first if the segment is full. `ttl_secs == 0` means the entry never expires.
    pub fn set(&mut self, key: K, value: V, ttl_secs: u64, now: Instant) -> Result<()> {
        if self.closed {
            return Err(Error::closed());
        }

        let expire_at = expire_at(ttl_secs, now);

        if let Some(&token) = self.map.get(&key) {
            let entry = &mut self.list[token];
            entry.value = value;
            entry.expire_at = expire_at;
            self.list.move_to_front(token);
            self.metrics.cache_replace.increase(1);
            return Ok(());
        }

        if self.list.len() >= self.capacity {
            self.evict();
        }

        let token = self.list.push_front(Entry {
            key: key.clone(),
            value,
            expire_at,
        });
        self.map.insert(key, token);
        self.metrics.cache_insert.increase(1);
        self.metrics.cache_usage.increase(1);

        debug_assert_eq!(self.map.len(), self.list.len());
        debug_assert!(self.list.len() <= self.capacity);
        Ok(())
    }

    /// Remove `key` regardless of its ttl.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<Option<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        if self.closed {
            return Err(Error::closed());
        }

        let Some(token) = self.map.remove(key) else {
            return Ok(None);
        };
        let entry = self.list.remove(token);
        self.metrics.cache_remove.increase(1);
        self.metrics.cache_usage.decrease(1);
        Ok(entry.map(|entry| entry.value))
    }

    /// Drop every entry that has expired as of `now`. Returns the count of dropped entries.
    pub fn reap(&mut self, now: Instant) -> usize {
        let expired = self
            .list
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(token, _)| token)
            .collect_vec();

        for token in expired.iter() {
            if let Some(entry) = self.list.remove(*token) {
                self.map.remove(&entry.key);
            }
        }

        let count = expired.len();
        if count > 0 {
            self.metrics.cache_reap.increase(count as _);
            self.metrics.cache_usage.decrease(count as _);
        }
        count
    }

    /// Clear the segment, close it and signal its reaper to stop.
    ///
    /// Returns `false` if the segment has already been destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        self.metrics.cache_usage.decrease(self.list.len() as _);
        self.map.clear();
        self.list.clear();
        self.inflights.clear();

        if let Some(tx) = self.shutdown.take() {
            // The reaper may have gone already.
            let _ = tx.send(());
        }
        true
    }

    /// Segment id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Count of cached entries, expired ones included until they are discovered.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Max entry count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` once the segment has been destroyed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Look up `key` and, on a miss, decide who fetches it.
    pub(crate) fn probe<Q>(&mut self, key: &Q, now: Instant, single_flight: bool) -> Result<Probe<V>>
    where
        Q: Hash + Equivalent<K> + ToOwned<Owned = K> + ?Sized,
    {
        if let Lookup::Found(value) = self.get(key, now)? {
            return Ok(Probe::Hit(value));
        }
        if !single_flight {
            return Ok(Probe::Lead(None));
        }
        match self.inflights.enqueue(key) {
            Enqueue::Lead(id) => Ok(Probe::Lead(Some(id))),
            Enqueue::Wait(waiter) => {
                self.metrics.cache_wait.increase(1);
                Ok(Probe::Wait(waiter))
            }
        }
    }

    /// Store the fetched value and hand back the callers waiting on fetch `id`.
    pub(crate) fn fill(
        &mut self,
        key: K,
        value: V,
        ttl_secs: u64,
        now: Instant,
        id: Option<u64>,
    ) -> Result<Vec<Notifier<V>>> {
        let notifiers = id.and_then(|id| self.inflights.take(&key, id)).unwrap_or_default();
        self.set(key, value, ttl_secs, now)?;
        Ok(notifiers)
    }

    /// Give up fetch `id` and hand back its waiters.
    pub(crate) fn abandon<Q>(&mut self, key: &Q, id: u64) -> Vec<Notifier<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inflights.take(key, id).unwrap_or_default()
    }

    fn evict(&mut self) {
        let Some(token) = self.list.back() else {
            return;
        };
        if let Some(entry) = self.list.remove(token) {
            self.map.remove(&entry.key);
            self.metrics.cache_evict.increase(1);
            self.metrics.cache_usage.decrease(1);
            tracing::trace!(segment = self.id, "[segment]: evict the least recently touched entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(capacity: usize) -> Segment<String, u64> {
        Segment::new(0, capacity, RecencyPolicy::WriteOnly, Arc::new(Metrics::noop()))
    }

    fn keys(segment: &Segment<String, u64>) -> Vec<String> {
        segment.list.iter().map(|(_, e)| e.key.clone()).collect_vec()
    }

    fn assert_consistent(segment: &Segment<String, u64>) {
        assert_eq!(segment.map.len(), segment.list.len());
        assert!(segment.len() <= segment.capacity());
        for (token, entry) in segment.list.iter() {
            assert_eq!(segment.map.get(&entry.key), Some(&token));
        }
    }

    #[test_log::test]
    fn test_get_not_found() {
        let mut s = segment(4);
        let now = Instant::now();
        for i in 0..16 {
            assert_eq!(s.get(&format!("k{i}"), now).unwrap(), Lookup::NotFound);
        }
    }

    #[test_log::test]
    fn test_set_then_get() {
        let mut s = segment(4);
        let now = Instant::now();
        s.set("a".to_string(), 1, 10, now).unwrap();
        assert_eq!(s.get("a", now).unwrap(), Lookup::Found(1));
        assert_eq!(s.len(), 1);
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_ttl_zero_never_expires() {
        let mut s = segment(4);
        let now = Instant::now();
        s.set("a".to_string(), 1, 0, now).unwrap();

        let far = now + Duration::from_secs(100 * 365 * 24 * 3600);
        assert_eq!(s.get("a", far).unwrap(), Lookup::Found(1));
        assert_eq!(s.reap(far), 0);
    }

    #[test_log::test]
    fn test_huge_ttl_never_expires() {
        let mut s = segment(4);
        let now = Instant::now();
        s.set("a".to_string(), 1, u64::MAX, now).unwrap();
        s.set("b".to_string(), 2, u64::MAX / 2, now).unwrap();

        let far = now + Duration::from_secs(100 * 365 * 24 * 3600);
        assert_eq!(s.get("a", far).unwrap(), Lookup::Found(1));
        assert_eq!(s.get("b", far).unwrap(), Lookup::Found(2));
        assert_eq!(s.reap(far), 0);

        // Replacing with a huge ttl keeps the entry alive as well.
        s.set("c".to_string(), 3, 1, now).unwrap();
        s.set("c".to_string(), 4, u64::MAX, now).unwrap();
        assert_eq!(s.get("c", far).unwrap(), Lookup::Found(4));
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_expired_then_not_found() {
        let mut s = segment(4);
        let now = Instant::now();
        s.set("x".to_string(), 7, 1, now).unwrap();

        assert_eq!(s.get("x", now + Duration::from_millis(999)).unwrap(), Lookup::Found(7));
        assert_eq!(s.get("x", now + Duration::from_secs(2)).unwrap(), Lookup::Expired);
        assert_eq!(s.get("x", now + Duration::from_secs(2)).unwrap(), Lookup::NotFound);
        assert!(s.is_empty());
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_expire_at_deadline() {
        let mut s = segment(4);
        let now = Instant::now();
        s.set("x".to_string(), 7, 5, now).unwrap();
        assert_eq!(s.get("x", now + Duration::from_secs(5)).unwrap(), Lookup::Expired);
    }

    #[test_log::test]
    fn test_evict_least_recently_set() {
        // capacity = 2: set(a), set(b), set(c) => a evicted.
        let mut s = segment(2);
        let now = Instant::now();
        s.set("a".to_string(), 1, 0, now).unwrap();
        s.set("b".to_string(), 2, 0, now).unwrap();
        s.set("c".to_string(), 3, 0, now).unwrap();

        assert_eq!(s.get("a", now).unwrap(), Lookup::NotFound);
        assert_eq!(s.get("b", now).unwrap(), Lookup::Found(2));
        assert_eq!(s.get("c", now).unwrap(), Lookup::Found(3));
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_capacity_plus_one() {
        const CAPACITY: usize = 64;

        let mut s = segment(CAPACITY);
        let now = Instant::now();
        for i in 0..=CAPACITY as u64 {
            s.set(format!("k{i}"), i, 0, now).unwrap();
        }

        assert_eq!(s.len(), CAPACITY);
        assert_eq!(s.get("k0", now).unwrap(), Lookup::NotFound);
        for i in 1..=CAPACITY as u64 {
            assert_eq!(s.get(&format!("k{i}"), now).unwrap(), Lookup::Found(i));
        }
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_replace_promotes_and_keeps_size() {
        let mut s = segment(2);
        let now = Instant::now();
        s.set("a".to_string(), 1, 0, now).unwrap();
        s.set("b".to_string(), 2, 0, now).unwrap();

        // Rewriting `a` makes `b` the least recently written entry.
        s.set("a".to_string(), 10, 0, now).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(keys(&s), vec!["a", "b"]);

        s.set("c".to_string(), 3, 0, now).unwrap();
        assert_eq!(s.get("a", now).unwrap(), Lookup::Found(10));
        assert_eq!(s.get("b", now).unwrap(), Lookup::NotFound);
        assert_eq!(s.get("c", now).unwrap(), Lookup::Found(3));
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_replace_refreshes_ttl() {
        let mut s = segment(2);
        let now = Instant::now();
        s.set("a".to_string(), 1, 1, now).unwrap();
        s.set("a".to_string(), 2, 0, now).unwrap();
        assert_eq!(s.get("a", now + Duration::from_secs(10)).unwrap(), Lookup::Found(2));

        s.set("a".to_string(), 3, 5, now).unwrap();
        assert_eq!(s.get("a", now + Duration::from_secs(4)).unwrap(), Lookup::Found(3));
        assert_eq!(s.get("a", now + Duration::from_secs(5)).unwrap(), Lookup::Expired);
    }

    #[test_log::test]
    fn test_write_only_policy_hit_does_not_promote() {
        let mut s = segment(2);
        let now = Instant::now();
        s.set("a".to_string(), 1, 0, now).unwrap();
        s.set("b".to_string(), 2, 0, now).unwrap();

        assert_eq!(s.get("a", now).unwrap(), Lookup::Found(1));
        assert_eq!(keys(&s), vec!["b", "a"]);

        // `a` is still the least recently written entry.
        s.set("c".to_string(), 3, 0, now).unwrap();
        assert_eq!(s.get("a", now).unwrap(), Lookup::NotFound);
        assert_eq!(s.get("b", now).unwrap(), Lookup::Found(2));
    }

    #[test_log::test]
    fn test_read_write_policy_hit_promotes() {
        let mut s = Segment::new(0, 2, RecencyPolicy::ReadWrite, Arc::new(Metrics::noop()));
        let now = Instant::now();
        s.set("a".to_string(), 1u64, 0, now).unwrap();
        s.set("b".to_string(), 2, 0, now).unwrap();

        assert_eq!(s.get("a", now).unwrap(), Lookup::Found(1));

        s.set("c".to_string(), 3, 0, now).unwrap();
        assert_eq!(s.get("a", now).unwrap(), Lookup::Found(1));
        assert_eq!(s.get("b", now).unwrap(), Lookup::NotFound);
    }

    #[test_log::test]
    fn test_remove() {
        let mut s = segment(4);
        let now = Instant::now();
        s.set("a".to_string(), 1, 0, now).unwrap();
        assert_eq!(s.remove("a").unwrap(), Some(1));
        assert_eq!(s.remove("a").unwrap(), None);
        assert_eq!(s.get("a", now).unwrap(), Lookup::NotFound);
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_reap() {
        let mut s = segment(16);
        let now = Instant::now();
        for i in 0..8u64 {
            s.set(format!("short{i}"), i, 1, now).unwrap();
            s.set(format!("long{i}"), i, 60, now).unwrap();
        }
        s.set("forever".to_string(), 0, 0, now).unwrap();

        assert_eq!(s.reap(now), 0);
        assert_eq!(s.reap(now + Duration::from_secs(2)), 8);
        assert_eq!(s.len(), 9);
        assert_consistent(&s);

        assert_eq!(s.reap(now + Duration::from_secs(120)), 8);
        assert_eq!(keys(&s), vec!["forever"]);
        assert_consistent(&s);
    }

    #[test_log::test]
    fn test_destroy() {
        let mut s = segment(4);
        let (tx, mut rx) = oneshot::channel();
        s.set_shutdown(tx);
        let now = Instant::now();
        s.set("a".to_string(), 1, 0, now).unwrap();

        assert!(s.destroy());
        assert!(s.is_closed());
        assert!(s.is_empty());
        assert!(rx.try_recv().is_ok());

        // Second destroy is a no-op.
        assert!(!s.destroy());

        assert!(s.get("a", now).unwrap_err().is_closed());
        assert!(s.set("a".to_string(), 1, 0, now).unwrap_err().is_closed());
        assert!(s.remove("a").unwrap_err().is_closed());
    }

    #[test_log::test]
    fn test_probe_single_flight() {
        let mut s = segment(4);
        let now = Instant::now();

        let Probe::Lead(Some(id)) = s.probe("a", now, true).unwrap() else {
            panic!("cold key must be led")
        };
        let Probe::Wait(mut waiter) = s.probe("a", now, true).unwrap() else {
            panic!("inflight key must be waited")
        };

        let notifiers = s.fill("a".to_string(), 1, 0, now, Some(id)).unwrap();
        assert_eq!(notifiers.len(), 1);
        for notifier in notifiers {
            let _ = notifier.send(Ok(1));
        }
        assert_eq!(waiter.try_recv().unwrap().unwrap(), 1);

        assert!(matches!(s.probe("a", now, true).unwrap(), Probe::Hit(1)));
    }

    #[test_log::test]
    fn test_probe_without_single_flight() {
        let mut s = segment(4);
        let now = Instant::now();
        assert!(matches!(s.probe("a", now, false).unwrap(), Probe::Lead(None)));
        assert!(matches!(s.probe("a", now, false).unwrap(), Probe::Lead(None)));
    }

    #[test_log::test]
    fn test_abandon_closes_nothing_on_stale_id() {
        let mut s = segment(4);
        let now = Instant::now();
        let Probe::Lead(Some(id)) = s.probe("a", now, true).unwrap() else {
            panic!("cold key must be led")
        };
        let _waiter = s.probe("a", now, true).unwrap();
        assert!(s.abandon("a", id + 1).is_empty());
        assert_eq!(s.abandon("a", id).len(), 1);
    }
}
