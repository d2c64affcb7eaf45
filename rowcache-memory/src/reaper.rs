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
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::oneshot,
    time::{Instant, MissedTickBehavior},
};

use crate::segment::Segment;

/// Periodic expiry sweep of a single segment.
///
/// The reaper only holds a weak reference to its segment, so dropping the cache stops it as well.
#[derive(Debug)]
pub struct Reaper<K, V> {
    id: usize,
    segment: Weak<Mutex<Segment<K, V>>>,
    interval: Duration,
    stop_rx: oneshot::Receiver<()>,
}

impl<K, V> Reaper<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a reaper for `segment`, and install the shutdown signal on it.
    pub fn new(segment: &Arc<Mutex<Segment<K, V>>>, interval: Duration) -> Self {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut s = segment.lock();
            s.set_shutdown(tx);
            s.id()
        };
        Self {
            id,
            segment: Arc::downgrade(segment),
            interval,
            stop_rx: rx,
        }
    }

    /// Run until the segment is destroyed or dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut self.stop_rx => {
                    tracing::debug!(segment = self.id, "[reaper]: exit");
                    return;
                }
                _ = ticker.tick() => {
                    let Some(segment) = self.segment.upgrade() else {
                        tracing::debug!(segment = self.id, "[reaper]: segment dropped, exit");
                        return;
                    };
                    let start = Instant::now();
                    let reaped = segment.lock().reap(start);
                    drop(segment);
                    if reaped > 0 {
                        tracing::debug!(
                            segment = self.id,
                            reaped,
                            elapsed = ?start.elapsed(),
                            "[reaper]: reap expired entries"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rowcache_common::metrics::Metrics;

    use super::*;
    use crate::segment::{Lookup, RecencyPolicy};

    fn segment(capacity: usize) -> Arc<Mutex<Segment<String, u64>>> {
        Arc::new(Mutex::new(Segment::new(
            0,
            capacity,
            RecencyPolicy::WriteOnly,
            Arc::new(Metrics::noop()),
        )))
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_reaper_sweeps_on_interval() {
        let s = segment(16);
        let now = Instant::now();
        {
            let mut guard = s.lock();
            guard.set("short".to_string(), 1, 1, now).unwrap();
            guard.set("long".to_string(), 2, 100, now).unwrap();
            guard.set("forever".to_string(), 3, 0, now).unwrap();
        }

        let reaper = Reaper::new(&s, Duration::from_secs(10));
        let handle = tokio::spawn(reaper.run());

        // The first sweep happens one full interval after start.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(s.lock().len(), 3);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(s.lock().len(), 2);
        assert_eq!(s.lock().get("long", Instant::now()).unwrap(), Lookup::Found(2));

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(s.lock().len(), 1);
        assert_eq!(s.lock().get("forever", Instant::now()).unwrap(), Lookup::Found(3));

        assert!(s.lock().destroy());
        handle.await.unwrap();
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_reaper_exits_on_segment_drop() {
        let s = segment(4);
        let reaper = Reaper::new(&s, Duration::from_secs(1));
        let handle = tokio::spawn(reaper.run());

        // Dropping the segment drops the shutdown sender as well.
        drop(s);
        handle.await.unwrap();
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_reaper_exits_on_destroy_before_first_tick() {
        let s = segment(4);
        let reaper = Reaper::new(&s, Duration::from_secs(3600));
        let handle = tokio::spawn(reaper.run());

        tokio::task::yield_now().await;
        s.lock().destroy();
        handle.await.unwrap();
        assert!(s.lock().is_closed());
    }
}
