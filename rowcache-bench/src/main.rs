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

//! Load generator for rowcache against a simulated backing store.

mod store;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use clap::Parser;
use futures_util::future::join_all;
use itertools::Itertools;
use prometheus::{Registry, TextEncoder};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rowcache::{PrometheusMetricsRegistry, QueryCache, QueryCacheBuilder, RecencyPolicy};
use store::SimulatedStore;
use tokio::sync::broadcast;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Segment count.
    #[arg(long, default_value_t = 256)]
    shards: usize,

    /// Max entry count of each segment.
    #[arg(long, default_value_t = 10000)]
    shard_capacity: usize,

    /// Key space the workers pick keys from.
    #[arg(long, default_value_t = 1_000_000)]
    keys: u64,

    /// Ratio of operations that go to the hot keys.
    #[arg(long, default_value_t = 0.8)]
    hot_ratio: f64,

    /// Hot key count, taken from the start of the key space.
    #[arg(long, default_value_t = 10000)]
    hot_keys: u64,

    /// Entry ttl. `0` means entries never expire. (s)
    #[arg(long, default_value_t = 10)]
    ttl: u64,

    /// Reaper interval. (s)
    #[arg(long, default_value_t = 5)]
    reap_interval: u64,

    /// Worker count.
    #[arg(long, default_value_t = 64)]
    workers: usize,

    /// (s)
    #[arg(short, long, default_value_t = 60)]
    time: u64,

    /// (s)
    #[arg(long, default_value_t = 2)]
    report_interval: u64,

    /// Simulated backing store latency. (ms)
    #[arg(long, default_value_t = 5)]
    latency: u64,

    /// Rows returned by each simulated query.
    #[arg(long, default_value_t = 8)]
    rows: usize,

    /// Ratio of simulated queries that fail.
    #[arg(long, default_value_t = 0.0)]
    error_ratio: f64,

    /// Disable fetch deduplication of concurrent misses.
    #[arg(long, default_value_t = false)]
    no_single_flight: bool,

    /// Available values: "write_only", "read_write".
    #[arg(long, default_value = "write_only")]
    recency_policy: String,

    /// Dump prometheus metrics at exit.
    #[arg(long, default_value_t = false)]
    metrics: bool,

    /// Print the summary as json.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Default)]
struct Stats {
    ops: AtomicU64,
    errors: AtomicU64,
    lat_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    ops: u64,
    errors: u64,
    queries: u64,
    lat_us: u64,
}

impl Snapshot {
    fn take(stats: &Stats, store: &SimulatedStore) -> Self {
        Self {
            ops: stats.ops.load(Ordering::Relaxed),
            errors: stats.errors.load(Ordering::Relaxed),
            queries: store.queries(),
            lat_us: stats.lat_us.load(Ordering::Relaxed),
        }
    }

    fn since(&self, earlier: &Self) -> Self {
        Self {
            ops: self.ops - earlier.ops,
            errors: self.errors - earlier.errors,
            queries: self.queries - earlier.queries,
            lat_us: self.lat_us - earlier.lat_us,
        }
    }

    fn hit_ratio(&self) -> f64 {
        if self.ops == 0 {
            return 0.0;
        }
        1.0 - self.queries.min(self.ops) as f64 / self.ops as f64
    }

    fn avg_lat_us(&self) -> f64 {
        if self.ops == 0 {
            return 0.0;
        }
        self.lat_us as f64 / self.ops as f64
    }

    fn report(&self, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        format!(
            "ops: {} ({:.0}/s), queries: {} ({:.0}/s), errors: {}, hit ratio: {:.2}%, avg latency: {:.1}us",
            self.ops,
            self.ops as f64 / secs,
            self.queries,
            self.queries as f64 / secs,
            self.errors,
            self.hit_ratio() * 100.0,
            self.avg_lat_us(),
        )
    }
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    println!("{:#?}", args);
    anyhow::ensure!(args.keys > 0, "\"--keys\" value must be greater than 0");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.hot_ratio),
        "\"--hot-ratio\" value must be within [0, 1]"
    );

    let recency_policy = match args.recency_policy.as_str() {
        "write_only" => RecencyPolicy::WriteOnly,
        "read_write" => RecencyPolicy::ReadWrite,
        other => anyhow::bail!("unsupported recency policy: {other}"),
    };

    let store = SimulatedStore::new(Duration::from_millis(args.latency), args.rows, args.error_ratio);

    let registry = Registry::new();
    let mut builder = QueryCacheBuilder::new(store)
        .with_name("rowcache-bench")
        .with_shards(args.shards)
        .with_shard_capacity(args.shard_capacity)
        .with_reap_interval(Duration::from_secs(args.reap_interval))
        .with_recency_policy(recency_policy)
        .with_single_flight(!args.no_single_flight);
    if args.metrics {
        builder = builder.with_metrics_registry(Box::new(PrometheusMetricsRegistry::new(registry.clone())));
    }
    let cache = builder.build()?;

    let stats = Arc::new(Stats::default());
    let (stop_tx, _) = broadcast::channel(16);

    let handle_monitor = tokio::spawn(monitor(
        cache.clone(),
        stats.clone(),
        Duration::from_secs(args.report_interval),
        stop_tx.subscribe(),
    ));

    let handle_signal = tokio::spawn({
        let stop_tx = stop_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("rowcache-bench is cancelled with CTRL-C");
                let _ = stop_tx.send(());
            }
        }
    });

    let start = Instant::now();
    let begin = Snapshot::take(&stats, cache.executor());

    let handles = (0..args.workers)
        .map(|id| {
            tokio::spawn(work(
                id as u64,
                args.clone(),
                cache.clone(),
                stats.clone(),
                stop_tx.subscribe(),
            ))
        })
        .collect_vec();
    join_all(handles).await;

    let total = Snapshot::take(&stats, cache.executor()).since(&begin);
    let elapsed = start.elapsed();

    let _ = stop_tx.send(());
    handle_monitor.abort();
    handle_signal.abort();

    let entries = cache.cache().len();
    cache.destroy().await?;

    if args.json {
        let summary = serde_json::json!({
            "elapsed_secs": elapsed.as_secs_f64(),
            "ops": total.ops,
            "queries": total.queries,
            "errors": total.errors,
            "hit_ratio": total.hit_ratio(),
            "avg_latency_us": total.avg_lat_us(),
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("\nTotal:\n{}\nentries at exit: {entries}", total.report(elapsed));
    }

    if args.metrics {
        println!("\n{}", TextEncoder::new().encode_to_string(&registry.gather())?);
    }

    Ok(())
}

async fn monitor(
    cache: QueryCache<SimulatedStore>,
    stats: Arc<Stats>,
    interval: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    let mut last = Snapshot::take(&stats, cache.executor());
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => return,
            _ = ticker.tick() => {
                let now = Snapshot::take(&stats, cache.executor());
                println!("{} entries: {}", now.since(&last).report(interval), cache.cache().len());
                last = now;
            }
        }
    }
}

async fn work(
    id: u64,
    args: Args,
    cache: QueryCache<SimulatedStore>,
    stats: Arc<Stats>,
    mut stop: broadcast::Receiver<()>,
) {
    let start = Instant::now();
    let time = Duration::from_secs(args.time);
    let hot_keys = args.hot_keys.clamp(1, args.keys);

    let mut rng = StdRng::seed_from_u64(id);

    loop {
        match stop.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            _ => return,
        }
        if start.elapsed() >= time {
            return;
        }

        let k = if rng.random_bool(args.hot_ratio) {
            rng.random_range(0..hot_keys)
        } else {
            rng.random_range(0..args.keys)
        };
        let key = format!("player:{k}");
        let command = format!("SELECT id, level, name FROM player WHERE id = {k}");

        let time = Instant::now();
        let res = cache.query_cache(&key, &command, args.ttl).await;
        let lat = time.elapsed().as_micros() as u64;

        stats.ops.fetch_add(1, Ordering::Relaxed);
        stats.lat_us.fetch_add(lat, Ordering::Relaxed);
        if let Err(e) = res {
            tracing::debug!(?e, "query failed");
            stats.errors.fetch_add(1, Ordering::Relaxed);
        }

        tokio::task::consume_budget().await;
    }
}
