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
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use rowcache::{QueryExecutor, ResultSet, Row};

#[derive(Debug)]
pub struct SimulatedError {
    command: String,
}

impl Display for SimulatedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "simulated backing store failure on `{}`", self.command)
    }
}

impl std::error::Error for SimulatedError {}

/// A backing store that sleeps for a fixed latency and answers with generated rows.
#[derive(Debug)]
pub struct SimulatedStore {
    latency: Duration,
    rows: usize,
    error_ratio: f64,
    queries: AtomicU64,
}

impl SimulatedStore {
    pub fn new(latency: Duration, rows: usize, error_ratio: f64) -> Self {
        Self {
            latency,
            rows,
            error_ratio,
            queries: AtomicU64::new(0),
        }
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

impl QueryExecutor for SimulatedStore {
    type Error = SimulatedError;

    async fn query(&self, command: &str) -> Result<ResultSet, Self::Error> {
        let seq = self.queries.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut rng = StdRng::seed_from_u64(seq);
        if self.error_ratio > 0.0 && rng.random_bool(self.error_ratio.clamp(0.0, 1.0)) {
            return Err(SimulatedError {
                command: command.to_string(),
            });
        }

        let rows: ResultSet = (0..self.rows)
            .map(|i| {
                Row::with_capacity(3)
                    .with_column("id", i as f64)
                    .with_column("level", rng.random_range(1..100) as f64)
                    .with_column("name", format!("player-{seq}-{i}"))
            })
            .collect();
        Ok(rows)
    }
}
