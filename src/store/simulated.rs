//! Simulated Cloud Store with Fault Injection
//!
//! DST-compatible wrapper that injects store faults from a seeded RNG, so a
//! failing run can be replayed exactly from its seed.

use crate::rng::DeterministicRng;
use crate::store::{CloudStore, ETag, StoreFuture, WriteReceipt};
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of write failure (nothing written)
    pub write_fail_prob: f64,
    /// Probability of read failure
    pub read_fail_prob: f64,
    /// Probability of a read returning corrupted bytes
    pub read_corrupt_prob: f64,
    /// Probability of operation timeout
    pub timeout_prob: f64,
    /// Probability that a write persists only a prefix of the data
    pub partial_write_prob: f64,
    /// Probability of delete failure
    pub delete_fail_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.01,          // 1%
            read_fail_prob: 0.01,           // 1%
            read_corrupt_prob: 0.001,       // 0.1%
            timeout_prob: 0.005,            // 0.5%
            partial_write_prob: 0.005,      // 0.5%
            delete_fail_prob: 0.01,         // 1%
            latency_range_us: (0, 200),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.05,
            read_fail_prob: 0.05,
            read_corrupt_prob: 0.01,
            timeout_prob: 0.02,
            partial_write_prob: 0.02,
            delete_fail_prob: 0.05,
            latency_range_us: (0, 1_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            write_fail_prob: 0.0,
            read_fail_prob: 0.0,
            read_corrupt_prob: 0.0,
            timeout_prob: 0.0,
            partial_write_prob: 0.0,
            delete_fail_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub write_attempts: u64,
    pub write_failures: u64,
    pub partial_writes: u64,
    pub read_attempts: u64,
    pub read_failures: u64,
    pub read_corruptions: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub timeouts: u64,
}

struct SimulatedStoreInner {
    rng: DeterministicRng,
    stats: SimulatedStoreStats,
}

/// Simulated store that wraps another store and injects faults
pub struct SimulatedCloudStore<S: CloudStore + Clone> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: CloudStore + Clone> Clone for SimulatedCloudStore<S> {
    fn clone(&self) -> Self {
        SimulatedCloudStore {
            inner_store: self.inner_store.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: CloudStore + Clone> SimulatedCloudStore<S> {
    /// Create a new simulated store seeded with `seed`
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedCloudStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: DeterministicRng::new(seed),
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// The wrapped store, bypassing fault injection
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    fn roll(&self, probability: f64) -> bool {
        self.state.lock().rng.gen_bool(probability)
    }

    fn record(&self, update: impl FnOnce(&mut SimulatedStoreStats)) {
        update(&mut self.state.lock().stats);
    }

    async fn simulate_latency(&self) {
        let (min, max) = self.config.latency_range_us;
        if min == 0 && max == 0 {
            return;
        }
        let latency_us = self.state.lock().rng.gen_range(min, max.max(min + 1));
        if latency_us > 0 {
            tokio::time::sleep(std::time::Duration::from_micros(latency_us)).await;
        }
    }

    fn check_timeout(&self) -> Result<(), IoError> {
        if self.roll(self.config.timeout_prob) {
            self.record(|s| s.timeouts += 1);
            return Err(IoError::new(ErrorKind::TimedOut, "simulated timeout"));
        }
        Ok(())
    }

    /// Shared read-side fault path for full and ranged reads
    async fn faulty_read(&self, read: StoreFuture<'_, Option<Bytes>>) -> std::io::Result<Option<Bytes>> {
        self.record(|s| s.read_attempts += 1);
        self.check_timeout()?;
        if self.roll(self.config.read_fail_prob) {
            self.record(|s| s.read_failures += 1);
            return Err(IoError::new(ErrorKind::Other, "simulated read failure"));
        }
        self.simulate_latency().await;

        let Some(data) = read.await? else {
            return Ok(None);
        };
        if !data.is_empty() && self.roll(self.config.read_corrupt_prob) {
            self.record(|s| s.read_corruptions += 1);
            let mut corrupted = data.to_vec();
            let idx = self.state.lock().rng.gen_range(0, corrupted.len() as u64) as usize;
            corrupted[idx] ^= 0xFF;
            return Ok(Some(Bytes::from(corrupted)));
        }
        Ok(Some(data))
    }
}

impl<S: CloudStore + Clone> CloudStore for SimulatedCloudStore<S> {
    fn write_with_etag<'a>(&'a self, path: &'a str, data: Bytes) -> StoreFuture<'a, WriteReceipt> {
        Box::pin(async move {
            self.record(|s| s.write_attempts += 1);
            self.check_timeout()?;
            if self.roll(self.config.write_fail_prob) {
                self.record(|s| s.write_failures += 1);
                return Err(IoError::new(ErrorKind::Other, "simulated write failure"));
            }

            let data = if data.len() > 1 && self.roll(self.config.partial_write_prob) {
                self.record(|s| s.partial_writes += 1);
                let new_len = self.state.lock().rng.gen_range(1, data.len() as u64) as usize;
                data.slice(..new_len)
            } else {
                data
            };

            self.simulate_latency().await;
            self.inner_store.write_with_etag(path, data).await
        })
    }

    fn read_with_etag<'a>(&'a self, path: &'a str, etag: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            self.faulty_read(self.inner_store.read_with_etag(path, etag))
                .await
        })
    }

    fn read_range_with_etag<'a>(
        &'a self,
        path: &'a str,
        etag: &'a str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            self.faulty_read(
                self.inner_store
                    .read_range_with_etag(path, etag, start, end),
            )
            .await
        })
    }

    fn try_get_etag<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Option<ETag>> {
        Box::pin(async move {
            self.check_timeout()?;
            self.inner_store.try_get_etag(path).await
        })
    }

    fn get_size<'a>(&'a self, path: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            self.check_timeout()?;
            self.inner_store.get_size(path).await
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.record(|s| s.delete_attempts += 1);
            if self.roll(self.config.delete_fail_prob) {
                self.record(|s| s.delete_failures += 1);
                return Err(IoError::new(ErrorKind::Other, "simulated delete failure"));
            }
            self.simulate_latency().await;
            self.inner_store.delete(path).await
        })
    }

    fn random_path(&self, directory: &str) -> String {
        self.inner_store.random_path(directory)
    }
}
