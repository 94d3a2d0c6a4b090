//! Component D: the global update loop.
//!
//! Runs once per interval (with jitter), draining the local counter table
//! into the DHT, computing a normalized global rate per key, and rebuilding
//! the block table from it. See the two-pass design in the module-level
//! notes: a synchronous-ish pass driven by the PUT's own return value, and an
//! async re-check pass for keys that stopped seeing local traffic but may
//! still be exceeding their limit elsewhere in the cluster.

use crate::block_table::{BlockEntry, BlockTable, Blocks};
use crate::clock::Clock;
use crate::dht::Dht;
use crate::local_counters::{Limit, LocalCounterTable};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Bounded fan-out for PUT/GET calls issued during a tick. Any bounded value
/// works; this one just needs a name.
const CONCURRENCY: usize = 50;

/// A limit only counts as "active" if it was queried within this window.
const ACTIVE_LIMIT_TTL_MS: i64 = 600_000;

/// The rate normalization divisor: biases toward blocking (false positives)
/// rather than letting abusers through.
const RATE_DIVISOR: f64 = 2.2;

fn normalize_rate(raw_counter: f64, interval_ms: u64) -> f64 {
    (raw_counter / RATE_DIVISOR) / interval_ms as f64 * 1000.0
}

fn jittered_ms(base_ms: f64) -> f64 {
    let noise = 1.0 + 0.1 * (rand::random::<f64>() - 0.5);
    base_ms * noise
}

#[derive(Debug, Default)]
pub struct Stats {
    pub ticks: AtomicU64,
    pub err_count: AtomicU64,
}

pub struct Controller {
    local: Arc<LocalCounterTable>,
    blocks: Arc<BlockTable>,
    dht: Arc<dyn Dht>,
    clock: Arc<dyn Clock>,
    interval_ms: u64,
    stats: Arc<Stats>,
    blocks_tx: broadcast::Sender<Arc<Blocks>>,
}

impl Controller {
    pub fn new(
        local: Arc<LocalCounterTable>,
        blocks: Arc<BlockTable>,
        dht: Arc<dyn Dht>,
        clock: Arc<dyn Clock>,
        interval_ms: u64,
    ) -> Self {
        let (blocks_tx, _) = broadcast::channel(16);
        Self {
            local,
            blocks,
            dht,
            clock,
            interval_ms,
            stats: Arc::new(Stats::default()),
            blocks_tx,
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Arc<Blocks>> {
        self.blocks_tx.subscribe()
    }

    /// Spawn the periodic loop. The first tick fires after
    /// `interval * (0.5 +/- 5%)`; every subsequent one after `interval +/- 5%`.
    /// Dropping or aborting the returned handle stops the loop; there is no
    /// internal cancellation.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let first = jittered_ms(self.interval_ms as f64 * 0.5);
            tokio::time::sleep(Duration::from_millis(first as u64)).await;
            loop {
                self.tick().await;
                let next = jittered_ms(self.interval_ms as f64);
                tokio::time::sleep(Duration::from_millis(next as u64)).await;
            }
        })
    }

    pub async fn tick(&self) {
        let now_ms = self.clock.now_ms();
        let drained = self.local.drain_and_reset();
        debug!(keys = drained.len(), "draining local counters");

        let dht = self.dht.clone();
        let put_results: Vec<_> = stream::iter(drained.into_iter())
            .map(|(key, counter)| {
                let dht = dht.clone();
                async move {
                    let res = dht.put(&key, counter.pending).await;
                    (key, counter, res)
                }
            })
            .buffer_unordered(CONCURRENCY)
            .collect()
            .await;

        let mut new_blocks: Blocks = HashMap::new();
        for (key, counter, res) in put_results {
            match res {
                Ok(raw) => {
                    let rate = normalize_rate(raw, self.interval_ms);
                    let min_limit = counter
                        .limits
                        .keys()
                        .map(|l| l.value())
                        .fold(f64::INFINITY, f64::min);
                    if rate > min_limit {
                        new_blocks.insert(
                            key,
                            Arc::new(BlockEntry {
                                global_rate: rate,
                                limits: counter.limits,
                            }),
                        );
                    }
                }
                Err(e) => {
                    self.stats.err_count.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "dht put failed");
                }
            }
        }

        let old_blocks = self.blocks.snapshot();
        let mut to_recheck: Vec<Vec<u8>> = Vec::new();
        for (key, old_entry) in old_blocks.iter() {
            match new_blocks.get_mut(key) {
                Some(new_entry) => {
                    let entry = Arc::make_mut(new_entry);
                    for (&limit, &ts) in &old_entry.limits {
                        if now_ms - ts <= ACTIVE_LIMIT_TTL_MS {
                            entry.limits.entry(limit).or_insert(ts);
                        }
                    }
                }
                None => to_recheck.push(key.clone()),
            }
        }

        self.blocks.install(new_blocks.clone());
        let _ = self.blocks_tx.send(Arc::new(new_blocks));

        self.recheck(now_ms, &old_blocks, to_recheck).await;
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Async re-check pass: keys that dropped out of local traffic this tick
    /// but may still be exceeding their limit cluster-wide.
    async fn recheck(
        &self,
        now_ms: i64,
        old_blocks: &Blocks,
        to_recheck: Vec<Vec<u8>>,
    ) {
        let pending: Vec<(Vec<u8>, HashMap<Limit, i64>)> = to_recheck
            .into_iter()
            .filter_map(|key| {
                let limits: HashMap<Limit, i64> = old_blocks[&key]
                    .limits
                    .iter()
                    .filter(|(_, &ts)| now_ms - ts <= ACTIVE_LIMIT_TTL_MS)
                    .map(|(&l, &ts)| (l, ts))
                    .collect();
                if limits.is_empty() {
                    None
                } else {
                    Some((key, limits))
                }
            })
            .collect();

        if pending.is_empty() {
            return;
        }

        let dht = self.dht.clone();
        let results: Vec<_> = stream::iter(pending)
            .map(|(key, limits)| {
                let dht = dht.clone();
                async move {
                    let res = dht.get(&key).await;
                    (key, limits, res)
                }
            })
            .buffer_unordered(CONCURRENCY)
            .collect()
            .await;

        let mut merged = (*self.blocks.snapshot()).clone();
        for (key, old_limits, res) in results {
            match res {
                Ok(raw) => {
                    let rate = normalize_rate(raw, self.interval_ms);
                    let min_limit = old_limits
                        .keys()
                        .map(|l| l.value())
                        .fold(f64::INFINITY, f64::min);
                    if rate > min_limit {
                        let limits = old_limits
                            .into_iter()
                            .map(|(limit, ts)| {
                                let ts = if limit.value() > rate { ts } else { now_ms };
                                (limit, ts)
                            })
                            .collect();
                        merged.insert(
                            key,
                            Arc::new(BlockEntry {
                                global_rate: rate,
                                limits,
                            }),
                        );
                    }
                }
                Err(e) => {
                    self.stats.err_count.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "dht get failed during recheck");
                }
            }
        }
        self.blocks.install(merged.clone());
        let _ = self.blocks_tx.send(Arc::new(merged));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::dht::SharedClusterDht;

    fn controller(clock: Arc<FakeClock>, interval_ms: u64) -> Controller {
        let dht = Arc::new(SharedClusterDht::new(interval_ms, clock.clone()));
        Controller::new(
            Arc::new(LocalCounterTable::new()),
            Arc::new(BlockTable::new()),
            dht,
            clock,
            interval_ms,
        )
    }

    #[tokio::test]
    async fn burst_under_limit_stays_unblocked() {
        let clock = Arc::new(FakeClock::new(0));
        let c = controller(clock.clone(), 1000);
        c.local.bump(b"a", 5.0, 1.0, 0);
        c.local.bump(b"a", 5.0, 1.0, 0);
        c.local.bump(b"a", 5.0, 1.0, 0);
        c.tick().await;
        assert!(c.blocks.allows(b"a", 5.0));
    }

    #[tokio::test]
    async fn burst_over_limit_blocks() {
        let clock = Arc::new(FakeClock::new(0));
        let c = controller(clock.clone(), 1000);
        for _ in 0..100 {
            c.local.bump(b"a", 5.0, 1.0, 0);
        }
        c.tick().await;
        assert!(!c.blocks.allows(b"a", 5.0));
    }

    #[tokio::test]
    async fn recheck_drops_block_after_traffic_stops() {
        let clock = Arc::new(FakeClock::new(0));
        let c = controller(clock.clone(), 1000);
        for _ in 0..100 {
            c.local.bump(b"a", 5.0, 1.0, 0);
        }
        c.tick().await;
        assert!(!c.blocks.allows(b"a", 5.0));

        // one interval later, no further local traffic: recheck should see a
        // decayed rate and drop the block.
        clock.advance(1000);
        c.tick().await;
        assert!(c.blocks.allows(b"a", 5.0));
    }

    #[tokio::test]
    async fn multi_limit_key_evaluated_independently() {
        let clock = Arc::new(FakeClock::new(0));
        let c = controller(clock.clone(), 1000);
        for _ in 0..12 {
            c.local.bump(b"k", 5.0, 1.0, 0);
            c.local.bump(b"k", 20.0, 1.0, 0);
        }
        c.tick().await;
        assert!(!c.blocks.allows(b"k", 5.0));
        assert!(c.blocks.allows(b"k", 20.0));
    }
}
