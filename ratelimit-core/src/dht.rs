//! The DHT capability this crate depends on.
//!
//! The Kademlia routing layer (XOR-distance, `FIND_NODE`/`FIND_VALUE`,
//! contact lists) is out of scope here and is injected behind this trait.
//! `put`/`get` operate directly on the decaying counter's numeric value, with
//! the decay-then-max merge (see `ratelimit_dht::merge_decayed`) expected to
//! happen inside the implementation's storage adapter.

use async_trait::async_trait;
use ratelimit_dht::{merge_decayed, CounterStore, StoredCounter};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("dht store error: {0}")]
    Store(#[from] ratelimit_dht::CounterStoreError),
    #[error("dht unreachable")]
    Unreachable,
}

#[async_trait]
pub trait Dht: Send + Sync {
    /// Decay-then-add `delta` to `key`'s counter and return the post-write
    /// value. Replication to other nodes is expected but not required for
    /// correctness of a single call.
    async fn put(&self, key: &[u8], delta: f64) -> Result<f64, DhtError>;

    /// Merge all known replicas of `key` (decayed to now) and return the
    /// result, or 0 if no replica holds the key.
    async fn get(&self, key: &[u8]) -> Result<f64, DhtError>;
}

/// Single-node DHT backed by one `CounterStore`, with no replication. Good
/// enough for single-node scenarios and unit tests.
pub struct LocalDht {
    store: CounterStore,
    clock: Arc<dyn crate::clock::Clock>,
}

impl LocalDht {
    pub fn new(interval_ms: u64, min_value: f64, clock: Arc<dyn crate::clock::Clock>) -> Self {
        Self {
            store: CounterStore::new(interval_ms, min_value),
            clock,
        }
    }
}

#[async_trait]
impl Dht for LocalDht {
    async fn put(&self, key: &[u8], delta: f64) -> Result<f64, DhtError> {
        Ok(self.store.put(key, delta, self.clock.now_ms())?)
    }

    async fn get(&self, key: &[u8]) -> Result<f64, DhtError> {
        Ok(self.store.get(key, self.clock.now_ms()))
    }
}

/// A DHT shared by several in-process `RateLimiter` instances, simulating a
/// cluster where every node replicates to every other node. This stands in
/// for the K-nearest-contacts replication set, which is out of scope here;
/// good enough to exercise the multi-node convergence scenarios in tests.
#[derive(Clone)]
pub struct SharedClusterDht {
    interval_ms: u64,
    entries: Arc<RwLock<HashMap<Vec<u8>, StoredCounter>>>,
    clock: Arc<dyn crate::clock::Clock>,
}

impl SharedClusterDht {
    pub fn new(interval_ms: u64, clock: Arc<dyn crate::clock::Clock>) -> Self {
        Self {
            interval_ms,
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// A handle sharing the same backing map; use this to give several
    /// `RateLimiter`s the same simulated cluster.
    pub fn handle(&self) -> Self {
        self.clone()
    }
}

#[async_trait]
impl Dht for SharedClusterDht {
    async fn put(&self, key: &[u8], delta: f64) -> Result<f64, DhtError> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let decayed = entries
            .get(key)
            .map(|c| c.decayed_at(now_ms, self.interval_ms))
            .unwrap_or(0.0);
        let value = decayed + delta;
        entries.insert(
            key.to_vec(),
            StoredCounter {
                value,
                last_touched_ms: now_ms,
            },
        );
        Ok(value)
    }

    async fn get(&self, key: &[u8]) -> Result<f64, DhtError> {
        let now_ms = self.clock.now_ms();
        let entries = self.entries.read().await;
        let replicas: Vec<StoredCounter> = entries.get(key).copied().into_iter().collect();
        Ok(merge_decayed(replicas, now_ms, self.interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[tokio::test]
    async fn local_dht_put_then_get() {
        let clock = Arc::new(FakeClock::new(0));
        let dht = LocalDht::new(1000, 0.1, clock);
        let v = dht.put(b"k", 5.0).await.unwrap();
        assert_eq!(v, 5.0);
        let v = dht.get(b"k").await.unwrap();
        assert_eq!(v, 5.0);
    }

    #[tokio::test]
    async fn shared_cluster_is_visible_across_handles() {
        let clock = Arc::new(FakeClock::new(0));
        let a = SharedClusterDht::new(1000, clock);
        let b = a.handle();
        a.put(b"k", 10.0).await.unwrap();
        let v = b.get(b"k").await.unwrap();
        assert_eq!(v, 10.0);
    }
}
