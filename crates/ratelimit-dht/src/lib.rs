//! Decaying-counter storage adapter.
//!
//! This is the value type a Kademlia-style DHT node stores for a rate-limit
//! key: a non-negative count that halves every `interval` milliseconds. The
//! routing/replication layer around it is out of scope here; this crate only
//! implements the local storage adapter and the decay/merge arithmetic, so
//! both can be unit- and property-tested without any networking.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("delta must be non-negative, got {0}")]
    NegativeDelta(f64),
}

/// A stored decaying counter: a value and the instant it was last written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredCounter {
    pub value: f64,
    pub last_touched_ms: i64,
}

impl StoredCounter {
    pub const ZERO: StoredCounter = StoredCounter {
        value: 0.0,
        last_touched_ms: 0,
    };

    /// Decay this counter forward to `now_ms` under the given half-life.
    pub fn decayed_at(&self, now_ms: i64, interval_ms: u64) -> f64 {
        decay(self.value, self.last_touched_ms, now_ms, interval_ms)
    }
}

/// Exponential decay with half-life `interval_ms`: `v * 2^(-(t-t0)/interval)`.
///
/// `now_ms` going backwards relative to `last_touched_ms` (clock skew between
/// replicas) is clamped to "no decay" rather than amplifying the value.
pub fn decay(value: f64, last_touched_ms: i64, now_ms: i64, interval_ms: u64) -> f64 {
    if value <= 0.0 || interval_ms == 0 {
        return value.max(0.0);
    }
    let elapsed_ms = (now_ms - last_touched_ms).max(0) as f64;
    let half_lives = elapsed_ms / interval_ms as f64;
    value * 0.5_f64.powf(half_lives)
}

/// Decay-then-max merge of a set of replica observations of the same key.
/// This is what a DHT `GET` quorum read reduces to once every replica has
/// decayed its copy forward to `now_ms`.
pub fn merge_decayed<I>(replicas: I, now_ms: i64, interval_ms: u64) -> f64
where
    I: IntoIterator<Item = StoredCounter>,
{
    replicas
        .into_iter()
        .map(|c| c.decayed_at(now_ms, interval_ms))
        .fold(0.0_f64, f64::max)
}

/// Per-node map of key to decaying counter, with lazy expiry below `min_value`.
pub struct CounterStore {
    interval_ms: u64,
    min_value: f64,
    entries: RwLock<HashMap<Vec<u8>, StoredCounter>>,
}

impl CounterStore {
    pub fn new(interval_ms: u64, min_value: f64) -> Self {
        Self {
            interval_ms,
            min_value,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Decay the current value to `now_ms`, add `delta`, store, and return the
    /// post-write value. This is the local half of a DHT `PUT`.
    pub fn put(&self, key: &[u8], delta: f64, now_ms: i64) -> Result<f64, CounterStoreError> {
        if delta < 0.0 {
            return Err(CounterStoreError::NegativeDelta(delta));
        }
        let mut entries = self.entries.write();
        let decayed = entries
            .get(key)
            .map(|c| c.decayed_at(now_ms, self.interval_ms))
            .unwrap_or(0.0);
        let value = decayed + delta;
        if value < self.min_value {
            entries.remove(key);
            return Ok(value);
        }
        entries.insert(
            key.to_vec(),
            StoredCounter {
                value,
                last_touched_ms: now_ms,
            },
        );
        Ok(value)
    }

    /// Decayed read without mutating the entry. Returns 0 if absent.
    pub fn get(&self, key: &[u8], now_ms: i64) -> f64 {
        self.entries
            .read()
            .get(key)
            .map(|c| c.decayed_at(now_ms, self.interval_ms))
            .unwrap_or(0.0)
    }

    /// Raw stored entry, e.g. for replicating to other nodes.
    pub fn snapshot(&self, key: &[u8]) -> Option<StoredCounter> {
        self.entries.read().get(key).copied()
    }

    /// Drop any entries that have decayed below `min_value` as of `now_ms`.
    /// Called inline with normal traffic rather than on a separate timer.
    pub fn sweep_expired(&self, now_ms: i64) {
        let mut entries = self.entries.write();
        entries.retain(|_, c| c.decayed_at(now_ms, self.interval_ms) >= self.min_value);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn put_returns_post_write_value() {
        let store = CounterStore::new(1000, 0.1);
        let v = store.put(b"k", 5.0, 0).unwrap();
        assert_eq!(v, 5.0);
        let v = store.put(b"k", 5.0, 0).unwrap();
        assert_eq!(v, 10.0);
    }

    #[test]
    fn decays_by_half_per_interval() {
        let store = CounterStore::new(1000, 0.0);
        store.put(b"k", 100.0, 0).unwrap();
        let v = store.get(b"k", 1000);
        assert!((v - 50.0).abs() < 1e-9, "expected ~50, got {v}");
        let v = store.get(b"k", 2000);
        assert!((v - 25.0).abs() < 1e-9, "expected ~25, got {v}");
    }

    #[test]
    fn get_on_absent_key_is_zero() {
        let store = CounterStore::new(1000, 0.1);
        assert_eq!(store.get(b"missing", 0), 0.0);
    }

    #[test]
    fn put_zero_is_idempotent_read() {
        let store = CounterStore::new(1000, 0.0);
        store.put(b"k", 10.0, 0).unwrap();
        let before = store.get(b"k", 500);
        let v = store.put(b"k", 0.0, 500).unwrap();
        assert!((v - before).abs() < 1e-9);
    }

    #[test]
    fn merge_takes_decayed_max_across_replicas() {
        let a = StoredCounter {
            value: 10.0,
            last_touched_ms: 0,
        };
        let b = StoredCounter {
            value: 100.0,
            last_touched_ms: 0,
        };
        let merged = merge_decayed([a, b], 1000, 1000);
        // b decays to 50, a decays to 5; max wins.
        assert!((merged - 50.0).abs() < 1e-9);
    }

    #[test]
    fn sweep_drops_entries_below_min_value() {
        let store = CounterStore::new(1000, 1.0);
        store.put(b"k", 2.0, 0).unwrap();
        assert_eq!(store.len(), 1);
        // after 10 half-lives, 2.0 has decayed to ~0.002, below min_value 1.0
        store.sweep_expired(10_000);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn negative_delta_rejected() {
        let store = CounterStore::new(1000, 0.1);
        assert!(matches!(
            store.put(b"k", -1.0, 0),
            Err(CounterStoreError::NegativeDelta(_))
        ));
    }

    proptest! {
        #[test]
        fn decay_law_holds(v in 0.0f64..1_000_000.0, elapsed_ms in 0i64..10_000_000, interval_ms in 1u64..100_000) {
            let store = CounterStore::new(interval_ms, 0.0);
            store.put(b"k", v, 0).unwrap();
            let got = store.get(b"k", elapsed_ms);
            let want = decay(v, 0, elapsed_ms, interval_ms);
            prop_assert!((got - want).abs() < 1e-6 * want.max(1.0));
        }

        #[test]
        fn put_is_additive(d1 in 0.0f64..1000.0, d2 in 0.0f64..1000.0) {
            let a = CounterStore::new(1000, 0.0);
            a.put(b"k", d1, 0).unwrap();
            let split = a.put(b"k", d2, 0).unwrap();

            let b = CounterStore::new(1000, 0.0);
            let combined = b.put(b"k", d1 + d2, 0).unwrap();

            prop_assert!((split - combined).abs() < 1e-6 * combined.max(1.0));
        }
    }
}
