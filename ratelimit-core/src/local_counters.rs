//! Component B: the local counter table.
//!
//! Accumulates per-key increments observed during the current interval along
//! with the set of limits callers have asked about. `bump` is the hot path's
//! only write and never allocates beyond a possible new map entry, never does
//! I/O, and never suspends.

use parking_lot::Mutex;
use std::collections::HashMap;

/// A rate limit value, made hashable/orderable via its bit pattern so it can
/// key a map. Two limits compare equal iff their bit patterns match, which is
/// sufficient here: limits are caller-supplied constants, not computed floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit(pub f64);

impl Limit {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Eq for Limit {}

impl std::hash::Hash for Limit {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalCounter {
    pub pending: f64,
    /// limit -> last time (ms) this limit was asked about for this key
    pub limits: HashMap<Limit, i64>,
}

#[derive(Default)]
pub struct LocalCounterTable {
    inner: Mutex<HashMap<Vec<u8>, LocalCounter>>,
}

impl LocalCounterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `delta` against `key` under `limit`, observed at `now_ms`.
    pub fn bump(&self, key: &[u8], limit: f64, delta: f64, now_ms: i64) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(key.to_vec()).or_default();
        entry.pending += delta;
        entry.limits.entry(Limit(limit)).or_insert(now_ms);
    }

    /// Atomically swap in a fresh empty table and return the previous
    /// contents. Called exactly once per interval by the controller.
    pub fn drain_and_reset(&self) -> HashMap<Vec<u8>, LocalCounter> {
        std::mem::take(&mut *self.inner.lock())
    }
}
