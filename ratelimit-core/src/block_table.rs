//! Component C: the block table.
//!
//! Holds, per key, the last-computed global rate and the set of limits that
//! triggered it. This is the only thing the hot-path check consults besides
//! the local counter table; a key absent from this table is allowed
//! unconditionally.

use crate::local_counters::Limit;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub global_rate: f64,
    pub limits: HashMap<Limit, i64>,
}

pub type Blocks = HashMap<Vec<u8>, Arc<BlockEntry>>;

/// Read-mostly, double-buffered by swapping the whole `Arc<Blocks>` under a
/// write lock so a concurrent `check` always sees either the old table or
/// the new one, never a partial update.
#[derive(Default)]
pub struct BlockTable {
    inner: RwLock<Arc<Blocks>>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// True iff `key` is unblocked, or blocked with a global rate below
    /// `limit`.
    pub fn allows(&self, key: &[u8], limit: f64) -> bool {
        match self.inner.read().get(key) {
            None => true,
            Some(entry) => entry.global_rate < limit,
        }
    }

    pub fn snapshot(&self) -> Arc<Blocks> {
        self.inner.read().clone()
    }

    /// Replace the entire block table in one atomic swap.
    pub fn install(&self, blocks: Blocks) {
        *self.inner.write() = Arc::new(blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rate: f64) -> Arc<BlockEntry> {
        Arc::new(BlockEntry {
            global_rate: rate,
            limits: HashMap::new(),
        })
    }

    #[test]
    fn absent_key_always_allowed() {
        let t = BlockTable::new();
        assert!(t.allows(b"k", 5.0));
    }

    #[test]
    fn blocked_key_compares_rate_to_limit() {
        let t = BlockTable::new();
        let mut blocks = HashMap::new();
        blocks.insert(b"k".to_vec(), entry(10.0));
        t.install(blocks);
        assert!(!t.allows(b"k", 5.0));
        assert!(t.allows(b"k", 20.0));
    }

    #[test]
    fn install_is_a_full_replacement() {
        let t = BlockTable::new();
        let mut first = HashMap::new();
        first.insert(b"a".to_vec(), entry(10.0));
        t.install(first);

        let mut second = HashMap::new();
        second.insert(b"b".to_vec(), entry(10.0));
        t.install(second);

        assert!(t.allows(b"a", 5.0));
        assert!(!t.allows(b"b", 5.0));
    }
}
