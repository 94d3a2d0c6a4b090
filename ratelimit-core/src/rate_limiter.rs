//! The public facade: `RateLimiter::new(options).setup().await`, then
//! synchronous `check()` calls from request-handling code.

use crate::block_table::{BlockTable, Blocks};
use crate::clock::{Clock, SystemClock};
use crate::controller::Controller;
use crate::dht::Dht;
use crate::error::Result;
use crate::local_counters::LocalCounterTable;
use crate::options::RateLimiterOptions;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub struct RateLimiter {
    local: Arc<LocalCounterTable>,
    blocks: Arc<BlockTable>,
    clock: Arc<dyn Clock>,
    controller: Arc<Controller>,
    controller_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RateLimiter {
    /// Construct a limiter using the given DHT capability. Programming
    /// errors in `options` are surfaced here, synchronously.
    pub fn new(options: RateLimiterOptions, dht: Arc<dyn Dht>) -> Result<Self> {
        options.validate()?;
        Self::with_clock(options, dht, Arc::new(SystemClock))
    }

    /// As [`Self::new`], but with an injectable clock for deterministic
    /// tests of decay and the 600s active-limit window.
    pub fn with_clock(
        options: RateLimiterOptions,
        dht: Arc<dyn Dht>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        options.validate()?;
        let local = Arc::new(LocalCounterTable::new());
        let blocks = Arc::new(BlockTable::new());
        let controller = Arc::new(Controller::new(
            local.clone(),
            blocks.clone(),
            dht,
            clock.clone(),
            options.interval_ms,
        ));
        Ok(Self {
            local,
            blocks,
            clock,
            controller,
            controller_handle: None,
        })
    }

    /// Begin the global update loop. Resolves once the loop is scheduled;
    /// does not wait for any particular tick to complete.
    pub async fn setup(mut self) -> Self {
        debug!("starting global update loop");
        self.controller_handle = Some(self.controller.clone().spawn());
        self
    }

    /// The hot path: never performs I/O, never suspends.
    pub fn check(&self, key: &[u8], limit: f64, increment: f64) -> bool {
        let now_ms = self.clock.now_ms();
        self.local.bump(key, limit, increment, now_ms);
        self.blocks.allows(key, limit)
    }

    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Arc<Blocks>> {
        self.controller.subscribe_blocks()
    }

    pub fn stats(&self) -> Arc<crate::controller::Stats> {
        self.controller.stats()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.controller_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::dht::LocalDht;

    fn limiter(clock: Arc<FakeClock>) -> RateLimiter {
        let dht = Arc::new(LocalDht::new(1000, 0.1, clock.clone()));
        let options = RateLimiterOptions {
            interval_ms: 1000,
            ..Default::default()
        };
        RateLimiter::with_clock(options, dht, clock).unwrap()
    }

    #[test]
    fn check_always_allows_before_any_tick() {
        let clock = Arc::new(FakeClock::new(0));
        let rl = limiter(clock);
        assert!(rl.check(b"a", 5.0, 1.0));
        assert!(rl.check(b"a", 5.0, 1.0));
    }

    #[tokio::test]
    async fn check_blocks_after_tick_over_limit() {
        let clock = Arc::new(FakeClock::new(0));
        let rl = limiter(clock);
        for _ in 0..100 {
            rl.check(b"a", 5.0, 1.0);
        }
        rl.controller.tick().await;
        assert!(!rl.check(b"a", 5.0, 1.0));
    }

    #[test]
    fn invalid_options_rejected_synchronously() {
        let clock = Arc::new(FakeClock::new(0));
        let dht = Arc::new(LocalDht::new(1000, 0.1, clock.clone()));
        let mut opts = RateLimiterOptions::default();
        opts.interval_ms = 0;
        let result = RateLimiter::with_clock(opts, dht, clock);
        assert!(result.is_err());
    }
}
