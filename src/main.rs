//! Single-node demonstration of the distributed rate limiter.
//!
//! Runs one node against the in-process `LocalDht` (no real networking),
//! issuing a burst of `check()` calls and reporting whether a key is blocked
//! after the first tick. Not part of the specified behavior; see
//! `ratelimit-node` for a standalone process with a real transport bootstrap.

use anyhow::Result;
use clap::Parser;
use ratelimit::{LocalDht, RateLimiter, RateLimiterOptions};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "ratelimit")]
#[command(about = "Distributed rate limiter demo", long_about = None)]
struct Args {
    /// Key to exercise
    #[arg(short, long, default_value = "demo-key")]
    key: String,

    /// Requests per second limit
    #[arg(short, long, default_value_t = 5.0)]
    limit: f64,

    /// Number of check() calls to issue in the demo burst
    #[arg(short, long, default_value_t = 100)]
    burst: u32,

    /// Interval in milliseconds between global update ticks
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("ratelimit=debug,ratelimit_core=debug")
        .init();

    let args = Args::parse();

    let options = RateLimiterOptions {
        interval_ms: args.interval_ms,
        ..Default::default()
    };
    let dht = Arc::new(LocalDht::new(
        args.interval_ms,
        options.min_value,
        Arc::new(ratelimit_core::clock::SystemClock),
    ));
    let limiter = RateLimiter::new(options, dht)?.setup().await;

    tracing::info!(key = %args.key, limit = args.limit, burst = args.burst, "issuing burst");
    let mut allowed = 0u32;
    for _ in 0..args.burst {
        if limiter.check(args.key.as_bytes(), args.limit, 1.0) {
            allowed += 1;
        }
    }
    tracing::info!(allowed, total = args.burst, "burst complete, waiting for a tick");

    tokio::time::sleep(tokio::time::Duration::from_millis(args.interval_ms + 200)).await;

    let now_blocked = !limiter.check(args.key.as_bytes(), args.limit, 0.0);
    tracing::info!(blocked = now_blocked, "post-tick check");

    Ok(())
}
