//! Distributed rate limiter on top of a Kademlia-style DHT, using
//! exponentially-decaying counters for approximate, cluster-wide request
//! rate accounting behind a synchronous `check()` hot path.
//!
//! This crate re-exports the library surface from `ratelimit-core`; see that
//! crate for the component implementations. The binary in `src/main.rs` is a
//! small single-node demonstration, not part of the specified behavior.

#![deny(unsafe_code)]

pub use ratelimit_core::{
    dht::{Dht, DhtError, LocalDht, SharedClusterDht},
    RateLimiter, RateLimiterError, RateLimiterOptions,
};
