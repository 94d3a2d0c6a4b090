//! Core logic for the distributed rate limiter: a synchronous hot-path check
//! backed by a periodic global update loop that folds local counters into a
//! DHT-backed decaying counter and rebuilds a local block set from it.
//!
//! This crate does not implement a Kademlia transport; it depends on an
//! injected [`dht::Dht`] capability and is usable standalone against the
//! in-memory test doubles in [`dht`] for single-process tests and demos.

pub mod block_table;
pub mod clock;
pub mod controller;
pub mod dht;
pub mod error;
pub mod local_counters;
pub mod options;
pub mod rate_limiter;

pub use error::{RateLimiterError, Result};
pub use options::RateLimiterOptions;
pub use rate_limiter::RateLimiter;
