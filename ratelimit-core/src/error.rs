//! Error types for the rate limiter library surface.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RateLimiterError>;

#[derive(Debug, Error)]
pub enum RateLimiterError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not bind a transport after {attempts} attempts")]
    BindExhausted { attempts: u32 },

    #[error("dht operation failed: {0}")]
    Dht(#[from] crate::dht::DhtError),
}
