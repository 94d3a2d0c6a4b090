//! Construction options for [`crate::RateLimiter`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenOptions {
    pub address: String,
    pub port: u16,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 3050,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedOptions {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterOptions {
    pub listen: ListenOptions,
    pub seeds: Vec<SeedOptions>,
    pub interval_ms: u64,
    pub min_value: f64,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            listen: ListenOptions::default(),
            seeds: Vec::new(),
            interval_ms: 10_000,
            min_value: 0.1,
        }
    }
}

impl RateLimiterOptions {
    /// Programming errors are surfaced synchronously here, not as a panic.
    pub fn validate(&self) -> Result<(), crate::error::RateLimiterError> {
        if self.interval_ms == 0 {
            return Err(crate::error::RateLimiterError::InvalidConfig(
                "interval_ms must be > 0".to_string(),
            ));
        }
        if self.min_value < 0.0 {
            return Err(crate::error::RateLimiterError::InvalidConfig(
                "min_value must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}
