//! Rate cache configuration.

use std::time::Duration;

/// Upstream API client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the rate API. Must end with a slash.
    pub base_url: String,
    /// API key appended to every request.
    pub api_key: String,
    /// Token bucket capacity.
    pub burst: u32,
    /// One token is refilled per interval.
    pub refill_interval: Duration,
    /// Deadline for a single upstream call, including the wait for a token.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.fastforex.io/".to_string(),
            api_key: String::new(),
            burst: 10,
            refill_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Rate API base URL cannot be empty".to_string());
        }

        if self.burst == 0 {
            return Err("Rate limiter burst cannot be 0".to_string());
        }

        if self.refill_interval.is_zero() {
            return Err("Rate limiter refill interval cannot be zero".to_string());
        }

        Ok(())
    }
}

/// Fan-out settings for one aggregation pass.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Maximum concurrent in-flight upstream calls.
    pub max_in_flight: usize,
    /// Pairs per upstream call.
    pub chunk_size: usize,
    /// Deadline for acquiring a concurrency permit.
    pub acquire_timeout: Duration,
    /// Deadline for one worker's upstream call.
    pub call_timeout: Duration,
    /// Deadline for draining worker results into the table.
    pub merge_timeout: Duration,
}

impl AggregationConfig {
    /// Settings for the crypto pair pass. The upstream batch endpoint is not
    /// reliable with more than one pair per call.
    pub fn crypto() -> Self {
        Self {
            max_in_flight: 30,
            chunk_size: 1,
            acquire_timeout: Duration::from_secs(3),
            call_timeout: Duration::from_secs(3),
            merge_timeout: Duration::from_secs(3),
        }
    }

    /// Settings for the fiat target pass.
    pub fn fiat() -> Self {
        Self {
            max_in_flight: 5,
            ..Self::crypto()
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_in_flight == 0 {
            return Err("Max in-flight requests cannot be 0".to_string());
        }

        if self.chunk_size == 0 {
            return Err("Chunk size cannot be 0".to_string());
        }

        Ok(())
    }
}

/// Rate cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Interval between background refreshes.
    pub refresh_interval: Duration,
    /// Deadline for a whole refresh cycle, catalog load included.
    pub refresh_timeout: Duration,
    /// Deadline for the two concurrent aggregation passes.
    pub pass_timeout: Duration,
    /// Crypto pair pass.
    pub crypto: AggregationConfig,
    /// Fiat target pass.
    pub fiat: AggregationConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(10),
            pass_timeout: Duration::from_secs(5),
            crypto: AggregationConfig::crypto(),
            fiat: AggregationConfig::fiat(),
        }
    }
}

impl CacheConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_interval.is_zero() {
            return Err("Refresh interval cannot be zero".to_string());
        }

        if self.pass_timeout > self.refresh_timeout {
            return Err("Pass timeout cannot exceed refresh timeout".to_string());
        }

        self.crypto.validate()?;
        self.fiat.validate()
    }
}
