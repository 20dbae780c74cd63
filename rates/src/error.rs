//! Rate cache error types.

use std::time::Duration;

use exchange_common::ModelError;
use thiserror::Error;

/// Errors that can occur while fetching, aggregating or looking up rates.
#[derive(Debug, Error)]
pub enum RatesError {
    /// Upstream call failed, returned a non-success status or a malformed body.
    #[error("Rate provider error: {0}")]
    ProviderError(String),

    /// Upstream call exceeded its deadline.
    #[error("Rate provider call timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// A rate limiter or concurrency permit could not be acquired in time.
    #[error("Permit acquisition aborted: {0}")]
    RateLimitAbort(String),

    /// Currency catalog could not be loaded.
    #[error("Currency catalog load failed: {0}")]
    CatalogLoadError(String),

    /// No direct or derivable rate for the requested symbols.
    #[error("Invalid conversion for pair: {from}/{to}")]
    UnknownPair { from: String, to: String },

    /// A refresh cycle did not complete within its deadline.
    #[error("Refresh did not complete within {0:?}")]
    RefreshTimeout(Duration),

    /// Configuration rejected at construction.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// The cache has been shut down.
    #[error("Rate cache is shut down")]
    ShutDown,

    /// Invalid model value received from upstream.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl RatesError {
    /// Check if the failed operation may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RatesError::ProviderError(_)
                | RatesError::ProviderTimeout(_)
                | RatesError::RateLimitAbort(_)
                | RatesError::CatalogLoadError(_)
                | RatesError::RefreshTimeout(_)
        )
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            RatesError::ProviderError(_) => "PROVIDER_ERROR",
            RatesError::ProviderTimeout(_) => "PROVIDER_TIMEOUT",
            RatesError::RateLimitAbort(_) => "RATE_LIMIT_ABORT",
            RatesError::CatalogLoadError(_) => "CATALOG_LOAD_ERROR",
            RatesError::UnknownPair { .. } => "UNKNOWN_PAIR",
            RatesError::RefreshTimeout(_) => "REFRESH_TIMEOUT",
            RatesError::InvalidConfig(_) => "CONFIGURATION_ERROR",
            RatesError::ShutDown => "SHUT_DOWN",
            RatesError::Model(e) => e.error_code(),
        }
    }
}

impl From<reqwest::Error> for RatesError {
    fn from(e: reqwest::Error) -> Self {
        RatesError::ProviderError(e.without_url().to_string())
    }
}

/// Result type for rate operations.
pub type RatesResult<T> = Result<T, RatesError>;
