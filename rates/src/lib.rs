//! Exchange rate aggregation and cache.
//!
//! Rates for every active crypto/fiat combination are fetched from an
//! upstream API through a shared rate limiter, merged into two tables and
//! served from memory. A background loop replaces the tables at a fixed
//! interval.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use exchange_rates::{CacheConfig, ClientConfig, ForexClient, RateCache, StaticCatalog};
//!
//! let client = Arc::new(ForexClient::new(&ClientConfig::default())?);
//! let catalog = Arc::new(StaticCatalog::new(fiats, cryptos));
//! let cache = RateCache::start(catalog, client, CacheConfig::default()).await?;
//!
//! let rate = cache.get("BTC", "USD")?;
//! cache.shutdown().await;
//! ```

pub mod aggregator;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod provider;
pub mod state;
pub mod table;

pub use aggregator::BatchAggregator;
pub use cache::{Lookup, RateCache, Snapshot};
pub use catalog::{CatalogSource, StaticCatalog};
pub use client::ForexClient;
pub use config::{AggregationConfig, CacheConfig, ClientConfig};
pub use error::{RatesError, RatesResult};
pub use limiter::TokenBucket;
pub use metrics::{MetricsSnapshot, RatesMetrics, SharedMetrics};
pub use provider::RateProvider;
pub use state::CacheState;
pub use table::RateTable;

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
