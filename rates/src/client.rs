//! HTTP client for the upstream rate API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use exchange_common::{Currency, CurrencyPair, ExchangeRate};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{RatesError, RatesResult};
use crate::limiter::TokenBucket;
use crate::provider::RateProvider;

/// `GET /fetch-one` response.
#[derive(Debug, Deserialize)]
struct FetchOneResponse {
    #[serde(default)]
    base: String,
    #[serde(default)]
    result: HashMap<String, f64>,
    #[serde(default)]
    updated: Option<String>,
}

/// `GET /crypto/fetch-prices` response.
#[derive(Debug, Deserialize)]
struct FetchPricesResponse {
    #[serde(default)]
    prices: HashMap<String, f64>,
}

/// Rate API client. All requests share one token bucket.
pub struct ForexClient {
    base_url: Url,
    api_key: String,
    http: reqwest::Client,
    limiter: Arc<TokenBucket>,
    request_timeout: Duration,
}

impl ForexClient {
    /// Create a new client.
    pub fn new(config: &ClientConfig) -> RatesResult<Self> {
        config.validate().map_err(RatesError::InvalidConfig)?;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            RatesError::InvalidConfig(format!("invalid base URL {}: {}", config.base_url, e))
        })?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("exchange-rates/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            http,
            limiter: Arc::new(TokenBucket::new(config.burst, config.refill_interval)),
            request_timeout: config.request_timeout,
        })
    }

    /// The limiter shared by every request of this client.
    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    /// Issue a GET and decode the JSON body. The wait for a token and the
    /// request itself share one deadline.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> RatesResult<T> {
        let started = Instant::now();
        self.limiter.acquire_within(self.request_timeout).await?;

        let url = self
            .base_url
            .join(path)
            .map_err(|e| RatesError::ProviderError(format!("invalid path {}: {}", path, e)))?;
        debug!(url = %url, query = ?query, "Fetching information from API");

        let remaining = self.request_timeout.saturating_sub(started.elapsed());
        let request = async {
            let response = self
                .http
                .get(url)
                .query(query)
                .query(&[("api_key", self.api_key.as_str())])
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(RatesError::ProviderError(format!(
                    "unable to fetch rate due to code: {}",
                    status.as_u16()
                )));
            }

            Ok(response.json::<T>().await?)
        };

        tokio::time::timeout(remaining, request)
            .await
            .map_err(|_| RatesError::ProviderTimeout(self.request_timeout))?
    }
}

#[async_trait]
impl RateProvider for ForexClient {
    fn name(&self) -> &str {
        "fastforex"
    }

    async fn get_rate(&self, from: &str, to: &str) -> RatesResult<ExchangeRate> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();

        let response: FetchOneResponse = self
            .get_json("fetch-one", &[("from", from.clone()), ("to", to.clone())])
            .await?;

        let rate = response.result.get(&to).copied().ok_or_else(|| {
            RatesError::ProviderError(format!("response for {} has no rate for {}", from, to))
        })?;

        let base = if response.base.is_empty() {
            from
        } else {
            response.base
        };

        debug!(base = %base, target = %to, rate, updated = ?response.updated, "Fetched rate");

        Ok(ExchangeRate::new(
            Currency::fiat(base),
            Currency::crypto(to),
            rate,
        )?)
    }

    async fn get_crypto_batch(&self, pairs: &[CurrencyPair]) -> RatesResult<Vec<ExchangeRate>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let joined = pairs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let response: FetchPricesResponse = self
            .get_json("crypto/fetch-prices", &[("pairs", joined)])
            .await?;

        let mut rates = Vec::with_capacity(response.prices.len());
        for (key, price) in response.prices {
            let pair: CurrencyPair = match key.parse() {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(pair = %key, error = %e, "Skipping malformed pair in response");
                    continue;
                }
            };

            let (base, quote) = (Currency::crypto(&pair.base), Currency::fiat(&pair.quote));
            match ExchangeRate::new(base, quote, price) {
                Ok(rate) => rates.push(rate),
                Err(e) => warn!(pair = %pair, error = %e, "Skipping invalid price in response"),
            }
        }

        Ok(rates)
    }
}
