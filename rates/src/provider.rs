//! Rate provider trait and test double.

use async_trait::async_trait;
use exchange_common::{CurrencyPair, ExchangeRate};

use crate::error::RatesResult;

/// Source of upstream exchange rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Rate of one fiat `from` in crypto `to`.
    async fn get_rate(&self, from: &str, to: &str) -> RatesResult<ExchangeRate>;

    /// Rates for several `CRYPTO/FIAT` pairs in one call. Pairs the upstream
    /// does not quote are simply absent from the result.
    async fn get_crypto_batch(&self, pairs: &[CurrencyPair]) -> RatesResult<Vec<ExchangeRate>>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateProvider;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use dashmap::{DashMap, DashSet};
    use exchange_common::{Currency, CurrencyPair, ExchangeRate};
    use parking_lot::Mutex;

    use super::RateProvider;
    use crate::error::{RatesError, RatesResult};

    /// In-memory provider with canned rates, injectable failures and delay.
    pub struct MockRateProvider {
        name: String,
        rates: DashMap<CurrencyPair, f64>,
        failing: DashSet<CurrencyPair>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MockRateProvider {
        /// Create a new mock provider.
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                rates: DashMap::new(),
                failing: DashSet::new(),
                delay: Mutex::new(Duration::ZERO),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        /// Set the rate returned for `base/quote`.
        pub fn set_rate(&self, base: &str, quote: &str, rate: f64) {
            self.rates.insert(CurrencyPair::new(base, quote), rate);
        }

        /// Make every call touching `base/quote` fail.
        pub fn fail_pair(&self, base: &str, quote: &str) {
            self.failing.insert(CurrencyPair::new(base, quote));
        }

        /// Stop failing calls for `base/quote`.
        pub fn heal_pair(&self, base: &str, quote: &str) {
            self.failing.remove(&CurrencyPair::new(base, quote));
        }

        /// Delay applied to every call.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        /// Number of calls received.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Highest number of calls observed in flight at once.
        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        async fn enter(&self) -> InFlight<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            let guard = InFlight(&self.in_flight);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            guard
        }

        fn check(&self, pair: &CurrencyPair) -> RatesResult<()> {
            if self.failing.contains(pair) {
                return Err(RatesError::ProviderError(format!("injected failure for {}", pair)));
            }
            Ok(())
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RateProvider for MockRateProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_rate(&self, from: &str, to: &str) -> RatesResult<ExchangeRate> {
            let _guard = self.enter().await;
            let pair = CurrencyPair::new(from, to);
            self.check(&pair)?;

            let rate = self
                .rates
                .get(&pair)
                .map(|r| *r)
                .ok_or_else(|| RatesError::ProviderError(format!("no rate for {}", pair)))?;

            Ok(ExchangeRate::new(
                Currency::fiat(&pair.base),
                Currency::crypto(&pair.quote),
                rate,
            )?)
        }

        async fn get_crypto_batch(
            &self,
            pairs: &[CurrencyPair],
        ) -> RatesResult<Vec<ExchangeRate>> {
            let _guard = self.enter().await;
            let mut result = Vec::with_capacity(pairs.len());

            for pair in pairs {
                self.check(pair)?;
                if let Some(rate) = self.rates.get(pair) {
                    result.push(ExchangeRate::new(
                        Currency::crypto(&pair.base),
                        Currency::fiat(&pair.quote),
                        *rate,
                    )?);
                }
            }

            Ok(result)
        }
    }
}
