//! Periodically refreshed rate cache.
//!
//! A refresh loads the active catalog, runs the crypto pair pass and the fiat
//! target pass concurrently, and on success replaces both tables in a single
//! step. Lookups always see one complete snapshot. A failed refresh leaves the
//! previous snapshot in place.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use exchange_common::{
    normalize_symbol, Catalog, Currency, CurrencyKind, CurrencyPair, ExchangeRate,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::BatchAggregator;
use crate::catalog::CatalogSource;
use crate::config::CacheConfig;
use crate::error::{RatesError, RatesResult};
use crate::metrics::{RatesMetrics, SharedMetrics};
use crate::provider::RateProvider;
use crate::state::CacheState;
use crate::table::RateTable;

/// Both rate tables from one successful refresh.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// `crypto -> fiat -> rate`.
    pub crypto_to_fiat: RateTable,
    /// `fiat -> crypto -> rate`.
    pub fiat_to_crypto: RateTable,
    /// Catalog the tables were built from.
    pub catalog: Catalog,
    pub refreshed_at: DateTime<Utc>,
}

/// A resolved lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub rate: ExchangeRate,
    /// True when the rate is the reciprocal of a stored entry.
    pub derived: bool,
}

impl Snapshot {
    /// Resolve `from -> to` against this snapshot. Symbols must already be
    /// normalized.
    ///
    /// Precedence:
    /// 1. `crypto_to_fiat[from][to]`
    /// 2. `1 / fiat_to_crypto[to][from]`
    /// 3. `fiat_to_crypto[from][to]`
    /// 4. `1 / crypto_to_fiat[to][from]`
    pub fn resolve(&self, from: &str, to: &str) -> Option<Lookup> {
        use CurrencyKind::{Crypto, Fiat};

        let (rate, derived) = if let Some(rate) = self.crypto_to_fiat.rate(from, to) {
            (self.stored(from, Crypto, to, Fiat, rate), false)
        } else if let Some(rate) = self.fiat_to_crypto.rate(to, from) {
            (self.stored(to, Fiat, from, Crypto, rate).inverse(), true)
        } else if let Some(rate) = self.fiat_to_crypto.rate(from, to) {
            (self.stored(from, Fiat, to, Crypto, rate), false)
        } else if let Some(rate) = self.crypto_to_fiat.rate(to, from) {
            (self.stored(to, Crypto, from, Fiat, rate).inverse(), true)
        } else {
            return None;
        };

        Some(Lookup { rate, derived })
    }

    /// A table entry as an `ExchangeRate`. Tables only hold valid rates.
    fn stored(
        &self,
        base: &str,
        base_kind: CurrencyKind,
        target: &str,
        target_kind: CurrencyKind,
        rate: f64,
    ) -> ExchangeRate {
        ExchangeRate {
            base: self.currency(base, base_kind),
            target: self.currency(target, target_kind),
            rate,
        }
    }

    fn currency(&self, symbol: &str, kind: CurrencyKind) -> Currency {
        self.catalog
            .find(symbol, kind)
            .cloned()
            .unwrap_or_else(|| Currency::new("", symbol, kind))
    }
}

/// Rate cache with a background refresh loop.
pub struct RateCache {
    catalog: Arc<dyn CatalogSource>,
    aggregator: BatchAggregator,
    config: CacheConfig,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    state: RwLock<CacheState>,
    metrics: SharedMetrics,
    /// Serializes refresh cycles.
    refresh_lock: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RateCache {
    fn new(
        catalog: Arc<dyn CatalogSource>,
        provider: Arc<dyn RateProvider>,
        config: CacheConfig,
    ) -> Self {
        let metrics: SharedMetrics = Arc::new(RatesMetrics::new());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            catalog,
            aggregator: BatchAggregator::new(provider, metrics.clone()),
            config,
            snapshot: RwLock::new(None),
            state: RwLock::new(CacheState::Uninitialized),
            metrics,
            refresh_lock: tokio::sync::Mutex::new(()),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Build the cache, run the first refresh and start the background loop.
    ///
    /// The first refresh must succeed; its error is returned as is and no
    /// loop is started.
    pub async fn start(
        catalog: Arc<dyn CatalogSource>,
        provider: Arc<dyn RateProvider>,
        config: CacheConfig,
    ) -> RatesResult<Arc<Self>> {
        config.validate().map_err(RatesError::InvalidConfig)?;

        info!(
            provider = provider.name(),
            refresh_interval = ?config.refresh_interval,
            "Starting rate cache"
        );

        let cache = Arc::new(Self::new(catalog, provider, config));
        cache.refresh().await?;
        cache.spawn_refresh_loop();

        Ok(cache)
    }

    fn spawn_refresh_loop(self: &Arc<Self>) {
        let cache: Weak<Self> = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.refresh_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };

                        tokio::select! {
                            _ = shutdown_rx.changed() => break,
                            result = cache.refresh() => {
                                if let Err(e) = result {
                                    error!(
                                        error = %e,
                                        retryable = e.is_retryable(),
                                        retry_in = ?period,
                                        "Unable to update cache"
                                    );
                                }
                            }
                        }
                    }
                }
            }

            debug!("Refresh loop exited");
        });

        *self.task.lock() = Some(handle);
    }

    /// Run one refresh cycle. On success both tables are replaced together;
    /// on failure the previous snapshot stays in place.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RatesResult<()> {
        let _serialized = self.refresh_lock.lock().await;

        if self.state().is_terminal() {
            return Err(RatesError::ShutDown);
        }

        self.metrics.refresh_started();
        self.set_state(CacheState::Refreshing);
        let mut cycle = CycleGuard {
            cache: self,
            settled: false,
        };

        let result = match timeout(self.config.refresh_timeout, self.build_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(RatesError::RefreshTimeout(self.config.refresh_timeout)),
        };
        cycle.settled = true;

        match result {
            Ok(snapshot) => {
                let crypto_to_fiat = snapshot.crypto_to_fiat.len();
                let fiat_to_crypto = snapshot.fiat_to_crypto.len();

                *self.snapshot.write() = Some(Arc::new(snapshot));

                self.metrics.refresh_succeeded(crypto_to_fiat, fiat_to_crypto);
                self.set_state(CacheState::Ready);
                info!(crypto_to_fiat, fiat_to_crypto, "Rate cache refreshed");
                Ok(())
            }
            Err(e) => {
                self.metrics.refresh_failed();
                self.settle_state();
                warn!(error = %e, code = e.error_code(), "Refresh failed, previous rates kept");
                Err(e)
            }
        }
    }

    async fn build_snapshot(&self) -> RatesResult<Snapshot> {
        let catalog = self.catalog.load_currencies().await?;
        if catalog.is_empty() {
            return Err(RatesError::CatalogLoadError(
                "no available currencies".to_string(),
            ));
        }

        let pairs = crypto_pairs(&catalog);
        let targets = fiat_targets(&catalog);
        debug!(
            fiats = catalog.fiats.len(),
            cryptos = catalog.cryptos.len(),
            pairs = pairs.len(),
            targets = targets.len(),
            "Loaded currency catalog"
        );

        let passes = async {
            tokio::join!(
                self.aggregator.crypto_rates(pairs, &self.config.crypto),
                self.aggregator.fiat_rates(targets, &self.config.fiat),
            )
        };

        let (crypto_to_fiat, fiat_to_crypto) = timeout(self.config.pass_timeout, passes)
            .await
            .map_err(|_| RatesError::RefreshTimeout(self.config.pass_timeout))?;

        Ok(Snapshot {
            crypto_to_fiat: crypto_to_fiat?,
            fiat_to_crypto: fiat_to_crypto?,
            catalog,
            refreshed_at: Utc::now(),
        })
    }

    /// Look up the rate from `from` to `to`. Symbols are case-insensitive.
    pub fn get(&self, from: &str, to: &str) -> RatesResult<ExchangeRate> {
        self.lookup(from, to).map(|lookup| lookup.rate)
    }

    /// Like [`get`](Self::get), also reporting whether the rate was derived.
    pub fn lookup(&self, from: &str, to: &str) -> RatesResult<Lookup> {
        let from = normalize_symbol(from);
        let to = normalize_symbol(to);

        let resolved = {
            let snapshot = self.snapshot.read();
            snapshot.as_deref().and_then(|s| s.resolve(&from, &to))
        };

        match resolved {
            Some(lookup) => {
                self.metrics.lookup(lookup.derived, true);
                Ok(lookup)
            }
            None => {
                self.metrics.lookup(false, false);
                debug!(from = %from, to = %to, "No rate for pair");
                Err(RatesError::UnknownPair { from, to })
            }
        }
    }

    /// Current snapshot, if a refresh has ever succeeded.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> CacheState {
        *self.state.read()
    }

    /// Check if lookups are being answered.
    pub fn is_serving(&self) -> bool {
        self.state().is_serving(self.snapshot.read().is_some())
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().as_ref().map(|s| s.refreshed_at)
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Stop the background loop and wait for it to exit. Safe to call more
    /// than once. The last snapshot remains readable.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Refresh loop panicked");
                }
            }
        }

        *self.state.write() = CacheState::Stopped;
        info!("Rate cache stopped");
    }

    /// Leave `Refreshing` after a cycle that committed nothing.
    fn settle_state(&self) {
        let next = if self.snapshot.read().is_some() {
            CacheState::Ready
        } else {
            CacheState::Uninitialized
        };
        self.set_state(next);
    }

    fn set_state(&self, next: CacheState) {
        let mut state = self.state.write();
        if !state.is_terminal() {
            *state = next;
        }
    }
}

/// Counts a refresh as failed and settles the state when its future is
/// dropped before the cycle completes.
struct CycleGuard<'a> {
    cache: &'a RateCache,
    settled: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.metrics.refresh_failed();
            self.cache.settle_state();
            warn!("Refresh cancelled, previous rates kept");
        }
    }
}

/// Every `CRYPTO/FIAT` combination of the catalog.
fn crypto_pairs(catalog: &Catalog) -> Vec<CurrencyPair> {
    catalog
        .fiats
        .iter()
        .flat_map(|fiat| {
            catalog
                .cryptos
                .iter()
                .map(move |crypto| CurrencyPair::new(&crypto.symbol, &fiat.symbol))
        })
        .collect()
}

/// One `(fiat, crypto)` target per fiat. Each fiat keeps only the last
/// crypto of the catalog, so this pass covers fewer pairs than the crypto
/// pass whenever more than one crypto is active.
fn fiat_targets(catalog: &Catalog) -> Vec<(String, String)> {
    let mut targets: HashMap<String, String> = HashMap::new();
    for fiat in &catalog.fiats {
        for crypto in &catalog.cryptos {
            targets.insert(fiat.symbol.clone(), crypto.symbol.clone());
        }
    }

    if catalog.cryptos.len() > 1 {
        debug!(
            fiats = targets.len(),
            skipped = catalog.fiats.len() * (catalog.cryptos.len() - 1),
            "Fiat pass narrowed to one crypto per fiat"
        );
    }

    targets.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::config::AggregationConfig;
    use crate::provider::MockRateProvider;
    use proptest::prelude::*;
    use std::time::Duration;

    fn fast_config() -> CacheConfig {
        let pass = AggregationConfig {
            max_in_flight: 4,
            chunk_size: 1,
            acquire_timeout: Duration::from_millis(500),
            call_timeout: Duration::from_millis(500),
            merge_timeout: Duration::from_millis(500),
        };
        CacheConfig {
            refresh_interval: Duration::from_secs(3600),
            refresh_timeout: Duration::from_secs(2),
            pass_timeout: Duration::from_secs(1),
            crypto: pass.clone(),
            fiat: pass,
        }
    }

    fn usd_eur_btc() -> Arc<StaticCatalog> {
        Arc::new(StaticCatalog::new(
            vec![
                Currency::new("US Dollar", "USD", CurrencyKind::Fiat),
                Currency::new("Euro", "EUR", CurrencyKind::Fiat),
            ],
            vec![Currency::new("Bitcoin", "BTC", CurrencyKind::Crypto)],
        ))
    }

    fn quoted_provider() -> Arc<MockRateProvider> {
        let provider = Arc::new(MockRateProvider::new("mock"));
        provider.set_rate("BTC", "USD", 50000.0);
        provider.set_rate("BTC", "EUR", 46000.0);
        provider.set_rate("USD", "BTC", 0.00002);
        provider.set_rate("EUR", "BTC", 0.0000217);
        provider
    }

    async fn started(
        catalog: Arc<StaticCatalog>,
        provider: Arc<MockRateProvider>,
        config: CacheConfig,
    ) -> Arc<RateCache> {
        RateCache::start(catalog, provider, config).await.unwrap()
    }

    #[tokio::test]
    async fn test_lookup_after_first_refresh() {
        let cache = started(usd_eur_btc(), quoted_provider(), fast_config()).await;
        assert_eq!(cache.state(), CacheState::Ready);
        assert!(cache.is_serving());

        let rate = cache.get("BTC", "USD").unwrap();
        assert_eq!(rate.rate, 50000.0);
        assert!(rate.base.is_crypto());
        assert!(rate.target.is_fiat());
        assert_eq!(rate.base.name, "Bitcoin");
        assert_eq!(rate.target.name, "US Dollar");

        let lookup = cache.lookup("USD", "BTC").unwrap();
        assert_eq!(lookup.rate.rate, 0.00002);
        assert!(!lookup.derived);
        assert!(lookup.rate.base.is_fiat());
        assert!(lookup.rate.target.is_crypto());

        assert_eq!(cache.get("BTC", "EUR").unwrap().rate, 46000.0);
        assert_eq!(cache.get("EUR", "BTC").unwrap().rate, 0.0000217);

        match cache.get("BTC", "JPY") {
            Err(RatesError::UnknownPair { from, to }) => {
                assert_eq!(from, "BTC");
                assert_eq!(to, "JPY");
            }
            other => panic!("expected UnknownPair, got {:?}", other),
        }

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_symbols_are_case_insensitive() {
        let cache = started(usd_eur_btc(), quoted_provider(), fast_config()).await;

        assert_eq!(cache.get("btc", "usd").unwrap().rate, 50000.0);
        assert_eq!(cache.get(" Btc", "Usd ").unwrap().rate, 50000.0);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_reciprocal_derivation() {
        // Two cryptos: the fiat pass only fetches USD -> ETH.
        let catalog = Arc::new(StaticCatalog::new(
            vec![Currency::fiat("USD")],
            vec![Currency::crypto("BTC"), Currency::crypto("ETH")],
        ));
        let provider = Arc::new(MockRateProvider::new("mock"));
        provider.set_rate("BTC", "USD", 50000.0);
        provider.set_rate("USD", "ETH", 0.0005);

        let cache = started(catalog, provider, fast_config()).await;

        let eth_usd = cache.lookup("ETH", "USD").unwrap();
        assert!(eth_usd.derived);
        assert!((eth_usd.rate.rate - 2000.0).abs() < 1e-9);
        assert!(eth_usd.rate.base.is_crypto());

        let usd_btc = cache.lookup("USD", "BTC").unwrap();
        assert!(usd_btc.derived);
        assert!((usd_btc.rate.rate - 1.0 / 50000.0).abs() < 1e-15);
        assert!(usd_btc.rate.base.is_fiat());

        let snapshot = cache.snapshot().unwrap();
        assert!(snapshot.fiat_to_crypto.rate("USD", "BTC").is_none());

        let metrics = cache.metrics().snapshot();
        assert_eq!(metrics.lookups_derived, 2);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_direct_entry_wins_over_reciprocal() {
        let cache = started(usd_eur_btc(), quoted_provider(), fast_config()).await;

        // 1 / 0.00002 would also be 50000, so make them disagree.
        let snapshot = cache.snapshot().unwrap();
        let mut altered = (*snapshot).clone();
        altered.fiat_to_crypto.insert_raw("USD", "BTC", 0.00004);

        let lookup = altered.resolve("BTC", "USD").unwrap();
        assert_eq!(lookup.rate.rate, 50000.0);
        assert!(!lookup.derived);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_lookups_agree() {
        let cache = started(usd_eur_btc(), quoted_provider(), fast_config()).await;

        let first = cache.get("EUR", "BTC").unwrap();
        for _ in 0..10 {
            assert_eq!(cache.get("EUR", "BTC").unwrap(), first);
        }

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_refresh_failure_is_fatal() {
        let catalog = usd_eur_btc();
        catalog.make_unavailable();

        let result = RateCache::start(catalog, quoted_provider(), fast_config()).await;
        assert!(matches!(result, Err(RatesError::CatalogLoadError(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = fast_config();
        config.fiat.max_in_flight = 0;

        let result = RateCache::start(usd_eur_btc(), quoted_provider(), config).await;
        assert!(matches!(result, Err(RatesError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let catalog = usd_eur_btc();
        let provider = quoted_provider();
        let cache = started(catalog.clone(), provider.clone(), fast_config()).await;
        let refreshed_at = cache.last_refreshed().unwrap();

        provider.set_rate("BTC", "USD", 51000.0);
        catalog.make_unavailable();

        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 50000.0);
        assert_eq!(cache.last_refreshed(), Some(refreshed_at));

        let metrics = cache.metrics().snapshot();
        assert_eq!(metrics.refreshes_total, 2);
        assert_eq!(metrics.refreshes_failed, 1);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_replaces_rates() {
        let provider = quoted_provider();
        let cache = started(usd_eur_btc(), provider.clone(), fast_config()).await;
        let before = cache.last_refreshed().unwrap();

        provider.set_rate("BTC", "USD", 51000.0);
        cache.refresh().await.unwrap();

        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 51000.0);
        assert!(cache.last_refreshed().unwrap() >= before);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_aborted_pass_does_not_partially_apply() {
        let mut config = fast_config();
        config.fiat.max_in_flight = 1;
        config.fiat.acquire_timeout = Duration::from_millis(20);

        let provider = quoted_provider();
        let cache = started(usd_eur_btc(), provider.clone(), config).await;

        // The crypto pass would pick this up, but the fiat pass aborts
        // waiting for its only permit.
        provider.set_rate("BTC", "USD", 99999.0);
        provider.set_delay(Duration::from_millis(100));

        let result = cache.refresh().await;
        assert!(matches!(result, Err(RatesError::RateLimitAbort(_))));
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 50000.0);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_pass_deadline() {
        let mut config = fast_config();
        config.pass_timeout = Duration::from_millis(50);

        let provider = quoted_provider();
        provider.set_delay(Duration::from_millis(200));

        let result = RateCache::start(usd_eur_btc(), provider, config).await;
        assert!(matches!(result, Err(RatesError::RefreshTimeout(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lookups_during_refresh_see_whole_snapshots() {
        let provider = quoted_provider();
        let cache = started(usd_eur_btc(), provider.clone(), fast_config()).await;

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = cache.snapshot().unwrap();
                    let usd = snapshot.crypto_to_fiat.rate("BTC", "USD").unwrap();
                    let eur = snapshot.crypto_to_fiat.rate("BTC", "EUR").unwrap();
                    // Each generation moves both quotes together.
                    assert_eq!(usd - 50000.0, eur - 46000.0);

                    let rate = cache.get("BTC", "USD").unwrap().rate;
                    assert!(rate >= 50000.0);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for generation in 1..=5 {
            provider.set_rate("BTC", "USD", 50000.0 + generation as f64);
            provider.set_rate("BTC", "EUR", 46000.0 + generation as f64);
            cache.refresh().await.unwrap();
        }

        for reader in readers {
            reader.await.unwrap();
        }

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_refresh_and_shutdown() {
        let mut config = fast_config();
        config.refresh_interval = Duration::from_millis(50);

        let provider = quoted_provider();
        let cache = started(usd_eur_btc(), provider.clone(), config).await;

        provider.set_rate("BTC", "USD", 52000.0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 52000.0);
        assert!(cache.metrics().snapshot().refreshes_succeeded >= 2);

        cache.shutdown().await;
        assert_eq!(cache.state(), CacheState::Stopped);
        assert!(!cache.is_serving());

        let calls = provider.calls();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.calls(), calls);

        // The last snapshot is still readable and refresh is refused.
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 52000.0);
        assert!(matches!(cache.refresh().await, Err(RatesError::ShutDown)));

        cache.shutdown().await;
        assert_eq!(cache.state(), CacheState::Stopped);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_settles() {
        let provider = quoted_provider();
        let cache = started(usd_eur_btc(), provider.clone(), fast_config()).await;

        provider.set_rate("BTC", "USD", 51000.0);
        provider.set_delay(Duration::from_millis(500));
        let result = timeout(Duration::from_millis(50), cache.refresh()).await;
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 50000.0);

        let metrics = cache.metrics().snapshot();
        assert_eq!(metrics.refreshes_total, 2);
        assert_eq!(metrics.refreshes_succeeded, 1);
        assert_eq!(metrics.refreshes_failed, 1);

        // The next refresh is not blocked by the dropped one.
        provider.set_delay(Duration::ZERO);
        cache.refresh().await.unwrap();
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 51000.0);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_catalog_fails_refresh() {
        let catalog = usd_eur_btc();
        let cache = started(catalog.clone(), quoted_provider(), fast_config()).await;

        catalog.set(Catalog::default());
        let result = cache.refresh().await;
        assert!(matches!(result, Err(RatesError::CatalogLoadError(_))));
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 50000.0);
        assert_eq!(cache.snapshot().unwrap().catalog.fiats.len(), 2);

        cache.shutdown().await;

        let empty = Arc::new(StaticCatalog::new(Vec::new(), Vec::new()));
        let result = RateCache::start(empty, quoted_provider(), fast_config()).await;
        assert!(matches!(result, Err(RatesError::CatalogLoadError(_))));
    }

    #[tokio::test]
    async fn test_background_loop_recovers_after_failures() {
        let mut config = fast_config();
        config.refresh_interval = Duration::from_millis(50);

        let catalog = usd_eur_btc();
        let provider = quoted_provider();
        let cache = started(catalog.clone(), provider.clone(), config).await;

        catalog.make_unavailable();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let failed = cache.metrics().snapshot().refreshes_failed;
        assert!(failed >= 1);
        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(cache.get("BTC", "USD").unwrap().rate, 50000.0);

        provider.set_rate("BTC", "JPY", 7_500_000.0);
        provider.set_rate("JPY", "BTC", 0.000000133);
        catalog.set(Catalog::new(
            vec![Currency::fiat("USD"), Currency::fiat("EUR"), Currency::fiat("JPY")],
            vec![Currency::crypto("BTC")],
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(cache.get("BTC", "JPY").unwrap().rate, 7_500_000.0);
        let metrics = cache.metrics().snapshot();
        assert!(metrics.refreshes_succeeded >= 2);
        assert_eq!(
            metrics.refreshes_total,
            metrics.refreshes_succeeded + metrics.refreshes_failed
        );

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_passes_run_concurrently() {
        let catalog = Arc::new(StaticCatalog::new(
            vec![Currency::fiat("USD")],
            vec![Currency::crypto("BTC")],
        ));
        let provider = quoted_provider();
        let cache = started(catalog, provider.clone(), fast_config()).await;

        provider.set_delay(Duration::from_millis(300));
        let started_at = Instant::now();
        cache.refresh().await.unwrap();
        let elapsed = started_at.elapsed();

        // One call per pass; sequential passes would take twice the delay.
        assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
        assert_eq!(provider.peak_in_flight(), 2);

        cache.shutdown().await;
    }

    #[test]
    fn test_fiat_targets_keep_last_crypto() {
        let catalog = Catalog::new(
            vec![Currency::fiat("USD"), Currency::fiat("EUR")],
            vec![Currency::crypto("BTC"), Currency::crypto("ETH")],
        );

        let mut targets = fiat_targets(&catalog);
        targets.sort();
        assert_eq!(
            targets,
            vec![
                ("EUR".to_string(), "ETH".to_string()),
                ("USD".to_string(), "ETH".to_string()),
            ]
        );

        let pairs = crypto_pairs(&catalog);
        assert_eq!(pairs.len(), 4);
        assert!(pairs.contains(&CurrencyPair::new("BTC", "EUR")));
    }

    fn single_pair_snapshot(c2f: Option<f64>, f2c: Option<f64>) -> Snapshot {
        let mut crypto_to_fiat = RateTable::new();
        let mut fiat_to_crypto = RateTable::new();
        if let Some(rate) = c2f {
            crypto_to_fiat.insert_raw("BTC", "USD", rate);
        }
        if let Some(rate) = f2c {
            fiat_to_crypto.insert_raw("USD", "BTC", rate);
        }
        Snapshot {
            crypto_to_fiat,
            fiat_to_crypto,
            catalog: Catalog::default(),
            refreshed_at: Utc::now(),
        }
    }

    proptest! {
        #[test]
        fn prop_reciprocal_matches_stored(rate in 1e-9f64..1e9) {
            let snapshot = single_pair_snapshot(Some(rate), None);

            let direct = snapshot.resolve("BTC", "USD").unwrap();
            prop_assert_eq!(direct.rate.rate, rate);
            prop_assert!(!direct.derived);

            let derived = snapshot.resolve("USD", "BTC").unwrap();
            prop_assert!(derived.derived);
            prop_assert!((derived.rate.rate * rate - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_resolved_rates_are_positive(
            c2f in proptest::option::of(1e-9f64..1e9),
            f2c in proptest::option::of(1e-9f64..1e9),
        ) {
            let snapshot = single_pair_snapshot(c2f, f2c);
            let any = c2f.is_some() || f2c.is_some();

            for (from, to) in [("BTC", "USD"), ("USD", "BTC")] {
                match snapshot.resolve(from, to) {
                    Some(lookup) => {
                        prop_assert!(lookup.rate.rate > 0.0 && lookup.rate.rate.is_finite())
                    }
                    None => prop_assert!(!any),
                }
            }
            prop_assert!(snapshot.resolve("BTC", "JPY").is_none());
        }
    }
}
