//! Bounded fan-out of upstream rate calls merged into a single table.
//!
//! Every aggregation pass follows the same shape:
//!
//! 1. the input is split into jobs (chunks of pairs, or single fiat targets);
//! 2. each job runs on its own task once it holds a permit from a semaphore
//!    sized to the pass's in-flight limit;
//! 3. workers push the rates they fetch onto an unbounded channel, and a
//!    failed job only logs and contributes nothing;
//! 4. a single merge task owns the table and folds every received rate into
//!    it, last writer wins;
//! 5. a supervisor task joins all workers and then closes the channel so the
//!    merge task can finish.
//!
//! Failing to obtain a permit in time aborts the whole pass.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use exchange_common::{CurrencyPair, ExchangeRate};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};

use crate::config::AggregationConfig;
use crate::error::{RatesError, RatesResult};
use crate::metrics::SharedMetrics;
use crate::provider::RateProvider;
use crate::table::RateTable;

/// Runs aggregation passes against one provider.
pub struct BatchAggregator {
    provider: Arc<dyn RateProvider>,
    metrics: SharedMetrics,
}

impl BatchAggregator {
    pub fn new(provider: Arc<dyn RateProvider>, metrics: SharedMetrics) -> Self {
        Self { provider, metrics }
    }

    /// Fetch `CRYPTO/FIAT` pairs in chunks of `config.chunk_size` and merge
    /// them into a crypto to fiat table.
    ///
    /// Chunk failures only reduce coverage. The merge phase stops after
    /// `config.merge_timeout` even if workers are still running; rates they
    /// deliver afterwards are dropped and the table is returned as merged so
    /// far.
    #[instrument(skip_all, fields(pairs = pairs.len()))]
    pub async fn crypto_rates(
        &self,
        pairs: Vec<CurrencyPair>,
        config: &AggregationConfig,
    ) -> RatesResult<RateTable> {
        let chunks: Vec<Chunk> = pairs
            .chunks(config.chunk_size.max(1))
            .map(|chunk| Chunk(chunk.to_vec()))
            .collect();

        self.fan_out("crypto", chunks, config, |provider, chunk: Chunk| async move {
            provider.get_crypto_batch(&chunk.0).await
        })
        .await
    }

    /// Fetch one rate per `(fiat, crypto)` target and merge them into a fiat
    /// to crypto table. Same failure and truncation rules as
    /// [`crypto_rates`](Self::crypto_rates).
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn fiat_rates(
        &self,
        targets: Vec<(String, String)>,
        config: &AggregationConfig,
    ) -> RatesResult<RateTable> {
        let jobs: Vec<CurrencyPair> = targets
            .into_iter()
            .map(|(fiat, crypto)| CurrencyPair::new(fiat, crypto))
            .collect();

        self.fan_out("fiat", jobs, config, |provider, pair: CurrencyPair| async move {
            provider
                .get_rate(&pair.base, &pair.quote)
                .await
                .map(|rate| vec![rate])
        })
        .await
    }

    async fn fan_out<J, F, Fut>(
        &self,
        pass: &'static str,
        jobs: Vec<J>,
        config: &AggregationConfig,
        fetch: F,
    ) -> RatesResult<RateTable>
    where
        J: fmt::Display + Send + 'static,
        F: Fn(Arc<dyn RateProvider>, J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RatesResult<Vec<ExchangeRate>>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let merge = tokio::spawn(merge_results(
            pass,
            rx,
            config.merge_timeout,
            self.metrics.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(config.max_in_flight));
        let fetch = Arc::new(fetch);
        let mut workers = JoinSet::new();

        debug!(pass, jobs = jobs.len(), "Dispatching aggregation workers");

        for job in jobs {
            let permit = match timeout(config.acquire_timeout, semaphore.clone().acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    merge.abort();
                    return Err(RatesError::RateLimitAbort(
                        "concurrency semaphore closed".to_string(),
                    ));
                }
                Err(_) => {
                    error!(
                        pass,
                        timeout = ?config.acquire_timeout,
                        "Unable to acquire concurrency permit"
                    );
                    // Dropping the join set aborts workers already running.
                    merge.abort();
                    return Err(RatesError::RateLimitAbort(format!(
                        "no concurrency permit within {:?}",
                        config.acquire_timeout
                    )));
                }
            };

            let tx = tx.clone();
            let provider = self.provider.clone();
            let fetch = fetch.clone();
            let metrics = self.metrics.clone();
            let call_timeout = config.call_timeout;

            workers.spawn(async move {
                let _permit = permit;
                let label = job.to_string();

                match timeout(call_timeout, (*fetch)(provider, job)).await {
                    Ok(Ok(rates)) => {
                        for rate in rates {
                            // The merge task may already have hit its deadline.
                            if tx.send(rate).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        metrics.chunk_failed();
                        warn!(pass, job = %label, error = %e, "Unable to fetch rates");
                    }
                    Err(_) => {
                        metrics.chunk_failed();
                        warn!(pass, job = %label, timeout = ?call_timeout, "Rate fetch timed out");
                    }
                }
            });
        }

        tokio::spawn(supervise(pass, workers, tx));

        merge
            .await
            .map_err(|e| RatesError::ProviderError(format!("{} merge task failed: {}", pass, e)))
    }
}

/// Comma-joined chunk of pairs, as sent upstream.
struct Chunk(Vec<CurrencyPair>);

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", pair)?;
        }
        Ok(())
    }
}

/// Wait for every worker, then close the results channel.
async fn supervise(
    pass: &'static str,
    mut workers: JoinSet<()>,
    tx: mpsc::UnboundedSender<ExchangeRate>,
) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(pass, error = %e, "Aggregation worker panicked");
            }
        }
    }

    drop(tx);
    debug!(pass, "All aggregation workers completed");
}

/// Drain the results channel into a table until it closes or the deadline
/// passes.
async fn merge_results(
    pass: &'static str,
    mut rx: mpsc::UnboundedReceiver<ExchangeRate>,
    merge_timeout: Duration,
    metrics: SharedMetrics,
) -> RateTable {
    let mut table = RateTable::new();
    let deadline = tokio::time::sleep(merge_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                metrics.merge_truncated();
                warn!(
                    pass,
                    merged = table.len(),
                    "Merge deadline reached, returning partial table"
                );
                break;
            }
            received = rx.recv() => match received {
                Some(rate) => {
                    if !table.insert(&rate) {
                        warn!(pass, rate = %rate, "Discarding invalid rate");
                    }
                }
                None => break,
            },
        }
    }

    debug!(pass, pairs = table.len(), "Finished merging results");
    table
}
