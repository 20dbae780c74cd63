//! Counters for refresh and lookup monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Rate cache metrics.
#[derive(Debug)]
pub struct RatesMetrics {
    /// Refresh cycles started.
    pub refreshes_total: AtomicU64,
    /// Refresh cycles that replaced the snapshot.
    pub refreshes_succeeded: AtomicU64,
    /// Refresh cycles that kept the previous snapshot.
    pub refreshes_failed: AtomicU64,
    /// Upstream chunk fetches that failed and were skipped.
    pub chunks_failed: AtomicU64,
    /// Merge phases cut short by their deadline.
    pub merges_truncated: AtomicU64,
    /// Lookups served.
    pub lookups_total: AtomicU64,
    /// Lookups answered with a reciprocal rate.
    pub lookups_derived: AtomicU64,
    /// Lookups with no direct or derivable rate.
    pub lookups_unknown: AtomicU64,
    /// Pairs in the current crypto to fiat table.
    pub crypto_to_fiat_pairs: AtomicU64,
    /// Pairs in the current fiat to crypto table.
    pub fiat_to_crypto_pairs: AtomicU64,
}

impl RatesMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            refreshes_total: AtomicU64::new(0),
            refreshes_succeeded: AtomicU64::new(0),
            refreshes_failed: AtomicU64::new(0),
            chunks_failed: AtomicU64::new(0),
            merges_truncated: AtomicU64::new(0),
            lookups_total: AtomicU64::new(0),
            lookups_derived: AtomicU64::new(0),
            lookups_unknown: AtomicU64::new(0),
            crypto_to_fiat_pairs: AtomicU64::new(0),
            fiat_to_crypto_pairs: AtomicU64::new(0),
        }
    }

    pub fn refresh_started(&self) {
        self.refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed snapshot and its size.
    pub fn refresh_succeeded(&self, crypto_to_fiat: usize, fiat_to_crypto: usize) {
        self.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
        self.crypto_to_fiat_pairs
            .store(crypto_to_fiat as u64, Ordering::Relaxed);
        self.fiat_to_crypto_pairs
            .store(fiat_to_crypto as u64, Ordering::Relaxed);
    }

    pub fn refresh_failed(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_failed(&self) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn merge_truncated(&self) {
        self.merges_truncated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup outcome.
    pub fn lookup(&self, derived: bool, found: bool) {
        self.lookups_total.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.lookups_unknown.fetch_add(1, Ordering::Relaxed);
        } else if derived {
            self.lookups_derived.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            merges_truncated: self.merges_truncated.load(Ordering::Relaxed),
            lookups_total: self.lookups_total.load(Ordering::Relaxed),
            lookups_derived: self.lookups_derived.load(Ordering::Relaxed),
            lookups_unknown: self.lookups_unknown.load(Ordering::Relaxed),
            crypto_to_fiat_pairs: self.crypto_to_fiat_pairs.load(Ordering::Relaxed),
            fiat_to_crypto_pairs: self.fiat_to_crypto_pairs.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 10] = [
            ("refreshes_total", "counter", "Refresh cycles started", s.refreshes_total),
            (
                "refreshes_succeeded",
                "counter",
                "Refresh cycles committed",
                s.refreshes_succeeded,
            ),
            (
                "refreshes_failed",
                "counter",
                "Refresh cycles that kept the previous snapshot",
                s.refreshes_failed,
            ),
            (
                "chunks_failed",
                "counter",
                "Upstream chunk fetches skipped after failure",
                s.chunks_failed,
            ),
            (
                "merges_truncated",
                "counter",
                "Merge phases cut short by their deadline",
                s.merges_truncated,
            ),
            ("lookups_total", "counter", "Rate lookups served", s.lookups_total),
            (
                "lookups_derived",
                "counter",
                "Lookups answered with a reciprocal rate",
                s.lookups_derived,
            ),
            ("lookups_unknown", "counter", "Lookups with no known rate", s.lookups_unknown),
            (
                "crypto_to_fiat_pairs",
                "gauge",
                "Pairs in the crypto to fiat table",
                s.crypto_to_fiat_pairs,
            ),
            (
                "fiat_to_crypto_pairs",
                "gauge",
                "Pairs in the fiat to crypto table",
                s.fiat_to_crypto_pairs,
            ),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!("# HELP exchange_{name} {help}\n"));
            out.push_str(&format!("# TYPE exchange_{name} {kind}\n"));
            out.push_str(&format!("exchange_{name} {value}\n\n"));
        }
        out
    }
}

impl Default for RatesMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub refreshes_total: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub chunks_failed: u64,
    pub merges_truncated: u64,
    pub lookups_total: u64,
    pub lookups_derived: u64,
    pub lookups_unknown: u64,
    pub crypto_to_fiat_pairs: u64,
    pub fiat_to_crypto_pairs: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<RatesMetrics>;
