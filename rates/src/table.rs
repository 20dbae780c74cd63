//! Two-level rate table keyed by currency symbol.

use std::collections::HashMap;

use exchange_common::{is_valid_rate, normalize_symbol, ExchangeRate};
use serde::Serialize;

/// `base symbol -> (target symbol -> rate)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateTable {
    rates: HashMap<String, HashMap<String, f64>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a rate into the table, overwriting any previous rate for the same
    /// pair. Returns false if the rate was rejected as invalid.
    pub fn insert(&mut self, rate: &ExchangeRate) -> bool {
        self.insert_raw(&rate.base.symbol, &rate.target.symbol, rate.rate)
    }

    /// Same as [`insert`](Self::insert) for bare symbols.
    pub fn insert_raw(&mut self, base: &str, target: &str, rate: f64) -> bool {
        if !is_valid_rate(rate) {
            return false;
        }

        self.rates
            .entry(normalize_symbol(base))
            .or_default()
            .insert(normalize_symbol(target), rate);
        true
    }

    /// Rate for `base -> target`. Symbols must already be upper-case.
    pub fn rate(&self, base: &str, target: &str) -> Option<f64> {
        self.rates.get(base).and_then(|targets| targets.get(target)).copied()
    }

    pub fn contains_base(&self, base: &str) -> bool {
        self.rates.contains_key(base)
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.rates.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate `(base, target, rate)` in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.rates.iter().flat_map(|(base, targets)| {
            targets
                .iter()
                .map(move |(target, rate)| (base.as_str(), target.as_str(), *rate))
        })
    }
}
