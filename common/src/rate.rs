//! Exchange rate type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::currency::Currency;
use crate::error::{ModelError, Result};

/// Amount of `target` per one unit of `base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExchangeRate")]
pub struct ExchangeRate {
    /// Base currency.
    pub base: Currency,
    /// Target currency.
    pub target: Currency,
    /// Strictly positive rate.
    pub rate: f64,
}

impl ExchangeRate {
    /// Create a new exchange rate, rejecting zero, negative and non-finite rates.
    pub fn new(base: Currency, target: Currency, rate: f64) -> Result<Self> {
        if !is_valid_rate(rate) {
            return Err(ModelError::InvalidRate {
                base: base.symbol,
                target: target.symbol,
                rate,
            });
        }
        Ok(Self { base, target, rate })
    }

    /// The reciprocal rate with base and target swapped.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.target.clone(),
            target: self.base.clone(),
            rate: 1.0 / self.rate,
        }
    }

    /// Convert an amount of `base` into `target`.
    pub fn convert(&self, amount: f64) -> f64 {
        amount * self.rate
    }
}

#[derive(Deserialize)]
struct RawExchangeRate {
    base: Currency,
    target: Currency,
    rate: f64,
}

impl TryFrom<RawExchangeRate> for ExchangeRate {
    type Error = ModelError;

    fn try_from(raw: RawExchangeRate) -> Result<Self> {
        Self::new(raw.base, raw.target, raw.rate)
    }
}

impl fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}={}", self.base, self.target, self.rate)
    }
}

/// A rate may be stored only if it is finite and strictly positive.
pub fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}
