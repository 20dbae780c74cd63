//! Currency types for the exchange service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Which currency universe a symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyKind {
    /// Government issued currency.
    Fiat,
    /// Cryptocurrency.
    Crypto,
}

impl CurrencyKind {
    /// Text form used by the catalog storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyKind::Fiat => "FIAT",
            CurrencyKind::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIAT" => Ok(CurrencyKind::Fiat),
            "CRYPTO" => Ok(CurrencyKind::Crypto),
            _ => Err(ModelError::UnknownKind(s.to_string())),
        }
    }
}

/// A currency known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    /// Display name, e.g. "US Dollar".
    pub name: String,
    /// Upper-case symbol, unique within its kind.
    pub symbol: String,
    /// Fiat or crypto.
    pub kind: CurrencyKind,
}

impl Currency {
    /// Create a new currency. The symbol is normalized to upper-case.
    pub fn new(name: impl Into<String>, symbol: impl AsRef<str>, kind: CurrencyKind) -> Self {
        Self {
            name: name.into(),
            symbol: normalize_symbol(symbol.as_ref()),
            kind,
        }
    }

    /// Unnamed fiat currency.
    pub fn fiat(symbol: impl AsRef<str>) -> Self {
        Self::new("", symbol, CurrencyKind::Fiat)
    }

    /// Unnamed crypto currency.
    pub fn crypto(symbol: impl AsRef<str>) -> Self {
        Self::new("", symbol, CurrencyKind::Crypto)
    }

    pub fn is_fiat(&self) -> bool {
        self.kind == CurrencyKind::Fiat
    }

    pub fn is_crypto(&self) -> bool {
        self.kind == CurrencyKind::Crypto
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Upper-case and trim a currency symbol.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// A `BASE/QUOTE` pair as understood by the upstream batch endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Base currency symbol.
    pub base: String,
    /// Quote currency symbol.
    pub quote: String,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: normalize_symbol(base.as_ref()),
            quote: normalize_symbol(quote.as_ref()),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None)
                if !base.trim().is_empty() && !quote.trim().is_empty() =>
            {
                Ok(Self::new(base, quote))
            }
            _ => Err(ModelError::InvalidPair(s.to_string())),
        }
    }
}

/// Active currencies split by universe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub fiats: Vec<Currency>,
    pub cryptos: Vec<Currency>,
}

impl Catalog {
    /// Create a catalog from the two lists.
    pub fn new(fiats: Vec<Currency>, cryptos: Vec<Currency>) -> Self {
        Self { fiats, cryptos }
    }

    /// Build a catalog from a mixed list, routing each currency by its kind.
    pub fn from_currencies(currencies: impl IntoIterator<Item = Currency>) -> Self {
        let (fiats, cryptos): (Vec<Currency>, Vec<Currency>) =
            currencies.into_iter().partition(Currency::is_fiat);
        Self { fiats, cryptos }
    }

    pub fn fiat_symbols(&self) -> Vec<String> {
        self.fiats.iter().map(|c| c.symbol.clone()).collect()
    }

    pub fn crypto_symbols(&self) -> Vec<String> {
        self.cryptos.iter().map(|c| c.symbol.clone()).collect()
    }

    /// Find a currency of the given kind by symbol.
    pub fn find(&self, symbol: &str, kind: CurrencyKind) -> Option<&Currency> {
        let list = match kind {
            CurrencyKind::Fiat => &self.fiats,
            CurrencyKind::Crypto => &self.cryptos,
        };
        list.iter().find(|c| c.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn is_empty(&self) -> bool {
        self.fiats.is_empty() && self.cryptos.is_empty()
    }
}
