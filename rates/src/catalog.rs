//! Source of the active currency lists.

use async_trait::async_trait;
use exchange_common::{Catalog, Currency};
use parking_lot::RwLock;

use crate::error::{RatesError, RatesResult};

/// Supplies the currencies a refresh should cover. Called once per cycle.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Load active fiat and crypto currencies.
    async fn load_currencies(&self) -> RatesResult<Catalog>;
}

/// In-memory catalog, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    catalog: RwLock<Option<Catalog>>,
}

impl StaticCatalog {
    pub fn new(fiats: Vec<Currency>, cryptos: Vec<Currency>) -> Self {
        Self {
            catalog: RwLock::new(Some(Catalog::new(fiats, cryptos))),
        }
    }

    /// Replace the served catalog.
    pub fn set(&self, catalog: Catalog) {
        *self.catalog.write() = Some(catalog);
    }

    /// Make subsequent loads fail, as an unreachable store would.
    pub fn make_unavailable(&self) {
        *self.catalog.write() = None;
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn load_currencies(&self) -> RatesResult<Catalog> {
        self.catalog
            .read()
            .clone()
            .ok_or_else(|| RatesError::CatalogLoadError("catalog unavailable".to_string()))
    }
}
