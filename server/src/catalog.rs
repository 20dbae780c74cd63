//! Postgres-backed currency catalog.

use async_trait::async_trait;
use exchange_common::{Catalog, Currency, CurrencyKind};
use exchange_rates::{CatalogSource, RatesError, RatesResult};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};

const LOAD_QUERY: &str =
    "SELECT name, symbol, currency_type FROM currency WHERE is_available = true";

#[derive(Debug, FromRow)]
struct CurrencyRow {
    name: String,
    symbol: String,
    currency_type: String,
}

/// Reads the active currencies from the `currency` table.
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `currency` table if it does not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl CatalogSource for PgCatalog {
    #[instrument(skip(self))]
    async fn load_currencies(&self) -> RatesResult<Catalog> {
        let rows: Vec<CurrencyRow> = sqlx::query_as(LOAD_QUERY)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RatesError::CatalogLoadError(e.to_string()))?;

        let catalog = catalog_from_rows(rows)?;
        debug!(
            fiats = catalog.fiats.len(),
            cryptos = catalog.cryptos.len(),
            "Loaded currencies"
        );
        Ok(catalog)
    }
}

fn catalog_from_rows(rows: Vec<CurrencyRow>) -> RatesResult<Catalog> {
    let currencies = rows
        .into_iter()
        .map(|row| {
            let kind: CurrencyKind = row.currency_type.parse().map_err(|e| {
                RatesError::CatalogLoadError(format!("currency {}: {}", row.symbol, e))
            })?;
            Ok(Currency::new(row.name, &row.symbol, kind))
        })
        .collect::<RatesResult<Vec<_>>>()?;

    Ok(Catalog::from_currencies(currencies))
}
