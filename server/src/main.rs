//! Exchange server binary.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use exchange_rates::{ForexClient, RateCache};
use exchange_server::{router, LogFormat, PgCatalog, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config);

    info!("Starting exchange server");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await
        .context("unable to connect to database")?;

    let catalog = Arc::new(PgCatalog::new(pool.clone()));
    if config.run_migrations {
        catalog.migrate().await.context("unable to run migrations")?;
        info!("Database migrations applied");
    }

    let client = Arc::new(ForexClient::new(&config.client)?);
    let cache = RateCache::start(catalog, client, config.cache.clone())
        .await
        .context("unable to build initial rate cache")?;

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("unable to bind {}", config.bind_address()))?;

    info!(
        listen_addr = %config.listen_addr,
        listen_port = config.listen_port,
        refresh_interval = ?config.cache.refresh_interval,
        "Exchange server running"
    );

    let served = axum::serve(listener, router(cache.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cache.shutdown().await;
    pool.close().await;

    served.context("HTTP server error")?;
    info!("Exchange server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Plain => registry.with(fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
