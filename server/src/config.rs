//! Server configuration.

use std::time::Duration;

use exchange_rates::{CacheConfig, ClientConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Main server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Listen port.
    pub listen_port: u16,
    /// Database URL.
    pub database_url: String,
    /// Maximum pooled database connections.
    pub max_db_connections: u32,
    /// Create the currency table on startup.
    pub run_migrations: bool,
    /// Upstream rate API client.
    pub client: ClientConfig,
    /// Rate cache and refresh settings.
    pub cache: CacheConfig,
    /// Log level, used when `RUST_LOG` is unset.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 3000,
            database_url: "postgres://localhost/exchange".to_string(),
            max_db_connections: 5,
            run_migrations: false,
            client: ClientConfig::default(),
            cache: CacheConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source. Unset or
    /// unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("EXCHANGE_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(port) = lookup("EXCHANGE_LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                config.listen_port = port;
            }
        }

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(run) = lookup("EXCHANGE_RUN_MIGRATIONS") {
            config.run_migrations = matches!(run.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(key) = lookup("EXCHANGE_API_KEY") {
            config.client.api_key = key;
        }

        if let Some(url) = lookup("EXCHANGE_API_URL") {
            config.client.base_url = url;
        }

        if let Some(secs) = lookup("EXCHANGE_REFRESH_SECS") {
            if let Ok(secs) = secs.parse() {
                config.cache.refresh_interval = Duration::from_secs(secs);
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "plain" | "text" | "pretty" => LogFormat::Plain,
                _ => LogFormat::Json,
            };
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }

        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.max_db_connections == 0 {
            return Err("Database pool size cannot be 0".to_string());
        }

        if self.client.api_key.is_empty() {
            return Err("Rate API key cannot be empty".to_string());
        }

        self.client.validate()?;
        self.cache.validate()
    }

    /// `addr:port` to bind the HTTP listener to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}
