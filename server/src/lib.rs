//! Exchange conversion service.
//!
//! Serves crypto/fiat conversions over HTTP from an in-memory rate cache
//! that is refreshed in the background from the upstream rate API. The set
//! of active currencies is read from Postgres on every refresh.

pub mod catalog;
pub mod config;
pub mod error;
pub mod routes;

pub use catalog::PgCatalog;
pub use config::{LogFormat, ServerConfig};
pub use error::ApiError;
pub use routes::{router, AppState};
