//! HTTP routes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use exchange_rates::{CacheState, RateCache};
use serde::Serialize;
use tracing::debug;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<RateCache>,
}

/// OpenAPI document for the conversion endpoint.
#[derive(OpenApi)]
#[openapi(
    paths(convert),
    info(
        title = "C2F F2C Converter",
        description = "Crypto-to-Fiat and Fiat-to-Crypto converter",
        version = "1.0"
    ),
    tags((name = "converter", description = "Currency conversion"))
)]
pub struct ApiDoc;

/// Build the service router. Swagger UI is served under `/swagger`.
pub fn router(cache: Arc<RateCache>) -> Router {
    Router::new()
        .route("/convert", get(convert))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(AppState { cache })
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing query parameter: {}", name)))
}

fn parse_amount(params: &HashMap<String, String>) -> Result<f64, ApiError> {
    let amount = match params.get("amount").map(|v| v.trim()) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<f64>()
            .map_err(|_| ApiError::BadRequest(format!("invalid amount: {}", raw)))?,
        _ => 1.0,
    };

    if !amount.is_finite() || amount <= 0.0 {
        return Err(ApiError::BadRequest(format!("amount must be positive: {}", amount)));
    }
    Ok(amount)
}

/// `GET /convert?from=BTC&to=USD&amount=3.1`
///
/// Responds with `amount * rate` as plain text with six decimals.
#[utoipa::path(
    get,
    path = "/convert",
    tag = "converter",
    params(
        ("from" = String, Query, description = "Currency to convert from"),
        ("to" = String, Query, description = "Currency to convert to"),
        ("amount" = Option<f64>, Query, description = "Amount of `from`, defaults to 1")
    ),
    responses(
        (
            status = 200,
            description = "Converted amount",
            body = String,
            content_type = "text/plain"
        ),
        (status = 400, description = "Bad parameters or no rate for the pair"),
        (status = 503, description = "Rate cache stopped")
    )
)]
async fn convert(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, ApiError> {
    let from = required(&params, "from")?;
    let to = required(&params, "to")?;
    let amount = parse_amount(&params)?;

    let rate = state.cache.get(from, to)?;
    let result = rate.convert(amount);

    debug!(from = %rate.base, to = %rate.target, amount, rate = rate.rate, "Converting");

    Ok(format!("{:.6}", result))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    state: CacheState,
    last_refreshed: Option<DateTime<Utc>>,
    crypto_to_fiat_pairs: usize,
    fiat_to_crypto_pairs: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.cache.snapshot();
    let serving = state.cache.is_serving();

    let body = HealthResponse {
        status: if serving { "ok" } else { "unavailable" },
        state: state.cache.state(),
        last_refreshed: snapshot.as_ref().map(|s| s.refreshed_at),
        crypto_to_fiat_pairs: snapshot.as_ref().map_or(0, |s| s.crypto_to_fiat.len()),
        fiat_to_crypto_pairs: snapshot.as_ref().map_or(0, |s| s.fiat_to_crypto.len()),
    };

    let status = if serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.cache.metrics().to_prometheus(),
    )
}
