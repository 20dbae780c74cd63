//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use exchange_rates::RatesError;
use serde_json::json;
use thiserror::Error;

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing query parameters.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Rates(#[from] RatesError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rates(RatesError::UnknownPair { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Rates(RatesError::ShutDown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Rates(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Rates(e) => e.error_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "code": self.error_code(),
        });
        (self.status(), Json(body)).into_response()
    }
}
