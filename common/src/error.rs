//! Error types for the currency model.

use thiserror::Error;

/// Errors raised while constructing or parsing model values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Currency type text is neither fiat nor crypto.
    #[error("Unknown currency type: {0}")]
    UnknownKind(String),

    /// Pair string is not of the form `BASE/QUOTE`.
    #[error("Invalid currency pair: {0}")]
    InvalidPair(String),

    /// Rate is zero, negative or not finite.
    #[error("Invalid rate {rate} for {base}/{target}")]
    InvalidRate {
        base: String,
        target: String,
        rate: f64,
    },
}

impl ModelError {
    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            ModelError::UnknownKind(_) => "UNKNOWN_CURRENCY_TYPE",
            ModelError::InvalidPair(_) => "INVALID_PAIR",
            ModelError::InvalidRate { .. } => "INVALID_RATE",
        }
    }
}

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
