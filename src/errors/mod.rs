/// Unified error handling module
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Feed could not be fetched or parsed; the feed counts as empty this cycle.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Malformed sample: {0}")]
    MalformedSample(String),
    /// Push endpoint answered 404/410; the subscription must be removed.
    #[error("Push subscription gone ({0})")]
    PushGone(u16),
    #[error("Push delivery failed with status {0}")]
    PushTransient(u16),
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    Crypto(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ApiError {
    fn code_and_status(&self) -> (&'static str, StatusCode) {
        match self {
            ApiError::UpstreamUnavailable(_) => ("UPSTREAM_UNAVAILABLE", StatusCode::BAD_GATEWAY),
            ApiError::MalformedSample(_) => ("MALFORMED_SAMPLE", StatusCode::BAD_GATEWAY),
            ApiError::PushGone(_) => ("PUSH_GONE", StatusCode::GONE),
            ApiError::PushTransient(_) => ("PUSH_TRANSIENT", StatusCode::BAD_GATEWAY),
            ApiError::ConfigMissing(_) => ("CONFIG_MISSING", StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Database(_) => ("DATABASE_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Http(e) => match e.status().map(|s| s.as_u16()) {
                Some(429) => ("UPSTREAM_429", StatusCode::BAD_GATEWAY),
                Some(500..=599) => ("UPSTREAM_5XX", StatusCode::BAD_GATEWAY),
                _ => ("UPSTREAM_ERROR", StatusCode::BAD_GATEWAY),
            },
            ApiError::Serialization(_) => ("SERIALIZATION_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Crypto(_) => ("CRYPTO_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::InvalidInput(_) => ("INVALID_INPUT", StatusCode::BAD_REQUEST),
            ApiError::Unauthorized => ("UNAUTHORIZED", StatusCode::UNAUTHORIZED),
            ApiError::NotFound(_) => ("NOT_FOUND", StatusCode::NOT_FOUND),
            ApiError::Internal(_) => ("INTERNAL_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.code_and_status();

        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
