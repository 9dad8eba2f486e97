//! HTTP-facing error mapping.
//!
//! Wraps [`meridian_core::CoreError`] (and ad hoc application failures)
//! into the JSON error contract `{error: {code, message}}`, classifying
//! each kind to an HTTP status code without leaking internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use meridian_core::error::ErrorKind;
use meridian_core::CoreError;
use serde::Serialize;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let status = match err.kind() {
            ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Ingestion => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Retrieval => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Provider => StatusCode::BAD_GATEWAY,
            ErrorKind::Tool => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Safety => StatusCode::OK,
            ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
        };
        let code = match err.kind() {
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Ingestion => "ingestion_error",
            ErrorKind::Retrieval => "retrieval_error",
            ErrorKind::Provider => "provider_error",
            ErrorKind::Tool => "tool_error",
            ErrorKind::Safety => "safety_block",
            ErrorKind::Persistence => "persistence_error",
            ErrorKind::Validation => "validation_error",
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: ErrorDetail { code: self.code, message: self.message } };
        (self.status, Json(body)).into_response()
    }
}
