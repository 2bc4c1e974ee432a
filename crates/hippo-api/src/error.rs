//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<hippo_core::Error> for ApiError {
    fn from(err: hippo_core::Error) -> Self {
        match err {
            hippo_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            hippo_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            hippo_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            hippo_core::Error::ResourceExhausted(msg) => ApiError::Unavailable(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
