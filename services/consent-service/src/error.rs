//! HTTP-facing error type
//!
//! Handlers return `ApiError` for request problems. The body shape is
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.
//! Background-removal failures are not errors: they are fallback responses
//! built in `remove_bg`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("missing user identity")]
    Unauthenticated,

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request_error",
            ApiError::Unauthenticated => "authentication_error",
            ApiError::NotFound(_) => "not_found_error",
            ApiError::Storage(_) => "storage_error",
        }
    }
}

impl From<common::Error> for ApiError {
    fn from(err: common::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl From<key_pool::Error> for ApiError {
    fn from(err: key_pool::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

/// Fresh request id in the `req_<uuid>` form used in error bodies.
pub fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "request_id": request_id(),
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
