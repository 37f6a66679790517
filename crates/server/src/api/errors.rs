//! API error types mapped to HTTP status codes.
//!
//! The take contract's response bodies are bare ASCII (decimal token counts
//! and error messages), so errors render as plain-text bodies rather than
//! JSON envelopes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Application-level error type that implements `IntoResponse`.
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request parameters (400).
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        }
    }
}
