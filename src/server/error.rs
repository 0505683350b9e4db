//! JSON error responses.
//!
//! Every failure leaves the server as `{"message": ..., "error": ...}` where
//! `message` says what the route was doing and `error` is the cause.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::SteadfastError;

/// Route failure carrying the underlying [`SteadfastError`].
#[derive(Debug)]
pub struct ApiError {
    message: &'static str,
    source: SteadfastError,
}

impl ApiError {
    pub fn new(message: &'static str, source: SteadfastError) -> Self {
        Self { message, source }
    }

    /// `map_err` adapter: `.map_err(ApiError::context("Failed to place order"))`.
    pub fn context(message: &'static str) -> impl FnOnce(SteadfastError) -> Self {
        move |source| Self::new(message, source)
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.source)
    }
}

impl From<SteadfastError> for ApiError {
    fn from(source: SteadfastError) -> Self {
        Self::new("An error occurred on the server", source)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.source, "{}", self.message);
        } else {
            tracing::warn!(error = %self.source, "{}", self.message);
        }
        let body = json!({
            "message": self.message,
            "error": self.source.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// HTTP status for a crate error.
pub fn status_for(err: &SteadfastError) -> StatusCode {
    match err {
        SteadfastError::InvalidArgument(_)
        | SteadfastError::Json(_)
        | SteadfastError::HedgeUnavailable(_) => StatusCode::BAD_REQUEST,
        SteadfastError::Unauthorized(_) | SteadfastError::MissingCredentials(_) => StatusCode::UNAUTHORIZED,
        SteadfastError::HttpStatus { status, .. }
            if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN =>
        {
            StatusCode::UNAUTHORIZED
        }
        SteadfastError::NotFound(_) => StatusCode::NOT_FOUND,
        SteadfastError::Api { .. } | SteadfastError::HttpStatus { .. } | SteadfastError::Http(_) => {
            StatusCode::BAD_GATEWAY
        }
        SteadfastError::Csv(_) | SteadfastError::Zip(_) | SteadfastError::Io(_) | SteadfastError::Url(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
