//! HTTP error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Request-level errors. Evaluation itself never fails.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing 'url' in request body")]
    MissingUrl,

    #[error("Invalid JSON body: {0}")]
    InvalidBody(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingUrl | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
