//! Error types for the chart cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Chart Cache Error Enum ==
/// Unified error type for the chart cache.
///
/// None of these are turned into a placeholder image. A blob that was never
/// rendered is not an error; it is the normal miss path.
#[derive(Error, Debug)]
pub enum ChartCacheError {
    /// Requested slot, report or chart spec does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Render backend failed or returned something that is not a PNG
    #[error("Render failed: {0}")]
    Render(String),

    /// Blob store could not read or write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Normalized chart spec already queued for this owner
    #[error("Chart already exists in queue: {0}")]
    DuplicateEntry(String),

    /// Removal or update targeted a slot that does not exist
    #[error("Chart entry missing: {0}")]
    MissingEntry(String),

    /// Named timeframe could not be resolved to concrete dates
    #[error("Period resolution failed: {0}")]
    Period(String),

    /// Malformed request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request targets another owner's charts
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for ChartCacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChartCacheError::NotFound(_) | ChartCacheError::MissingEntry(_) => {
                StatusCode::NOT_FOUND
            }
            ChartCacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ChartCacheError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChartCacheError::DuplicateEntry(_) => StatusCode::CONFLICT,
            ChartCacheError::Render(_) => StatusCode::BAD_GATEWAY,
            ChartCacheError::Storage(_) | ChartCacheError::Period(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the chart cache.
pub type Result<T> = std::result::Result<T, ChartCacheError>;
