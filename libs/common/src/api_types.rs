//! Shared API models for the monitoring services
//!
//! Every JSON response carries a top-level `success` flag. Successful payloads
//! are flattened next to it; failures use [`ErrorResponse`].

use serde::{Deserialize, Serialize};

// ============================================================================
// Standard API Response Models
// ============================================================================

/// Standard success response
///
/// The payload's fields are flattened next to `success: true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    /// Success indicator (always true)
    pub success: bool,
    /// Response payload
    #[serde(flatten)]
    pub data: T,
}

impl<T> SuccessResponse<T> {
    /// Create a new success response
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Standard error response: `{success: false, error, errorType}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Success indicator (always false for errors)
    pub success: bool,
    /// Human readable message
    pub error: String,
    /// Machine readable error code
    pub error_type: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            error_type: error_type.into(),
        }
    }
}

// ============================================================================
// AppError - HTTP Error with proper status codes (requires axum feature)
// ============================================================================

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

/// Application error with HTTP status code
/// This type implements IntoResponse for seamless integration with axum handlers
#[cfg(feature = "axum")]
#[derive(Debug, Clone)]
pub struct AppError {
    /// HTTP status code
    pub status: StatusCode,
    /// Error message returned to the client
    pub message: String,
    /// Error code returned as `errorType`
    pub error_type: String,
}

#[cfg(feature = "axum")]
impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_type: error_type.into(),
        }
    }

    /// Build from any error implementing the shared capability trait
    ///
    /// Status, message and code all come from the error itself.
    pub fn from_service_error<E: errors::ServiceErrorTrait>(err: &E) -> Self {
        Self::new(err.http_status(), err.to_string(), err.error_code())
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse::new(self.message, self.error_type)),
        )
            .into_response()
    }
}

#[cfg(feature = "axum")]
impl From<errors::ServiceError> for AppError {
    fn from(err: errors::ServiceError) -> Self {
        Self::from_service_error(&err)
    }
}

// ============================================================================
// Service Health & Status Models
// ============================================================================

/// Service health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall health status
    pub status: ServiceStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Timestamp of this check
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthStatus {
    pub fn healthy(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Healthy,
            service: service.into(),
            version: version.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Service status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
}
