//! Unified error handling for the monitoring services
//!
//! Provides the service-level error type used at startup and around the
//! configuration file, plus a capability trait that domain error types
//! implement to share classification, retry and HTTP mapping rules.

use thiserror::Error;

// ============================================================================
// ServiceError - Main error type
// ============================================================================

/// Main error type for service bootstrap, configuration and persistence
#[derive(Debug, Error)]
pub enum ServiceError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {file}: {error}")]
    ParseError { file: String, error: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),
}

/// Result type alias using ServiceError
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl ServiceErrorTrait for ServiceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::ParseError { .. } => "PARSE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::InvalidConfig { .. } => ErrorCategory::Validation,
            Self::Io(_)
            | Self::ParseError { .. }
            | Self::Serialization(_)
            | Self::StartupFailed(_) => ErrorCategory::Internal,
        }
    }
}

// ============================================================================
// Error capability trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification, retry policy and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Persistence,

    // Request layer
    Validation,

    // Device communication layer
    Connection,
    Protocol,

    // System level
    Internal,
    Unknown,
}

/// Error capability trait
///
/// Each service keeps its own domain-specific error type and gains a common
/// outward-facing interface by implementing this trait.
pub trait ServiceErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for API, logs, monitoring)
    fn error_code(&self) -> &'static str;

    /// Get error category (for classification)
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Connection)
    }

    /// Convert to HTTP status code
    ///
    /// Request validation maps to 400, every operational failure to 500.
    #[cfg(feature = "axum-support")]
    fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
