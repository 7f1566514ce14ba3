//! Shared building blocks for the monitoring services
//!
//! Provides the pieces every service binary needs:
//! - logging bootstrap (console + daily rolling file)
//! - startup banner and service metadata
//! - graceful shutdown signal handling
//! - JSON API envelope types

pub mod api_types;
pub mod logging;
pub mod serde_helpers;
pub mod service_bootstrap;
pub mod shutdown;

#[cfg(feature = "axum")]
pub use api_types::AppError;
pub use api_types::{ErrorResponse, HealthStatus, ServiceStatus, SuccessResponse};
pub use shutdown::wait_for_shutdown;

/// Default host used when binding HTTP listeners
pub const DEFAULT_API_HOST: &str = "0.0.0.0";
