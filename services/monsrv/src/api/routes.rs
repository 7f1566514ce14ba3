//! API route configuration

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use super::handlers::{
    get_config, get_status, health_check, not_found, read_registers, test_connection,
    update_config, write_coil, write_register,
};
use super::AppState;

/// Build the CORS layer for the configured UI origin; `*` allows any
pub fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin.trim() == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(origin.trim()) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!("Invalid CORS_ORIGIN '{}': {}; cross-origin requests disabled", origin, e);
                AllowOrigin::list(std::iter::empty::<HeaderValue>())
            },
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Create all API routes for the monitoring service
pub fn create_api_routes(state: Arc<AppState>, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/modbus/read", get(read_registers))
        .route("/modbus/status", get(get_status))
        .route("/modbus/config", get(get_config).post(update_config))
        .route("/modbus/test-connection", post(test_connection))
        .route("/modbus/write/register", post(write_register))
        .route("/modbus/write/coil", post(write_coil))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origin))
        .with_state(state)
}
