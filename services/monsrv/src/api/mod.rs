//! HTTP API
//!
//! Thin translation layer between the browser UI and the
//! [`ConnectionManager`](crate::device::ConnectionManager).

pub mod dto;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::device::ConnectionManager;

pub use routes::create_api_routes;

/// State shared by every handler
#[derive(Debug)]
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub service_name: String,
    pub version: String,
}

impl AppState {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            service_name: "monsrv".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
