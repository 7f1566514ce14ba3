//! Shared fixtures for the API integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

use monsrv::api::{create_api_routes, AppState};
use monsrv::config::{ConfigStore, DeviceConfig};
use monsrv::device::{ConnectionManager, ReconnectPolicy, RetryDelay, SimulatedDevice};

/// Delay that records instead of sleeping
#[derive(Default)]
pub struct RecordingDelay {
    pub waits: Mutex<Vec<Duration>>,
}

#[async_trait]
impl RetryDelay for RecordingDelay {
    async fn wait(&self, delay: Duration) {
        self.waits.lock().push(delay);
    }
}

pub struct TestApp {
    pub router: Router,
    pub device: SimulatedDevice,
    pub manager: Arc<ConnectionManager>,
    pub delay: Arc<RecordingDelay>,
    pub config_path: std::path::PathBuf,
    _dir: TempDir,
}

pub fn scenario_config() -> DeviceConfig {
    DeviceConfig {
        host: "192.168.1.50".into(),
        port: 502,
        unit_id: 1,
        timeout_ms: 3000,
    }
}

/// Router backed by a simulated device and a temporary config file
pub fn create_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("modbus-config.json");
    let device = SimulatedDevice::new();
    let delay = Arc::new(RecordingDelay::default());

    let manager = Arc::new(
        ConnectionManager::new(
            scenario_config(),
            Arc::new(device.clone()),
            ConfigStore::new(&config_path),
        )
        .with_retry(ReconnectPolicy::default(), delay.clone()),
    );
    let router = create_api_routes(Arc::new(AppState::new(manager.clone())), "*");

    TestApp {
        router,
        device,
        manager,
        delay,
        config_path,
        _dir: dir,
    }
}

/// Send a request and decode the JSON response
pub async fn json_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let body = match body {
        Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
        None => Body::empty(),
    };
    raw_request(app, method, uri, body).await
}

/// Send a request with an arbitrary body
pub async fn raw_request(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let body: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };
    (status, body)
}
