//! Modbus API handlers
//!
//! Each handler validates its input, delegates to the connection manager and
//! wraps the outcome in the `{success, ...}` envelope. Extractor rejections
//! are answered with the same 400 envelope as validation errors.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use tracing::debug;

use common::{AppError, HealthStatus, SuccessResponse};

use super::dto::{
    ConfigBody, ConfigResponse, ConfigUpdateResponse, MessageResponse, ReadQuery, ReadResponse,
    WriteCoilBody, WriteRegisterBody,
};
use super::AppState;
use crate::device::{ConnectionResult, ConnectionStatus, WriteKind};
use crate::error::{DeviceError, ValidationError};

type ApiResult<T> = Result<Json<SuccessResponse<T>>, AppError>;

fn device_error(err: DeviceError) -> AppError {
    AppError::from_service_error(&err)
}

fn validation_error(err: ValidationError) -> AppError {
    device_error(DeviceError::from(err))
}

fn malformed(message: String) -> AppError {
    validation_error(ValidationError::Malformed(message))
}

/// Read registers or bits
///
/// @route GET /modbus/read?type=&address=&quantity=
pub async fn read_registers(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> ApiResult<ReadResponse> {
    let Query(query) = query.map_err(|e| malformed(e.body_text()))?;
    let (kind, address, quantity) = query.resolve().map_err(validation_error)?;

    let values = state
        .manager
        .read(kind, address, quantity)
        .await
        .map_err(device_error)?;
    debug!("Read {} {} x{}", kind, address, values.len());

    Ok(Json(SuccessResponse::new(ReadResponse {
        kind,
        values,
        timestamp: Utc::now(),
    })))
}

/// Current link status
///
/// @route GET /modbus/status
pub async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult<ConnectionStatus> {
    Ok(Json(SuccessResponse::new(state.manager.status())))
}

/// Current device configuration
///
/// @route GET /modbus/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<ConfigResponse> {
    Ok(Json(SuccessResponse::new(ConfigResponse {
        config: state.manager.get_config(),
    })))
}

/// Merge, validate and persist a configuration patch
///
/// @route POST /modbus/config
/// @side-effects Persists the record and closes the live connection
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConfigBody>, JsonRejection>,
) -> ApiResult<ConfigUpdateResponse> {
    let Json(patch) = body.map_err(|e| malformed(e.body_text()))?;
    let config = state
        .manager
        .update_config(&patch)
        .await
        .map_err(device_error)?;

    Ok(Json(SuccessResponse::new(ConfigUpdateResponse {
        message: format!("Configuration updated for {}", config.endpoint()),
        config,
    })))
}

/// Fresh connection attempt plus trial read
///
/// @route POST /modbus/test-connection
/// @output Always HTTP 200; `success` carries the verdict
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ConnectionResult>) {
    (StatusCode::OK, Json(state.manager.test_connection().await))
}

/// Write one holding register
///
/// @route POST /modbus/write/register
pub async fn write_register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WriteRegisterBody>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(body) = body.map_err(|e| malformed(e.body_text()))?;
    let (address, value) = body.resolve().map_err(validation_error)?;

    state
        .manager
        .write(WriteKind::Register, address, value)
        .await
        .map_err(device_error)?;

    Ok(Json(SuccessResponse::new(MessageResponse {
        message: format!("Wrote {} to register {}", value, address),
    })))
}

/// Write one coil
///
/// @route POST /modbus/write/coil
pub async fn write_coil(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WriteCoilBody>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(body) = body.map_err(|e| malformed(e.body_text()))?;
    let (address, value) = body.resolve().map_err(validation_error)?;

    state
        .manager
        .write(WriteKind::Coil, address, value)
        .await
        .map_err(device_error)?;

    Ok(Json(SuccessResponse::new(MessageResponse {
        message: format!(
            "Set coil {} {}",
            address,
            if value == 1 { "ON" } else { "OFF" }
        ),
    })))
}

/// Liveness probe
///
/// @route GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus::healthy(&state.service_name, &state.version))
}

/// Envelope for unknown routes
pub async fn not_found() -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "Route not found", "NOT_FOUND")
}
