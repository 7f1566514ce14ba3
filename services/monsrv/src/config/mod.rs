//! Device connection configuration
//!
//! - [`DeviceConfig`]: validated connection parameters
//! - [`DeviceConfigPatch`]: partial update, also the shape of the persisted record
//! - [`store`]: JSON file persistence
//! - [`settings`]: environment settings and startup resolution

pub mod settings;
pub mod store;

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Endpoint, ValidationError};
use common::serde_helpers::deserialize_optional_i64;

pub use settings::{resolve_startup_config, ServiceSettings, StartupConfig};
pub use store::ConfigStore;

pub const DEFAULT_HOST: &str = "192.168.1.100";
pub const DEFAULT_MODBUS_PORT: u16 = 502;
pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub const MIN_TIMEOUT_MS: i64 = 100;
pub const MAX_TIMEOUT_MS: i64 = 60_000;

/// Connection parameters for the single monitored device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    #[serde(rename = "slaveId")]
    pub unit_id: u8,
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_MODBUS_PORT,
            unit_id: DEFAULT_UNIT_ID,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl DeviceConfig {
    /// Apply a patch and validate the merged result
    ///
    /// `self` is never modified; on error nothing changes.
    pub fn merged(&self, patch: &DeviceConfigPatch) -> Result<DeviceConfig, ValidationError> {
        let host = match &patch.host {
            Some(host) => validate_host(host)?,
            None => self.host.clone(),
        };
        let port = match patch.port {
            Some(port) => validate_port(port)?,
            None => self.port,
        };
        let unit_id = match patch.unit_id {
            Some(unit_id) => validate_unit_id(unit_id)?,
            None => self.unit_id,
        };
        let timeout_ms = match patch.timeout_ms {
            Some(timeout) => validate_timeout(timeout)?,
            None => self.timeout_ms,
        };

        let merged = DeviceConfig {
            host,
            port,
            unit_id,
            timeout_ms,
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Check every invariant of an already-typed config
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_host(&self.host)?;
        validate_port(i64::from(self.port))?;
        validate_unit_id(i64::from(self.unit_id))?;
        validate_timeout(self.timeout_ms as i64)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
        }
    }
}

/// Partial device configuration
///
/// Numeric fields accept numbers or numeric strings so form posts validate
/// with a range error rather than a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<i64>,
    #[serde(
        rename = "slaveId",
        default,
        deserialize_with = "deserialize_optional_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_id: Option<i64>,
    #[serde(
        rename = "timeout",
        default,
        deserialize_with = "deserialize_optional_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_ms: Option<i64>,
}

impl DeviceConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.unit_id.is_none()
            && self.timeout_ms.is_none()
    }
}

// ============================================================================
// Field validation
// ============================================================================

fn validate_host(host: &str) -> Result<String, ValidationError> {
    let trimmed = host.trim();
    let addr: Ipv4Addr = trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidHost(host.to_string()))?;
    if addr.is_unspecified() || addr.is_broadcast() {
        return Err(ValidationError::InvalidHost(host.to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_port(port: i64) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ValidationError::InvalidPort(port)),
    }
}

fn validate_unit_id(unit_id: i64) -> Result<u8, ValidationError> {
    match u8::try_from(unit_id) {
        Ok(unit_id) if unit_id >= 1 => Ok(unit_id),
        _ => Err(ValidationError::InvalidUnitId(unit_id)),
    }
}

fn validate_timeout(timeout: i64) -> Result<u64, ValidationError> {
    if (MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout) {
        Ok(timeout as u64)
    } else {
        Err(ValidationError::InvalidTimeout(timeout))
    }
}
