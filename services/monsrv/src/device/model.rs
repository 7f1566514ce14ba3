//! Request and status types exchanged with the connection manager

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::transport::{RegisterKind, WriteKind};
use crate::error::ValidationError;

pub const MAX_READ_QUANTITY: i64 = 125;

/// One past the last address of the 16-bit Modbus address space
const ADDRESS_SPACE: u32 = 65536;

/// Link state tracked by the manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the device link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: ConnectionState,
    pub host: String,
    pub port: u16,
    #[serde(rename = "slaveId")]
    pub unit_id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "lastConnected", skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Verdict of an explicit connection test
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionResult {
    pub success: bool,
    pub message: String,
    pub status: ConnectionStatus,
}

/// One element of a read result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterValue {
    pub address: u32,
    pub raw_value: u16,
}

/// Validated read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterReadRequest {
    pub kind: RegisterKind,
    pub start_address: u16,
    pub quantity: u16,
}

impl RegisterReadRequest {
    pub fn new(kind: RegisterKind, start_address: i64, quantity: i64) -> Result<Self, ValidationError> {
        let start_address = validate_address(start_address)?;
        if !(1..=MAX_READ_QUANTITY).contains(&quantity) {
            return Err(ValidationError::InvalidQuantity(quantity));
        }
        if u32::from(start_address) + quantity as u32 > ADDRESS_SPACE {
            return Err(ValidationError::AddressRangeOverflow {
                start: start_address,
                quantity: quantity as u16,
            });
        }
        Ok(Self {
            kind,
            start_address,
            quantity: quantity as u16,
        })
    }
}

/// Validated single-element write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest {
    pub kind: WriteKind,
    pub address: u16,
    pub value: u16,
}

impl WriteRequest {
    pub fn new(kind: WriteKind, address: i64, value: i64) -> Result<Self, ValidationError> {
        let address = validate_address(address)?;
        let value = match kind {
            WriteKind::Register => {
                u16::try_from(value).map_err(|_| ValidationError::InvalidRegisterValue(value))?
            },
            WriteKind::Coil => match value {
                0 | 1 => value as u16,
                _ => return Err(ValidationError::InvalidCoilValue(value)),
            },
        };
        Ok(Self {
            kind,
            address,
            value,
        })
    }
}

fn validate_address(address: i64) -> Result<u16, ValidationError> {
    u16::try_from(address).map_err(|_| ValidationError::InvalidAddress(address))
}
