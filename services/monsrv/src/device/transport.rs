//! Transport abstraction between the connection manager and a device
//!
//! A [`Connector`] opens handles; a [`DeviceTransport`] is one open handle.
//! Timeouts are applied by the caller, not by implementations.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::error::{TransportError, ValidationError};

/// The four readable data classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
    Discrete,
}

impl RegisterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Input => "input",
            Self::Coil => "coil",
            Self::Discrete => "discrete",
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegisterKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "holding" => Ok(Self::Holding),
            "input" => Ok(Self::Input),
            "coil" => Ok(Self::Coil),
            "discrete" => Ok(Self::Discrete),
            _ => Err(ValidationError::InvalidRegisterKind(s.to_string())),
        }
    }
}

/// The two writable data classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Register,
    Coil,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register => f.write_str("register"),
            Self::Coil => f.write_str("coil"),
        }
    }
}

/// Values returned by a single read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValues {
    Words(Vec<u16>),
    Bits(Vec<bool>),
}

impl RawValues {
    /// Flatten to raw numbers; bits become 1/0
    pub fn into_raw(self) -> Vec<u16> {
        match self {
            Self::Words(words) => words,
            Self::Bits(bits) => bits.into_iter().map(u16::from).collect(),
        }
    }
}

/// One open handle to a device
#[async_trait]
pub trait DeviceTransport: Send {
    /// Address subsequent requests to this unit
    fn set_unit_id(&mut self, unit_id: u8);

    async fn read(
        &mut self,
        kind: RegisterKind,
        start: u16,
        quantity: u16,
    ) -> Result<RawValues, TransportError>;

    /// Single-element write; coil values are 0 or 1
    async fn write(&mut self, kind: WriteKind, address: u16, value: u16)
        -> Result<(), TransportError>;
}

/// Opens transport handles for a configuration
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &DeviceConfig)
        -> Result<Box<dyn DeviceTransport>, TransportError>;
}
