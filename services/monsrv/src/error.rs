//! Error types for the device path
//!
//! `TransportError` is what a transport reports; `DeviceError` is what the
//! connection manager hands to callers after classifying it against the
//! configured endpoint.

use std::fmt;
use std::io;

use errors::{ErrorCategory, ServiceErrorTrait};
use thiserror::Error;

/// Result type for connection manager operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Identity of the configured device, embedded in every operational error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (unit ID {})", self.host, self.port, self.unit_id)
    }
}

// ============================================================================
// Classification kinds
// ============================================================================

/// Connection-class failure kinds; all of them are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Refused,
    Timeout,
    HostUnreachable,
    HostNotFound,
    Closed,
}

impl ConnectionErrorKind {
    fn message(self, endpoint: &Endpoint) -> String {
        let Endpoint {
            host,
            port,
            unit_id,
        } = endpoint;
        match self {
            Self::Refused => format!(
                "Connection refused by {host}:{port} (unit ID {unit_id}). \
                 Check that the device is powered on and accepts Modbus TCP on port {port}."
            ),
            Self::Timeout => format!(
                "Connection to {host}:{port} (unit ID {unit_id}) timed out. \
                 The device may be offline or a firewall may be dropping traffic."
            ),
            Self::HostUnreachable => format!(
                "Host {host} is unreachable (port {port}, unit ID {unit_id}). \
                 Check the network cable, routing and that the device is on a reachable subnet."
            ),
            Self::HostNotFound => format!(
                "Host {host} could not be found (port {port}, unit ID {unit_id}). \
                 Verify the IP address in the configuration."
            ),
            Self::Closed => format!(
                "Connection to {host}:{port} (unit ID {unit_id}) was closed. \
                 The device may have restarted or dropped the session."
            ),
        }
    }

    fn code(self) -> &'static str {
        match self {
            Self::Refused => "CONNECTION_REFUSED",
            Self::Timeout => "CONNECTION_TIMEOUT",
            Self::HostUnreachable => "HOST_UNREACHABLE",
            Self::HostNotFound => "HOST_NOT_FOUND",
            Self::Closed => "CONNECTION_CLOSED",
        }
    }
}

/// Device-reported request rejections; never retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    IllegalAddress,
    IllegalValue,
}

impl ProtocolErrorKind {
    fn message(self, endpoint: &Endpoint, address: u16, quantity: u16) -> String {
        match self {
            Self::IllegalAddress => format!(
                "Illegal data address: device {endpoint} rejected address {address} \
                 with quantity {quantity}. Check the device register map for the valid range."
            ),
            Self::IllegalValue => format!(
                "Illegal data value: device {endpoint} rejected the request at address \
                 {address} with quantity {quantity}. The value is outside what the device accepts."
            ),
        }
    }

    fn code(self) -> &'static str {
        match self {
            Self::IllegalAddress => "ILLEGAL_ADDRESS",
            Self::IllegalValue => "ILLEGAL_VALUE",
        }
    }
}

// ============================================================================
// ValidationError
// ============================================================================

/// Request or configuration input rejected before any network I/O
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid register type '{0}'. Expected one of: holding, input, coil, discrete")]
    InvalidRegisterKind(String),

    #[error("Invalid address {0}. Address must be between 0 and 65535")]
    InvalidAddress(i64),

    #[error("Invalid quantity {0}. Quantity must be between 1 and 125")]
    InvalidQuantity(i64),

    #[error("Read of {quantity} from address {start} runs past address 65535")]
    AddressRangeOverflow { start: u16, quantity: u16 },

    #[error("Invalid register value {0}. Value must be between 0 and 65535")]
    InvalidRegisterValue(i64),

    #[error("Invalid coil value {0}. Value must be 0 or 1")]
    InvalidCoilValue(i64),

    #[error("Invalid host '{0}'. Host must be a valid IPv4 address other than 0.0.0.0 or 255.255.255.255")]
    InvalidHost(String),

    #[error("Invalid port {0}. Port must be between 1 and 65535")]
    InvalidPort(i64),

    #[error("Invalid slave ID {0}. Slave ID must be between 1 and 255")]
    InvalidUnitId(i64),

    #[error("Invalid timeout {0}. Timeout must be between 100 and 60000 ms")]
    InvalidTimeout(i64),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Malformed request: {0}")]
    Malformed(String),
}

// ============================================================================
// DeviceError
// ============================================================================

/// Classified error returned by the connection manager
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{}", .kind.message(.endpoint))]
    Connection {
        kind: ConnectionErrorKind,
        endpoint: Endpoint,
        detail: String,
    },

    #[error("{}", .kind.message(.endpoint, *.address, *.quantity))]
    Protocol {
        kind: ProtocolErrorKind,
        endpoint: Endpoint,
        address: u16,
        quantity: u16,
    },

    #[error("Modbus error on {endpoint}: {detail}")]
    Unknown { endpoint: Endpoint, detail: String },

    #[error("Failed to persist configuration for {endpoint} to {path}: {detail}")]
    Persistence {
        endpoint: Endpoint,
        path: String,
        detail: String,
    },
}

impl DeviceError {
    pub fn connection(kind: ConnectionErrorKind, endpoint: &Endpoint, detail: impl Into<String>) -> Self {
        Self::Connection {
            kind,
            endpoint: endpoint.clone(),
            detail: detail.into(),
        }
    }

    /// Connection kind, if this is a connection-class error
    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Self::Connection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl ServiceErrorTrait for DeviceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Connection { kind, .. } => kind.code(),
            Self::Protocol { kind, .. } => kind.code(),
            Self::Unknown { .. } => "UNKNOWN_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Unknown { .. } => ErrorCategory::Unknown,
            Self::Persistence { .. } => ErrorCategory::Persistence,
        }
    }
}

// ============================================================================
// TransportError
// ============================================================================

/// Exception responses a device can return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusException {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Other(String),
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "illegal function"),
            Self::IllegalDataAddress => write!(f, "illegal data address"),
            Self::IllegalDataValue => write!(f, "illegal data value"),
            Self::ServerDeviceFailure => write!(f, "server device failure"),
            Self::Other(code) => write!(f, "{}", code),
        }
    }
}

/// Raw failure reported by a transport, before classification
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("transport handle is not open")]
    NotConnected,

    #[error("Modbus exception: {0}")]
    Exception(ModbusException),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Classify into a [`DeviceError`] naming the endpoint
    ///
    /// `address` and `quantity` are echoed back for protocol rejections.
    pub fn classify(self, endpoint: &Endpoint, address: u16, quantity: u16) -> DeviceError {
        let detail = self.to_string();
        match self {
            Self::Timeout => DeviceError::connection(ConnectionErrorKind::Timeout, endpoint, detail),
            Self::NotConnected => {
                DeviceError::connection(ConnectionErrorKind::Closed, endpoint, detail)
            },
            Self::Io(err) => match classify_io(&err) {
                Some(kind) => DeviceError::connection(kind, endpoint, detail),
                None => DeviceError::Unknown {
                    endpoint: endpoint.clone(),
                    detail: err.to_string(),
                },
            },
            Self::Exception(ModbusException::IllegalDataAddress) => DeviceError::Protocol {
                kind: ProtocolErrorKind::IllegalAddress,
                endpoint: endpoint.clone(),
                address,
                quantity,
            },
            Self::Exception(ModbusException::IllegalDataValue) => DeviceError::Protocol {
                kind: ProtocolErrorKind::IllegalValue,
                endpoint: endpoint.clone(),
                address,
                quantity,
            },
            Self::Exception(_) | Self::Protocol(_) => DeviceError::Unknown {
                endpoint: endpoint.clone(),
                detail,
            },
        }
    }
}

fn classify_io(err: &io::Error) -> Option<ConnectionErrorKind> {
    use io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused => Some(ConnectionErrorKind::Refused),
        ErrorKind::TimedOut => Some(ConnectionErrorKind::Timeout),
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable | ErrorKind::AddrNotAvailable => {
            Some(ConnectionErrorKind::HostUnreachable)
        },
        ErrorKind::NotFound => Some(ConnectionErrorKind::HostNotFound),
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => Some(ConnectionErrorKind::Closed),
        _ => {
            // Resolver failures surface as generic errors carrying the lookup text
            let text = err.to_string().to_lowercase();
            if text.contains("failed to lookup") || text.contains("name or service not known") {
                Some(ConnectionErrorKind::HostNotFound)
            } else if text.contains("no route to host") {
                Some(ConnectionErrorKind::HostUnreachable)
            } else {
                None
            }
        },
    }
}
