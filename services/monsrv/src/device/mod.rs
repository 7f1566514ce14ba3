//! Device access
//!
//! - [`transport`]: transport seam (`Connector`, `DeviceTransport`)
//! - [`tcp`]: Modbus TCP via `tokio-modbus`
//! - [`simulator`]: in-process device for `--simulate` and tests
//! - [`reconnect`]: bounded reconnect loop
//! - [`manager`]: connection lifecycle and request serialisation

pub mod manager;
pub mod model;
pub mod reconnect;
pub mod simulator;
pub mod tcp;
pub mod transport;

pub use manager::ConnectionManager;
pub use model::{
    ConnectionResult, ConnectionState, ConnectionStatus, RegisterReadRequest, RegisterValue,
    WriteRequest, MAX_READ_QUANTITY,
};
pub use reconnect::{ReconnectPolicy, RetryDelay, TokioDelay};
pub use simulator::SimulatedDevice;
pub use tcp::TcpConnector;
pub use transport::{Connector, DeviceTransport, RawValues, RegisterKind, WriteKind};
