//! Modbus TCP transport backed by `tokio-modbus`

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_modbus::client::{tcp, Context as ModbusContext, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};
use tokio_modbus::{Error as TokioModbusError, ExceptionCode};
use tracing::debug;

use super::transport::{Connector, DeviceTransport, RawValues, RegisterKind, WriteKind};
use crate::config::DeviceConfig;
use crate::error::{ModbusException, TransportError};

/// Opens TCP connections to the configured device
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(config: &DeviceConfig) -> Result<SocketAddr, TransportError> {
        if let Ok(ip) = config.host.parse::<Ipv4Addr>() {
            return Ok(SocketAddr::from((ip, config.port)));
        }

        tokio::net::lookup_host((config.host.as_str(), config.port))
            .await?
            .next()
            .ok_or_else(|| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("failed to lookup address for {}", config.host),
                ))
            })
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        config: &DeviceConfig,
    ) -> Result<Box<dyn DeviceTransport>, TransportError> {
        let socket_addr = Self::resolve(config).await?;
        let stream = TcpStream::connect(socket_addr).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", socket_addr, e);
        }

        let ctx = tcp::attach_slave(stream, Slave(config.unit_id));
        Ok(Box::new(TcpTransport { ctx }))
    }
}

/// One open Modbus TCP session; dropping it closes the socket
pub struct TcpTransport {
    ctx: ModbusContext,
}

fn map_modbus_error(error: TokioModbusError) -> TransportError {
    match error {
        TokioModbusError::Transport(io_error) => TransportError::Io(io_error),
        TokioModbusError::Protocol(protocol_error) => {
            TransportError::Protocol(protocol_error.to_string())
        },
    }
}

fn map_exception(code: ExceptionCode) -> TransportError {
    let exception = match code {
        ExceptionCode::IllegalFunction => ModbusException::IllegalFunction,
        ExceptionCode::IllegalDataAddress => ModbusException::IllegalDataAddress,
        ExceptionCode::IllegalDataValue => ModbusException::IllegalDataValue,
        ExceptionCode::ServerDeviceFailure => ModbusException::ServerDeviceFailure,
        other => ModbusException::Other(other.to_string()),
    };
    TransportError::Exception(exception)
}

/// Flatten `tokio-modbus`'s nested result
fn flatten<T>(
    result: Result<Result<T, ExceptionCode>, TokioModbusError>,
) -> Result<T, TransportError> {
    result.map_err(map_modbus_error)?.map_err(map_exception)
}

#[async_trait]
impl DeviceTransport for TcpTransport {
    fn set_unit_id(&mut self, unit_id: u8) {
        self.ctx.set_slave(Slave(unit_id));
    }

    async fn read(
        &mut self,
        kind: RegisterKind,
        start: u16,
        quantity: u16,
    ) -> Result<RawValues, TransportError> {
        match kind {
            RegisterKind::Holding => {
                flatten(self.ctx.read_holding_registers(start, quantity).await).map(RawValues::Words)
            },
            RegisterKind::Input => {
                flatten(self.ctx.read_input_registers(start, quantity).await).map(RawValues::Words)
            },
            RegisterKind::Coil => {
                flatten(self.ctx.read_coils(start, quantity).await).map(RawValues::Bits)
            },
            RegisterKind::Discrete => {
                flatten(self.ctx.read_discrete_inputs(start, quantity).await).map(RawValues::Bits)
            },
        }
    }

    async fn write(
        &mut self,
        kind: WriteKind,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        match kind {
            WriteKind::Register => flatten(self.ctx.write_single_register(address, value).await),
            WriteKind::Coil => flatten(self.ctx.write_single_coil(address, value != 0).await),
        }
    }
}
