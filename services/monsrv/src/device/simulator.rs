//! In-process simulated device
//!
//! Backs the `--simulate` CLI mode and the test suites. Register tables are
//! shared by every handle the simulator opens; failures can be scripted per
//! connect attempt or per operation, and call counters record what the
//! connection manager actually did.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::transport::{Connector, DeviceTransport, RawValues, RegisterKind, WriteKind};
use crate::config::DeviceConfig;
use crate::error::{ModbusException, TransportError};

/// A failure the simulator injects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedFailure {
    Io(io::ErrorKind),
    Exception(ModbusException),
    Protocol(String),
}

impl SimulatedFailure {
    fn into_error(self) -> TransportError {
        match self {
            Self::Io(kind) => TransportError::Io(io::Error::from(kind)),
            Self::Exception(exception) => TransportError::Exception(exception),
            Self::Protocol(message) => TransportError::Protocol(message),
        }
    }
}

/// Snapshot of what the simulator has observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub connect_calls: usize,
    pub read_calls: usize,
    pub write_calls: usize,
    /// Unit id asserted before each operation, in order
    pub unit_ids: Vec<u8>,
    pub open_handles: usize,
    pub max_open_handles: usize,
    /// Configs passed to `connect`, in order
    pub connect_hosts: Vec<String>,
}

#[derive(Debug, Default)]
struct SimState {
    holding: BTreeMap<u16, u16>,
    input: BTreeMap<u16, u16>,
    coils: BTreeMap<u16, bool>,
    discrete: BTreeMap<u16, bool>,
    /// Highest valid address + 1; requests beyond it raise IllegalDataAddress
    address_limit: Option<u32>,
    connect_failures: VecDeque<SimulatedFailure>,
    refuse_all: Option<io::ErrorKind>,
    op_failures: VecDeque<SimulatedFailure>,
    op_delay: Option<Duration>,
    connect_delay: Option<Duration>,
    /// Bumped by `drop_connections`; handles from older generations are dead
    generation: u64,
    /// Input registers advance on every read when set
    live_inputs: bool,
    stats: SimulatorStats,
}

/// Simulated Modbus device; cheap to clone, clones share state
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device with plausible values for UI development
    pub fn demo() -> Self {
        let device = Self::new();
        {
            let mut state = device.state.lock();
            for addr in 0..20u16 {
                state.holding.insert(addr, addr * 100);
                state.input.insert(addr, 2300 + addr);
                state.coils.insert(addr, addr % 2 == 0);
                state.discrete.insert(addr, addr % 3 == 0);
            }
            state.live_inputs = true;
        }
        device
    }

    // ======================================
    // Table setup
    // ======================================

    pub fn set_holding(&self, start: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.holding.insert(start.wrapping_add(offset as u16), *value);
        }
    }

    pub fn set_input(&self, start: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.input.insert(start.wrapping_add(offset as u16), *value);
        }
    }

    pub fn set_coils(&self, start: u16, values: &[bool]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.coils.insert(start.wrapping_add(offset as u16), *value);
        }
    }

    pub fn set_discrete(&self, start: u16, values: &[bool]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.discrete.insert(start.wrapping_add(offset as u16), *value);
        }
    }

    pub fn holding(&self, address: u16) -> u16 {
        self.state.lock().holding.get(&address).copied().unwrap_or(0)
    }

    pub fn coil(&self, address: u16) -> bool {
        self.state.lock().coils.get(&address).copied().unwrap_or(false)
    }

    /// Reject any request touching addresses `>= limit`
    pub fn set_address_limit(&self, limit: u32) {
        self.state.lock().address_limit = Some(limit);
    }

    // ======================================
    // Failure scripting
    // ======================================

    /// Fail the next connect attempt
    pub fn fail_next_connect(&self, failure: SimulatedFailure) {
        self.state.lock().connect_failures.push_back(failure);
    }

    /// Fail every connect attempt with `kind` until cleared
    pub fn refuse_connections(&self, kind: Option<io::ErrorKind>) {
        self.state.lock().refuse_all = kind;
    }

    /// Fail the next read or write
    pub fn fail_next_operation(&self, failure: SimulatedFailure) {
        self.state.lock().op_failures.push_back(failure);
    }

    /// Kill every open handle; their next operation reports a reset
    pub fn drop_connections(&self) {
        self.state.lock().generation += 1;
    }

    pub fn set_operation_delay(&self, delay: Option<Duration>) {
        self.state.lock().op_delay = delay;
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.state.lock().connect_delay = delay;
    }

    pub fn stats(&self) -> SimulatorStats {
        self.state.lock().stats.clone()
    }

    fn check_range(state: &SimState, start: u16, quantity: u16) -> Result<(), TransportError> {
        if let Some(limit) = state.address_limit {
            if u32::from(start) + u32::from(quantity) > limit {
                return Err(TransportError::Exception(ModbusException::IllegalDataAddress));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for SimulatedDevice {
    async fn connect(
        &self,
        config: &DeviceConfig,
    ) -> Result<Box<dyn DeviceTransport>, TransportError> {
        let delay = {
            let mut state = self.state.lock();
            state.stats.connect_calls += 1;
            state.stats.connect_hosts.push(config.host.clone());
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(failure) = state.connect_failures.pop_front() {
            return Err(failure.into_error());
        }
        if let Some(kind) = state.refuse_all {
            return Err(TransportError::Io(io::Error::from(kind)));
        }

        state.stats.open_handles += 1;
        state.stats.max_open_handles = state.stats.max_open_handles.max(state.stats.open_handles);
        Ok(Box::new(SimulatedTransport {
            device: self.clone(),
            unit_id: config.unit_id,
            generation: state.generation,
        }))
    }
}

/// Handle opened by [`SimulatedDevice`]
struct SimulatedTransport {
    device: SimulatedDevice,
    unit_id: u8,
    generation: u64,
}

impl SimulatedTransport {
    /// Shared preamble of every operation: delay, liveness, scripted failure
    async fn begin(&self) -> Result<(), TransportError> {
        let delay = self.device.state.lock().op_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.device.state.lock();
        state.stats.unit_ids.push(self.unit_id);
        if state.generation != self.generation {
            return Err(TransportError::Io(io::Error::from(
                io::ErrorKind::ConnectionReset,
            )));
        }
        if let Some(failure) = state.op_failures.pop_front() {
            return Err(failure.into_error());
        }
        Ok(())
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        let mut state = self.device.state.lock();
        state.stats.open_handles = state.stats.open_handles.saturating_sub(1);
    }
}

#[async_trait]
impl DeviceTransport for SimulatedTransport {
    fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    async fn read(
        &mut self,
        kind: RegisterKind,
        start: u16,
        quantity: u16,
    ) -> Result<RawValues, TransportError> {
        self.device.state.lock().stats.read_calls += 1;
        self.begin().await?;

        let mut state = self.device.state.lock();
        SimulatedDevice::check_range(&state, start, quantity)?;

        let addresses = (0..quantity).map(|offset| start.wrapping_add(offset));
        let values = match kind {
            RegisterKind::Holding => RawValues::Words(
                addresses
                    .map(|a| state.holding.get(&a).copied().unwrap_or(0))
                    .collect(),
            ),
            RegisterKind::Input => {
                let words = addresses
                    .map(|a| state.input.get(&a).copied().unwrap_or(0))
                    .collect();
                if state.live_inputs {
                    for value in state.input.values_mut() {
                        *value = value.wrapping_add(1);
                    }
                }
                RawValues::Words(words)
            },
            RegisterKind::Coil => RawValues::Bits(
                addresses
                    .map(|a| state.coils.get(&a).copied().unwrap_or(false))
                    .collect(),
            ),
            RegisterKind::Discrete => RawValues::Bits(
                addresses
                    .map(|a| state.discrete.get(&a).copied().unwrap_or(false))
                    .collect(),
            ),
        };
        Ok(values)
    }

    async fn write(
        &mut self,
        kind: WriteKind,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        self.device.state.lock().stats.write_calls += 1;
        self.begin().await?;

        let mut state = self.device.state.lock();
        SimulatedDevice::check_range(&state, address, 1)?;
        match kind {
            WriteKind::Register => {
                state.holding.insert(address, value);
            },
            WriteKind::Coil => {
                state.coils.insert(address, value != 0);
            },
        }
        Ok(())
    }
}
