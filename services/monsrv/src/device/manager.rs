//! Device connection lifecycle
//!
//! The manager owns the single transport handle to the device. Every
//! operation takes the link mutex (FIFO), so at most one request is on the
//! wire and at most one handle is ever open. Config and status sit behind
//! short synchronous locks that are never held across an await.

use std::sync::Arc;

use chrono::Utc;
use errors::ServiceErrorTrait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::model::{
    ConnectionResult, ConnectionState, ConnectionStatus, RegisterReadRequest, RegisterValue,
    WriteRequest,
};
use super::reconnect::{ReconnectHelper, ReconnectPolicy, RetryDelay, TokioDelay};
use super::transport::{Connector, DeviceTransport, RawValues, RegisterKind, WriteKind};
use crate::config::{ConfigStore, DeviceConfig, DeviceConfigPatch};
use crate::error::{DeviceError, DeviceResult, TransportError};

type Link = Option<Box<dyn DeviceTransport>>;

#[derive(Debug, Clone, Default)]
struct LinkStatus {
    state: ConnectionState,
    last_error: Option<String>,
    last_connected_at: Option<chrono::DateTime<Utc>>,
}

enum Operation {
    Read(RegisterReadRequest),
    Write(WriteRequest),
}

impl Operation {
    /// Address and quantity echoed back in protocol errors
    fn span(&self) -> (u16, u16) {
        match self {
            Self::Read(req) => (req.start_address, req.quantity),
            Self::Write(req) => (req.address, 1),
        }
    }
}

enum Outcome {
    Values(RawValues),
    Written,
}

/// Owner of the device link
pub struct ConnectionManager {
    config: RwLock<DeviceConfig>,
    status: RwLock<LinkStatus>,
    link: Mutex<Link>,
    connector: Arc<dyn Connector>,
    store: ConfigStore,
    policy: ReconnectPolicy,
    delay: Arc<dyn RetryDelay>,
}

impl ConnectionManager {
    pub fn new(config: DeviceConfig, connector: Arc<dyn Connector>, store: ConfigStore) -> Self {
        Self {
            config: RwLock::new(config),
            status: RwLock::new(LinkStatus::default()),
            link: Mutex::new(None),
            connector,
            store,
            policy: ReconnectPolicy::default(),
            delay: Arc::new(TokioDelay),
        }
    }

    /// Replace the reconnect policy and delay source
    pub fn with_retry(mut self, policy: ReconnectPolicy, delay: Arc<dyn RetryDelay>) -> Self {
        self.policy = policy;
        self.delay = delay;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn get_config(&self) -> DeviceConfig {
        self.config.read().clone()
    }

    /// Merge, validate, persist, then swap the config and drop the link
    ///
    /// Waits for any in-flight operation. On any failure the current config
    /// is left untouched.
    pub async fn update_config(&self, patch: &DeviceConfigPatch) -> DeviceResult<DeviceConfig> {
        let mut link = self.link.lock().await;

        let current = self.get_config();
        let updated = current.merged(patch).map_err(|e| {
            info!("Rejected config update: {}", e);
            DeviceError::from(e)
        })?;

        if let Err(e) = self.store.save(&updated) {
            error!(
                "Failed to persist config to {}: {}",
                self.store.path().display(),
                e
            );
            return Err(DeviceError::Persistence {
                endpoint: updated.endpoint(),
                path: self.store.path().display().to_string(),
                detail: e.to_string(),
            });
        }

        *self.config.write() = updated.clone();
        if link.take().is_some() {
            info!("Closed connection to {} for reconfiguration", current.endpoint());
        }
        *self.status.write() = LinkStatus::default();

        info!(
            "Config updated: {} timeout {} ms",
            updated.endpoint(),
            updated.timeout_ms
        );
        Ok(updated)
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> ConnectionStatus {
        let config = self.get_config();
        let status = self.status.read().clone();
        ConnectionStatus {
            connected: status.state == ConnectionState::Connected,
            state: status.state,
            host: config.host,
            port: config.port,
            unit_id: config.unit_id,
            last_error: status.last_error,
            last_connected_at: status.last_connected_at,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.write().state = state;
    }

    fn record_connected(&self) {
        let mut status = self.status.write();
        status.state = ConnectionState::Connected;
        status.last_error = None;
        status.last_connected_at = Some(Utc::now());
    }

    fn record_success(&self) {
        let mut status = self.status.write();
        status.state = ConnectionState::Connected;
        status.last_error = None;
    }

    /// Non-connection failure; the link stays up
    fn record_error(&self, err: &DeviceError) {
        self.status.write().last_error = Some(err.to_string());
    }

    fn record_disconnect(&self, err: &DeviceError) {
        let mut status = self.status.write();
        status.state = ConnectionState::Disconnected;
        status.last_error = Some(err.to_string());
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Read `quantity` elements starting at `start_address`
    ///
    /// Boolean kinds map to 1/0. Addresses are sequential from the start.
    pub async fn read(
        &self,
        kind: RegisterKind,
        start_address: i64,
        quantity: i64,
    ) -> DeviceResult<Vec<RegisterValue>> {
        let request = RegisterReadRequest::new(kind, start_address, quantity)?;
        let Outcome::Values(raw) = self.execute(Operation::Read(request)).await? else {
            return Ok(Vec::new());
        };

        Ok(raw
            .into_raw()
            .into_iter()
            .take(usize::from(request.quantity))
            .enumerate()
            .map(|(offset, raw_value)| RegisterValue {
                address: u32::from(request.start_address) + offset as u32,
                raw_value,
            })
            .collect())
    }

    /// Write a single register or coil
    pub async fn write(&self, kind: WriteKind, address: i64, value: i64) -> DeviceResult<()> {
        let request = WriteRequest::new(kind, address, value)?;
        self.execute(Operation::Write(request)).await?;
        debug!("Wrote {} {} = {}", kind, request.address, request.value);
        Ok(())
    }

    /// Close the handle if open; idempotent
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        if link.take().is_some() {
            info!("Disconnected from {}", self.get_config().endpoint());
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Fresh single connect attempt plus a trial read of holding register 0
    ///
    /// A reachable device that rejects the trial address still counts as a
    /// successful connection.
    pub async fn test_connection(&self) -> ConnectionResult {
        let mut link = self.link.lock().await;
        if link.take().is_some() {
            debug!("Discarding existing handle before connection test");
        }

        let config = self.get_config();
        let endpoint = config.endpoint();

        let mut transport = match self.connect_once(&config).await {
            Ok(transport) => transport,
            Err(e) => return self.connection_result(false, e.to_string()),
        };

        let trial = Operation::Read(RegisterReadRequest {
            kind: RegisterKind::Holding,
            start_address: 0,
            quantity: 1,
        });
        match self.perform(&mut *transport, &config, &trial).await {
            Ok(_) => {
                self.record_success();
                *link = Some(transport);
                self.connection_result(true, format!("Successfully connected to {}", endpoint))
            },
            Err(e) if e.is_retryable() => {
                drop(transport);
                self.record_disconnect(&e);
                self.connection_result(false, e.to_string())
            },
            Err(e) => {
                self.record_error(&e);
                *link = Some(transport);
                self.connection_result(
                    true,
                    format!(
                        "Connected to {}, but the trial read of holding register 0 was rejected: {}",
                        endpoint, e
                    ),
                )
            },
        }
    }

    fn connection_result(&self, success: bool, message: String) -> ConnectionResult {
        ConnectionResult {
            success,
            message,
            status: self.status(),
        }
    }

    /// Run one operation with lazy connect and a single reconnect cycle
    async fn execute(&self, op: Operation) -> DeviceResult<Outcome> {
        let mut link = self.link.lock().await;
        let config = self.get_config();
        let mut reconnected = false;

        if link.is_none() {
            let transport = match self.connect_once(&config).await {
                Ok(transport) => transport,
                Err(e) if e.is_retryable() => {
                    reconnected = true;
                    self.reconnect(&config, e).await?
                },
                Err(e) => return Err(e),
            };
            *link = Some(transport);
        }

        loop {
            let transport = link.as_mut().ok_or_else(|| {
                TransportError::NotConnected.classify(&config.endpoint(), 0, 0)
            })?;

            match self.perform(&mut **transport, &config, &op).await {
                Ok(outcome) => {
                    self.record_success();
                    return Ok(outcome);
                },
                Err(e) if e.is_retryable() => {
                    *link = None;
                    self.record_disconnect(&e);
                    if reconnected {
                        return Err(e);
                    }
                    warn!("Connection lost during operation: {}", e);
                    reconnected = true;
                    *link = Some(self.reconnect(&config, e).await?);
                },
                Err(e) => {
                    warn!(error_code = e.error_code(), "Operation rejected: {}", e);
                    self.record_error(&e);
                    return Err(e);
                },
            }
        }
    }

    /// Issue one operation on an open handle, re-asserting the unit id first
    async fn perform(
        &self,
        transport: &mut dyn DeviceTransport,
        config: &DeviceConfig,
        op: &Operation,
    ) -> DeviceResult<Outcome> {
        transport.set_unit_id(config.unit_id);

        let (address, quantity) = op.span();
        let result = match op {
            Operation::Read(req) => {
                timeout(
                    config.timeout(),
                    transport.read(req.kind, req.start_address, req.quantity),
                )
                .await
                .map(|r| r.map(Outcome::Values))
            },
            Operation::Write(req) => {
                timeout(config.timeout(), transport.write(req.kind, req.address, req.value))
                    .await
                    .map(|r| r.map(|()| Outcome::Written))
            },
        };

        let endpoint = config.endpoint();
        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.classify(&endpoint, address, quantity)),
            Err(_) => Err(TransportError::Timeout.classify(&endpoint, address, quantity)),
        }
    }

    /// Single connect attempt bounded by the configured timeout
    async fn connect_once(&self, config: &DeviceConfig) -> DeviceResult<Box<dyn DeviceTransport>> {
        let endpoint = config.endpoint();
        self.set_state(ConnectionState::Connecting);
        debug!("Connecting to {}", endpoint);

        let result = match timeout(config.timeout(), self.connector.connect(config)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        match result {
            Ok(mut transport) => {
                transport.set_unit_id(config.unit_id);
                self.record_connected();
                info!("Connected to {}", endpoint);
                Ok(transport)
            },
            Err(e) => {
                let err = e.classify(&endpoint, 0, 0);
                if let DeviceError::Connection { detail, .. } = &err {
                    debug!("Connect failure detail: {}", detail);
                }
                warn!(error_code = err.error_code(), "Connection failed: {}", err);
                self.record_disconnect(&err);
                Err(err)
            },
        }
    }

    /// Bounded reconnect; surfaces `original` when the bound is exhausted
    async fn reconnect(
        &self,
        config: &DeviceConfig,
        original: DeviceError,
    ) -> DeviceResult<Box<dyn DeviceTransport>> {
        let mut helper = ReconnectHelper::new(&self.policy, self.delay.as_ref());
        match helper
            .execute_reconnect(move || self.connect_once(config))
            .await
        {
            Ok(transport) => Ok(transport),
            Err(e) if e.connection_kind().is_some() => {
                error!(
                    "Giving up on {} after {} reconnection attempts",
                    config.endpoint(),
                    helper.stats().attempts
                );
                Err(original)
            },
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &*self.config.read())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::device::simulator::{SimulatedDevice, SimulatedFailure};
    use crate::error::{ConnectionErrorKind, ModbusException, ProtocolErrorKind, ValidationError};
    use async_trait::async_trait;
    use std::io;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingDelay {
        waits: parking_lot::Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl RetryDelay for RecordingDelay {
        async fn wait(&self, delay: Duration) {
            self.waits.lock().push(delay);
        }
    }

    struct Fixture {
        manager: Arc<ConnectionManager>,
        device: SimulatedDevice,
        delay: Arc<RecordingDelay>,
        _dir: TempDir,
    }

    fn scenario_config() -> DeviceConfig {
        DeviceConfig {
            host: "192.168.1.50".into(),
            port: 502,
            unit_id: 1,
            timeout_ms: 3000,
        }
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let device = SimulatedDevice::new();
        let delay = Arc::new(RecordingDelay::default());
        let manager = ConnectionManager::new(
            scenario_config(),
            Arc::new(device.clone()),
            ConfigStore::new(dir.path().join("modbus-config.json")),
        )
        .with_retry(ReconnectPolicy::default(), delay.clone());
        Fixture {
            manager: Arc::new(manager),
            device,
            delay,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_read_holding_scenario() {
        let fx = fixture();
        fx.device.set_holding(0, &[10, 20, 30]);

        let values = fx.manager.read(RegisterKind::Holding, 0, 3).await.unwrap();
        assert_eq!(
            values,
            vec![
                RegisterValue {
                    address: 0,
                    raw_value: 10
                },
                RegisterValue {
                    address: 1,
                    raw_value: 20
                },
                RegisterValue {
                    address: 2,
                    raw_value: 30
                },
            ]
        );
        assert!(fx.manager.status().connected);
    }

    #[tokio::test]
    async fn test_read_coils_map_to_ones_and_zeros() {
        let fx = fixture();
        fx.device.set_coils(5, &[true, false]);

        let values = fx.manager.read(RegisterKind::Coil, 5, 2).await.unwrap();
        assert_eq!(
            values,
            vec![
                RegisterValue {
                    address: 5,
                    raw_value: 1
                },
                RegisterValue {
                    address: 6,
                    raw_value: 0
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_read_discrete_inputs_map_to_ones_and_zeros() {
        let fx = fixture();
        fx.device.set_discrete(10, &[false, true, true]);

        let values = fx.manager.read(RegisterKind::Discrete, 10, 3).await.unwrap();
        let raw: Vec<(u32, u16)> = values.iter().map(|v| (v.address, v.raw_value)).collect();
        assert_eq!(raw, vec![(10, 0), (11, 1), (12, 1)]);
    }

    #[tokio::test]
    async fn test_read_input_registers() {
        let fx = fixture();
        fx.device.set_input(100, &[2301, 2302]);
        fx.device.set_holding(100, &[9, 9]);

        let values = fx.manager.read(RegisterKind::Input, 100, 2).await.unwrap();
        let raw: Vec<(u32, u16)> = values.iter().map(|v| (v.address, v.raw_value)).collect();
        assert_eq!(raw, vec![(100, 2301), (101, 2302)]);
    }

    #[tokio::test]
    async fn test_read_past_last_address_is_rejected_before_io() {
        let fx = fixture();
        let err = fx
            .manager
            .read(RegisterKind::Holding, 65535, 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Validation(ValidationError::AddressRangeOverflow {
                start: 65535,
                quantity: 3
            })
        ));
        assert_eq!(fx.device.stats().connect_calls, 0);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_io() {
        let fx = fixture();
        for (address, quantity) in [(0, 0), (0, 126), (-1, 1), (65536, 1)] {
            let err = fx
                .manager
                .read(RegisterKind::Holding, address, quantity)
                .await
                .unwrap_err();
            assert!(matches!(err, DeviceError::Validation(_)));
        }
        let err = fx.manager.write(WriteKind::Coil, 0, 5).await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Validation(ValidationError::InvalidCoilValue(5))
        ));
        assert_eq!(fx.device.stats().connect_calls, 0);
    }

    #[tokio::test]
    async fn test_handle_is_reused_and_unit_id_reasserted() {
        let fx = fixture();
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();
        fx.manager.read(RegisterKind::Input, 0, 1).await.unwrap();
        fx.manager.write(WriteKind::Register, 4, 99).await.unwrap();

        let stats = fx.device.stats();
        assert_eq!(stats.connect_calls, 1);
        assert_eq!(stats.unit_ids, vec![1, 1, 1]);
        assert_eq!(fx.device.holding(4), 99);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_refusing_device_sees_bounded_retries() {
        let fx = fixture();
        fx.device
            .refuse_connections(Some(io::ErrorKind::ConnectionRefused));

        let err = fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Refused));
        let message = err.to_string();
        assert!(message.contains("192.168.1.50"));
        assert!(message.contains("502"));

        // Lazy connect + 3 reconnects, each reconnect preceded by the delay
        assert_eq!(fx.device.stats().connect_calls, 4);
        assert_eq!(*fx.delay.waits.lock(), vec![Duration::from_secs(2); 3]);

        let status = fx.manager.status();
        assert!(!status.connected);
        assert!(status.last_error.is_some());
        assert!(logs_contain("Giving up on 192.168.1.50:502"));
    }

    #[tokio::test]
    async fn test_drop_mid_session_recovers_with_one_reconnect() {
        let fx = fixture();
        fx.device.set_holding(0, &[7]);
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();

        fx.device.drop_connections();
        let values = fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();
        assert_eq!(values[0].raw_value, 7);

        let stats = fx.device.stats();
        assert_eq!(stats.connect_calls, 2);
        assert_eq!(stats.read_calls, 3);
        assert_eq!(fx.delay.waits.lock().len(), 1);
        assert_eq!(stats.open_handles, 1);
    }

    #[tokio::test]
    async fn test_failed_lazy_connect_recovers_on_first_reconnect() {
        let fx = fixture();
        fx.device.set_discrete(0, &[true, false, true]);
        fx.device
            .fail_next_connect(SimulatedFailure::Io(io::ErrorKind::ConnectionRefused));

        let values = fx.manager.read(RegisterKind::Discrete, 0, 3).await.unwrap();
        let raw: Vec<u16> = values.iter().map(|v| v.raw_value).collect();
        assert_eq!(raw, vec![1, 0, 1]);

        assert_eq!(fx.device.stats().connect_calls, 2);
        assert_eq!(*fx.delay.waits.lock(), vec![Duration::from_secs(2)]);
        assert!(fx.manager.status().connected);
    }

    #[tokio::test]
    async fn test_second_failure_after_reconnect_is_surfaced() {
        let fx = fixture();
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();

        fx.device
            .fail_next_operation(SimulatedFailure::Io(io::ErrorKind::BrokenPipe));
        fx.device
            .fail_next_operation(SimulatedFailure::Io(io::ErrorKind::BrokenPipe));

        let err = fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Closed));
        // Original + exactly one retry
        assert_eq!(fx.device.stats().read_calls, 3);
        assert_eq!(fx.device.stats().connect_calls, 2);
    }

    #[tokio::test]
    async fn test_protocol_errors_are_not_retried() {
        let fx = fixture();
        fx.device.set_address_limit(100);

        let err = fx.manager.read(RegisterKind::Holding, 99, 5).await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Protocol {
                kind: ProtocolErrorKind::IllegalAddress,
                address: 99,
                quantity: 5,
                ..
            }
        ));
        let stats = fx.device.stats();
        assert_eq!(stats.read_calls, 1);
        assert_eq!(stats.connect_calls, 1);
        assert!(fx.delay.waits.lock().is_empty());
        // Link survives a rejected request
        assert!(fx.manager.status().connected);
    }

    #[tokio::test]
    async fn test_unknown_errors_are_not_retried() {
        let fx = fixture();
        fx.device.fail_next_operation(SimulatedFailure::Exception(
            ModbusException::ServerDeviceFailure,
        ));
        let err = fx.manager.read(RegisterKind::Input, 0, 1).await.unwrap_err();
        assert!(matches!(err, DeviceError::Unknown { .. }));

        fx.device.fail_next_operation(SimulatedFailure::Protocol(
            "unexpected function code 0x2B".into(),
        ));
        let err = fx.manager.read(RegisterKind::Input, 0, 1).await.unwrap_err();
        assert!(matches!(err, DeviceError::Unknown { .. }));
        assert!(err.to_string().contains("0x2B"));

        assert_eq!(fx.device.stats().read_calls, 2);
        assert_eq!(fx.device.stats().connect_calls, 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let fx = fixture();
        fx.manager.disconnect().await;
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();
        fx.manager.disconnect().await;
        fx.manager.disconnect().await;

        assert!(!fx.manager.status().connected);
        assert_eq!(fx.device.stats().open_handles, 0);
    }

    #[tokio::test]
    async fn test_update_config_persists_and_resets_link() {
        let fx = fixture();
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();

        let patch = DeviceConfigPatch {
            host: Some("10.0.0.5".into()),
            ..Default::default()
        };
        let updated = fx.manager.update_config(&patch).await.unwrap();
        assert_eq!(updated.host, "10.0.0.5");
        assert_eq!(fx.manager.get_config(), updated);

        let status = fx.manager.status();
        assert!(!status.connected);
        assert_eq!(status.host, "10.0.0.5");
        assert_eq!(fx.device.stats().open_handles, 0);

        // Reload from disk
        let reloaded = fx.manager.store().load().unwrap().unwrap();
        assert_eq!(reloaded.host.as_deref(), Some("10.0.0.5"));

        // Next operation reconnects lazily to the new host
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();
        assert_eq!(
            fx.device.stats().connect_hosts,
            vec!["192.168.1.50".to_string(), "10.0.0.5".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_config_unchanged() {
        let fx = fixture();
        let before = fx.manager.get_config();
        let patch = DeviceConfigPatch {
            host: Some("999.1.1.1".into()),
            ..Default::default()
        };
        let err = fx.manager.update_config(&patch).await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Validation(ValidationError::InvalidHost(_))
        ));
        assert_eq!(fx.manager.get_config(), before);
        assert!(fx.manager.store().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_prior_config() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let manager = ConnectionManager::new(
            scenario_config(),
            Arc::new(SimulatedDevice::new()),
            ConfigStore::new(blocker.join("modbus-config.json")),
        );

        let patch = DeviceConfigPatch {
            port: Some(1502),
            ..Default::default()
        };
        let err = manager.update_config(&patch).await.unwrap_err();
        assert!(matches!(err, DeviceError::Persistence { .. }));
        assert!(err.to_string().contains("192.168.1.50:1502"));
        assert!(err.to_string().contains("modbus-config.json"));
        assert_eq!(manager.get_config(), scenario_config());
    }

    #[tokio::test]
    async fn test_connection_success() {
        let fx = fixture();
        let result = fx.manager.test_connection().await;
        assert!(result.success, "{}", result.message);
        assert!(result.status.connected);
        assert!(result.message.contains("192.168.1.50"));
    }

    #[tokio::test]
    async fn test_connection_reachable_but_address_rejected() {
        let fx = fixture();
        fx.device.fail_next_operation(SimulatedFailure::Exception(
            ModbusException::IllegalDataAddress,
        ));
        let result = fx.manager.test_connection().await;
        assert!(result.success);
        assert!(result.message.contains("rejected"));
        assert!(result.status.connected);
    }

    #[tokio::test]
    async fn test_connection_single_attempt_without_retry() {
        let fx = fixture();
        fx.device
            .refuse_connections(Some(io::ErrorKind::ConnectionRefused));
        let result = fx.manager.test_connection().await;
        assert!(!result.success);
        assert!(result.message.contains("refused"));
        assert_eq!(fx.device.stats().connect_calls, 1);
        assert!(fx.delay.waits.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connection_discards_existing_handle() {
        let fx = fixture();
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();
        fx.manager.test_connection().await;
        let stats = fx.device.stats();
        assert_eq!(stats.connect_calls, 2);
        assert_eq!(stats.max_open_handles, 1);
    }

    #[tokio::test]
    async fn test_concurrent_operations_share_one_handle() {
        let fx = fixture();
        fx.device
            .set_operation_delay(Some(Duration::from_millis(5)));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let manager = fx.manager.clone();
            tasks.push(tokio::spawn(async move {
                manager.read(RegisterKind::Holding, i, 1).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stats = fx.device.stats();
        assert_eq!(stats.connect_calls, 1);
        assert_eq!(stats.max_open_handles, 1);
        assert_eq!(stats.read_calls, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out_as_connection_error() {
        let fx = fixture();
        fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap();

        // Longer than the 3000 ms configured timeout
        fx.device
            .set_operation_delay(Some(Duration::from_secs(10)));
        let err = fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Timeout));
        // Timed out, reconnected once, timed out again
        assert_eq!(fx.device.stats().connect_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connect_times_out_and_is_retried() {
        let fx = fixture();
        // Longer than the 3000 ms configured timeout
        fx.device.set_connect_delay(Some(Duration::from_secs(10)));

        let err = fx.manager.read(RegisterKind::Holding, 0, 1).await.unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Timeout));
        assert!(err.to_string().contains("192.168.1.50"));

        // Lazy connect + 3 reconnects, all timed out
        assert_eq!(fx.device.stats().connect_calls, 4);
        assert_eq!(fx.delay.waits.lock().len(), 3);
        assert_eq!(fx.device.stats().read_calls, 0);
    }

    #[tokio::test]
    async fn test_update_config_waits_for_in_flight_read() {
        let fx = fixture();
        fx.device.set_holding(0, &[42]);
        fx.device
            .set_operation_delay(Some(Duration::from_millis(50)));

        let manager = fx.manager.clone();
        let read = tokio::spawn(async move { manager.read(RegisterKind::Holding, 0, 1).await });
        while fx.device.stats().read_calls == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.device.stats().open_handles, 1);

        let patch = DeviceConfigPatch {
            port: Some(1502),
            ..Default::default()
        };
        fx.manager.update_config(&patch).await.unwrap();

        // The read held the link until it finished; the update then closed it
        assert!(read.is_finished());
        let values = read.await.unwrap().unwrap();
        assert_eq!(values[0].raw_value, 42);
        assert_eq!(fx.device.stats().open_handles, 0);
        assert_eq!(fx.manager.get_config().port, 1502);
    }
}
