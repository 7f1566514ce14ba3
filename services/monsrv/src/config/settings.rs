//! Environment settings and startup configuration resolution
//!
//! Precedence for device parameters: persisted record > environment > hard
//! defaults. Each layer is validated on top of the one below it; an invalid
//! layer is dropped with a warning.

use std::path::PathBuf;

use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ConfigStore, DeviceConfig, DeviceConfigPatch};
use errors::{ServiceError, ServiceResult};

pub const DEFAULT_HTTP_PORT: u16 = 3001;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_CONFIG_FILE: &str = "data/modbus-config.json";

const SERVICE_ENV_KEYS: [&str; 3] = ["PORT", "CORS_ORIGIN", "MODBUS_CONFIG_FILE"];
const DEVICE_ENV_KEYS: [&str; 4] = [
    "MODBUS_HOST",
    "MODBUS_PORT",
    "MODBUS_SLAVE_ID",
    "MODBUS_TIMEOUT",
];

/// HTTP service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Listening port (`PORT`)
    pub port: u16,
    /// Allowed UI origin (`CORS_ORIGIN`); `*` allows any
    pub cors_origin: String,
    /// Persisted device config path (`MODBUS_CONFIG_FILE`)
    pub modbus_config_file: PathBuf,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            modbus_config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }
}

impl ServiceSettings {
    /// Load from the process environment
    pub fn load() -> ServiceResult<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Env::raw().only(&SERVICE_ENV_KEYS)),
        )
    }

    pub fn from_figment(figment: Figment) -> ServiceResult<Self> {
        figment
            .extract()
            .map_err(|e| ServiceError::Configuration(format!("Invalid service settings: {}", e)))
    }
}

/// `MODBUS_*` environment values, before range validation
#[derive(Debug, Default, Deserialize)]
struct DeviceEnv {
    modbus_host: Option<String>,
    modbus_port: Option<i64>,
    modbus_slave_id: Option<i64>,
    modbus_timeout: Option<i64>,
}

impl From<DeviceEnv> for DeviceConfigPatch {
    fn from(env: DeviceEnv) -> Self {
        Self {
            host: env.modbus_host,
            port: env.modbus_port,
            unit_id: env.modbus_slave_id,
            timeout_ms: env.modbus_timeout,
        }
    }
}

/// Read the `MODBUS_*` device defaults from the process environment
pub fn device_env_patch() -> Option<DeviceConfigPatch> {
    device_env_patch_from(Figment::from(Env::raw().only(&DEVICE_ENV_KEYS)))
}

fn device_env_patch_from(figment: Figment) -> Option<DeviceConfigPatch> {
    match figment.extract::<DeviceEnv>() {
        Ok(env) => Some(env.into()),
        Err(e) => {
            warn!("Ignoring malformed MODBUS_* environment variables: {}", e);
            None
        },
    }
}

/// Which layer the startup device config came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Defaults,
    Environment,
    Persisted,
}

/// Result of startup resolution
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub device: DeviceConfig,
    pub source: ConfigSource,
}

/// Resolve the initial device config: defaults, then environment, then the
/// persisted record
pub fn resolve_startup_config(
    env_patch: Option<&DeviceConfigPatch>,
    store: &ConfigStore,
) -> StartupConfig {
    let defaults = DeviceConfig::default();

    let (env_layer, env_source) = match env_patch.filter(|p| !p.is_empty()) {
        Some(patch) => match defaults.merged(patch) {
            Ok(config) => (config, ConfigSource::Environment),
            Err(e) => {
                warn!("Ignoring invalid MODBUS_* environment defaults: {}", e);
                (defaults, ConfigSource::Defaults)
            },
        },
        None => (defaults, ConfigSource::Defaults),
    };

    let persisted = match store.load() {
        Ok(Some(patch)) => patch,
        Ok(None) => {
            info!(
                "No persisted config at {}, using {:?} values",
                store.path().display(),
                env_source
            );
            return StartupConfig {
                device: env_layer,
                source: env_source,
            };
        },
        Err(e) => {
            warn!("Ignoring unreadable persisted config: {}", e);
            return StartupConfig {
                device: env_layer,
                source: env_source,
            };
        },
    };

    match env_layer.merged(&persisted) {
        Ok(device) => {
            info!("Loaded persisted config from {}", store.path().display());
            StartupConfig {
                device,
                source: ConfigSource::Persisted,
            }
        },
        Err(e) => {
            warn!("Ignoring invalid persisted config: {}", e);
            StartupConfig {
                device: env_layer,
                source: env_source,
            }
        },
    }
}
