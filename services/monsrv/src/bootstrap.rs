//! Service bootstrap
//!
//! Command-line arguments, logging initialization and the `--validate` mode.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use common::logging::{self, LogConfig};
use common::service_bootstrap::ServiceInfo;
use errors::{ServiceError, ServiceResult};

use crate::config::{
    resolve_startup_config, settings::device_env_patch, ConfigStore, ServiceSettings,
    StartupConfig,
};

/// Command-line arguments for monsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "monsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus TCP Monitoring Service",
    long_about = None
)]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", env = "MONSRV_LOG_LEVEL")]
    pub log_level: String,

    /// Bind address for the API server (e.g. 127.0.0.1:3001)
    #[arg(short = 'b', long, env = "BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Persisted device config file; overrides MODBUS_CONFIG_FILE
    #[arg(short = 'c', long)]
    pub config_file: Option<PathBuf>,

    /// Log directory; MONSRV_LOG_DIR takes precedence
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Serve against an in-process simulated device
    #[arg(long, env = "MONSRV_SIMULATE")]
    pub simulate: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate: bool,
}

/// Initialize logging from the command line
///
/// Log root priority: `MONSRV_LOG_DIR` > `--log-dir` > `logs`.
pub fn initialize_logging(args: &Args, service_info: &ServiceInfo) -> ServiceResult<()> {
    logging::init_log_root(args.log_dir.as_deref());

    let log_config = LogConfig {
        service_name: service_info.name.clone(),
        log_dir: logging::get_log_root().join(&service_info.name),
        console_level: logging::parse_level(&args.log_level),
        ansi: !args.no_color,
    };

    logging::init_with_config(log_config)
}

/// Service settings with the CLI config-file override applied
pub fn load_settings(args: &Args) -> ServiceResult<ServiceSettings> {
    let mut settings = ServiceSettings::load()?;
    if let Some(path) = &args.config_file {
        settings.modbus_config_file = path.clone();
    }
    Ok(settings)
}

/// Resolve the startup device config from environment and persisted record
pub fn load_device_config(settings: &ServiceSettings) -> (ConfigStore, StartupConfig) {
    let store = ConfigStore::new(&settings.modbus_config_file);
    let env_patch = device_env_patch();
    let startup = resolve_startup_config(env_patch.as_ref(), &store);
    (store, startup)
}

/// Load and validate every configuration layer without starting the service
///
/// Fails when the persisted record exists but cannot be parsed or does not
/// validate; the running service would silently fall back in that case.
pub fn validate_configuration(args: &Args) -> ServiceResult<()> {
    let settings = load_settings(args)?;
    info!("HTTP port: {}", settings.port);
    info!("CORS origin: {}", settings.cors_origin);
    info!("Config file: {}", settings.modbus_config_file.display());

    let (store, startup) = load_device_config(&settings);

    if let Some(patch) = store.load()? {
        let merged = startup.device.merged(&patch).map_err(|e| ServiceError::InvalidConfig {
            field: store.path().display().to_string(),
            reason: e.to_string(),
        })?;
        if merged != startup.device {
            warn!("Persisted record was not applied at startup");
        }
    }

    info!(
        "Device: {} timeout {} ms (source: {:?})",
        startup.device.endpoint(),
        startup.device.timeout_ms,
        startup.source
    );
    Ok(())
}
