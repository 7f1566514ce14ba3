//! Modbus TCP Monitoring Service (`monsrv`)
//!
//! Serves the monitoring API for one Modbus TCP device.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::service_bootstrap::{determine_bind_address, print_startup_banner, ServiceInfo};
use common::DEFAULT_API_HOST;
use errors::{ServiceError, ServiceResult};

use monsrv::{
    api::{create_api_routes, AppState},
    bootstrap::{self, Args},
    config::settings::{ConfigSource, DEFAULT_HTTP_PORT},
    device::{ConnectionManager, Connector, SimulatedDevice, TcpConnector},
    wait_for_shutdown,
};

#[tokio::main]
async fn main() -> ServiceResult<()> {
    let args = Args::parse();

    let service_info = ServiceInfo::new(
        "monsrv",
        env!("CARGO_PKG_VERSION"),
        "Modbus TCP Monitoring Service",
        DEFAULT_HTTP_PORT,
    );

    bootstrap::initialize_logging(&args, &service_info)?;
    if !args.no_color {
        print_startup_banner(&service_info);
    }

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::validate_configuration(&args)?;
        info!("Validation completed successfully");
        return Ok(());
    }

    let settings = bootstrap::load_settings(&args)?;
    let (store, startup) = bootstrap::load_device_config(&settings);
    match startup.source {
        ConfigSource::Persisted => info!("Device config loaded from {}", store.path().display()),
        ConfigSource::Environment => info!("Device config taken from MODBUS_* environment"),
        ConfigSource::Defaults => info!("Device config using built-in defaults"),
    }
    info!(
        "Device: {} timeout {} ms",
        startup.device.endpoint(),
        startup.device.timeout_ms
    );

    let connector: Arc<dyn Connector> = if args.simulate {
        warn!("Simulation mode: serving an in-process device, no Modbus traffic is sent");
        Arc::new(SimulatedDevice::demo())
    } else {
        Arc::new(TcpConnector::new())
    };
    let manager = Arc::new(ConnectionManager::new(startup.device, connector, store));

    let app = create_api_routes(Arc::new(AppState::new(manager.clone())), &settings.cors_origin);

    let bind_address =
        determine_bind_address(args.bind_address.clone(), DEFAULT_API_HOST, settings.port);
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        ServiceError::Configuration(format!("Invalid bind address '{}': {}", bind_address, e))
    })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::StartupFailed(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("API server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);
    info!("CORS origin: {}", settings.cors_origin);

    let shutdown_token = CancellationToken::new();
    let server_token = shutdown_token.clone();
    let server_handle = tokio::spawn(async move {
        let shutdown = async move { server_token.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Server error: {}", e);
        }
    });

    wait_for_shutdown().await;
    shutdown_token.cancel();
    if let Err(e) = server_handle.await {
        error!("Server task failed: {}", e);
    }

    manager.disconnect().await;
    info!("Shutdown complete");
    Ok(())
}
