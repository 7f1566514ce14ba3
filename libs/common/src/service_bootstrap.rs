//! Service metadata and startup banner

use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "monsrv")
    pub name: String,
    /// Service version
    pub version: String,
    /// Service description
    pub description: String,
    /// Default port
    pub default_port: u16,
}

impl ServiceInfo {
    /// Create new service info
    ///
    /// Callers usually pass `env!("CARGO_PKG_VERSION")` as `version`.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        default_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "monsrv" => {
            r#"
 ███╗   ███╗ ██████╗ ███╗   ██╗███████╗██████╗ ██╗   ██╗
 ████╗ ████║██╔═══██╗████╗  ██║██╔════╝██╔══██╗██║   ██║
 ██╔████╔██║██║   ██║██╔██╗ ██║███████╗██████╔╝██║   ██║
 ██║╚██╔╝██║██║   ██║██║╚██╗██║╚════██║██╔══██╗╚██╗ ██╔╝
 ██║ ╚═╝ ██║╚██████╔╝██║ ╚████║███████║██║  ██║ ╚████╔╝
 ╚═╝     ╚═╝ ╚═════╝ ╚═╝  ╚═══╝╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#
        },
        _ => "",
    };

    if !banner.is_empty() {
        info!("{}", banner);
    }
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
}

/// Resolve the HTTP bind address
/// Priority: CLI > `host:port` from settings
pub fn determine_bind_address(cli_arg: Option<String>, host: &str, port: u16) -> String {
    match cli_arg {
        Some(addr) if !addr.trim().is_empty() => {
            info!("Using bind address from command line: {}", addr);
            addr
        },
        _ => format!("{}:{}", host, port),
    }
}
