//! Logging bootstrap shared by the service binaries
//!
//! Console output and a daily rolling log file, both written with the
//! bracketed-level format: `2025-12-02T00:50:44.809Z [INFO] message`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use errors::{ServiceError, ServiceResult};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable that overrides every other log root source
pub const LOG_DIR_ENV: &str = "MONSRV_LOG_DIR";

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `timestamp [LEVEL] message fields`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Non-blocking writer guards; dropping one stops its background flush thread
static GUARDS: OnceLock<Arc<Mutex<Vec<WorkerGuard>>>> = OnceLock::new();

// ============================================================================
// Log Root Directory Configuration
// ============================================================================

/// Priority: MONSRV_LOG_DIR env > CLI value > "logs"
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the log root directory
///
/// Call once during bootstrap before [`init_with_config`]. Later calls are
/// ignored.
pub fn init_log_root(cli_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| resolve_log_root(std::env::var(LOG_DIR_ENV).ok(), cli_dir));
}

/// Get log root directory, falling back to the env var or "logs"
pub fn get_log_root() -> PathBuf {
    LOG_ROOT
        .get()
        .cloned()
        .unwrap_or_else(|| resolve_log_root(std::env::var(LOG_DIR_ENV).ok(), None))
}

fn resolve_log_root(env_dir: Option<String>, cli_dir: Option<&str>) -> PathBuf {
    env_dir
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| cli_dir.map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as log file prefix and filter target
    pub service_name: String,
    /// Directory receiving the daily log files
    pub log_dir: PathBuf,
    /// Base log level when `RUST_LOG` is not set
    pub console_level: Level,
    /// Emit ANSI colors on the console
    pub ansi: bool,
}

/// Build the filter directive used when `RUST_LOG` is absent
///
/// At the default INFO level the service's own target is raised to DEBUG so
/// connection lifecycle events stay visible.
fn default_filter(service_name: &str, level: Level) -> String {
    if level == Level::INFO {
        format!("info,{}=debug", service_name)
    } else {
        level.as_str().to_lowercase()
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> ServiceResult<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender =
        tracing_appender::rolling::daily(&config.log_dir, format!("{}.log", config.service_name));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let guards = GUARDS.get_or_init(|| Arc::new(Mutex::new(Vec::new())));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => poisoned.into_inner().push(guard),
    }

    let env_filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(default_filter(&config.service_name, config.console_level)),
    };

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(BracketedLevelFormat)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ServiceError::StartupFailed(format!("Failed to init logging: {}", e)))?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    Ok(())
}

/// Parse a CLI level string, defaulting to INFO on anything unknown
pub fn parse_level(level: &str) -> Level {
    level.trim().parse::<Level>().unwrap_or(Level::INFO)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level_brackets() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_default_filter_raises_service_target() {
        assert_eq!(default_filter("monsrv", Level::INFO), "info,monsrv=debug");
        assert_eq!(default_filter("monsrv", Level::WARN), "warn");
        assert_eq!(default_filter("monsrv", Level::TRACE), "trace");
    }

    #[test]
    fn test_log_root_priority() {
        assert_eq!(
            resolve_log_root(Some("/var/log/monsrv".into()), Some("cli-logs")),
            PathBuf::from("/var/log/monsrv")
        );
        assert_eq!(
            resolve_log_root(None, Some("cli-logs")),
            PathBuf::from("cli-logs")
        );
        assert_eq!(resolve_log_root(Some("  ".into()), None), PathBuf::from("logs"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }
}
