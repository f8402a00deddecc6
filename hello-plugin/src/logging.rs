//! Logging setup for the plugin and its demo host.
//!
//! Library crates only emit `tracing` events; this module installs the
//! subscriber that renders them.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output for development
    Development,
    /// Verbose diagnostics with thread ids and source locations
    Debug,
}

impl LoggingMode {
    /// Parse a mode name; unknown names fall back to [`LoggingMode::Silent`].
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "development" | "dev" => LoggingMode::Development,
            "debug" => LoggingMode::Debug,
            _ => LoggingMode::Silent,
        }
    }

    fn default_level(self) -> &'static str {
        match self {
            LoggingMode::Silent => "off",
            LoggingMode::Development => "info",
            LoggingMode::Debug => "debug",
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },
}

/// Initialize logging with the specified mode.
///
/// # Environment Variables
///
/// - `RX_BROKER_LOG_LEVEL`: filter directives, e.g. `info,rx_broker=debug`
/// - `RUST_LOG`: used when `RX_BROKER_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    init_logging_with(mode, None)
}

/// Like [`init_logging`], with an explicit filter taking precedence over the
/// environment.
pub fn init_logging_with(mode: LoggingMode, filter: Option<&str>) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter(filter, mode.default_level())?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter(filter, mode.default_level())?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_thread_ids(true)
                        .with_thread_names(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `RX_BROKER_LOG_MODE` (`silent`, `development` or
/// `debug`). Defaults to silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = std::env::var("RX_BROKER_LOG_MODE")
        .map(|name| LoggingMode::from_name(&name))
        .unwrap_or(LoggingMode::Silent);

    init_logging(mode)
}

/// Explicit filter, then RX_BROKER_LOG_LEVEL, then RUST_LOG, then the default
fn create_env_filter(explicit: Option<&str>, default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = explicit
        .map(str::to_string)
        .or_else(|| std::env::var("RX_BROKER_LOG_LEVEL").ok())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| default_level.to_string());

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
        filter: directives.clone(),
        reason: e.to_string(),
    })
}

/// Check if a global subscriber has been installed.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
