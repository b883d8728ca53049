//! Logging infrastructure for fxbridge
//!
//! Provides unified logging setup using the tracing ecosystem. The bridge
//! runs in the foreground (typically under Docker), so logs go to stderr.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{BridgeError, Result};

/// Env var consulted for the default log filter
pub const LOG_ENV_VAR: &str = "FXBRIDGE_LOG";

/// Initialize logging with the filter from `FXBRIDGE_LOG`, defaulting to "info"
pub fn init_logging() -> Result<()> {
    let filter = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "info".into());
    init_logging_with_filter(&filter)
}

/// Initialize logging with an explicit filter string
/// (e.g. "debug", "fxbridge_server=debug,hyper=warn")
pub fn init_logging_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| BridgeError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| BridgeError::internal(format!("Failed to init logging: {}", e)))?;

    Ok(())
}
