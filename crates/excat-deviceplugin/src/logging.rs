//! Logging setup.
//!
//! The subscriber is installed once by the binary; components get their own
//! span handed in at construction and log within it.

use tracing::{info_span, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{PluginError, Result};

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `log_level`.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| PluginError::Config(format!("Invalid log level '{}': {}", log_level, e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact(),
        )
        .try_init()
        .map_err(|e| PluginError::Config(format!("Failed to set logger: {}", e)))
}

/// Span of a named component, e.g. `excat-l3` or `resctrl`.
pub fn component_span(component: &str) -> Span {
    info_span!("component", name = component)
}
