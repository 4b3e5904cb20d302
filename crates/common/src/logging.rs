//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Crates whose spans and events follow the configured level
const OWN_CRATES: [&str; 3] = ["uvc_cam", "driver", "common"];

/// Build the filter used when `RUST_LOG` is not set
///
/// `level` applies to this workspace's crates; everything else stays at `warn`.
pub fn default_filter(level: &str) -> crate::Result<EnvFilter> {
    let directives = OWN_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(format!("warn,{}", directives))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}

/// Setup tracing subscriber for the application
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(default_level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))
}
