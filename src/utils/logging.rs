use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global fmt subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_logging() -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| format!("Failed to initialise logging: {e}"))?;

    info!("Logging initialised");
    Ok(())
}
