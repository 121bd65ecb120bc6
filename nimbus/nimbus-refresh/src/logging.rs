//! Tracing subscriber setup for embedding processes and tests.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `log_level`. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "nimbus_core={0},nimbus_inventory={0},nimbus_refresh={0},warn",
                log_level
            ))
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
