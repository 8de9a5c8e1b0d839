//! Logging configuration.

use sandboxer_core::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Configure stdout logging from `RUST_LOG`, defaulting to info with debug
/// detail for the sandbox crates.
pub fn configure_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sandboxer=debug".into()),
    );

    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))
}
