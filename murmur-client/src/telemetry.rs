//! Tracing initialization.

use murmur_core::MurmurError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "murmur=debug,info";

/// Install the global subscriber: `EnvFilter` plus a JSON or pretty fmt layer.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), MurmurError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).try_init()
    };
    result.map_err(|e| MurmurError::Task {
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(json, "Tracing initialized");
    Ok(())
}
