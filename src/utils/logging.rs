//! Tracing setup for binaries and tests embedding the engine.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,argos=debug"))
}

/// Install a human-readable subscriber honoring `RUST_LOG`. Safe to call
/// more than once; later calls are no-ops.
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
        .try_init()
        .ok();
}

/// Install a JSON-lines subscriber for log aggregation.
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json())
        .try_init()
        .ok();
}
