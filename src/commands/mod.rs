pub mod agent;
pub mod check;
pub mod controller;
pub mod version;

use tracing_subscriber::EnvFilter;

/// Structured logging with the configured level as the default filter.
pub(crate) fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
