//! Tracing setup shared by every PrivCount process entrypoint.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. Honors `RUST_LOG` if set;
/// otherwise falls back to `default_filter`.
pub fn install(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
