//! Structured logging bootstrap, shared by every binary in the workspace.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global `tracing` subscriber from the given default filter
/// directive, honoring `RUST_LOG` if set.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    fmt().with_env_filter(filter).with_target(true).init();
}
