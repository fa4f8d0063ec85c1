//! Tracing/logging initialization.
//!
//! `RUST_LOG` always wins over the configured level.

use tracing_subscriber::EnvFilter;

/// JSON logs at `info`, overridable via `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with("info", true);
}

/// Install the global subscriber with a default `level` directive and either
/// JSON or human-readable output.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(level: &str, json: bool) {
    let filter = build_filter(level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
