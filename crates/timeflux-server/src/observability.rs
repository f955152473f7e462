// Tracing initialization with a reloadable log level.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Initializes tracing at the default `info` level.
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Initializes tracing. `RUST_LOG` wins over the given level when set.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Applies a new logging level at runtime, typically right after the
/// configuration is loaded.
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|filter| {
            *filter = EnvFilter::new(level);
        });
    }
}

pub fn shutdown_tracing() {
    // Nothing to flush; fmt writes synchronously.
}
