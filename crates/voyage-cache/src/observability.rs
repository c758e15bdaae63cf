//! Tracing setup for processes embedding the cache.
//!
//! One global `tracing-subscriber` registry with a reloadable `EnvFilter`.
//! `RUST_LOG` wins over the configured `logging.level` at startup;
//! [`apply_logging_level`] swaps the filter later.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// `RUST_LOG` when it parses, otherwise `level`.
fn startup_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing_with_level(level: &str) {
    let (filter_layer, handle) = reload::Layer::new(startup_filter(level));

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        let _ = LOG_RELOAD_HANDLE.set(handle);
        tracing::debug!(level, "tracing initialized");
    }
}

pub fn init_tracing_from_config(logging: &LoggingConfig) {
    init_tracing_with_level(&logging.level);
}

/// Apply a new logging level at runtime if reload handle is configured.
///
/// Returns whether a subscriber installed by this module was updated.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|f| {
                *f = EnvFilter::new(level);
            })
            .is_ok(),
        None => false,
    }
}
