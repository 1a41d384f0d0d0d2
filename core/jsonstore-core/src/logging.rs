//! Logging bootstrap.
//!
//! The store only emits `tracing` events: repository open, rotation, each
//! background conversion, skipped lines and per-dump index loads. With the
//! `logging` feature these helpers install a `tracing-subscriber` fmt layer;
//! without it they compile to nothing, so callers need no `cfg` of their own.
//!
//! Levels are scoped to this crate (`jsonstore_core=<level>`) unless
//! `RUST_LOG` is set, in which case it wins.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Filter target for events emitted by the store.
pub const TARGET: &str = "jsonstore_core";

/// Directive enabling `level` for the store's own events.
pub fn directive(level: &str) -> String {
    format!("{TARGET}={level}")
}

/// Installs a subscriber at `info`, or at whatever `RUST_LOG` says.
///
/// ```rust
/// jsonstore_core::logging::init();
/// ```
pub fn init() {
    init_with_level("info")
}

/// Installs a subscriber at `level` (trace, debug, info, warn, error) for the
/// store's events. A second call is ignored.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .try_init();
}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

/// Debug-level subscriber writing through the test harness, so output shows up
/// only for failing tests.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new(directive("debug")))
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
