//! Tracing subscriber setup.
//!
//! The engine takes no global logger — reactors log through `tracing`
//! macros and the host process decides the subscriber. This helper is for
//! binaries and tests that want a sane default.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber filtered by `KEEL_LOG` (falling back to
/// `RUST_LOG`, then `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env("KEEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
