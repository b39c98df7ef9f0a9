//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when it is set and valid.  Otherwise the configured level
//! (from `[gateway] log_level`) is used, and `info` if that does not parse
//! either.

use tracing_subscriber::EnvFilter;

/// Builds the filter used by [`init_logging`].
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global `fmt` subscriber.
///
/// Returns `false` if a subscriber was already installed; calling this more
/// than once is harmless.
pub fn init_logging(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_target(false)
        .try_init()
        .is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
