//! Structured logging setup.
//!
//! The engine itself only ever calls into `tracing`; this module is the one
//! place that wires a subscriber, so embedding applications can skip it and
//! install their own.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing_subscriber` formatter reading `RUST_LOG`, falling
/// back to `info` for this crate and `warn` for dependencies.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meshdrop=info,warn"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
