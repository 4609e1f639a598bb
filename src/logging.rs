//! Structured logging setup.
//!
//! This crate ships no binary of its own, so nothing calls this on startup
//! automatically -- it's here for test harnesses and downstream binaries
//! that embed this crate. Built on the usual
//! `tracing_subscriber::registry()...init()` wiring, trimmed to the one
//! concern this crate owns: an `EnvFilter` honoring `RUST_LOG`, falling
//! back to a crate-scoped default, rendered through the plain `fmt`
//! layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global `tracing` subscriber: `RUST_LOG` if set, otherwise
/// `jrpc2=info`. Returns an error if a global subscriber is already
/// installed.
pub fn init_logging() -> crate::error::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jrpc2=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| crate::error::JrpcError::Internal(format!("failed to install tracing subscriber: {e}")))
}
