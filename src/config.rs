//! Configuration surfaces for a server or client built on this crate.
//!
//! Plain serde structs, YAML as the on-disk format, `#[serde(default)]`
//! fields so a partial document still deserializes, and a `Default` impl
//! matching what `ServerBuilder`/`ClientBuilder` already default to. No
//! config-file-loading CLI is implied here -- that surface is out of
//! scope for this crate -- but either struct can be built directly or via
//! `serde_yaml::from_str`.

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_framing() -> String {
    "decimal".to_string()
}

/// Configuration for a [`crate::server::Server`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Worker pool size (the [`tokio::sync::Semaphore`] permit count).
    /// Defaults to the logical processor count.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Default deadline, in milliseconds, applied to a handler's context
    /// when a request carries no `jctx` deadline of its own. `0` means no
    /// default deadline.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Whether the `rpc.*` builtin methods are routed (enabled by
    /// default).
    #[serde(default = "default_true")]
    pub enable_builtins: bool,
    /// Whether server-initiated push (`notify`/`callback`) is enabled.
    #[serde(default)]
    pub enable_push: bool,
    /// The named framing to construct via [`crate::framing::by_name`]:
    /// `decimal`, `varint`, `line`, `raw`, `lsp`, or `header:<mime>`.
    #[serde(default = "default_framing")]
    pub framing: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            concurrency: default_concurrency(),
            default_timeout_ms: default_timeout_ms(),
            enable_builtins: true,
            enable_push: false,
            framing: default_framing(),
        }
    }
}

impl ServerConfig {
    /// Parses a [`ServerConfig`] from a YAML document. Missing fields fall
    /// back to their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The configured default timeout as a [`std::time::Duration`], or
    /// `None` if `default_timeout_ms` is `0`.
    pub fn default_timeout(&self) -> Option<std::time::Duration> {
        if self.default_timeout_ms == 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(self.default_timeout_ms))
        }
    }
}

/// Configuration for a [`crate::client::Client`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Default deadline, in milliseconds, applied to an outbound call's
    /// context when the caller doesn't supply its own. `0` means no
    /// default deadline.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// The named framing to construct via [`crate::framing::by_name`].
    #[serde(default = "default_framing")]
    pub framing: String,
    /// The `Content-Type` to advertise when `framing` is `header:<mime>`
    /// or `lsp`. Informational only when `framing` doesn't use headers.
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            default_timeout_ms: default_timeout_ms(),
            framing: default_framing(),
            content_type: None,
        }
    }
}

impl ClientConfig {
    /// Parses a [`ClientConfig`] from a YAML document. Missing fields fall
    /// back to their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The configured default timeout as a [`std::time::Duration`], or
    /// `None` if `default_timeout_ms` is `0`.
    pub fn default_timeout(&self) -> Option<std::time::Duration> {
        if self.default_timeout_ms == 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(self.default_timeout_ms))
        }
    }
}
