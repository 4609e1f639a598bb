//! jrpc2 - a transport-agnostic JSON-RPC 2.0 framework
//!
//! This crate provides the core of a JSON-RPC 2.0 implementation: a
//! pluggable framing layer, a tolerant message/batch codec, a
//! bounded-concurrency server dispatcher, and a client-side request
//! correlator, all built over an arbitrary byte-oriented duplex channel.
//!
//! # Architecture
//!
//! - `framing`: the six wire framings (length-prefixed decimal/varint,
//!   header-framed, line-framed, delimiter-split, self-delimited JSON)
//!   plus an in-memory pairing for tests
//! - `message`: wire-level request/notification/response/error types
//! - `batch`: tolerant parsing of single messages and batches
//! - `server`: the dispatcher, worker pool, cancellation, and builtins
//! - `client`: outbound id assignment, pending-waiter correlation, and
//!   server-push handling
//! - `context`: per-call cancellation, deadline, and metadata
//! - `jctx`: the wire envelope that carries a `Context` over transports
//!   with no header channel of their own
//! - `auth`: the HMAC-based auth token format
//! - `codes`: reserved and implementation-defined JSON-RPC error codes
//! - `metrics`: the metrics sink interface `rpc.serverInfo` reports through
//! - `config`: `ServerConfig`/`ClientConfig` ambient configuration
//! - `error`: this crate's internal error type
//! - `logging`: a `tracing-subscriber` initializer for embedding binaries
//!
//! # Example
//!
//! ```no_run
//! use jrpc2::context::Context;
//! use jrpc2::server::{FnHandler, Server};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> jrpc2::error::Result<()> {
//!     let server = Server::builder()
//!         .method(
//!             "Math.Add",
//!             FnHandler::new(|_ctx: Context, params: Option<serde_json::Value>| async move {
//!                 let nums: Vec<i64> = params
//!                     .and_then(|v| v.as_array().cloned())
//!                     .unwrap_or_default()
//!                     .iter()
//!                     .filter_map(|v| v.as_i64())
//!                     .collect();
//!                 Ok(json!(nums.iter().sum::<i64>()))
//!             }),
//!         )
//!         .build();
//!
//!     let (reader, writer): (tokio::io::Stdin, tokio::io::Stdout) = (tokio::io::stdin(), tokio::io::stdout());
//!     let framed = jrpc2::framing::by_name("decimal", Box::new(reader), Box::new(writer))?;
//!     server.start(framed).await?;
//!     server.wait().await
//! }
//! ```

pub mod auth;
pub mod batch;
pub mod client;
pub mod codes;
pub mod config;
pub mod context;
pub mod error;
pub mod framing;
pub mod jctx;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod server;

// Re-export the types most callers reach for first.
pub use client::{Client, ClientBuilder};
pub use context::Context;
pub use error::{JrpcError, Result};
pub use server::{Handler, Server, ServerBuilder};
