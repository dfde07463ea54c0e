//! codecks-mcp library
//!
//! Exposes the Codecks project-management API as MCP tools.
//!
//! # Layers
//!
//! - [`transport`]: HTTP with timeouts, idempotent-only retries and a response size ceiling
//! - [`query`]: builds the nested query documents and flattens entity-map responses
//! - [`client`]: card, deck, hand, comment, dashboard and scaffolding operations
//! - [`security`]: input validation plus tagging of user-authored text
//! - [`contract`]: the `{ok, schema_version, ...}` result envelope
//! - [`server`]: tool catalogue and the stdio JSON-RPC loop

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod protocol;
pub mod query;
pub mod security;
pub mod server;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging.
///
/// Logs go to stderr; stdout carries the JSON-RPC stream.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| Error::Config(format!("tracing already initialised: {e}")))
}
