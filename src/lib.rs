//! MCP OAuth Gateway
//!
//! OAuth2 proxy and session gateway in front of an MCP tool server.
//!
//! # Features
//!
//! - **OAuth proxy**: serves discovery documents naming the gateway as
//!   issuer; forwards authorize/token to the upstream authorization server
//! - **Registration cache**: captures full client records (secret included)
//!   at dynamic-registration time, the only moment they are visible
//! - **Bearer auth guard**: resolves tokens to identities through the
//!   upstream before any session work happens
//! - **Session multiplexer**: MCP Streamable HTTP (2025-03-26) sessions
//!   with SSE streaming and idle sweep

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod protocol;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
