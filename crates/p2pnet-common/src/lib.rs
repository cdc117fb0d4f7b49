//! Shared utilities for p2pnet: configuration, logging, error types.
//!
//! This crate provides:
//! - Peer identities (SHA-256 of a DER hostkey) and the peer directory
//! - Bounded random identifier allocation for sessions and tunnels
//! - TOML node configuration
//! - Tracing initialization shared by every binary

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod ids;

pub use config::{Config, TunnelMode};
pub use error::{Error, Result};
pub use identity::{Identity, PeerDirectory};
pub use ids::{IdAllocator, IdExhausted, IdSource, UNASSIGNED_ID};

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
