//! Common error types for p2pnet.

use thiserror::Error;

/// Result type alias using p2pnet's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for node bootstrap and configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed identity or hostkey material
    #[error("identity error: {0}")]
    Identity(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create an identity error from any displayable type.
    pub fn identity(msg: impl std::fmt::Display) -> Self {
        Self::Identity(msg.to_string())
    }
}
