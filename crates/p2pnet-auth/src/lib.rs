#![forbid(unsafe_code)]

//! p2pnet Auth module.
//!
//! Establishes pairwise sessions with an RSA key transport handshake and
//! applies or removes per-session AES-CFB + HMAC-SHA256 layers:
//! 1. The initiator sends the peer's hostkey in `AUTH_SESSION_START` and
//!    receives `AUTH_SESSION_HS1`
//! 2. The responder turns `AUTH_SESSION_INCOMING_HS1` into `AUTH_SESSION_HS2`
//! 3. The initiator confirms with `AUTH_SESSION_INCOMING_HS2`
//!
//! After that, `AUTH_LAYER_ENCRYPT` / `AUTH_LAYER_DECRYPT` operate on
//! ordered lists of established session ids.

pub mod handshake;
pub mod registry;
pub mod service;

use p2pnet_common::IdExhausted;
use p2pnet_crypto::CryptoError;
use p2pnet_wire::WireError;
use thiserror::Error;

pub use handshake::{HandshakeError, Role, SessionState};
pub use registry::{SessionInfo, SessionRegistry};
pub use service::AuthService;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid hostkey: {0}")]
    InvalidHostkey(String),

    #[error("handshake decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("session {0} not found")]
    SessionNotFound(u32),

    #[error("session {session_id}: {source}")]
    InvalidState {
        session_id: u32,
        source: HandshakeError,
    },

    #[error("session {0} is not established")]
    NotEstablished(u32),

    #[error("mac mismatch at layer {layer} (session {session_id})")]
    MacMismatch { layer: usize, session_id: u32 },

    #[error(transparent)]
    IdExhausted(#[from] IdExhausted),

    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    #[error("handshake worker failed: {0}")]
    Worker(String),
}

impl AuthError {
    pub(crate) fn invalid_hostkey(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidHostkey(reason) => AuthError::InvalidHostkey(reason),
            other => AuthError::InvalidHostkey(other.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use std::sync::OnceLock;

    use p2pnet_crypto::HostKeypair;

    pub fn alice() -> &'static HostKeypair {
        static KEY: OnceLock<HostKeypair> = OnceLock::new();
        KEY.get_or_init(|| HostKeypair::generate(1024).unwrap())
    }

    pub fn bob() -> &'static HostKeypair {
        static KEY: OnceLock<HostKeypair> = OnceLock::new();
        KEY.get_or_init(|| HostKeypair::generate(1024).unwrap())
    }
}
