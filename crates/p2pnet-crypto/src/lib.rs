//! Cryptographic primitives for p2pnet.
//!
//! This crate provides:
//! - RSA hostkeys: generation, PEM load/save, DER marshalling, identities
//! - PKCS#1 v1.5 encryption for the session handshake
//! - AES-CFB encryption and HMAC-SHA256 authentication for tunnel layers
//!
//! # Design
//!
//! Everything here is stateless. Sessions and their keys live in the Auth
//! module; this crate only knows how to apply one operation to bytes.
//!
//! An authenticated blob is laid out as `mac || iv || ciphertext`, where
//! the MAC covers `iv || ciphertext`. The MAC is always verified before any
//! decryption is attempted.

#![forbid(unsafe_code)]

pub mod keys;
pub mod primitives;

use thiserror::Error;

pub use keys::{parse_hostkey, read_hostkey_file, HostKeypair, DEFAULT_RSA_BITS};
pub use primitives::{
    aes_decrypt, aes_encrypt, authenticated_decrypt, authenticated_encrypt, generate_keypair,
    generate_symmetric_key, hmac_sign, hmac_verify, rsa_decrypt, rsa_encrypt, MAC_LEN,
    SYMMETRIC_KEY_LEN,
};

/// Cryptographic errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hostkey: {0}")]
    InvalidHostkey(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("rsa operation failed: {0}")]
    Rsa(String),

    #[error("ciphertext block is {actual} bytes, expected {expected}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    #[error("unsupported symmetric key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("ciphertext too short: {0} bytes, minimum {1}")]
    CiphertextTooShort(usize, usize),

    #[error("mac mismatch")]
    MacMismatch,

    #[error("random number generator failed: {0}")]
    Random(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
