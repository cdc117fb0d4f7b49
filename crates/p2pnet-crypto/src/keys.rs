//! RSA hostkeys.
//!
//! A **hostkey** is the DER-encoded (SubjectPublicKeyInfo) RSA public key a
//! peer advertises. Its SHA-256 digest is the peer's [`Identity`].
//!
//! # Example
//!
//! ```no_run
//! use p2pnet_crypto::keys::HostKeypair;
//!
//! let keypair = HostKeypair::load("hostkey.pem").unwrap();
//! println!("identity: {}", keypair.identity());
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use p2pnet_common::Identity;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::primitives::{generate_keypair, rsa_decrypt};
use crate::CryptoError;

/// Modulus size for freshly generated hostkeys.
pub const DEFAULT_RSA_BITS: usize = 4096;

/// Parse a DER-encoded hostkey.
pub fn parse_hostkey(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| CryptoError::InvalidHostkey(e.to_string()))
}

/// Read a peer's hostkey from disk and return it as DER.
///
/// Accepts a PEM public key, a PEM private key (its public half is used)
/// or raw DER.
pub fn read_hostkey_file(path: impl AsRef<Path>) -> Result<Vec<u8>, CryptoError> {
    let bytes = fs::read(path)?;
    match std::str::from_utf8(&bytes) {
        Ok(text) if text.contains("PRIVATE KEY") => {
            HostKeypair::from_pem(text).map(|keypair| keypair.hostkey().to_vec())
        }
        Ok(text) if text.contains("-----BEGIN") => {
            let public = RsaPublicKey::from_public_key_pem(text)
                .map_err(|e| CryptoError::InvalidHostkey(e.to_string()))?;
            public_key_der(&public)
        }
        _ => {
            parse_hostkey(&bytes)?;
            Ok(bytes)
        }
    }
}

fn public_key_der(public: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::InvalidHostkey(e.to_string()))
}

/// RSA keypair identifying this node.
///
/// The DER hostkey and identity are computed once at construction.
#[derive(Clone)]
pub struct HostKeypair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    hostkey: Vec<u8>,
    identity: Identity,
}

impl HostKeypair {
    /// Generate a new keypair using the OS CSPRNG.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let (_, private) = generate_keypair(bits)?;
        Self::from_private_key(private)
    }

    pub fn from_private_key(private: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public = RsaPublicKey::from(&private);
        let hostkey = public_key_der(&public)?;
        let identity = Identity::of(&hostkey);
        Ok(Self {
            private,
            public,
            hostkey,
            identity,
        })
    }

    /// Parse a PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Self::from_private_key(private)
    }

    /// PKCS#1 PEM of the private key.
    pub fn to_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
    }

    /// SubjectPublicKeyInfo PEM of the public key.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidHostkey(e.to_string()))
    }

    /// Load a keypair from a private key PEM file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let pem = Zeroizing::new(fs::read_to_string(path)?);
        Self::from_pem(&pem)
    }

    /// Save the keypair to files.
    ///
    /// The private key is written with 0600 permissions on Unix.
    pub fn save(
        &self,
        private_path: impl AsRef<Path>,
        public_path: impl AsRef<Path>,
    ) -> Result<(), CryptoError> {
        write_private(private_path.as_ref(), self.to_pem()?.as_bytes())?;
        fs::write(public_path, self.public_key_pem()?)?;
        Ok(())
    }

    /// DER-encoded public key as sent on the wire.
    pub fn hostkey(&self) -> &[u8] {
        &self.hostkey
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Modulus size in bytes; every handshake block must be this long.
    pub fn block_size(&self) -> usize {
        self.public.size()
    }

    /// Decrypt one handshake block addressed to this key.
    pub fn decrypt(&self, block: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        rsa_decrypt(&self.private, block).map(Zeroizing::new)
    }
}

impl fmt::Debug for HostKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKeypair")
            .field("identity", &self.identity)
            .field("bits", &(self.block_size() * 8))
            .finish_non_exhaustive()
    }
}

/// Write owner-only key material. The file is never readable by others,
/// including when it already existed with wider permissions.
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

/// Small keys shared by the tests in this crate; 1024-bit generation is
/// still slow enough that it should only happen once per process.
#[cfg(test)]
pub(crate) fn test_keypair() -> &'static HostKeypair {
    use std::sync::OnceLock;
    static KEY: OnceLock<HostKeypair> = OnceLock::new();
    KEY.get_or_init(|| HostKeypair::generate(1024).unwrap())
}
