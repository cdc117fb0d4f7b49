//! Peer identities and the peer directory.
//!
//! An **Identity** is the SHA-256 digest of a peer's DER-encoded hostkey.
//! It never changes for a given keypair and is used as the stable lookup
//! key for everything the node knows about a peer.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Length of an identity digest in bytes.
pub const IDENTITY_LEN: usize = 32;

/// SHA-256 fingerprint of a hostkey.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// Fingerprint a DER-encoded hostkey.
    pub fn of(hostkey: &[u8]) -> Self {
        Self(Sha256::digest(hostkey).into())
    }

    /// Create an identity from a raw digest.
    pub fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse an identity from its hex representation.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(Error::identity)?;
        let digest: [u8; IDENTITY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::identity(format!(
                "invalid identity length: expected {} bytes, got {}",
                IDENTITY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(digest))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.short())
    }
}

#[derive(Debug, Default)]
struct DirectoryTables {
    addresses: HashMap<Identity, SocketAddr>,
    sessions: HashMap<u32, Identity>,
}

/// Side tables mapping identities to addresses and sessions to identities.
///
/// These are caches. Whether a peer is reachable is decided by
/// establishing a session with it, not by the presence of an entry here.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    tables: RwLock<DirectoryTables>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember where a peer can be reached.
    pub fn remember_peer(&self, identity: Identity, address: SocketAddr) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.addresses.insert(identity, address);
    }

    pub fn address_of(&self, identity: &Identity) -> Option<SocketAddr> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.addresses.get(identity).copied()
    }

    /// Reverse lookup of the first identity known at `address`.
    pub fn identity_at(&self, address: SocketAddr) -> Option<Identity> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .addresses
            .iter()
            .find(|(_, addr)| **addr == address)
            .map(|(identity, _)| *identity)
    }

    /// Record which peer holds the other end of a session.
    pub fn bind_session(&self, session_id: u32, identity: Identity) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.sessions.insert(session_id, identity);
    }

    pub fn identity_of_session(&self, session_id: u32) -> Option<Identity> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.sessions.get(&session_id).copied()
    }

    pub fn forget_session(&self, session_id: u32) -> Option<Identity> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.sessions.remove(&session_id)
    }

    /// Drop the address of a peer no session is bound to any more.
    ///
    /// Returns the removed address. Peers with live sessions are kept.
    pub fn forget_peer(&self, identity: &Identity) -> Option<SocketAddr> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.sessions.values().any(|bound| bound == identity) {
            return None;
        }
        let removed = tables.addresses.remove(identity);
        if let Some(address) = removed {
            debug!("Forgot peer {} at {}", identity.short(), address);
        }
        removed
    }

    /// Number of peers with a known address.
    pub fn peer_count(&self) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.addresses.len()
    }

    /// Number of sessions currently bound to a peer.
    pub fn session_count(&self) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable() {
        let hostkey = b"not really DER but good enough";
        assert_eq!(Identity::of(hostkey), Identity::of(hostkey));
        assert_ne!(Identity::of(hostkey), Identity::of(b"another key"));
    }

    #[test]
    fn test_identity_hex_roundtrip() {
        let identity = Identity::of(b"hostkey");
        let text = identity.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(Identity::parse(&text).unwrap(), identity);
    }

    #[test]
    fn test_identity_parse_rejects_wrong_length() {
        assert!(Identity::parse("abcd").is_err());
        assert!(Identity::parse("zz").is_err());
    }

    #[test]
    fn test_directory_tables() {
        let directory = PeerDirectory::new();
        let alice = Identity::of(b"alice");
        let addr: SocketAddr = "127.0.0.1:7014".parse().unwrap();

        directory.remember_peer(alice, addr);
        directory.bind_session(42, alice);

        assert_eq!(directory.address_of(&alice), Some(addr));
        assert_eq!(directory.identity_at(addr), Some(alice));
        assert_eq!(directory.identity_of_session(42), Some(alice));

        assert_eq!(directory.forget_session(42), Some(alice));
        assert_eq!(directory.identity_of_session(42), None);
        assert_eq!(directory.session_count(), 0);
    }

    #[test]
    fn test_forget_peer_keeps_peers_with_sessions() {
        let directory = PeerDirectory::new();
        let alice = Identity::of(b"alice");
        let bob = Identity::of(b"bob");
        let alice_addr: SocketAddr = "127.0.0.1:7014".parse().unwrap();
        let bob_addr: SocketAddr = "127.0.0.1:7015".parse().unwrap();

        directory.remember_peer(alice, alice_addr);
        directory.remember_peer(bob, bob_addr);
        directory.bind_session(1, alice);
        directory.bind_session(2, alice);

        assert_eq!(directory.forget_peer(&alice), None);
        assert_eq!(directory.forget_peer(&bob), Some(bob_addr));
        assert_eq!(directory.peer_count(), 1);

        directory.forget_session(1);
        assert_eq!(directory.forget_peer(&alice), None);
        directory.forget_session(2);
        assert_eq!(directory.forget_peer(&alice), Some(alice_addr));
        assert_eq!(directory.address_of(&alice), None);
        assert_eq!(directory.peer_count(), 0);

        assert_eq!(directory.forget_peer(&alice), None);
    }
}
