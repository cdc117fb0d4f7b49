//! Session registry and layered encryption.
//!
//! All sessions live in one map behind a single mutex together with the id
//! allocator. RSA and AES work always happens outside the lock; the lock is
//! only held to reserve ids, read key snapshots and apply state transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use p2pnet_common::ids::DEFAULT_MAX_ID_ATTEMPTS;
use p2pnet_common::{IdAllocator, Identity, PeerDirectory};
use p2pnet_crypto::{
    authenticated_decrypt, authenticated_encrypt, generate_symmetric_key, parse_hostkey,
    rsa_encrypt, CryptoError, HostKeypair, SYMMETRIC_KEY_LEN,
};
use p2pnet_wire::auth::{Handshake1, Handshake2};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::handshake::{Handshake, Role, SessionState};
use crate::AuthError;

type Secret = Zeroizing<Vec<u8>>;

struct Session {
    handshake: Handshake,
    peer: Identity,
    shared_key: Secret,
    local_hmac: Secret,
    remote_hmac: Option<Secret>,
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    fn new(role: Role, peer: Identity, shared_key: Secret, local_hmac: Secret) -> Self {
        let now = Instant::now();
        Self {
            handshake: Handshake::new(role),
            peer,
            shared_key,
            local_hmac,
            remote_hmac: None,
            created_at: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u32,
    pub state: SessionState,
    pub role: Role,
    pub peer: Identity,
    pub created_at: Instant,
    pub last_activity: Instant,
}

struct Inner {
    sessions: HashMap<u32, Session>,
    ids: IdAllocator,
}

impl Inner {
    fn allocate(&mut self) -> Result<u32, AuthError> {
        let sessions = &self.sessions;
        Ok(self.ids.allocate(|id| sessions.contains_key(&id))?)
    }
}

/// Keys needed for one layer, copied out under the lock.
struct LayerKeys {
    session_id: u32,
    secret: Secret,
    mac_key: Secret,
}

pub struct SessionRegistry {
    keypair: Arc<HostKeypair>,
    directory: Arc<PeerDirectory>,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(keypair: Arc<HostKeypair>) -> Self {
        Self::with_allocator(keypair, IdAllocator::new(DEFAULT_MAX_ID_ATTEMPTS))
    }

    pub fn with_allocator(keypair: Arc<HostKeypair>, ids: IdAllocator) -> Self {
        Self {
            keypair,
            directory: Arc::new(PeerDirectory::new()),
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                ids,
            }),
        }
    }

    /// Share an existing peer directory instead of a private one.
    pub fn with_directory(mut self, directory: Arc<PeerDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn keypair(&self) -> &HostKeypair {
        &self.keypair
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a session with the owner of `peer_hostkey`.
    ///
    /// The session id is reserved before the RSA work starts. If the session
    /// is closed while that work runs, the result is `SessionNotFound`.
    pub fn start_session(&self, peer_hostkey: &[u8]) -> Result<(u32, Handshake1), AuthError> {
        let remote = parse_hostkey(peer_hostkey).map_err(AuthError::invalid_hostkey)?;
        let peer = Identity::of(peer_hostkey);

        let shared_key = generate_symmetric_key(SYMMETRIC_KEY_LEN)?;
        let local_hmac = generate_symmetric_key(SYMMETRIC_KEY_LEN)?;

        let session_id = {
            let mut inner = self.lock();
            let id = inner.allocate()?;
            inner.sessions.insert(
                id,
                Session::new(
                    Role::Initiator,
                    peer,
                    shared_key.clone(),
                    local_hmac.clone(),
                ),
            );
            id
        };

        let encrypted = rsa_encrypt(&remote, &shared_key)
            .and_then(|key| Ok((key, rsa_encrypt(&remote, &local_hmac)?)));
        let (encrypted_key, encrypted_hmac) = match encrypted {
            Ok(blocks) => blocks,
            Err(e) => {
                self.lock().sessions.remove(&session_id);
                return Err(e.into());
            }
        };

        {
            let mut inner = self.lock();
            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or(AuthError::SessionNotFound(session_id))?;
            session
                .handshake
                .on_send_handshake1()
                .map_err(|source| AuthError::InvalidState { session_id, source })?;
            session.touch();
        }

        debug!("Session {} started with {:?}", session_id, peer);
        Ok((
            session_id,
            Handshake1 {
                encrypted_key,
                encrypted_hmac,
            },
        ))
    }

    /// Answer a handshake-1 from the owner of `peer_hostkey`.
    ///
    /// The new session is established immediately on this side.
    pub fn accept_incoming_handshake1(
        &self,
        peer_hostkey: &[u8],
        handshake: &Handshake1,
    ) -> Result<(u32, Handshake2), AuthError> {
        let remote = parse_hostkey(peer_hostkey).map_err(AuthError::invalid_hostkey)?;
        let peer = Identity::of(peer_hostkey);

        let shared_key = self.decrypt_block(&handshake.encrypted_key)?;
        let remote_hmac = self.decrypt_block(&handshake.encrypted_hmac)?;
        if !matches!(shared_key.len(), 16 | 24 | 32) {
            return Err(AuthError::DecryptionFailed(format!(
                "unsupported shared key length {}",
                shared_key.len()
            )));
        }

        let local_hmac = generate_symmetric_key(SYMMETRIC_KEY_LEN)?;
        let encrypted_hmac = rsa_encrypt(&remote, &local_hmac)?;

        let mut session = Session::new(Role::Responder, peer, shared_key, local_hmac);
        session.remote_hmac = Some(remote_hmac);

        let session_id = {
            let mut inner = self.lock();
            let id = inner.allocate()?;
            session
                .handshake
                .on_receive_handshake1()
                .map_err(|source| AuthError::InvalidState {
                    session_id: id,
                    source,
                })?;
            inner.sessions.insert(id, session);
            id
        };
        self.directory.bind_session(session_id, peer);

        info!("Session {} established as responder for {:?}", session_id, peer);
        Ok((session_id, Handshake2 { encrypted_hmac }))
    }

    /// Complete a session started with [`start_session`](Self::start_session).
    pub fn confirm_handshake2(
        &self,
        session_id: u32,
        handshake: &Handshake2,
    ) -> Result<(), AuthError> {
        // Fail fast on unknown or misplaced sessions before any RSA work.
        {
            let inner = self.lock();
            let session = inner
                .sessions
                .get(&session_id)
                .ok_or(AuthError::SessionNotFound(session_id))?;
            if let Err(source) = session.handshake.clone().on_receive_handshake2() {
                return Err(AuthError::InvalidState { session_id, source });
            }
        }

        let remote_hmac = self.decrypt_block(&handshake.encrypted_hmac)?;

        let peer = {
            let mut inner = self.lock();
            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or(AuthError::SessionNotFound(session_id))?;
            session
                .handshake
                .on_receive_handshake2()
                .map_err(|source| AuthError::InvalidState { session_id, source })?;
            session.remote_hmac = Some(remote_hmac);
            session.touch();
            session.peer
        };
        self.directory.bind_session(session_id, peer);

        info!("Session {} established as initiator for {:?}", session_id, peer);
        Ok(())
    }

    /// Remove a session. Closing an unknown id is not an error.
    ///
    /// Returns whether a session was removed.
    pub fn close_session(&self, session_id: u32) -> bool {
        let removed = self.lock().sessions.remove(&session_id);
        match removed {
            Some(mut session) => {
                let transition = session.handshake.on_close();
                self.directory.forget_session(session_id);
                debug!("Session {} closed from {}", session_id, transition.from);
                true
            }
            None => false,
        }
    }

    /// Apply one authenticated-encryption layer per session, in list order.
    pub fn layer_encrypt(&self, session_ids: &[u32], payload: &[u8]) -> Result<Vec<u8>, AuthError> {
        let layers = self.snapshot(session_ids, |session| Some(session.local_hmac.clone()))?;

        let mut data = payload.to_vec();
        for layer in &layers {
            data = authenticated_encrypt(&data, &layer.secret, &layer.mac_key)?;
        }
        Ok(data)
    }

    /// Peel one layer per session, in reverse list order.
    ///
    /// On a MAC failure, `layer` is the zero-based index of the failed peel.
    pub fn layer_decrypt(&self, session_ids: &[u32], payload: &[u8]) -> Result<Vec<u8>, AuthError> {
        let layers = self.snapshot(session_ids, |session| session.remote_hmac.clone())?;

        let mut data = payload.to_vec();
        for (layer, keys) in layers.iter().rev().enumerate() {
            data = match authenticated_decrypt(&data, &keys.secret, &keys.mac_key) {
                Ok(plaintext) => plaintext,
                Err(CryptoError::MacMismatch) => {
                    warn!(
                        target: "security",
                        "MAC mismatch peeling layer {} (session {})",
                        layer, keys.session_id
                    );
                    return Err(AuthError::MacMismatch {
                        layer,
                        session_id: keys.session_id,
                    });
                }
                Err(e) => return Err(e.into()),
            };
        }
        Ok(data)
    }

    fn snapshot(
        &self,
        session_ids: &[u32],
        mac_key: impl Fn(&Session) -> Option<Secret>,
    ) -> Result<Vec<LayerKeys>, AuthError> {
        let mut inner = self.lock();
        let mut layers = Vec::with_capacity(session_ids.len());
        for &session_id in session_ids {
            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or(AuthError::SessionNotFound(session_id))?;
            if session.handshake.state() != SessionState::Established {
                return Err(AuthError::NotEstablished(session_id));
            }
            let mac_key = mac_key(session).ok_or(AuthError::NotEstablished(session_id))?;
            session.touch();
            layers.push(LayerKeys {
                session_id,
                secret: session.shared_key.clone(),
                mac_key,
            });
        }
        Ok(layers)
    }

    fn decrypt_block(&self, block: &[u8]) -> Result<Secret, AuthError> {
        self.keypair.decrypt(block).map_err(|e| match e {
            CryptoError::BlockSizeMismatch { .. } => AuthError::Crypto(e),
            other => AuthError::DecryptionFailed(other.to_string()),
        })
    }

    /// Close every session idle for longer than `max_idle`.
    pub fn expire_idle(&self, max_idle: Duration) -> Vec<u32> {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut inner = self.lock();
            inner.sessions.retain(|id, session| {
                let idle = now.duration_since(session.last_activity) > max_idle;
                if idle {
                    expired.push(*id);
                }
                !idle
            });
        }
        for id in &expired {
            self.directory.forget_session(*id);
        }
        if !expired.is_empty() {
            info!("Expired {} idle sessions", expired.len());
        }
        expired
    }

    pub fn session(&self, session_id: u32) -> Option<SessionInfo> {
        let inner = self.lock();
        inner.sessions.get(&session_id).map(|session| SessionInfo {
            id: session_id,
            state: session.handshake.state(),
            role: session.handshake.role(),
            peer: session.peer,
            created_at: session.created_at,
            last_activity: session.last_activity,
        })
    }

    pub fn contains(&self, session_id: u32) -> bool {
        self.lock().sessions.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("identity", &self.keypair.identity())
            .field("sessions", &self.len())
            .finish()
    }
}
