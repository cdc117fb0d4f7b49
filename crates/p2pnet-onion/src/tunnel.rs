//! Tunnel records owned by the tunnel initiator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use p2pnet_common::{IdAllocator, IdExhausted, Identity, TunnelMode};

/// A peer to route through, as known before any session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub address: SocketAddr,
    /// DER-encoded RSA public key.
    pub hostkey: Vec<u8>,
}

impl Hop {
    pub fn new(address: SocketAddr, hostkey: Vec<u8>) -> Self {
        Self { address, hostkey }
    }

    pub fn identity(&self) -> Identity {
        Identity::of(&self.hostkey)
    }
}

/// An established hop of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopLink {
    /// Our session with the hop.
    pub session_id: u32,
    /// The hop's id for the same session; cells for the hop carry it.
    pub link_id: u32,
    pub address: SocketAddr,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunnel {
    pub id: u32,
    pub mode: TunnelMode,
    /// Never empty. The last hop is the destination.
    pub hops: Vec<HopLink>,
    pub destination_hostkey: Vec<u8>,
}

impl Tunnel {
    pub fn first_hop(&self) -> Option<&HopLink> {
        self.hops.first()
    }

    pub fn destination(&self) -> Option<&HopLink> {
        self.hops.last()
    }

    pub fn session_ids(&self) -> Vec<u32> {
        self.hops.iter().map(|hop| hop.session_id).collect()
    }

    /// Session order handed to `layer_encrypt` and `layer_decrypt`.
    ///
    /// Relayed tunnels list the first hop last so that its layer ends up
    /// outermost and is the first one peeled.
    pub fn layer_order(&self) -> Vec<u32> {
        match self.mode {
            TunnelMode::Direct => self.session_ids(),
            TunnelMode::Relayed => layer_route(&self.hops),
        }
    }
}

/// Layer order for a relayed path: last hop innermost.
pub(crate) fn layer_route(hops: &[HopLink]) -> Vec<u32> {
    hops.iter().rev().map(|hop| hop.session_id).collect()
}

enum Slot {
    /// Id reserved while hops are being handshaken.
    Building,
    Ready(Arc<Tunnel>),
}

struct Inner {
    tunnels: HashMap<u32, Slot>,
    ids: IdAllocator,
}

/// Tunnels by id. Ids are reserved before building and only become visible
/// through [`get`](TunnelTable::get) once the tunnel is complete.
pub struct TunnelTable {
    inner: Mutex<Inner>,
}

impl TunnelTable {
    pub fn new(ids: IdAllocator) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tunnels: HashMap::new(),
                ids,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reserve(&self) -> Result<u32, IdExhausted> {
        let mut inner = self.lock();
        let Inner { tunnels, ids } = &mut *inner;
        let id = ids.allocate(|id| tunnels.contains_key(&id))?;
        tunnels.insert(id, Slot::Building);
        Ok(id)
    }

    pub fn complete(&self, tunnel: Tunnel) -> Arc<Tunnel> {
        let tunnel = Arc::new(tunnel);
        self.lock()
            .tunnels
            .insert(tunnel.id, Slot::Ready(tunnel.clone()));
        tunnel
    }

    /// Release a reserved id after a failed build.
    pub fn abandon(&self, id: u32) {
        let mut inner = self.lock();
        if matches!(inner.tunnels.get(&id), Some(Slot::Building)) {
            inner.tunnels.remove(&id);
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<Tunnel>> {
        match self.lock().tunnels.get(&id) {
            Some(Slot::Ready(tunnel)) => Some(tunnel.clone()),
            _ => None,
        }
    }

    /// Remove a complete tunnel. Tunnels still building are left alone.
    pub fn remove(&self, id: u32) -> Option<Arc<Tunnel>> {
        let mut inner = self.lock();
        match inner.tunnels.get(&id) {
            Some(Slot::Ready(_)) => match inner.tunnels.remove(&id) {
                Some(Slot::Ready(tunnel)) => Some(tunnel),
                _ => None,
            },
            _ => None,
        }
    }

    /// Number of ready tunnels.
    pub fn len(&self) -> usize {
        self.lock()
            .tunnels
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
