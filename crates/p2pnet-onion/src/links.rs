//! Hop-side records of sessions other peers opened with this node.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use p2pnet_common::Identity;

use crate::OnionError;

/// Where cells for a link are forwarded once it has been extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downstream {
    pub address: SocketAddr,
    /// The next hop's id for our session with it.
    pub link_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Whoever opened the session, as seen by this hop.
    pub peer: Identity,
    pub downstream: Option<Downstream>,
}

/// Links keyed by link id, which is the local Auth session id.
#[derive(Debug, Default)]
pub struct LinkTable {
    links: RwLock<HashMap<u32, Link>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, link_id: u32, peer: Identity) {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.insert(
            link_id,
            Link {
                peer,
                downstream: None,
            },
        );
    }

    pub fn get(&self, link_id: u32) -> Option<Link> {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        links.get(&link_id).copied()
    }

    /// Attach the next hop. A link can only be extended once.
    pub fn set_downstream(&self, link_id: u32, downstream: Downstream) -> Result<(), OnionError> {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        let link = links
            .get_mut(&link_id)
            .ok_or(OnionError::LinkNotFound(link_id))?;
        if link.downstream.is_some() {
            return Err(OnionError::AlreadyExtended(link_id));
        }
        link.downstream = Some(downstream);
        Ok(())
    }

    pub fn remove(&self, link_id: u32) -> Option<Link> {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.remove(&link_id)
    }

    pub fn len(&self) -> usize {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
