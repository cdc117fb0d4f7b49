//! Sources of intermediate hops.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use p2pnet_wire::{Message, MessageType, Transport};

use crate::tunnel::Hop;
use crate::OnionError;

#[async_trait]
pub trait PeerSampler: Send + Sync {
    /// One random peer.
    async fn sample(&self) -> Result<Hop, OnionError>;
}

/// Samples peers from an RPS module with `RPS_QUERY`.
pub struct RpsSampler {
    transport: Arc<dyn Transport>,
    address: SocketAddr,
}

impl RpsSampler {
    pub fn new(transport: Arc<dyn Transport>, address: SocketAddr) -> Self {
        Self { transport, address }
    }
}

#[async_trait]
impl PeerSampler for RpsSampler {
    async fn sample(&self) -> Result<Hop, OnionError> {
        let reply = self
            .transport
            .request(self.address, &Message::RpsQuery)
            .await
            .map_err(|e| OnionError::Sampling(e.to_string()))?;
        match reply {
            Message::RpsPeer(peer) => Ok(Hop::new(peer.address, peer.hostkey)),
            other => Err(OnionError::unexpected(MessageType::RpsQuery, &other)),
        }
    }
}
