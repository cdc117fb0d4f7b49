//! Onion API and Onion P2P handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use p2pnet_common::{TunnelMode, UNASSIGNED_ID};
use p2pnet_wire::onion::{TunnelBuild, TunnelData, TunnelError, TunnelReady};
use p2pnet_wire::{Handler, Message, MessageType};
use tracing::{debug, info, warn};

use crate::onion::Onion;
use crate::sampler::PeerSampler;
use crate::tunnel::Hop;
use crate::OnionError;

fn onion_error(request: MessageType, tunnel_id: u32) -> Message {
    Message::OnionError(TunnelError {
        request_type: request as u16,
        tunnel_id,
    })
}

/// Mode for a client tunnel over `hop_count` hops.
///
/// Direct tunnels only carry data over a single hop, so longer client
/// tunnels are always relayed.
fn api_mode(configured: TunnelMode, hop_count: usize) -> TunnelMode {
    if hop_count > 1 && configured == TunnelMode::Direct {
        debug!("Relaying {}-hop client tunnel", hop_count);
        TunnelMode::Relayed
    } else {
        configured
    }
}

/// Requests from local clients: build, use and destroy tunnels.
pub struct OnionApi {
    onion: Arc<Onion>,
    sampler: Option<Arc<dyn PeerSampler>>,
    hop_count: usize,
}

impl OnionApi {
    /// Without a sampler every tunnel goes straight to its destination.
    pub fn new(onion: Arc<Onion>, sampler: Option<Arc<dyn PeerSampler>>, hop_count: usize) -> Self {
        Self {
            onion,
            sampler,
            hop_count,
        }
    }

    pub fn onion(&self) -> &Arc<Onion> {
        &self.onion
    }

    async fn route_to(&self, build: TunnelBuild) -> Result<Vec<Hop>, OnionError> {
        let mut hops = Vec::with_capacity(self.hop_count + 1);
        if let Some(sampler) = &self.sampler {
            for _ in 0..self.hop_count {
                hops.push(sampler.sample().await?);
            }
        }
        hops.push(Hop::new(build.destination, build.destination_hostkey));
        Ok(hops)
    }

    async fn build(&self, build: TunnelBuild) -> Message {
        let destination_hostkey = build.destination_hostkey.clone();
        let destination = build.destination;
        let built = match self.route_to(build).await {
            Ok(hops) => {
                let mode = api_mode(self.onion.settings().mode, hops.len());
                self.onion.build_tunnel_with_mode(&hops, mode).await
            }
            Err(e) => Err(e),
        };
        match built {
            Ok(tunnel_id) => Message::OnionTunnelReady(TunnelReady {
                tunnel_id,
                destination_hostkey,
            }),
            Err(e) => {
                warn!("Tunnel to {} failed: {}", destination, e);
                onion_error(MessageType::OnionTunnelBuild, UNASSIGNED_ID)
            }
        }
    }

    async fn exchange(&self, data: TunnelData) -> Message {
        let tunnel_id = data.tunnel_id;
        let reply = async {
            let layered = self.onion.send_through_tunnel(tunnel_id, &data.data).await?;
            self.onion.receive_through_tunnel(tunnel_id, &layered).await
        };
        match reply.await {
            Ok(data) => Message::OnionTunnelData(TunnelData { tunnel_id, data }),
            Err(e) => {
                warn!("Data on tunnel {} failed: {}", tunnel_id, e);
                onion_error(MessageType::OnionTunnelData, tunnel_id)
            }
        }
    }
}

#[async_trait]
impl Handler for OnionApi {
    async fn handle(&self, message: Message, remote: SocketAddr) -> Option<Message> {
        match message {
            Message::OnionTunnelBuild(build) => {
                info!("Tunnel build to {} requested by {}", build.destination, remote);
                Some(self.build(build).await)
            }
            Message::OnionTunnelData(data) => Some(self.exchange(data).await),
            Message::OnionTunnelDestroy(destroy) => {
                match self.onion.teardown_tunnel(destroy.tunnel_id).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("Destroy from {} failed: {}", remote, e);
                        Some(onion_error(
                            MessageType::OnionTunnelDestroy,
                            destroy.tunnel_id,
                        ))
                    }
                }
            }
            Message::OnionCover(cover) => {
                debug!("Cover traffic of {} bytes not supported", cover.cover_size);
                Some(onion_error(MessageType::OnionCover, UNASSIGNED_ID))
            }
            other => {
                debug!("Ignoring {} on the Onion API", other.message_type());
                None
            }
        }
    }
}

/// Requests from other peers: handshakes, cells and destroys.
pub struct OnionP2p {
    onion: Arc<Onion>,
}

impl OnionP2p {
    pub fn new(onion: Arc<Onion>) -> Self {
        Self { onion }
    }
}

#[async_trait]
impl Handler for OnionP2p {
    async fn handle(&self, message: Message, remote: SocketAddr) -> Option<Message> {
        match message {
            Message::AuthSessionIncomingHs1(incoming) => {
                match self.onion.accept_handshake(incoming).await {
                    Ok(hs2) => Some(Message::AuthSessionHs2(hs2)),
                    Err(e) => {
                        warn!("Handshake from {} failed: {}", remote, e);
                        Some(onion_error(
                            MessageType::AuthSessionIncomingHs1,
                            UNASSIGNED_ID,
                        ))
                    }
                }
            }
            Message::OnionTunnelData(cell) => {
                let link_id = cell.tunnel_id;
                match self.onion.handle_cell(link_id, &cell.data).await {
                    Ok(data) => Some(Message::OnionTunnelData(TunnelData {
                        tunnel_id: link_id,
                        data,
                    })),
                    Err(e) => {
                        warn!("Cell on link {} from {} failed: {}", link_id, remote, e);
                        Some(onion_error(MessageType::OnionTunnelData, link_id))
                    }
                }
            }
            Message::OnionTunnelDestroy(destroy) => {
                self.onion.handle_destroy(destroy.tunnel_id).await;
                None
            }
            other => {
                debug!("Ignoring {} from {}", other.message_type(), remote);
                None
            }
        }
    }
}
