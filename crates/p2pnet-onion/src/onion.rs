//! Tunnel construction and cell handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use p2pnet_common::config::OnionConfig;
use p2pnet_common::{IdAllocator, Identity, PeerDirectory, TunnelMode, UNASSIGNED_ID};
use p2pnet_wire::auth::{IncomingHs1, SessionHandshake};
use p2pnet_wire::onion::{TunnelData, TunnelDestroy, TunnelExtend};
use p2pnet_wire::{Message, MessageType, Transport, WireError};
use tracing::{debug, info, warn};

use crate::auth_client::AuthClient;
use crate::links::{Downstream, Link, LinkTable};
use crate::sink::DataSink;
use crate::tunnel::{layer_route, Hop, HopLink, Tunnel, TunnelTable};
use crate::OnionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnionSettings {
    /// Mode used by [`Onion::build_tunnel`].
    pub mode: TunnelMode,
    /// Deadline for one exchange with a peer.
    pub hop_timeout: Duration,
    pub max_id_attempts: usize,
}

impl OnionSettings {
    pub fn from_config(config: &OnionConfig) -> Self {
        Self {
            mode: config.mode,
            hop_timeout: config.hop_timeout(),
            max_id_attempts: config.max_id_attempts,
        }
    }
}

impl Default for OnionSettings {
    fn default() -> Self {
        Self::from_config(&OnionConfig::default())
    }
}

/// The Onion module of one node.
///
/// As a tunnel owner it builds tunnels and sends payloads through them.
/// As a hop it accepts handshakes, peels and forwards cells, and delivers
/// payloads that end here to its [`DataSink`].
pub struct Onion {
    hostkey: Vec<u8>,
    auth: AuthClient,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn DataSink>,
    tunnels: TunnelTable,
    links: LinkTable,
    directory: Arc<PeerDirectory>,
    settings: OnionSettings,
}

impl Onion {
    /// `hostkey` is this node's DER public key, sent with every handshake.
    pub fn new(
        hostkey: Vec<u8>,
        auth: AuthClient,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn DataSink>,
        settings: OnionSettings,
    ) -> Self {
        Self::with_id_allocator(
            hostkey,
            auth,
            transport,
            sink,
            settings,
            IdAllocator::new(settings.max_id_attempts),
        )
    }

    pub fn with_id_allocator(
        hostkey: Vec<u8>,
        auth: AuthClient,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn DataSink>,
        settings: OnionSettings,
        ids: IdAllocator,
    ) -> Self {
        Self {
            hostkey,
            auth,
            transport,
            sink,
            tunnels: TunnelTable::new(ids),
            links: LinkTable::new(),
            directory: Arc::new(PeerDirectory::new()),
            settings,
        }
    }

    /// Share a peer directory with other modules.
    pub fn with_directory(mut self, directory: Arc<PeerDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn settings(&self) -> &OnionSettings {
        &self.settings
    }

    pub fn tunnels(&self) -> &TunnelTable {
        &self.tunnels
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn tunnel(&self, tunnel_id: u32) -> Option<Arc<Tunnel>> {
        self.tunnels.get(tunnel_id)
    }

    /// Build a tunnel through `hops` in the configured mode.
    pub async fn build_tunnel(&self, hops: &[Hop]) -> Result<u32, OnionError> {
        self.build_tunnel_with_mode(hops, self.settings.mode).await
    }

    /// Build a tunnel through `hops`, the last of which is the destination.
    ///
    /// Hops are established strictly in order. If any hop fails, sessions
    /// already opened for this tunnel are closed and the tunnel id is
    /// released before `TunnelBuildFailed` is returned.
    pub async fn build_tunnel_with_mode(
        &self,
        hops: &[Hop],
        mode: TunnelMode,
    ) -> Result<u32, OnionError> {
        let destination = hops.last().ok_or(OnionError::EmptyHopChain)?;
        let tunnel_id = self.tunnels.reserve()?;
        debug!(
            "Building {:?} tunnel {} through {} hops",
            mode,
            tunnel_id,
            hops.len()
        );

        let mut built: Vec<HopLink> = Vec::with_capacity(hops.len());
        for (hop_index, hop) in hops.iter().enumerate() {
            let via: &[HopLink] = match mode {
                TunnelMode::Direct => &[],
                TunnelMode::Relayed => &built,
            };
            match self.open_hop(hop, via).await {
                Ok(link) => built.push(link),
                Err(cause) => {
                    warn!(
                        "Tunnel {} failed at hop {} ({}): {}",
                        tunnel_id, hop_index, hop.address, cause
                    );
                    self.release(&built, mode).await;
                    self.tunnels.abandon(tunnel_id);
                    return Err(OnionError::TunnelBuildFailed {
                        hop_index,
                        cause: Box::new(cause),
                    });
                }
            }
        }

        self.tunnels.complete(Tunnel {
            id: tunnel_id,
            mode,
            hops: built,
            destination_hostkey: destination.hostkey.clone(),
        });
        info!(
            "Tunnel {} ready: {} hops to {}",
            tunnel_id,
            hops.len(),
            destination.address
        );
        Ok(tunnel_id)
    }

    /// Establish a session with `hop`, either directly (`via` empty) or
    /// through the already built hops in `via`.
    async fn open_hop(&self, hop: &Hop, via: &[HopLink]) -> Result<HopLink, OnionError> {
        let hs1 = self.auth.start_session(&hop.hostkey).await?;
        let session_id = hs1.session_id;

        let exchange = async {
            let incoming = Message::AuthSessionIncomingHs1(IncomingHs1 {
                hostkey: self.hostkey.clone(),
                handshake: hs1.handshake,
            });
            if via.is_empty() {
                let reply = self.peer_request(hop.address, &incoming).await?;
                expect_hs2(reply)
            } else {
                let extend = Message::OnionTunnelExtend(TunnelExtend {
                    next_hop: hop.address,
                    incoming_hs1: incoming.to_vec()?,
                });
                let reply = self.relay_exchange(via, &extend.to_vec()?).await?;
                expect_hs2(Message::decode(&reply)?)
            }
        };
        let hs2 = match exchange.await {
            Ok(hs2) => hs2,
            Err(e) => {
                self.close_local(session_id).await;
                return Err(e);
            }
        };

        // The hop holds a link from here on. A relayed hop is already the
        // downstream of `via` and goes away with the rest of the route.
        let link_id = hs2.session_id;
        match self.auth.confirm(session_id, hs2.handshake).await {
            Ok(()) => {
                let identity = hop.identity();
                self.directory.remember_peer(identity, hop.address);
                self.directory.bind_session(session_id, identity);
                debug!(
                    "Hop {} established: session {} link {}",
                    hop.address, session_id, link_id
                );
                Ok(HopLink {
                    session_id,
                    link_id,
                    address: hop.address,
                    identity,
                })
            }
            Err(e) => {
                if via.is_empty() {
                    self.send_destroy(hop.address, link_id).await;
                }
                self.close_local(session_id).await;
                Err(e)
            }
        }
    }

    /// Send `cell` through `route` (relayed layering) and peel the reply.
    async fn relay_exchange(&self, route: &[HopLink], cell: &[u8]) -> Result<Vec<u8>, OnionError> {
        let first = route.first().ok_or(OnionError::EmptyHopChain)?;
        let order = layer_route(route);
        let sealed = self.auth.layer_encrypt(&order, cell).await?;
        let reply = self.send_cell(first, sealed).await?;
        self.auth.layer_decrypt(&order, &reply).await
    }

    async fn send_cell(&self, first: &HopLink, data: Vec<u8>) -> Result<Vec<u8>, OnionError> {
        let cell = Message::OnionTunnelData(TunnelData {
            tunnel_id: first.link_id,
            data,
        });
        expect_cell(self.peer_request(first.address, &cell).await?)
    }

    /// Layer `payload` for the tunnel and hand it to the first hop.
    ///
    /// Returns the destination's reply, still layered.
    pub async fn send_through_tunnel(
        &self,
        tunnel_id: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, OnionError> {
        let tunnel = self
            .tunnels
            .get(tunnel_id)
            .ok_or(OnionError::TunnelNotFound(tunnel_id))?;
        let first = tunnel.first_hop().ok_or(OnionError::EmptyHopChain)?;

        let inner = Message::OnionTunnelData(TunnelData {
            tunnel_id: UNASSIGNED_ID,
            data: payload.to_vec(),
        })
        .to_vec()?;
        let sealed = self.auth.layer_encrypt(&tunnel.layer_order(), &inner).await?;
        self.send_cell(first, sealed).await
    }

    /// Remove the tunnel's layers from `payload`.
    pub async fn receive_through_tunnel(
        &self,
        tunnel_id: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, OnionError> {
        let tunnel = self
            .tunnels
            .get(tunnel_id)
            .ok_or(OnionError::TunnelNotFound(tunnel_id))?;
        self.auth.layer_decrypt(&tunnel.layer_order(), payload).await
    }

    /// Close every hop session and forget the tunnel.
    pub async fn teardown_tunnel(&self, tunnel_id: u32) -> Result<(), OnionError> {
        let tunnel = self
            .tunnels
            .remove(tunnel_id)
            .ok_or(OnionError::TunnelNotFound(tunnel_id))?;
        self.release(&tunnel.hops, tunnel.mode).await;
        info!("Tunnel {} torn down", tunnel_id);
        Ok(())
    }

    /// Tell hops to drop their links, then close our side of each session.
    async fn release(&self, hops: &[HopLink], mode: TunnelMode) {
        let notify: &[HopLink] = match mode {
            TunnelMode::Direct => hops,
            TunnelMode::Relayed => hops.get(..1).unwrap_or(&[]),
        };
        for hop in notify {
            self.send_destroy(hop.address, hop.link_id).await;
        }
        for hop in hops {
            self.close_local(hop.session_id).await;
            self.directory.forget_peer(&hop.identity);
        }
    }

    async fn close_local(&self, session_id: u32) {
        self.directory.forget_session(session_id);
        if let Err(e) = self.auth.close_session(session_id).await {
            debug!("Failed to close session {}: {}", session_id, e);
        }
    }

    async fn send_destroy(&self, address: SocketAddr, link_id: u32) {
        let destroy = Message::OnionTunnelDestroy(TunnelDestroy { tunnel_id: link_id });
        let sent = tokio::time::timeout(
            self.settings.hop_timeout,
            self.transport.send(address, &destroy),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Destroy for link {} at {} failed: {}", link_id, address, e),
            Err(_) => debug!("Destroy for link {} at {} timed out", link_id, address),
        }
    }

    /// One request to a remote peer, bounded by the hop timeout.
    async fn peer_request(
        &self,
        address: SocketAddr,
        message: &Message,
    ) -> Result<Message, OnionError> {
        let timeout = self.settings.hop_timeout;
        match tokio::time::timeout(timeout, self.transport.request(address, message)).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(WireError::Timeout(timeout).into()),
        }
    }

    // Hop side.

    /// Answer a peer's handshake-1 and remember the new link.
    pub async fn accept_handshake(
        &self,
        incoming: IncomingHs1,
    ) -> Result<SessionHandshake, OnionError> {
        let peer = Identity::of(&incoming.hostkey);
        let hs2 = self.auth.accept(incoming).await?;
        self.links.insert(hs2.session_id, peer);
        self.directory.bind_session(hs2.session_id, peer);
        debug!("Accepted link {} from {:?}", hs2.session_id, peer);
        Ok(hs2)
    }

    /// Peel one layer from a cell addressed to `link_id` and act on it.
    ///
    /// The reply is wrapped in this hop's layer before it is returned.
    pub async fn handle_cell(&self, link_id: u32, data: &[u8]) -> Result<Vec<u8>, OnionError> {
        let link = self
            .links
            .get(link_id)
            .ok_or(OnionError::LinkNotFound(link_id))?;
        let peeled = self.auth.layer_decrypt(&[link_id], data).await?;

        let reply = match link.downstream {
            Some(downstream) => {
                let cell = Message::OnionTunnelData(TunnelData {
                    tunnel_id: downstream.link_id,
                    data: peeled,
                });
                expect_cell(self.peer_request(downstream.address, &cell).await?)?
            }
            None => self.execute(link_id, link, &peeled).await?,
        };
        self.auth.layer_encrypt(&[link_id], &reply).await
    }

    /// Run the command found at the end of the chain.
    async fn execute(&self, link_id: u32, link: Link, command: &[u8]) -> Result<Vec<u8>, OnionError> {
        match Message::decode(command)? {
            Message::OnionTunnelExtend(extend) => self.extend_link(link_id, extend).await,
            Message::OnionTunnelData(data) if data.tunnel_id == UNASSIGNED_ID => {
                self.sink.deliver(link_id, link.peer, data.data).await
            }
            other => Err(OnionError::UnexpectedCommand(other.message_type())),
        }
    }

    async fn extend_link(&self, link_id: u32, extend: TunnelExtend) -> Result<Vec<u8>, OnionError> {
        let incoming = match Message::decode(&extend.incoming_hs1)? {
            message @ Message::AuthSessionIncomingHs1(_) => message,
            other => return Err(OnionError::UnexpectedCommand(other.message_type())),
        };
        let hs2 = expect_hs2(self.peer_request(extend.next_hop, &incoming).await?)?;
        let downstream = Downstream {
            address: extend.next_hop,
            link_id: hs2.session_id,
        };

        if let Err(e) = self.links.set_downstream(link_id, downstream) {
            // The new hop already holds a session; let it go.
            self.send_destroy(downstream.address, downstream.link_id).await;
            return Err(e);
        }
        debug!(
            "Link {} extended to {} (link {})",
            link_id, downstream.address, downstream.link_id
        );
        Ok(Message::AuthSessionHs2(hs2).to_vec()?)
    }

    /// Drop a link, close its session and pass the destroy downstream.
    pub async fn handle_destroy(&self, link_id: u32) {
        let Some(link) = self.links.remove(link_id) else {
            debug!("Destroy for unknown link {}", link_id);
            return;
        };
        self.close_local(link_id).await;
        if let Some(downstream) = link.downstream {
            self.send_destroy(downstream.address, downstream.link_id)
                .await;
        }
        debug!("Link {} destroyed", link_id);
    }
}

fn expect_hs2(reply: Message) -> Result<SessionHandshake, OnionError> {
    match reply {
        Message::AuthSessionHs2(hs2) => Ok(hs2),
        other => Err(OnionError::unexpected(
            MessageType::AuthSessionIncomingHs1,
            &other,
        )),
    }
}

fn expect_cell(reply: Message) -> Result<Vec<u8>, OnionError> {
    match reply {
        Message::OnionTunnelData(cell) => Ok(cell.data),
        other => Err(OnionError::unexpected(MessageType::OnionTunnelData, &other)),
    }
}
