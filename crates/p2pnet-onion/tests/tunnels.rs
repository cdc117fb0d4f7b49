//! Tunnels across several in-process nodes, each running its own Auth
//! module and Onion P2P handler on a shared `LocalTransport`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use p2pnet_auth::{AuthService, SessionRegistry};
use p2pnet_common::{Identity, TunnelMode};
use p2pnet_crypto::HostKeypair;
use p2pnet_onion::{
    AuthClient, DataSink, Delivery, Hop, Onion, OnionApi, OnionError, OnionP2p, OnionSettings,
    PeerSampler,
};
use p2pnet_wire::onion::{Cover, TunnelBuild, TunnelData, TunnelDestroy, TunnelError};
use p2pnet_wire::{Handler, LocalTransport, Message, MessageType, Transport, WireError};

const NODES: usize = 5;

fn keypair(slot: usize) -> HostKeypair {
    static KEYS: OnceLock<Vec<HostKeypair>> = OnceLock::new();
    KEYS.get_or_init(|| {
        (0..NODES)
            .map(|_| HostKeypair::generate(1024).unwrap())
            .collect()
    })[slot]
        .clone()
}

/// Replies with the payload behind an `echo:` prefix and keeps a copy.
#[derive(Default)]
struct EchoSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl EchoSink {
    fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSink for EchoSink {
    async fn deliver(
        &self,
        link_id: u32,
        source: Identity,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, OnionError> {
        let reply = [b"echo:".as_slice(), payload.as_slice()].concat();
        self.deliveries.lock().unwrap().push(Delivery {
            link_id,
            source,
            payload,
        });
        Ok(reply)
    }
}

struct Node {
    keypair: HostKeypair,
    auth_addr: SocketAddr,
    p2p_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    onion: Arc<Onion>,
    sink: Arc<EchoSink>,
}

impl Node {
    fn hop(&self) -> Hop {
        Hop::new(self.p2p_addr, self.keypair.hostkey().to_vec())
    }
}

struct Testnet {
    transport: LocalTransport,
    nodes: Vec<Node>,
}

fn settings(mode: TunnelMode) -> OnionSettings {
    OnionSettings {
        mode,
        hop_timeout: Duration::from_secs(5),
        ..OnionSettings::default()
    }
}

impl Testnet {
    fn new(mode: TunnelMode) -> Self {
        Self::with_settings(settings(mode))
    }

    fn with_settings(settings: OnionSettings) -> Self {
        let transport = LocalTransport::new();
        let nodes = (0..NODES)
            .map(|slot| {
                let keypair = keypair(slot);
                let octet = slot as u8 + 1;
                let auth_addr = SocketAddr::from(([10, 0, 0, octet], 7005));
                let p2p_addr = SocketAddr::from(([10, 0, 0, octet], 7014));

                let registry = Arc::new(SessionRegistry::new(Arc::new(keypair.clone())));
                transport.register(auth_addr, Arc::new(AuthService::new(registry.clone())));

                let shared: Arc<dyn Transport> = Arc::new(transport.clone());
                let sink = Arc::new(EchoSink::default());
                let onion = Arc::new(Onion::new(
                    keypair.hostkey().to_vec(),
                    AuthClient::new(shared.clone(), auth_addr),
                    shared,
                    sink.clone(),
                    settings,
                ));
                transport.register(p2p_addr, Arc::new(OnionP2p::new(onion.clone())));

                Node {
                    keypair,
                    auth_addr,
                    p2p_addr,
                    registry,
                    onion,
                    sink,
                }
            })
            .collect();
        Self { transport, nodes }
    }

    fn hops(&self, slots: &[usize]) -> Vec<Hop> {
        slots.iter().map(|&slot| self.nodes[slot].hop()).collect()
    }

    fn assert_no_sessions(&self, slots: &[usize]) {
        for &slot in slots {
            assert!(
                self.nodes[slot].registry.is_empty(),
                "node {} still holds {} sessions",
                slot,
                self.nodes[slot].registry.len()
            );
            assert!(self.nodes[slot].onion.links().is_empty());
        }
    }
}

async fn round_trip(onion: &Onion, tunnel_id: u32, payload: &[u8]) -> Vec<u8> {
    let layered = onion.send_through_tunnel(tunnel_id, payload).await.unwrap();
    assert_ne!(layered, payload);
    onion
        .receive_through_tunnel(tunnel_id, &layered)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_relayed_three_hop_tunnel() {
    let net = Testnet::new(TunnelMode::Relayed);
    let owner = &net.nodes[0].onion;

    let tunnel_id = owner.build_tunnel(&net.hops(&[1, 2, 3])).await.unwrap();
    let tunnel = owner.tunnel(tunnel_id).unwrap();
    assert_eq!(tunnel.mode, TunnelMode::Relayed);
    assert_eq!(tunnel.hops.len(), 3);
    assert_eq!(tunnel.destination_hostkey, net.nodes[3].keypair.hostkey());
    assert_eq!(net.nodes[0].registry.len(), 3);

    // Each hop only knows its neighbours.
    let first = net.nodes[1].onion.links().get(tunnel.hops[0].link_id).unwrap();
    assert_eq!(first.downstream.unwrap().address, net.nodes[2].p2p_addr);
    let second = net.nodes[2].onion.links().get(tunnel.hops[1].link_id).unwrap();
    assert_eq!(second.downstream.unwrap().address, net.nodes[3].p2p_addr);
    let last = net.nodes[3].onion.links().get(tunnel.hops[2].link_id).unwrap();
    assert!(last.downstream.is_none());

    let reply = round_trip(owner, tunnel_id, b"through three hops").await;
    assert_eq!(reply, b"echo:through three hops");

    let deliveries = net.nodes[3].sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload, b"through three hops");
    assert_eq!(deliveries[0].link_id, tunnel.hops[2].link_id);
    assert_eq!(deliveries[0].source, net.nodes[0].keypair.identity());

    // Intermediate hops never see the payload.
    assert!(net.nodes[1].sink.deliveries().is_empty());
    assert!(net.nodes[2].sink.deliveries().is_empty());
}

#[tokio::test]
async fn test_direct_single_hop_round_trip() {
    let net = Testnet::new(TunnelMode::Direct);
    let owner = &net.nodes[0].onion;

    let tunnel_id = owner.build_tunnel(&net.hops(&[4])).await.unwrap();
    let destination = net.nodes[4].keypair.identity();
    assert_eq!(
        owner.directory().address_of(&destination),
        Some(net.nodes[4].p2p_addr)
    );

    let payloads: [&[u8]; 3] = [b"first", b"second", b""];
    for payload in payloads {
        let reply = round_trip(owner, tunnel_id, payload).await;
        assert_eq!(reply, [b"echo:".as_slice(), payload].concat());
    }
    assert_eq!(net.nodes[4].sink.deliveries().len(), 3);
}

#[tokio::test]
async fn test_direct_multi_hop_build_dials_every_hop() {
    let net = Testnet::new(TunnelMode::Direct);
    let owner = &net.nodes[0].onion;

    let tunnel_id = owner.build_tunnel(&net.hops(&[1, 2, 3])).await.unwrap();
    let tunnel = owner.tunnel(tunnel_id).unwrap();
    assert_eq!(tunnel.layer_order(), tunnel.session_ids());
    for (hop, slot) in tunnel.hops.iter().zip(1..) {
        let link = net.nodes[slot].onion.links().get(hop.link_id).unwrap();
        assert!(link.downstream.is_none());
        assert_eq!(link.peer, net.nodes[0].keypair.identity());
    }
}

#[tokio::test]
async fn test_direct_build_failure_rolls_back() {
    let net = Testnet::new(TunnelMode::Direct);
    net.transport.unregister(net.nodes[2].p2p_addr);
    let owner = &net.nodes[0].onion;

    match owner.build_tunnel(&net.hops(&[1, 2, 3])).await {
        Err(OnionError::TunnelBuildFailed { hop_index, cause }) => {
            assert_eq!(hop_index, 1);
            assert!(matches!(
                *cause,
                OnionError::Connection(WireError::ConnectionRefused(_))
            ));
        }
        other => panic!("expected TunnelBuildFailed, got {:?}", other),
    }

    assert!(owner.tunnels().is_empty());
    net.assert_no_sessions(&[0, 1, 3]);
}

#[tokio::test]
async fn test_relayed_build_failure_reports_hop() {
    let net = Testnet::new(TunnelMode::Relayed);
    net.transport.unregister(net.nodes[2].p2p_addr);
    let owner = &net.nodes[0].onion;

    match owner.build_tunnel(&net.hops(&[1, 2, 3])).await {
        Err(OnionError::TunnelBuildFailed { hop_index, cause }) => {
            assert_eq!(hop_index, 1);
            // The first hop could not reach the second and said so.
            assert!(matches!(
                *cause,
                OnionError::Remote {
                    request_type: 564,
                    ..
                }
            ));
        }
        other => panic!("expected TunnelBuildFailed, got {:?}", other),
    }

    assert!(owner.tunnels().is_empty());
    net.assert_no_sessions(&[0, 1, 3]);
}

#[tokio::test]
async fn test_empty_hop_chain() {
    let net = Testnet::new(TunnelMode::Direct);
    assert!(matches!(
        net.nodes[0].onion.build_tunnel(&[]).await,
        Err(OnionError::EmptyHopChain)
    ));
}

#[tokio::test]
async fn test_teardown_closes_every_session() {
    for mode in [TunnelMode::Direct, TunnelMode::Relayed] {
        let net = Testnet::new(mode);
        let owner = &net.nodes[0].onion;

        let tunnel_id = owner.build_tunnel(&net.hops(&[1, 2, 3])).await.unwrap();
        for slot in 1..=3 {
            assert_eq!(net.nodes[slot].registry.len(), 1);
        }

        owner.teardown_tunnel(tunnel_id).await.unwrap();
        net.assert_no_sessions(&[0, 1, 2, 3]);
        assert_eq!(owner.directory().session_count(), 0);
        assert_eq!(owner.directory().peer_count(), 0);
        for slot in 1..=3 {
            let identity = net.nodes[slot].keypair.identity();
            assert_eq!(owner.directory().address_of(&identity), None);
        }

        assert!(matches!(
            owner.send_through_tunnel(tunnel_id, b"late").await,
            Err(OnionError::TunnelNotFound(id)) if id == tunnel_id
        ));
        assert!(matches!(
            owner.teardown_tunnel(tunnel_id).await,
            Err(OnionError::TunnelNotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_teardown_keeps_peers_shared_with_other_tunnels() {
    let net = Testnet::new(TunnelMode::Direct);
    let owner = &net.nodes[0].onion;
    let shared = net.nodes[4].keypair.identity();

    let first = owner.build_tunnel(&net.hops(&[4])).await.unwrap();
    let second = owner.build_tunnel(&net.hops(&[4])).await.unwrap();

    owner.teardown_tunnel(first).await.unwrap();
    assert_eq!(
        owner.directory().address_of(&shared),
        Some(net.nodes[4].p2p_addr)
    );
    let reply = round_trip(owner, second, b"still here").await;
    assert_eq!(reply, b"echo:still here");

    owner.teardown_tunnel(second).await.unwrap();
    assert_eq!(owner.directory().address_of(&shared), None);
}

/// Auth module that refuses to confirm handshakes and serves everything
/// else normally.
struct DecliningConfirm {
    inner: AuthService,
}

#[async_trait]
impl Handler for DecliningConfirm {
    async fn handle(&self, message: Message, remote: SocketAddr) -> Option<Message> {
        match message {
            Message::AuthSessionIncomingHs2(_) => Some(Message::AuthSessionDeclined),
            other => self.inner.handle(other, remote).await,
        }
    }
}

#[tokio::test]
async fn test_declined_confirm_releases_hop_link() {
    let net = Testnet::new(TunnelMode::Direct);
    let owner = &net.nodes[0];
    net.transport.register(
        owner.auth_addr,
        Arc::new(DecliningConfirm {
            inner: AuthService::new(owner.registry.clone()),
        }),
    );

    match owner.onion.build_tunnel(&net.hops(&[1])).await {
        Err(OnionError::TunnelBuildFailed { hop_index, cause }) => {
            assert_eq!(hop_index, 0);
            assert!(matches!(
                *cause,
                OnionError::Declined(MessageType::AuthSessionIncomingHs2)
            ));
        }
        other => panic!("expected TunnelBuildFailed, got {:?}", other),
    }

    assert!(owner.onion.tunnels().is_empty());
    net.assert_no_sessions(&[0, 1]);
}

struct Stalled;

#[async_trait]
impl Handler for Stalled {
    async fn handle(&self, _message: Message, _remote: SocketAddr) -> Option<Message> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        None
    }
}

#[tokio::test]
async fn test_hop_timeout_fails_build() {
    let net = Testnet::with_settings(OnionSettings {
        hop_timeout: Duration::from_millis(200),
        ..settings(TunnelMode::Direct)
    });
    net.transport
        .register(net.nodes[1].p2p_addr, Arc::new(Stalled));
    let owner = &net.nodes[0].onion;

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        owner.build_tunnel(&net.hops(&[1])),
    )
    .await
    .expect("build should give up on its own");

    match result {
        Err(OnionError::TunnelBuildFailed { hop_index, cause }) => {
            assert_eq!(hop_index, 0);
            assert!(matches!(
                *cause,
                OnionError::Connection(WireError::Timeout(t)) if t == Duration::from_millis(200)
            ));
        }
        other => panic!("expected TunnelBuildFailed, got {:?}", other),
    }
    assert!(net.nodes[0].registry.is_empty());
}

#[tokio::test]
async fn test_hop_rejects_bad_cells() {
    let net = Testnet::new(TunnelMode::Direct);
    let tunnel_id = net.nodes[0]
        .onion
        .build_tunnel(&net.hops(&[1]))
        .await
        .unwrap();
    let link_id = net.nodes[0].onion.tunnel(tunnel_id).unwrap().hops[0].link_id;
    let hop = net.nodes[1].p2p_addr;

    let tampered = Message::OnionTunnelData(TunnelData {
        tunnel_id: link_id,
        data: vec![0u8; 64],
    });
    assert_eq!(
        net.transport.request(hop, &tampered).await.unwrap(),
        Message::OnionError(TunnelError {
            request_type: 564,
            tunnel_id: link_id,
        })
    );

    let unknown = Message::OnionTunnelData(TunnelData {
        tunnel_id: link_id.wrapping_add(1),
        data: vec![1, 2, 3],
    });
    assert!(matches!(
        net.transport.request(hop, &unknown).await.unwrap(),
        Message::OnionError(_)
    ));

    assert!(net.nodes[1].sink.deliveries().is_empty());
}

/// Hands out the configured peers in order.
struct FixedSampler {
    peers: Mutex<Vec<Hop>>,
}

#[async_trait]
impl PeerSampler for FixedSampler {
    async fn sample(&self) -> Result<Hop, OnionError> {
        let mut peers = self.peers.lock().unwrap();
        if peers.is_empty() {
            return Err(OnionError::Sampling("no peers left".into()));
        }
        Ok(peers.remove(0))
    }
}

fn api_remote() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

#[tokio::test]
async fn test_onion_api_lifecycle() {
    let net = Testnet::new(TunnelMode::Relayed);
    let sampler = Arc::new(FixedSampler {
        peers: Mutex::new(net.hops(&[1, 2])),
    });
    let api = OnionApi::new(net.nodes[0].onion.clone(), Some(sampler), 2);
    let destination = &net.nodes[3];

    let ready = api
        .handle(
            Message::OnionTunnelBuild(TunnelBuild {
                destination: destination.p2p_addr,
                destination_hostkey: destination.keypair.hostkey().to_vec(),
            }),
            api_remote(),
        )
        .await;
    let tunnel_id = match ready {
        Some(Message::OnionTunnelReady(ready)) => {
            assert_eq!(ready.destination_hostkey, destination.keypair.hostkey());
            ready.tunnel_id
        }
        other => panic!("expected READY, got {:?}", other),
    };
    assert_eq!(api.onion().tunnel(tunnel_id).unwrap().hops.len(), 3);

    let reply = api
        .handle(
            Message::OnionTunnelData(TunnelData {
                tunnel_id,
                data: b"via api".to_vec(),
            }),
            api_remote(),
        )
        .await;
    assert_eq!(
        reply,
        Some(Message::OnionTunnelData(TunnelData {
            tunnel_id,
            data: b"echo:via api".to_vec(),
        }))
    );

    let destroy = Message::OnionTunnelDestroy(TunnelDestroy { tunnel_id });
    assert_eq!(api.handle(destroy.clone(), api_remote()).await, None);
    assert_eq!(
        api.handle(destroy, api_remote()).await,
        Some(Message::OnionError(TunnelError {
            request_type: 563,
            tunnel_id,
        }))
    );
    net.assert_no_sessions(&[0, 1, 2, 3]);

    // The sampler is exhausted now.
    assert_eq!(
        api.handle(
            Message::OnionTunnelBuild(TunnelBuild {
                destination: destination.p2p_addr,
                destination_hostkey: destination.keypair.hostkey().to_vec(),
            }),
            api_remote(),
        )
        .await,
        Some(Message::OnionError(TunnelError {
            request_type: 560,
            tunnel_id: 0,
        }))
    );
}

#[tokio::test]
async fn test_onion_api_relays_multi_hop_tunnels_in_direct_mode() {
    let net = Testnet::new(TunnelMode::Direct);
    let sampler = Arc::new(FixedSampler {
        peers: Mutex::new(net.hops(&[1, 2])),
    });
    let api = OnionApi::new(net.nodes[0].onion.clone(), Some(sampler), 2);
    let destination = &net.nodes[3];

    let tunnel_id = match api
        .handle(
            Message::OnionTunnelBuild(TunnelBuild {
                destination: destination.p2p_addr,
                destination_hostkey: destination.keypair.hostkey().to_vec(),
            }),
            api_remote(),
        )
        .await
    {
        Some(Message::OnionTunnelReady(ready)) => ready.tunnel_id,
        other => panic!("expected READY, got {:?}", other),
    };
    let tunnel = api.onion().tunnel(tunnel_id).unwrap();
    assert_eq!(tunnel.mode, TunnelMode::Relayed);
    assert_eq!(tunnel.hops.len(), 3);

    let reply = api
        .handle(
            Message::OnionTunnelData(TunnelData {
                tunnel_id,
                data: b"three hops".to_vec(),
            }),
            api_remote(),
        )
        .await;
    assert_eq!(
        reply,
        Some(Message::OnionTunnelData(TunnelData {
            tunnel_id,
            data: b"echo:three hops".to_vec(),
        }))
    );
    assert_eq!(destination.sink.deliveries().len(), 1);
    assert!(net.nodes[1].sink.deliveries().is_empty());
}

#[tokio::test]
async fn test_onion_api_single_hop_keeps_configured_mode() {
    let net = Testnet::new(TunnelMode::Direct);
    let api = OnionApi::new(net.nodes[0].onion.clone(), None, 2);
    let destination = &net.nodes[2];

    let tunnel_id = match api
        .handle(
            Message::OnionTunnelBuild(TunnelBuild {
                destination: destination.p2p_addr,
                destination_hostkey: destination.keypair.hostkey().to_vec(),
            }),
            api_remote(),
        )
        .await
    {
        Some(Message::OnionTunnelReady(ready)) => ready.tunnel_id,
        other => panic!("expected READY, got {:?}", other),
    };
    let tunnel = api.onion().tunnel(tunnel_id).unwrap();
    assert_eq!(tunnel.mode, TunnelMode::Direct);
    assert_eq!(tunnel.hops.len(), 1);
}

#[tokio::test]
async fn test_onion_api_unsupported_requests() {
    let net = Testnet::new(TunnelMode::Direct);
    let api = OnionApi::new(net.nodes[0].onion.clone(), None, 2);

    assert_eq!(
        api.handle(Message::OnionCover(Cover { cover_size: 128 }), api_remote())
            .await,
        Some(Message::OnionError(TunnelError {
            request_type: 566,
            tunnel_id: 0,
        }))
    );
    assert_eq!(
        api.handle(
            Message::OnionTunnelData(TunnelData {
                tunnel_id: 77,
                data: vec![1],
            }),
            api_remote(),
        )
        .await,
        Some(Message::OnionError(TunnelError {
            request_type: 564,
            tunnel_id: 77,
        }))
    );
    assert_eq!(api.handle(Message::RpsQuery, api_remote()).await, None);
}
