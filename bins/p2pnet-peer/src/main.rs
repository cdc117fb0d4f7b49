#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use p2pnet_auth::{AuthService, SessionRegistry};
use p2pnet_common::{Config, IdAllocator, PeerDirectory};
use p2pnet_crypto::HostKeypair;
use p2pnet_onion::{
    AuthClient, ChannelSink, Onion, OnionApi, OnionP2p, OnionSettings, PeerSampler, RpsSampler,
};
use p2pnet_wire::{serve, Handler, TcpTransport, Transport};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{info, warn};

/// How often idle sessions are looked for when expiry is enabled.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "p2pnet-peer")]
#[command(about = "p2pnet node: Auth module plus Onion API and P2P endpoints")]
struct Args {
    /// Node configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "P2PNET_CONFIG")]
    config: Option<PathBuf>,

    /// Hostkey PEM file, overriding the configured path
    #[arg(long, env = "P2PNET_HOSTKEY")]
    hostkey: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

async fn bind(address: SocketAddr, what: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {} on {}", what, address))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    p2pnet_common::init_tracing_with_default(&args.log_level);

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(hostkey) = args.hostkey {
        config.hostkey = hostkey;
    }

    let keypair = Arc::new(
        HostKeypair::load(&config.hostkey)
            .with_context(|| format!("failed to load hostkey {}", config.hostkey.display()))?,
    );
    info!("Node identity {}", keypair.identity());

    let directory = Arc::new(PeerDirectory::new());
    let registry = Arc::new(
        SessionRegistry::with_allocator(
            keypair.clone(),
            IdAllocator::new(config.auth.max_id_attempts),
        )
        .with_directory(directory.clone()),
    );

    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(config.onion.hop_timeout()));
    let (sink, mut deliveries) = ChannelSink::new(64);
    let onion = Arc::new(
        Onion::new(
            keypair.hostkey().to_vec(),
            AuthClient::new(transport.clone(), config.auth.api_address),
            transport.clone(),
            Arc::new(sink),
            OnionSettings::from_config(&config.onion),
        )
        .with_directory(directory),
    );

    let sampler = config.rps.api_address.map(|address| {
        info!("Sampling intermediate hops from RPS at {}", address);
        Arc::new(RpsSampler::new(transport.clone(), address)) as Arc<dyn PeerSampler>
    });
    if sampler.is_none() {
        warn!("No RPS configured; tunnels will go straight to their destination");
    }

    let endpoints: [(SocketAddr, &str, Arc<dyn Handler>); 3] = [
        (
            config.auth.api_address,
            "Auth API",
            Arc::new(AuthService::new(registry.clone())),
        ),
        (
            config.onion.api_address,
            "Onion API",
            Arc::new(OnionApi::new(
                onion.clone(),
                sampler,
                config.onion.hop_count,
            )),
        ),
        (
            config.onion.p2p_address,
            "Onion P2P",
            Arc::new(OnionP2p::new(onion.clone())),
        ),
    ];

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = JoinSet::new();
    for (address, what, handler) in endpoints {
        let listener = bind(address, what).await?;
        info!("{} on {}", what, address);
        servers.spawn(serve(listener, handler, shutdown_rx.clone()));
    }

    let idle_timeout = config.auth.session_idle_timeout();
    let mut sweep = time::interval(EXPIRY_SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            Some(delivery) = deliveries.recv() => {
                info!(
                    "Received {} bytes on link {} from {}",
                    delivery.payload.len(),
                    delivery.link_id,
                    delivery.source
                );
            }
            _ = sweep.tick(), if idle_timeout.is_some() => {
                if let Some(max_idle) = idle_timeout {
                    registry.expire_idle(max_idle);
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(finished) = servers.join_next().await {
        match finished {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Server stopped with error: {}", e),
            Err(e) => warn!("Server task failed: {}", e),
        }
    }
    Ok(())
}
