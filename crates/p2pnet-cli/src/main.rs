//! p2pnet CLI tools: key generation, identities, tunnels against a running node.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use p2pnet_common::config::DEFAULT_ONION_API_ADDRESS;
use p2pnet_common::Identity;
use p2pnet_crypto::{read_hostkey_file, HostKeypair, DEFAULT_RSA_BITS};
use p2pnet_wire::onion::{TunnelBuild, TunnelData, TunnelDestroy};
use p2pnet_wire::{Message, TcpTransport, Transport};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "p2pnet")]
#[command(about = "p2pnet CLI tools")]
struct Args {
    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new RSA hostkey
    Keygen {
        /// Output file path (without extension)
        #[arg(short, long, default_value = "hostkey")]
        output: String,

        #[arg(long, default_value_t = DEFAULT_RSA_BITS)]
        bits: usize,
    },

    /// Show the identity of a hostkey (PEM private/public key or DER)
    ShowId {
        #[arg(short, long)]
        key: PathBuf,
    },

    /// Ask a node to build a tunnel to a destination
    BuildTunnel {
        /// Onion API of the local node
        #[arg(long, default_value = DEFAULT_ONION_API_ADDRESS)]
        api: SocketAddr,

        /// Destination P2P address (host:port)
        #[arg(short, long)]
        destination: SocketAddr,

        /// Destination hostkey file
        #[arg(long)]
        hostkey: PathBuf,
    },

    /// Send data through a tunnel and print the reply
    Send {
        #[arg(long, default_value = DEFAULT_ONION_API_ADDRESS)]
        api: SocketAddr,

        #[arg(short, long)]
        tunnel: u32,

        data: String,
    },

    /// Tear a tunnel down
    Destroy {
        #[arg(long, default_value = DEFAULT_ONION_API_ADDRESS)]
        api: SocketAddr,

        #[arg(short, long)]
        tunnel: u32,
    },

    /// Show version information
    Version,
}

/// Tunnel builds may take several hop timeouts.
const API_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    let args = Args::parse();
    p2pnet_common::init_tracing_with_default(&args.log_level);

    match args.command {
        Command::Keygen { output, bits } => {
            println!("Generating {}-bit RSA hostkey...", bits);

            let keypair = HostKeypair::generate(bits)?;
            let private_path = format!("{}.pem", output);
            let public_path = format!("{}.pub.pem", output);
            keypair.save(&private_path, &public_path)?;

            println!("Private key: {}", private_path);
            println!("Public key:  {}", public_path);
            println!("Identity:    {}", keypair.identity());
        }
        Command::ShowId { key } => {
            let hostkey = read_hostkey_file(&key)?;
            println!("{}", Identity::of(&hostkey));
        }
        Command::BuildTunnel {
            api,
            destination,
            hostkey,
        } => {
            let request = Message::OnionTunnelBuild(TunnelBuild {
                destination,
                destination_hostkey: read_hostkey_file(&hostkey)?,
            });
            match exchange(api, request)? {
                Message::OnionTunnelReady(ready) => {
                    println!("Tunnel {} ready", ready.tunnel_id);
                }
                other => bail!("tunnel build failed: {}", describe(&other)),
            }
        }
        Command::Send { api, tunnel, data } => {
            let request = Message::OnionTunnelData(TunnelData {
                tunnel_id: tunnel,
                data: data.into_bytes(),
            });
            match exchange(api, request)? {
                Message::OnionTunnelData(reply) => match String::from_utf8(reply.data) {
                    Ok(text) => println!("{}", text),
                    Err(e) => println!("{}", hex::encode(e.into_bytes())),
                },
                other => bail!("send failed: {}", describe(&other)),
            }
        }
        Command::Destroy { api, tunnel } => {
            let request = Message::OnionTunnelDestroy(TunnelDestroy { tunnel_id: tunnel });
            let rt = runtime()?;
            rt.block_on(TcpTransport::new(API_TIMEOUT).send(api, &request))?;
            println!("Destroy sent for tunnel {}", tunnel);
        }
        Command::Version => {
            println!("p2pnet {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// One request/reply with the node's Onion API.
fn exchange(api: SocketAddr, request: Message) -> Result<Message> {
    debug!("Sending {} to {}", request.message_type(), api);
    let rt = runtime()?;
    rt.block_on(TcpTransport::new(API_TIMEOUT).request(api, &request))
        .map_err(|e| anyhow!("Onion API at {} unreachable: {}", api, e))
}

fn describe(reply: &Message) -> String {
    match reply {
        Message::OnionError(e) => format!(
            "node reported error for request type {} on tunnel {}",
            e.request_type, e.tunnel_id
        ),
        other => format!("unexpected reply {}", other.message_type()),
    }
}
