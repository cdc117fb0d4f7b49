//! p2pnet Onion module.
//!
//! Builds tunnels out of pairwise Auth sessions and moves layered cells
//! through them. The module never touches key material itself: every
//! handshake and every layer operation is a request to the local Auth API.
//!
//! # Modes
//!
//! - **Direct**: the tunnel owner dials every hop itself.
//! - **Relayed**: only the first hop is dialed directly. Each further hop
//!   is reached by an `ONION_TUNNEL_EXTEND` cell sent through the part of
//!   the tunnel that already exists, so a hop only learns its neighbours.
//!
//! # Cells
//!
//! A cell is an `ONION_TUNNEL_DATA` whose `tunnel_id` is the link id the
//! receiving hop assigned to its session and whose data carries one layer
//! per remaining hop. A hop peels its layer and either forwards the rest
//! downstream or, at the end of the chain, executes the command inside.

#![forbid(unsafe_code)]

pub mod auth_client;
pub mod error;
pub mod links;
pub mod onion;
pub mod sampler;
pub mod service;
pub mod sink;
pub mod tunnel;

pub use auth_client::AuthClient;
pub use error::OnionError;
pub use links::{Downstream, Link, LinkTable};
pub use onion::{Onion, OnionSettings};
pub use sampler::{PeerSampler, RpsSampler};
pub use service::{OnionApi, OnionP2p};
pub use sink::{ChannelSink, DataSink, Delivery};
pub use tunnel::{Hop, HopLink, Tunnel, TunnelTable};
