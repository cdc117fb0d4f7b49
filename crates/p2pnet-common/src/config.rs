//! Node configuration.
//!
//! Loaded from a TOML file. Every key is optional; missing keys fall back to
//! the defaults below so an empty file yields a working local node.
//!
//! ```toml
//! hostkey = "hostkey.pem"
//!
//! [auth]
//! api_address = "127.0.0.1:7005"
//! session_idle_timeout_secs = 600
//!
//! [onion]
//! api_address = "127.0.0.1:7004"
//! p2p_address = "127.0.0.1:7014"
//! hop_count = 2
//! mode = "relayed"
//!
//! [rps]
//! api_address = "127.0.0.1:7003"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::ids::DEFAULT_MAX_ID_ATTEMPTS;

pub const DEFAULT_HOSTKEY_PATH: &str = "hostkey.pem";
pub const DEFAULT_AUTH_API_ADDRESS: &str = "127.0.0.1:7005";
pub const DEFAULT_ONION_API_ADDRESS: &str = "127.0.0.1:7004";
pub const DEFAULT_ONION_P2P_ADDRESS: &str = "127.0.0.1:7014";
pub const DEFAULT_HOP_COUNT: usize = 2;
pub const DEFAULT_HOP_TIMEOUT_MS: u64 = 5_000;

/// How hop sessions of a tunnel are negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// Every hop is handshaken directly by the tunnel owner.
    #[default]
    Direct,
    /// Hops past the first are reached through the already built part of
    /// the tunnel; each hop only learns its neighbours.
    Relayed,
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PEM file holding the node's RSA private key.
    pub hostkey: PathBuf,
    pub auth: AuthConfig,
    pub onion: OnionConfig,
    pub rps: RpsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostkey: PathBuf::from(DEFAULT_HOSTKEY_PATH),
            auth: AuthConfig::default(),
            onion: OnionConfig::default(),
            rps: RpsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Address of the Auth API used by local modules.
    pub api_address: SocketAddr,
    /// Random draws per session id allocation.
    pub max_id_attempts: usize,
    /// Close sessions idle for longer than this. Unset means never.
    pub session_idle_timeout_secs: Option<u64>,
}

impl AuthConfig {
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        self.session_idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_address: parse_default(DEFAULT_AUTH_API_ADDRESS),
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
            session_idle_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnionConfig {
    /// Address of the Onion API used by local clients.
    pub api_address: SocketAddr,
    /// Address remote peers connect to.
    pub p2p_address: SocketAddr,
    /// Intermediate hops sampled from RPS in front of the destination.
    pub hop_count: usize,
    pub mode: TunnelMode,
    /// Deadline for a single hop exchange.
    pub hop_timeout_ms: u64,
    /// Random draws per tunnel id allocation.
    pub max_id_attempts: usize,
}

impl OnionConfig {
    pub fn hop_timeout(&self) -> Duration {
        Duration::from_millis(self.hop_timeout_ms)
    }
}

impl Default for OnionConfig {
    fn default() -> Self {
        Self {
            api_address: parse_default(DEFAULT_ONION_API_ADDRESS),
            p2p_address: parse_default(DEFAULT_ONION_P2P_ADDRESS),
            hop_count: DEFAULT_HOP_COUNT,
            mode: TunnelMode::Direct,
            hop_timeout_ms: DEFAULT_HOP_TIMEOUT_MS,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpsConfig {
    /// RPS API address. Without it tunnels go straight to the destination.
    pub api_address: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(Error::config)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.auth.max_id_attempts == 0 || self.onion.max_id_attempts == 0 {
            return Err(Error::config("max_id_attempts must be at least 1"));
        }
        if self.onion.hop_timeout_ms == 0 {
            return Err(Error::config("onion.hop_timeout_ms must be positive"));
        }
        if self.auth.session_idle_timeout_secs == Some(0) {
            return Err(Error::config(
                "auth.session_idle_timeout_secs must be positive when set",
            ));
        }
        Ok(())
    }
}

fn parse_default(addr: &str) -> SocketAddr {
    addr.parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 0)))
}
