//! Message-type registry.

use crate::WireError;

/// Every message type this codec can decode.
///
/// Gossip (500-503) and NSE (520-521) identifiers belong to modules the
/// node never talks to and decode as [`WireError::UnknownType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    RpsQuery = 540,
    RpsPeer = 541,

    OnionTunnelBuild = 560,
    OnionTunnelReady = 561,
    OnionTunnelIncoming = 562,
    OnionTunnelDestroy = 563,
    OnionTunnelData = 564,
    OnionError = 565,
    OnionCover = 566,
    OnionTunnelExtend = 567,

    AuthSessionStart = 600,
    AuthSessionHs1 = 601,
    AuthSessionIncomingHs1 = 602,
    AuthSessionHs2 = 603,
    AuthSessionIncomingHs2 = 604,
    AuthLayerEncrypt = 605,
    AuthLayerEncryptResp = 606,
    AuthLayerDecrypt = 607,
    AuthLayerDecryptResp = 608,
    AuthSessionClose = 609,

    AuthHandshake1 = 700,
    AuthHandshake2 = 701,
    AuthSessionConfirmed = 702,
    AuthSessionDeclined = 703,
}

impl MessageType {
    /// All registered types, in identifier order.
    pub const ALL: [MessageType; 24] = [
        Self::RpsQuery,
        Self::RpsPeer,
        Self::OnionTunnelBuild,
        Self::OnionTunnelReady,
        Self::OnionTunnelIncoming,
        Self::OnionTunnelDestroy,
        Self::OnionTunnelData,
        Self::OnionError,
        Self::OnionCover,
        Self::OnionTunnelExtend,
        Self::AuthSessionStart,
        Self::AuthSessionHs1,
        Self::AuthSessionIncomingHs1,
        Self::AuthSessionHs2,
        Self::AuthSessionIncomingHs2,
        Self::AuthLayerEncrypt,
        Self::AuthLayerEncryptResp,
        Self::AuthLayerDecrypt,
        Self::AuthLayerDecryptResp,
        Self::AuthSessionClose,
        Self::AuthHandshake1,
        Self::AuthHandshake2,
        Self::AuthSessionConfirmed,
        Self::AuthSessionDeclined,
    ];

    /// Protocol name as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::RpsQuery => "RPS_QUERY",
            Self::RpsPeer => "RPS_PEER",
            Self::OnionTunnelBuild => "ONION_TUNNEL_BUILD",
            Self::OnionTunnelReady => "ONION_TUNNEL_READY",
            Self::OnionTunnelIncoming => "ONION_TUNNEL_INCOMING",
            Self::OnionTunnelDestroy => "ONION_TUNNEL_DESTROY",
            Self::OnionTunnelData => "ONION_TUNNEL_DATA",
            Self::OnionError => "ONION_ERROR",
            Self::OnionCover => "ONION_COVER",
            Self::OnionTunnelExtend => "ONION_TUNNEL_EXTEND",
            Self::AuthSessionStart => "AUTH_SESSION_START",
            Self::AuthSessionHs1 => "AUTH_SESSION_HS1",
            Self::AuthSessionIncomingHs1 => "AUTH_SESSION_INCOMING_HS1",
            Self::AuthSessionHs2 => "AUTH_SESSION_HS2",
            Self::AuthSessionIncomingHs2 => "AUTH_SESSION_INCOMING_HS2",
            Self::AuthLayerEncrypt => "AUTH_LAYER_ENCRYPT",
            Self::AuthLayerEncryptResp => "AUTH_LAYER_ENCRYPT_RESP",
            Self::AuthLayerDecrypt => "AUTH_LAYER_DECRYPT",
            Self::AuthLayerDecryptResp => "AUTH_LAYER_DECRYPT_RESP",
            Self::AuthSessionClose => "AUTH_SESSION_CLOSE",
            Self::AuthHandshake1 => "AUTH_HANDSHAKE1",
            Self::AuthHandshake2 => "AUTH_HANDSHAKE2",
            Self::AuthSessionConfirmed => "AUTH_SESSION_CONFIRMED",
            Self::AuthSessionDeclined => "AUTH_SESSION_DECLINED",
        }
    }
}

impl TryFrom<u16> for MessageType {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| *ty as u16 == value)
            .ok_or(WireError::UnknownType(value))
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), *self as u16)
    }
}
