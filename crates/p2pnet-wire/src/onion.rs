//! Onion API and P2P payloads (560-567).

use std::net::SocketAddr;

use bytes::{Buf, BufMut, BytesMut};

use crate::message::{ensure_exact, ensure_len, get_ip, put_ip, Payload, IP_ADDR_LEN};
use crate::WireError;

/// `ONION_TUNNEL_BUILD`: build a tunnel to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelBuild {
    pub destination: SocketAddr,
    pub destination_hostkey: Vec<u8>,
}

impl Payload for TunnelBuild {
    const MIN_LEN: usize = 4 + IP_ADDR_LEN;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(0);
        buf.put_u16(self.destination.port());
        put_ip(buf, self.destination.ip());
        buf.put_slice(&self.destination_hostkey);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let _reserved = buf.get_u16();
        let port = buf.get_u16();
        let ip = get_ip(&mut buf);
        Ok(Self {
            destination: SocketAddr::new(ip, port),
            destination_hostkey: buf.to_vec(),
        })
    }
}

/// `ONION_TUNNEL_READY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelReady {
    pub tunnel_id: u32,
    pub destination_hostkey: Vec<u8>,
}

impl Payload for TunnelReady {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.tunnel_id);
        buf.put_slice(&self.destination_hostkey);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let tunnel_id = buf.get_u32();
        Ok(Self {
            tunnel_id,
            destination_hostkey: buf.to_vec(),
        })
    }
}

/// `ONION_TUNNEL_INCOMING`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelIncoming {
    pub tunnel_id: u32,
    pub source_hostkey: Vec<u8>,
}

impl Payload for TunnelIncoming {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.tunnel_id);
        buf.put_slice(&self.source_hostkey);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let tunnel_id = buf.get_u32();
        Ok(Self {
            tunnel_id,
            source_hostkey: buf.to_vec(),
        })
    }
}

/// `ONION_TUNNEL_DESTROY`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelDestroy {
    pub tunnel_id: u32,
}

impl Payload for TunnelDestroy {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.tunnel_id);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_exact(buf, Self::MIN_LEN)?;
        Ok(Self {
            tunnel_id: buf.get_u32(),
        })
    }
}

/// `ONION_TUNNEL_DATA`
///
/// Between peers `tunnel_id` carries the receiving hop's link id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelData {
    pub tunnel_id: u32,
    pub data: Vec<u8>,
}

impl Payload for TunnelData {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.tunnel_id);
        buf.put_slice(&self.data);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let tunnel_id = buf.get_u32();
        Ok(Self {
            tunnel_id,
            data: buf.to_vec(),
        })
    }
}

/// `ONION_ERROR`: the request of type `request_type` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelError {
    pub request_type: u16,
    pub tunnel_id: u32,
}

impl Payload for TunnelError {
    const MIN_LEN: usize = 8;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.request_type);
        buf.put_u16(0);
        buf.put_u32(self.tunnel_id);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_exact(buf, Self::MIN_LEN)?;
        let request_type = buf.get_u16();
        let _reserved = buf.get_u16();
        Ok(Self {
            request_type,
            tunnel_id: buf.get_u32(),
        })
    }
}

/// `ONION_COVER`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cover {
    pub cover_size: u16,
}

impl Payload for Cover {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.cover_size);
        buf.put_u16(0);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_exact(buf, Self::MIN_LEN)?;
        Ok(Self {
            cover_size: buf.get_u16(),
        })
    }
}

/// `ONION_TUNNEL_EXTEND`: ask the last hop of a relayed tunnel to pass a
/// handshake on to `next_hop`.
///
/// Only ever travels inside an encrypted cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelExtend {
    pub next_hop: SocketAddr,
    /// An encoded `AUTH_SESSION_INCOMING_HS1` message.
    pub incoming_hs1: Vec<u8>,
}

impl Payload for TunnelExtend {
    const MIN_LEN: usize = 4 + IP_ADDR_LEN;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(0);
        buf.put_u16(self.next_hop.port());
        put_ip(buf, self.next_hop.ip());
        buf.put_slice(&self.incoming_hs1);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let _reserved = buf.get_u16();
        let port = buf.get_u16();
        let ip = get_ip(&mut buf);
        Ok(Self {
            next_hop: SocketAddr::new(ip, port),
            incoming_hs1: buf.to_vec(),
        })
    }
}
