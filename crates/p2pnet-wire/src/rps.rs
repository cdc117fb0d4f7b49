//! RPS payloads (540-541).

use std::net::SocketAddr;

use bytes::{Buf, BufMut, BytesMut};

use crate::message::{ensure_len, get_ip, put_ip, Payload, IP_ADDR_LEN};
use crate::WireError;

/// `RPS_PEER`: one randomly sampled peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpsPeer {
    /// The peer's Onion P2P address.
    pub address: SocketAddr,
    pub hostkey: Vec<u8>,
}

impl Payload for RpsPeer {
    const MIN_LEN: usize = 4 + IP_ADDR_LEN;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.address.port());
        buf.put_u16(0);
        put_ip(buf, self.address.ip());
        buf.put_slice(&self.hostkey);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let port = buf.get_u16();
        let _reserved = buf.get_u16();
        let ip = get_ip(&mut buf);
        Ok(Self {
            address: SocketAddr::new(ip, port),
            hostkey: buf.to_vec(),
        })
    }
}
