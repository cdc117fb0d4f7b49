//! Auth API payloads (600-609) and handshake payloads (700-703).

use bytes::{Buf, BufMut, BytesMut};

use crate::message::{ensure_exact, ensure_len, Message, Payload};
use crate::WireError;

/// `AUTH_SESSION_START`: begin a session with the holder of `hostkey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    /// DER-encoded public key of the peer.
    pub hostkey: Vec<u8>,
}

impl Payload for SessionStart {
    const MIN_LEN: usize = 0;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_slice(&self.hostkey);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            hostkey: buf.to_vec(),
        })
    }
}

/// Session id plus an embedded handshake message.
///
/// Shared by `AUTH_SESSION_HS1`, `AUTH_SESSION_HS2` and
/// `AUTH_SESSION_INCOMING_HS2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandshake {
    pub session_id: u32,
    /// An encoded `AUTH_HANDSHAKE1` or `AUTH_HANDSHAKE2` message.
    pub handshake: Vec<u8>,
}

impl SessionHandshake {
    pub fn new(session_id: u32, handshake: &Message) -> Result<Self, WireError> {
        Ok(Self {
            session_id,
            handshake: handshake.to_vec()?,
        })
    }

    /// Decode the embedded handshake-1.
    pub fn handshake1(&self) -> Result<Handshake1, WireError> {
        match Message::decode(&self.handshake)? {
            Message::AuthHandshake1(hs) => Ok(hs),
            other => Err(unexpected_embedded(&other, "AUTH_HANDSHAKE1")),
        }
    }

    /// Decode the embedded handshake-2.
    pub fn handshake2(&self) -> Result<Handshake2, WireError> {
        match Message::decode(&self.handshake)? {
            Message::AuthHandshake2(hs) => Ok(hs),
            other => Err(unexpected_embedded(&other, "AUTH_HANDSHAKE2")),
        }
    }
}

impl Payload for SessionHandshake {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.session_id);
        buf.put_slice(&self.handshake);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let session_id = buf.get_u32();
        Ok(Self {
            session_id,
            handshake: buf.to_vec(),
        })
    }
}

/// `AUTH_SESSION_INCOMING_HS1`: a handshake-1 from the peer owning `hostkey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingHs1 {
    pub hostkey: Vec<u8>,
    /// An encoded `AUTH_HANDSHAKE1` message.
    pub handshake: Vec<u8>,
}

impl IncomingHs1 {
    pub fn handshake1(&self) -> Result<Handshake1, WireError> {
        match Message::decode(&self.handshake)? {
            Message::AuthHandshake1(hs) => Ok(hs),
            other => Err(unexpected_embedded(&other, "AUTH_HANDSHAKE1")),
        }
    }
}

impl Payload for IncomingHs1 {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let hostkey_len = u16::try_from(self.hostkey.len())
            .map_err(|_| WireError::PayloadTooLarge(self.hostkey.len()))?;
        buf.put_u16(0);
        buf.put_u16(hostkey_len);
        buf.put_slice(&self.hostkey);
        buf.put_slice(&self.handshake);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let total = buf.len();
        let _reserved = buf.get_u16();
        let hostkey_len = usize::from(buf.get_u16());
        if buf.len() < hostkey_len {
            return Err(WireError::TooShort(total, Self::MIN_LEN + hostkey_len));
        }
        let hostkey = buf[..hostkey_len].to_vec();
        buf.advance(hostkey_len);
        Ok(Self {
            hostkey,
            handshake: buf.to_vec(),
        })
    }
}

/// Layer-count-prefixed request shared by `AUTH_LAYER_ENCRYPT` and
/// `AUTH_LAYER_DECRYPT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRequest {
    /// Echoed in the response so callers can match replies.
    pub request_id: u16,
    /// Sessions in layer order.
    pub session_ids: Vec<u32>,
    pub payload: Vec<u8>,
}

impl Payload for LayerRequest {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let layers = u8::try_from(self.session_ids.len()).map_err(|_| {
            WireError::Malformed(format!("{} layers exceed 255", self.session_ids.len()))
        })?;
        buf.put_u8(layers);
        buf.put_u8(0);
        buf.put_u16(self.request_id);
        for id in &self.session_ids {
            buf.put_u32(*id);
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let total = buf.len();
        let layers = usize::from(buf.get_u8());
        let _reserved = buf.get_u8();
        let request_id = buf.get_u16();
        if buf.len() < layers * 4 {
            return Err(WireError::TooShort(total, Self::MIN_LEN + layers * 4));
        }
        let session_ids = (0..layers).map(|_| buf.get_u32()).collect();
        Ok(Self {
            request_id,
            session_ids,
            payload: buf.to_vec(),
        })
    }
}

/// Response shared by `AUTH_LAYER_ENCRYPT_RESP` and `AUTH_LAYER_DECRYPT_RESP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerResponse {
    pub request_id: u16,
    pub payload: Vec<u8>,
}

impl Payload for LayerResponse {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.request_id);
        buf.put_u16(0);
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let request_id = buf.get_u16();
        let _reserved = buf.get_u16();
        Ok(Self {
            request_id,
            payload: buf.to_vec(),
        })
    }
}

/// `AUTH_SESSION_CLOSE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClose {
    pub session_id: u32,
}

impl Payload for SessionClose {
    const MIN_LEN: usize = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.session_id);
        Ok(())
    }

    fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_exact(buf, Self::MIN_LEN)?;
        Ok(Self {
            session_id: buf.get_u32(),
        })
    }
}

/// `AUTH_HANDSHAKE1`: session key and initiator MAC key, each RSA-encrypted
/// under the responder's hostkey.
///
/// Both halves are one RSA block, so the block size is half the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake1 {
    pub encrypted_key: Vec<u8>,
    pub encrypted_hmac: Vec<u8>,
}

impl Handshake1 {
    /// Ciphertext block size implied by this message.
    pub fn block_size(&self) -> usize {
        self.encrypted_key.len()
    }
}

impl Payload for Handshake1 {
    const MIN_LEN: usize = 2;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.encrypted_key.len() != self.encrypted_hmac.len() {
            return Err(WireError::Malformed(format!(
                "handshake blocks differ in size: {} and {}",
                self.encrypted_key.len(),
                self.encrypted_hmac.len()
            )));
        }
        buf.put_slice(&self.encrypted_key);
        buf.put_slice(&self.encrypted_hmac);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        if buf.len() % 2 != 0 {
            return Err(WireError::Malformed(format!(
                "handshake-1 payload of {} bytes is not two equal blocks",
                buf.len()
            )));
        }
        let (key, hmac) = buf.split_at(buf.len() / 2);
        Ok(Self {
            encrypted_key: key.to_vec(),
            encrypted_hmac: hmac.to_vec(),
        })
    }
}

/// `AUTH_HANDSHAKE2`: responder MAC key, RSA-encrypted under the initiator's
/// hostkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake2 {
    pub encrypted_hmac: Vec<u8>,
}

impl Payload for Handshake2 {
    const MIN_LEN: usize = 1;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_slice(&self.encrypted_hmac);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(buf, Self::MIN_LEN)?;
        Ok(Self {
            encrypted_hmac: buf.to_vec(),
        })
    }
}

fn unexpected_embedded(found: &Message, expected: &str) -> WireError {
    WireError::Malformed(format!(
        "expected embedded {}, found {}",
        expected,
        found.message_type()
    ))
}
