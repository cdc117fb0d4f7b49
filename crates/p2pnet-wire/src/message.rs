//! The closed set of messages and their framing.

use std::net::{IpAddr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::auth::{
    Handshake1, Handshake2, IncomingHs1, LayerRequest, LayerResponse, SessionClose,
    SessionHandshake, SessionStart,
};
use crate::onion::{
    Cover, TunnelBuild, TunnelData, TunnelDestroy, TunnelError, TunnelExtend, TunnelIncoming,
    TunnelReady,
};
use crate::rps::RpsPeer;
use crate::types::MessageType;
use crate::{Header, WireError, HEADER_SIZE};

/// Binary layout of one message payload.
pub trait Payload: Sized {
    /// Smallest payload this type can decode from.
    const MIN_LEN: usize;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError>;

    fn decode(buf: &[u8]) -> Result<Self, WireError>;
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    RpsQuery,
    RpsPeer(RpsPeer),

    OnionTunnelBuild(TunnelBuild),
    OnionTunnelReady(TunnelReady),
    OnionTunnelIncoming(TunnelIncoming),
    OnionTunnelDestroy(TunnelDestroy),
    OnionTunnelData(TunnelData),
    OnionError(TunnelError),
    OnionCover(Cover),
    OnionTunnelExtend(TunnelExtend),

    AuthSessionStart(SessionStart),
    AuthSessionHs1(SessionHandshake),
    AuthSessionIncomingHs1(IncomingHs1),
    AuthSessionHs2(SessionHandshake),
    AuthSessionIncomingHs2(SessionHandshake),
    AuthLayerEncrypt(LayerRequest),
    AuthLayerEncryptResp(LayerResponse),
    AuthLayerDecrypt(LayerRequest),
    AuthLayerDecryptResp(LayerResponse),
    AuthSessionClose(SessionClose),

    AuthHandshake1(Handshake1),
    AuthHandshake2(Handshake2),
    AuthSessionConfirmed,
    AuthSessionDeclined,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::RpsQuery => MessageType::RpsQuery,
            Self::RpsPeer(_) => MessageType::RpsPeer,
            Self::OnionTunnelBuild(_) => MessageType::OnionTunnelBuild,
            Self::OnionTunnelReady(_) => MessageType::OnionTunnelReady,
            Self::OnionTunnelIncoming(_) => MessageType::OnionTunnelIncoming,
            Self::OnionTunnelDestroy(_) => MessageType::OnionTunnelDestroy,
            Self::OnionTunnelData(_) => MessageType::OnionTunnelData,
            Self::OnionError(_) => MessageType::OnionError,
            Self::OnionCover(_) => MessageType::OnionCover,
            Self::OnionTunnelExtend(_) => MessageType::OnionTunnelExtend,
            Self::AuthSessionStart(_) => MessageType::AuthSessionStart,
            Self::AuthSessionHs1(_) => MessageType::AuthSessionHs1,
            Self::AuthSessionIncomingHs1(_) => MessageType::AuthSessionIncomingHs1,
            Self::AuthSessionHs2(_) => MessageType::AuthSessionHs2,
            Self::AuthSessionIncomingHs2(_) => MessageType::AuthSessionIncomingHs2,
            Self::AuthLayerEncrypt(_) => MessageType::AuthLayerEncrypt,
            Self::AuthLayerEncryptResp(_) => MessageType::AuthLayerEncryptResp,
            Self::AuthLayerDecrypt(_) => MessageType::AuthLayerDecrypt,
            Self::AuthLayerDecryptResp(_) => MessageType::AuthLayerDecryptResp,
            Self::AuthSessionClose(_) => MessageType::AuthSessionClose,
            Self::AuthHandshake1(_) => MessageType::AuthHandshake1,
            Self::AuthHandshake2(_) => MessageType::AuthHandshake2,
            Self::AuthSessionConfirmed => MessageType::AuthSessionConfirmed,
            Self::AuthSessionDeclined => MessageType::AuthSessionDeclined,
        }
    }

    /// Encode header and payload into one frame.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut payload = BytesMut::new();
        self.encode_payload(&mut payload)?;

        let header = Header::new(self.message_type(), payload.len())?;
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        header.encode(&mut frame);
        frame.extend_from_slice(&payload);
        Ok(frame.freeze())
    }

    /// Encode into a plain byte vector, for embedding in another payload.
    pub fn to_vec(&self) -> Result<Vec<u8>, WireError> {
        Ok(self.encode()?.to_vec())
    }

    /// Decode exactly one frame occupying all of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = Header::decode(buf)?;
        let expected = usize::from(header.size);
        if buf.len() < expected {
            return Err(WireError::Truncated {
                expected,
                actual: buf.len(),
            });
        }
        if buf.len() > expected {
            return Err(WireError::Malformed(format!(
                "{} trailing bytes after frame",
                buf.len() - expected
            )));
        }
        Self::decode_payload(header.message_type, &buf[HEADER_SIZE..])
    }

    /// Decode a payload whose header has already been read.
    pub fn decode_payload(message_type: u16, payload: &[u8]) -> Result<Self, WireError> {
        let message = match MessageType::try_from(message_type)? {
            MessageType::RpsQuery => {
                ensure_empty(payload)?;
                Self::RpsQuery
            }
            MessageType::RpsPeer => Self::RpsPeer(RpsPeer::decode(payload)?),
            MessageType::OnionTunnelBuild => Self::OnionTunnelBuild(TunnelBuild::decode(payload)?),
            MessageType::OnionTunnelReady => Self::OnionTunnelReady(TunnelReady::decode(payload)?),
            MessageType::OnionTunnelIncoming => {
                Self::OnionTunnelIncoming(TunnelIncoming::decode(payload)?)
            }
            MessageType::OnionTunnelDestroy => {
                Self::OnionTunnelDestroy(TunnelDestroy::decode(payload)?)
            }
            MessageType::OnionTunnelData => Self::OnionTunnelData(TunnelData::decode(payload)?),
            MessageType::OnionError => Self::OnionError(TunnelError::decode(payload)?),
            MessageType::OnionCover => Self::OnionCover(Cover::decode(payload)?),
            MessageType::OnionTunnelExtend => {
                Self::OnionTunnelExtend(TunnelExtend::decode(payload)?)
            }
            MessageType::AuthSessionStart => Self::AuthSessionStart(SessionStart::decode(payload)?),
            MessageType::AuthSessionHs1 => Self::AuthSessionHs1(SessionHandshake::decode(payload)?),
            MessageType::AuthSessionIncomingHs1 => {
                Self::AuthSessionIncomingHs1(IncomingHs1::decode(payload)?)
            }
            MessageType::AuthSessionHs2 => Self::AuthSessionHs2(SessionHandshake::decode(payload)?),
            MessageType::AuthSessionIncomingHs2 => {
                Self::AuthSessionIncomingHs2(SessionHandshake::decode(payload)?)
            }
            MessageType::AuthLayerEncrypt => Self::AuthLayerEncrypt(LayerRequest::decode(payload)?),
            MessageType::AuthLayerEncryptResp => {
                Self::AuthLayerEncryptResp(LayerResponse::decode(payload)?)
            }
            MessageType::AuthLayerDecrypt => Self::AuthLayerDecrypt(LayerRequest::decode(payload)?),
            MessageType::AuthLayerDecryptResp => {
                Self::AuthLayerDecryptResp(LayerResponse::decode(payload)?)
            }
            MessageType::AuthSessionClose => Self::AuthSessionClose(SessionClose::decode(payload)?),
            MessageType::AuthHandshake1 => Self::AuthHandshake1(Handshake1::decode(payload)?),
            MessageType::AuthHandshake2 => Self::AuthHandshake2(Handshake2::decode(payload)?),
            MessageType::AuthSessionConfirmed => {
                ensure_empty(payload)?;
                Self::AuthSessionConfirmed
            }
            MessageType::AuthSessionDeclined => {
                ensure_empty(payload)?;
                Self::AuthSessionDeclined
            }
        };
        Ok(message)
    }

    fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            Self::RpsQuery | Self::AuthSessionConfirmed | Self::AuthSessionDeclined => Ok(()),
            Self::RpsPeer(p) => p.encode(buf),
            Self::OnionTunnelBuild(p) => p.encode(buf),
            Self::OnionTunnelReady(p) => p.encode(buf),
            Self::OnionTunnelIncoming(p) => p.encode(buf),
            Self::OnionTunnelDestroy(p) => p.encode(buf),
            Self::OnionTunnelData(p) => p.encode(buf),
            Self::OnionError(p) => p.encode(buf),
            Self::OnionCover(p) => p.encode(buf),
            Self::OnionTunnelExtend(p) => p.encode(buf),
            Self::AuthSessionStart(p) => p.encode(buf),
            Self::AuthSessionHs1(p) | Self::AuthSessionHs2(p) | Self::AuthSessionIncomingHs2(p) => {
                p.encode(buf)
            }
            Self::AuthSessionIncomingHs1(p) => p.encode(buf),
            Self::AuthLayerEncrypt(p) | Self::AuthLayerDecrypt(p) => p.encode(buf),
            Self::AuthLayerEncryptResp(p) | Self::AuthLayerDecryptResp(p) => p.encode(buf),
            Self::AuthSessionClose(p) => p.encode(buf),
            Self::AuthHandshake1(p) => p.encode(buf),
            Self::AuthHandshake2(p) => p.encode(buf),
        }
    }
}

pub(crate) fn ensure_len(buf: &[u8], min: usize) -> Result<(), WireError> {
    if buf.len() < min {
        return Err(WireError::TooShort(buf.len(), min));
    }
    Ok(())
}

/// Fixed-size payloads must be consumed exactly.
pub(crate) fn ensure_exact(buf: &[u8], len: usize) -> Result<(), WireError> {
    ensure_len(buf, len)?;
    if buf.len() > len {
        return Err(WireError::Malformed(format!(
            "{} unexpected trailing bytes",
            buf.len() - len
        )));
    }
    Ok(())
}

fn ensure_empty(buf: &[u8]) -> Result<(), WireError> {
    ensure_exact(buf, 0)
}

/// Size of an address on the wire.
pub(crate) const IP_ADDR_LEN: usize = 16;

/// IPv4 addresses travel IPv4-mapped.
pub(crate) fn put_ip(buf: &mut BytesMut, ip: IpAddr) {
    let v6 = match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    buf.put_slice(&v6.octets());
}

/// Caller has checked that 16 bytes are available.
pub(crate) fn get_ip(buf: &mut &[u8]) -> IpAddr {
    let mut octets = [0u8; IP_ADDR_LEN];
    buf.copy_to_slice(&mut octets);
    let v6 = Ipv6Addr::from(octets);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn sample_messages() -> Vec<Message> {
        let v4: SocketAddr = "192.0.2.7:7014".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:65535".parse().unwrap();
        vec![
            Message::RpsQuery,
            Message::RpsPeer(RpsPeer {
                address: v4,
                hostkey: vec![1, 2, 3],
            }),
            Message::OnionTunnelBuild(TunnelBuild {
                destination: v6,
                destination_hostkey: vec![0xAA; 300],
            }),
            Message::OnionTunnelBuild(TunnelBuild {
                destination: v4,
                destination_hostkey: vec![],
            }),
            Message::OnionTunnelReady(TunnelReady {
                tunnel_id: 0xDEAD_BEEF,
                destination_hostkey: vec![9; 5],
            }),
            Message::OnionTunnelIncoming(TunnelIncoming {
                tunnel_id: 1,
                source_hostkey: vec![],
            }),
            Message::OnionTunnelDestroy(TunnelDestroy { tunnel_id: u32::MAX }),
            Message::OnionTunnelData(TunnelData {
                tunnel_id: 77,
                data: b"hello".to_vec(),
            }),
            Message::OnionTunnelData(TunnelData {
                tunnel_id: 0,
                data: vec![],
            }),
            Message::OnionError(TunnelError {
                request_type: MessageType::OnionTunnelBuild as u16,
                tunnel_id: 3,
            }),
            Message::OnionCover(Cover { cover_size: 512 }),
            Message::OnionTunnelExtend(TunnelExtend {
                next_hop: v4,
                incoming_hs1: vec![4; 40],
            }),
            Message::AuthSessionStart(SessionStart {
                hostkey: vec![0x30, 0x82, 0x01],
            }),
            Message::AuthSessionStart(SessionStart { hostkey: vec![] }),
            Message::AuthSessionHs1(SessionHandshake {
                session_id: 5,
                handshake: vec![7; 20],
            }),
            Message::AuthSessionIncomingHs1(IncomingHs1 {
                hostkey: vec![1; 10],
                handshake: vec![2; 12],
            }),
            Message::AuthSessionIncomingHs1(IncomingHs1 {
                hostkey: vec![],
                handshake: vec![],
            }),
            Message::AuthSessionHs2(SessionHandshake {
                session_id: 6,
                handshake: vec![],
            }),
            Message::AuthSessionIncomingHs2(SessionHandshake {
                session_id: 7,
                handshake: vec![3; 8],
            }),
            Message::AuthLayerEncrypt(LayerRequest {
                request_id: 9,
                session_ids: vec![1, 2, 3],
                payload: b"payload".to_vec(),
            }),
            Message::AuthLayerDecrypt(LayerRequest {
                request_id: 10,
                session_ids: vec![],
                payload: vec![],
            }),
            Message::AuthLayerEncryptResp(LayerResponse {
                request_id: 9,
                payload: vec![5; 64],
            }),
            Message::AuthLayerDecryptResp(LayerResponse {
                request_id: 10,
                payload: vec![],
            }),
            Message::AuthSessionClose(SessionClose { session_id: 11 }),
            Message::AuthHandshake1(Handshake1 {
                encrypted_key: vec![1; 512],
                encrypted_hmac: vec![2; 512],
            }),
            Message::AuthHandshake2(Handshake2 {
                encrypted_hmac: vec![3; 128],
            }),
            Message::AuthSessionConfirmed,
            Message::AuthSessionDeclined,
        ]
    }

    #[test]
    fn test_every_type_roundtrips() {
        let messages = sample_messages();
        for ty in MessageType::ALL {
            assert!(
                messages.iter().any(|m| m.message_type() == ty),
                "no sample for {}",
                ty
            );
        }

        for message in messages {
            let frame = message.encode().unwrap();
            assert_eq!(
                u16::from_be_bytes([frame[0], frame[1]]) as usize,
                frame.len()
            );
            assert_eq!(
                u16::from_be_bytes([frame[2], frame[3]]),
                message.message_type() as u16
            );
            assert_eq!(Message::decode(&frame).unwrap(), message);
        }
    }

    #[test]
    fn test_known_layout_tunnel_build() {
        let message = Message::OnionTunnelBuild(TunnelBuild {
            destination: "10.0.0.1:8080".parse().unwrap(),
            destination_hostkey: vec![0xAB],
        });
        let frame = message.encode().unwrap();
        let expected: Vec<u8> = [
            &[0x00, 25, 0x02, 0x30][..],
            &[0x00, 0x00, 0x1F, 0x90][..],
            &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 10, 0, 0, 1][..],
            &[0xAB][..],
        ]
        .concat();
        assert_eq!(frame.to_vec(), expected);
    }

    #[test]
    fn test_truncated_frame() {
        let frame = Message::OnionTunnelDestroy(TunnelDestroy { tunnel_id: 1 })
            .encode()
            .unwrap();
        assert!(matches!(
            Message::decode(&frame[..frame.len() - 1]),
            Err(WireError::Truncated {
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_length_field_larger_than_buffer() {
        let mut frame = vec![0xFF, 0xFF];
        frame.extend_from_slice(&(MessageType::OnionTunnelData as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 1]);
        assert!(matches!(
            Message::decode(&frame),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = Message::AuthSessionConfirmed.encode().unwrap().to_vec();
        frame.push(0);
        assert!(matches!(
            Message::decode(&frame),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_distinguishable() {
        let frame = [0x00, 0x05, 0x01, 0xF4, 0x00];
        assert!(matches!(
            Message::decode(&frame),
            Err(WireError::UnknownType(500))
        ));
    }

    #[test]
    fn test_short_payloads_rejected() {
        for ty in MessageType::ALL {
            let result = Message::decode_payload(ty as u16, &[0x01]);
            match ty {
                MessageType::AuthSessionStart | MessageType::AuthHandshake2 => {
                    assert!(result.is_ok(), "{} should accept one byte", ty)
                }
                _ => assert!(result.is_err(), "{} accepted a one byte payload", ty),
            }
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let message = Message::OnionTunnelData(TunnelData {
            tunnel_id: 1,
            data: vec![0; crate::MAX_PAYLOAD_SIZE],
        });
        assert!(matches!(
            message.encode(),
            Err(WireError::PayloadTooLarge(_))
        ));
    }
}
