//! p2pnet wire protocol types, framing, and transports.
//!
//! This crate provides:
//! - The 4-byte message header and the message-type registry
//! - Typed payloads for the Auth, Onion and RPS APIs
//! - A closed [`Message`] sum type with exact encode/decode
//! - Async framing over any tokio stream
//! - Request/response transports and a task-per-connection server loop
//!
//! # Message Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Size (incl. header)    |          Message type         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   Payload (Size - 4 bytes)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All integers are big-endian.

#![forbid(unsafe_code)]

pub mod auth;
pub mod io;
pub mod message;
pub mod onion;
pub mod rps;
pub mod server;
pub mod transport;
pub mod types;

use bytes::{Buf, BufMut};
use thiserror::Error;

pub use io::{read_message, write_message};
pub use message::Message;
pub use server::{serve, Handler};
pub use transport::{LocalTransport, TcpTransport, Transport};
pub use types::MessageType;

/// Size of the common header.
pub const HEADER_SIZE: usize = 4;

/// Largest encodable message, header included.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Largest payload that fits in one message.
pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// Wire protocol errors.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload too short: {0} bytes, minimum {1}")]
    TooShort(usize, usize),

    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid message size field: {0}")]
    InvalidSize(u16),

    #[error("unknown message type: {0}")]
    UnknownType(u16),

    #[error("message too large: {0} bytes, maximum {MAX_MESSAGE_SIZE}")]
    PayloadTooLarge(usize),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection refused: {0}")]
    ConnectionRefused(std::net::SocketAddr),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether this error was raised by the transport rather than the codec.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::ConnectionRefused(_) | Self::Timeout(_) | Self::Io(_)
        )
    }
}

/// Common message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total message size including this header.
    pub size: u16,
    /// Raw type identifier; may be unknown to this registry.
    pub message_type: u16,
}

impl Header {
    pub fn new(message_type: MessageType, payload_len: usize) -> Result<Self, WireError> {
        let total = HEADER_SIZE + payload_len;
        if total > MAX_MESSAGE_SIZE {
            return Err(WireError::PayloadTooLarge(total));
        }
        Ok(Self {
            size: total as u16,
            message_type: message_type as u16,
        })
    }

    pub fn payload_len(&self) -> usize {
        usize::from(self.size).saturating_sub(HEADER_SIZE)
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.size);
        buf.put_u16(self.message_type);
    }

    /// Decode the header from the front of `buf`.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::TooShort(buf.len(), HEADER_SIZE));
        }
        let size = buf.get_u16();
        let message_type = buf.get_u16();
        if usize::from(size) < HEADER_SIZE {
            return Err(WireError::InvalidSize(size));
        }
        Ok(Self { size, message_type })
    }
}
