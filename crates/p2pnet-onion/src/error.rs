use p2pnet_common::IdExhausted;
use p2pnet_wire::{MessageType, WireError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OnionError {
    #[error("tunnel build failed at hop {hop_index}: {cause}")]
    TunnelBuildFailed {
        hop_index: usize,
        cause: Box<OnionError>,
    },

    #[error("tunnel {0} not found")]
    TunnelNotFound(u32),

    #[error("link {0} not found")]
    LinkNotFound(u32),

    #[error("link {0} is already extended")]
    AlreadyExtended(u32),

    #[error("a tunnel needs at least one hop")]
    EmptyHopChain,

    #[error(transparent)]
    IdExhausted(#[from] IdExhausted),

    #[error("connection failed: {0}")]
    Connection(#[from] WireError),

    #[error("{0} declined by the Auth module")]
    Declined(MessageType),

    #[error("peer reported failure of {request_type} on {tunnel_id}")]
    Remote { request_type: u16, tunnel_id: u32 },

    #[error("unexpected reply to {request}: {reply}")]
    UnexpectedResponse {
        request: MessageType,
        reply: MessageType,
    },

    #[error("unexpected {0} inside a cell")]
    UnexpectedCommand(MessageType),

    #[error("reply carries request id {actual}, expected {expected}")]
    RequestIdMismatch { expected: u16, actual: u16 },

    #[error("peer sampling failed: {0}")]
    Sampling(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl OnionError {
    /// Error for a reply that is neither the expected type nor a known failure.
    pub(crate) fn unexpected(request: MessageType, reply: &p2pnet_wire::Message) -> Self {
        match reply {
            p2pnet_wire::Message::OnionError(e) => OnionError::Remote {
                request_type: e.request_type,
                tunnel_id: e.tunnel_id,
            },
            p2pnet_wire::Message::AuthSessionDeclined => OnionError::Declined(request),
            other => OnionError::UnexpectedResponse {
                request,
                reply: other.message_type(),
            },
        }
    }
}
