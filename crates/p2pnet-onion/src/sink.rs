//! Where payloads that reach the end of a tunnel go.

use async_trait::async_trait;
use p2pnet_common::Identity;
use tokio::sync::mpsc;

use crate::OnionError;

/// Receives payloads addressed to this node.
///
/// The returned bytes travel back through the tunnel as the reply.
#[async_trait]
pub trait DataSink: Send + Sync {
    async fn deliver(
        &self,
        link_id: u32,
        source: Identity,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, OnionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub link_id: u32,
    pub source: Identity,
    pub payload: Vec<u8>,
}

/// Queues deliveries on a channel and replies with an empty payload.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DataSink for ChannelSink {
    async fn deliver(
        &self,
        link_id: u32,
        source: Identity,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, OnionError> {
        self.tx
            .send(Delivery {
                link_id,
                source,
                payload,
            })
            .await
            .map_err(|_| OnionError::Delivery("receiver dropped".into()))?;
        Ok(Vec::new())
    }
}
