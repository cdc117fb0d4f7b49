//! Client for the local Auth API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use p2pnet_wire::auth::{IncomingHs1, LayerRequest, SessionClose, SessionHandshake, SessionStart};
use p2pnet_wire::{Message, MessageType, Transport};
use tracing::debug;

use crate::OnionError;

pub struct AuthClient {
    transport: Arc<dyn Transport>,
    address: SocketAddr,
    request_ids: AtomicU16,
}

impl AuthClient {
    pub fn new(transport: Arc<dyn Transport>, address: SocketAddr) -> Self {
        Self {
            transport,
            address,
            request_ids: AtomicU16::new(1),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// `AUTH_SESSION_START` -> `AUTH_SESSION_HS1`.
    pub async fn start_session(&self, hostkey: &[u8]) -> Result<SessionHandshake, OnionError> {
        let request = Message::AuthSessionStart(SessionStart {
            hostkey: hostkey.to_vec(),
        });
        match self.request(&request).await? {
            Message::AuthSessionHs1(hs1) => Ok(hs1),
            other => Err(OnionError::unexpected(MessageType::AuthSessionStart, &other)),
        }
    }

    /// `AUTH_SESSION_INCOMING_HS1` -> `AUTH_SESSION_HS2`.
    pub async fn accept(&self, incoming: IncomingHs1) -> Result<SessionHandshake, OnionError> {
        match self.request(&Message::AuthSessionIncomingHs1(incoming)).await? {
            Message::AuthSessionHs2(hs2) => Ok(hs2),
            other => Err(OnionError::unexpected(
                MessageType::AuthSessionIncomingHs1,
                &other,
            )),
        }
    }

    /// `AUTH_SESSION_INCOMING_HS2` -> `AUTH_SESSION_CONFIRMED`.
    pub async fn confirm(&self, session_id: u32, handshake: Vec<u8>) -> Result<(), OnionError> {
        let request = Message::AuthSessionIncomingHs2(SessionHandshake {
            session_id,
            handshake,
        });
        match self.request(&request).await? {
            Message::AuthSessionConfirmed => Ok(()),
            other => Err(OnionError::unexpected(
                MessageType::AuthSessionIncomingHs2,
                &other,
            )),
        }
    }

    pub async fn layer_encrypt(
        &self,
        session_ids: &[u32],
        payload: &[u8],
    ) -> Result<Vec<u8>, OnionError> {
        let request_id = self.next_request_id();
        let request = Message::AuthLayerEncrypt(LayerRequest {
            request_id,
            session_ids: session_ids.to_vec(),
            payload: payload.to_vec(),
        });
        match self.request(&request).await? {
            Message::AuthLayerEncryptResp(resp) => check_request_id(request_id, resp.request_id)
                .map(|()| resp.payload),
            other => Err(OnionError::unexpected(MessageType::AuthLayerEncrypt, &other)),
        }
    }

    pub async fn layer_decrypt(
        &self,
        session_ids: &[u32],
        payload: &[u8],
    ) -> Result<Vec<u8>, OnionError> {
        let request_id = self.next_request_id();
        let request = Message::AuthLayerDecrypt(LayerRequest {
            request_id,
            session_ids: session_ids.to_vec(),
            payload: payload.to_vec(),
        });
        match self.request(&request).await? {
            Message::AuthLayerDecryptResp(resp) => check_request_id(request_id, resp.request_id)
                .map(|()| resp.payload),
            other => Err(OnionError::unexpected(MessageType::AuthLayerDecrypt, &other)),
        }
    }

    /// `AUTH_SESSION_CLOSE`; Auth never replies to it.
    pub async fn close_session(&self, session_id: u32) -> Result<(), OnionError> {
        debug!("Closing session {}", session_id);
        self.transport
            .send(
                self.address,
                &Message::AuthSessionClose(SessionClose { session_id }),
            )
            .await?;
        Ok(())
    }

    async fn request(&self, message: &Message) -> Result<Message, OnionError> {
        Ok(self.transport.request(self.address, message).await?)
    }

    fn next_request_id(&self) -> u16 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }
}

fn check_request_id(expected: u16, actual: u16) -> Result<(), OnionError> {
    if expected == actual {
        Ok(())
    } else {
        Err(OnionError::RequestIdMismatch { expected, actual })
    }
}
