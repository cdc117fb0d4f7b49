//! Auth API: maps `AUTH_*` requests onto the session registry.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use p2pnet_wire::auth::{LayerRequest, LayerResponse, SessionHandshake};
use p2pnet_wire::{Handler, Message, WireError, MAX_PAYLOAD_SIZE};
use tracing::{debug, warn};

use crate::registry::SessionRegistry;
use crate::AuthError;

/// Fixed part of a layer response payload.
const LAYER_RESPONSE_OVERHEAD: usize = 4;

pub struct AuthService {
    registry: Arc<SessionRegistry>,
}

impl AuthService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run RSA-heavy registry work off the async workers.
    async fn blocking<T, F>(&self, work: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionRegistry) -> Result<T, AuthError> + Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || work(&registry))
            .await
            .map_err(|e| AuthError::Worker(e.to_string()))?
    }

    async fn dispatch(&self, message: Message) -> Result<Option<Message>, AuthError> {
        match message {
            Message::AuthSessionStart(start) => {
                let (session_id, hs1) = self
                    .blocking(move |registry| registry.start_session(&start.hostkey))
                    .await?;
                let reply = SessionHandshake::new(session_id, &Message::AuthHandshake1(hs1))?;
                Ok(Some(Message::AuthSessionHs1(reply)))
            }
            Message::AuthSessionIncomingHs1(incoming) => {
                let hs1 = incoming.handshake1()?;
                let (session_id, hs2) = self
                    .blocking(move |registry| {
                        registry.accept_incoming_handshake1(&incoming.hostkey, &hs1)
                    })
                    .await?;
                let reply = SessionHandshake::new(session_id, &Message::AuthHandshake2(hs2))?;
                Ok(Some(Message::AuthSessionHs2(reply)))
            }
            Message::AuthSessionIncomingHs2(confirm) => {
                let hs2 = confirm.handshake2()?;
                let session_id = confirm.session_id;
                self.blocking(move |registry| registry.confirm_handshake2(session_id, &hs2))
                    .await?;
                Ok(Some(Message::AuthSessionConfirmed))
            }
            Message::AuthLayerEncrypt(request) => {
                let payload = self
                    .registry
                    .layer_encrypt(&request.session_ids, &request.payload)?;
                Ok(Some(Message::AuthLayerEncryptResp(layer_response(
                    &request, payload,
                )?)))
            }
            Message::AuthLayerDecrypt(request) => {
                let payload = self
                    .registry
                    .layer_decrypt(&request.session_ids, &request.payload)?;
                Ok(Some(Message::AuthLayerDecryptResp(layer_response(
                    &request, payload,
                )?)))
            }
            Message::AuthSessionClose(close) => {
                self.registry.close_session(close.session_id);
                Ok(None)
            }
            other => {
                debug!("Ignoring {} on the Auth API", other.message_type());
                Ok(None)
            }
        }
    }
}

fn layer_response(request: &LayerRequest, payload: Vec<u8>) -> Result<LayerResponse, AuthError> {
    if payload.len() + LAYER_RESPONSE_OVERHEAD > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge(payload.len()).into());
    }
    Ok(LayerResponse {
        request_id: request.request_id,
        payload,
    })
}

#[async_trait]
impl Handler for AuthService {
    async fn handle(&self, message: Message, remote: SocketAddr) -> Option<Message> {
        let message_type = message.message_type();
        match self.dispatch(message).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Declining {} from {}: {}", message_type, remote, e);
                Some(Message::AuthSessionDeclined)
            }
        }
    }
}
