//! Request/response transports between modules and peers.
//!
//! Every exchange is one request followed by at most one response.
//! [`TcpTransport`] dials a fresh connection per exchange and bounds the
//! whole exchange by a single deadline. [`LocalTransport`] dispatches to
//! in-process handlers and is used to wire several nodes together in one
//! process.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::io::{read_message, write_message};
use crate::message::Message;
use crate::server::Handler;
use crate::WireError;

/// Default deadline for one exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` to `addr` and wait for the reply.
    async fn request(&self, addr: SocketAddr, message: &Message) -> Result<Message, WireError>;

    /// Send `message` to `addr` without waiting for a reply.
    async fn send(&self, addr: SocketAddr, message: &Message) -> Result<(), WireError>;
}

/// Connection-per-exchange TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        exchange: impl std::future::Future<Output = Result<T, WireError>>,
    ) -> Result<T, WireError> {
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| WireError::Timeout(self.timeout))?
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE_TIMEOUT)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn request(&self, addr: SocketAddr, message: &Message) -> Result<Message, WireError> {
        self.bounded(async {
            let mut stream = TcpStream::connect(addr).await?;
            write_message(&mut stream, message).await?;
            let reply = read_message(&mut stream).await?;
            debug!(
                "{} -> {} answered with {}",
                message.message_type(),
                addr,
                reply.message_type()
            );
            Ok(reply)
        })
        .await
    }

    async fn send(&self, addr: SocketAddr, message: &Message) -> Result<(), WireError> {
        self.bounded(async {
            let mut stream = TcpStream::connect(addr).await?;
            write_message(&mut stream, message).await
        })
        .await
    }
}

/// In-process transport dispatching to registered handlers.
///
/// Messages are still encoded and decoded on the way through so that
/// in-process wiring exercises the same codec as the network.
#[derive(Default, Clone)]
pub struct LocalTransport {
    handlers: Arc<RwLock<HashMap<SocketAddr, Arc<dyn Handler>>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `addr` with `handler`, replacing any previous handler.
    pub fn register(&self, addr: SocketAddr, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.insert(addr, handler);
    }

    /// Stop serving `addr`; later exchanges fail with `ConnectionRefused`.
    pub fn unregister(&self, addr: SocketAddr) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.remove(&addr);
    }

    fn handler(&self, addr: SocketAddr) -> Result<Arc<dyn Handler>, WireError> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers
            .get(&addr)
            .cloned()
            .ok_or(WireError::ConnectionRefused(addr))
    }

    async fn dispatch(
        &self,
        addr: SocketAddr,
        message: &Message,
    ) -> Result<Option<Message>, WireError> {
        let handler = self.handler(addr)?;
        let inbound = Message::decode(&message.encode()?)?;
        let reply = handler.handle(inbound, local_peer_addr()).await;
        match reply {
            Some(reply) => Ok(Some(Message::decode(&reply.encode()?)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn request(&self, addr: SocketAddr, message: &Message) -> Result<Message, WireError> {
        self.dispatch(addr, message)
            .await?
            .ok_or(WireError::ConnectionClosed)
    }

    async fn send(&self, addr: SocketAddr, message: &Message) -> Result<(), WireError> {
        self.dispatch(addr, message).await.map(|_| ())
    }
}

fn local_peer_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}
