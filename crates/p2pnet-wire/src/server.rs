//! Task-per-connection server loop.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::io::{read_message, write_message};
use crate::message::Message;
use crate::WireError;

/// Reacts to one decoded message. `None` means no reply is sent.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, message: Message, remote: SocketAddr) -> Option<Message>;
}

/// Accept connections until `shutdown` flips to `true`.
///
/// Every connection runs in its own task owned by a [`JoinSet`], so
/// returning from here aborts connections that are still open.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let local = listener.local_addr()?;
    info!("Listening on {}", local);

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        let handler = handler.clone();
                        connections.spawn(serve_connection(stream, remote, handler));
                    }
                    Err(e) => warn!("Accept on {} failed: {}", local, e),
                }
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        warn!("Connection task on {} panicked", local);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(
        "Stopping listener on {} ({} open connections)",
        local,
        connections.len()
    );
    connections.shutdown().await;
    Ok(())
}

async fn serve_connection(mut stream: TcpStream, remote: SocketAddr, handler: Arc<dyn Handler>) {
    loop {
        let message = match read_message(&mut stream).await {
            Ok(message) => message,
            Err(WireError::ConnectionClosed) => break,
            Err(WireError::UnknownType(ty)) => {
                debug!("Skipping unknown message type {} from {}", ty, remote);
                continue;
            }
            Err(e) => {
                debug!("Closing connection from {}: {}", remote, e);
                break;
            }
        };

        let message_type = message.message_type();
        if let Some(reply) = handler.handle(message, remote).await {
            if let Err(e) = write_message(&mut stream, &reply).await {
                debug!(
                    "Failed to answer {} from {}: {}",
                    message_type, remote, e
                );
                break;
            }
        }
    }
}
