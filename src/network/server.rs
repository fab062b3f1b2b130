//! TCP server for incoming system messages.

use crate::error::{Result, TransportError};
use crate::network::rpc::{decode_message, frame_message, Message};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Maximum accepted request frame, matching the client bound.
const MAX_FRAME_SIZE: u32 = 512 * 1024 * 1024;

/// Handler for incoming system messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle an incoming message and produce the response.
    async fn handle(&self, msg: Message) -> Message;
}

/// TCP server accepting framed system messages.
pub struct NetworkServer {
    bind_addr: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    shutdown: CancellationToken,
}

impl NetworkServer {
    /// Create a server. The token is shared with the node so one shutdown
    /// signal stops both.
    pub fn new(
        bind_addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bind_addr,
            handler,
            shutdown,
        }
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!(addr = %self.bind_addr, "System message server listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted connection");
                            let handler = self.handler.clone();
                            let cancel = self.shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) =
                                    Self::handle_connection(stream, handler, cancel).await
                                {
                                    debug!(error = %e, "Connection handler error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("System message server shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Serve one connection: read frames, dispatch, write responses.
    async fn handle_connection(
        mut stream: TcpStream,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 4];
            tokio::select! {
                result = stream.read_exact(&mut len_buf) => {
                    match result {
                        Ok(_) => {}
                        // Peer closed between requests.
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                        Err(e) => return Err(TransportError::ReceiveFailed(e.to_string()).into()),
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }

            let len = u32::from_be_bytes(len_buf);
            if len > MAX_FRAME_SIZE {
                return Err(TransportError::ReceiveFailed(format!(
                    "request frame too large: {} bytes",
                    len
                ))
                .into());
            }

            let mut data = vec![0u8; len as usize];
            stream
                .read_exact(&mut data)
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

            let msg = match decode_message(&data) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(error = %e, "Failed to decode incoming message");
                    return Err(TransportError::ReceiveFailed(e.to_string()).into());
                }
            };

            let response = handler.handle(msg).await;
            let framed = frame_message(&response)
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            stream
                .write_all(&framed)
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
    }
}
