//! Outbound transport: one blocking request per call.

use crate::error::{Result, TransportError};
use crate::network::rpc::{decode_message, frame_message, Message};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Maximum accepted response frame. Fragment payloads dominate frame
/// sizes; anything past this is treated as a protocol error.
const MAX_FRAME_SIZE: u32 = 512 * 1024 * 1024;

/// Outbound request contract.
///
/// `send` blocks until the peer answers or fails; the rebalancer relies on
/// that to keep the move protocol simple. Implementations own their
/// connection strategy.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send one request to `addr` and await the response message.
    async fn send(&self, addr: &str, msg: Message) -> Result<Message>;
}

/// TCP transport opening one connection per request.
///
/// Moves are infrequent and large, so connection reuse buys little here;
/// a fresh connection per request keeps failure handling trivial.
#[derive(Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport with the given timeouts.
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    async fn request(&self, addr: &str, msg: &Message) -> Result<Message> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                reason: "connection timeout".to_string(),
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        let mut stream = stream;
        let framed =
            frame_message(msg).map_err(|e| TransportError::SendFailed(e.to_string()))?;
        stream
            .write_all(&framed)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::ReceiveFailed(format!(
                "response frame too large: {} bytes",
                len
            ))
            .into());
        }

        let mut data = vec![0u8; len as usize];
        stream
            .read_exact(&mut data)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

        decode_message(&data)
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()).into())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, addr: &str, msg: Message) -> Result<Message> {
        tokio::time::timeout(self.request_timeout, self.request(addr, &msg))
            .await
            .map_err(|_| TransportError::ReceiveFailed("request timeout".to_string()))?
    }
}
