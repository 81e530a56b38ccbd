//! Client connection module
//!
//! Wraps one accepted transport stream with message-level send/receive.

use std::net::SocketAddr;

use anyhow::Result;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace, warn};

use crate::error::RendezvousError;
use crate::protocol::{decode_frame, encode_frame, Message};
use crate::server::state::ConnectionState;

/// A connected downloader or uploader
pub struct ClientConnection<S> {
    stream: S,
    peer_addr: SocketAddr,
    /// Bytes read but not yet decoded into a message
    read_buf: BytesMut,
    state: ConnectionState,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established stream
    pub fn new(stream: S, peer_addr: SocketAddr) -> Self {
        debug!("Creating client connection for {}", peer_addr);
        Self {
            stream,
            peer_addr,
            read_buf: BytesMut::with_capacity(256),
            state: ConnectionState::default(),
        }
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        debug!("Sending {:?} to {}", message.kind(), self.peer_addr);
        let mut buf = BytesMut::new();
        encode_frame(message, &mut buf);

        self.stream.write_all(&buf).await.map_err(|e| {
            warn!("Failed to send {:?} to {}: {}", message.kind(), self.peer_addr, e);
            RendezvousError::peer_error_full("Failed to send message", self.peer_addr.to_string(), e.to_string())
        })?;
        self.stream.flush().await.map_err(|e| {
            RendezvousError::peer_error_full("Failed to flush message", self.peer_addr.to_string(), e.to_string())
        })?;
        Ok(())
    }

    /// Receive the next message from the peer.
    ///
    /// Cancellation safe: the only await point is a single buffered read,
    /// so a partially received frame stays in the buffer if the future is
    /// dropped inside a `select!`.
    pub async fn receive_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = decode_frame(&mut self.read_buf)? {
                debug!("Received {:?} from {}", message.kind(), self.peer_addr);
                return Ok(message);
            }

            let read = self.stream.read_buf(&mut self.read_buf).await.map_err(|e| {
                RendezvousError::peer_error_full("Failed to read message", self.peer_addr.to_string(), e.to_string())
            })?;
            trace!("Read {} bytes from {}", read, self.peer_addr);

            if read == 0 {
                let err = if self.read_buf.is_empty() {
                    RendezvousError::peer_error_with_peer("Connection closed by peer", self.peer_addr.to_string())
                } else {
                    RendezvousError::protocol_error_with_source(
                        "Connection closed mid-frame",
                        format!("{} trailing bytes from {}", self.read_buf.len(), self.peer_addr)
                    )
                };
                return Err(err.into());
            }
        }
    }

    /// Receive the next message, failing if none arrives within `limit`
    pub async fn receive_message_timeout(&mut self, limit: Duration) -> Result<Message> {
        timeout(limit, self.receive_message())
            .await
            .map_err(|_| {
                RendezvousError::peer_error_full(
                    "Receive message timeout",
                    self.peer_addr.to_string(),
                    format!("no message within {:?}", limit)
                )
            })?
    }

    /// Best-effort Halt; failures are logged, not returned
    pub async fn send_halt(&mut self, reason: &str) {
        if let Err(e) = self.send_message(&Message::Halt(reason.to_string())).await {
            debug!("Could not deliver Halt to {}: {}", self.peer_addr, e);
        }
    }

    /// Shut down the write half and mark the connection closed
    pub async fn close(&mut self) {
        info!("Closing connection to {} (state: {:?})", self.peer_addr, self.state);
        if let Err(e) = self.stream.shutdown().await {
            trace!("Shutdown of {} failed: {}", self.peer_addr, e);
        }
        if !self.state.is_terminal() {
            self.state = ConnectionState::Closed;
        }
    }

    /// Get the peer's address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to a new state
    pub fn set_state(&mut self, state: ConnectionState) {
        trace!("{}: {:?} -> {:?}", self.peer_addr, self.state, state);
        self.state = state;
    }

    /// Report a protocol violation to the peer and log it
    pub async fn reject(&mut self, err: &anyhow::Error) {
        warn!("Protocol error from {}: {}", self.peer_addr, err);
        self.send_halt(&err.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientRole;
    use tokio::io::duplex;

    fn addr() -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], 40000))
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (server, client) = duplex(1024);
        let mut server = ClientConnection::new(server, addr());
        let mut client = ClientConnection::new(client, addr());

        client.send_message(&Message::ClientType(ClientRole::Downloader)).await.unwrap();
        let message = server.receive_message().await.unwrap();
        assert_eq!(message, Message::ClientType(ClientRole::Downloader));
    }

    #[tokio::test]
    async fn test_receive_split_frame() {
        let (server, mut raw) = duplex(1024);
        let mut server = ClientConnection::new(server, addr());

        let bytes = Message::UidRequest("abc12XYZ".to_string()).serialize();
        raw.write_all(&bytes[..3]).await.unwrap();
        let reader = tokio::spawn(async move { server.receive_message().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        raw.write_all(&bytes[3..]).await.unwrap();

        assert_eq!(reader.await.unwrap(), Message::UidRequest("abc12XYZ".to_string()));
    }

    #[tokio::test]
    async fn test_receive_after_peer_closed() {
        let (server, raw) = duplex(1024);
        let mut server = ClientConnection::new(server, addr());
        drop(raw);

        let err = server.receive_message().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (server, _raw) = duplex(1024);
        let mut server = ClientConnection::new(server, addr());

        let err = server.receive_message_timeout(Duration::from_millis(20)).await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn test_receive_malformed_frame() {
        let (server, mut raw) = duplex(1024);
        let mut server = ClientConnection::new(server, addr());
        raw.write_all(&[0, 0, 0, 1, 0x7f]).await.unwrap();

        assert!(server.receive_message().await.is_err());
    }

    #[tokio::test]
    async fn test_close_sets_state() {
        let (server, _raw) = duplex(1024);
        let mut server = ClientConnection::new(server, addr());
        server.close().await;
        assert_eq!(server.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_keeps_terminal_state() {
        let (server, _raw) = duplex(1024);
        let mut server = ClientConnection::new(server, addr());
        server.set_state(ConnectionState::TimedOut);
        server.close().await;
        assert_eq!(server.state(), ConnectionState::TimedOut);
    }
}
