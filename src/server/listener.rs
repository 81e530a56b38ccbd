//! Listener bootstrap
//!
//! Accepts TCP connections, upgrades them to TLS and hands each one to the
//! connection handler on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::error::RendezvousError;
use crate::pairing::PairingRegistry;
use crate::server::connection::ClientConnection;
use crate::server::handler::ConnectionHandler;

/// Idle time before the OS starts sending TCP keepalive probes
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Pause after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The rendezvous TLS server
pub struct RendezvousServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: Arc<ConnectionHandler>,
    handshake_timeout: Duration,
}

impl RendezvousServer {
    /// Bind the listening socket described by `config`
    pub async fn bind(
        config: &Config,
        tls: Arc<rustls::ServerConfig>,
        registry: Arc<PairingRegistry>,
    ) -> Result<Self> {
        let addr = config.get_listen_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            RendezvousError::network_error_full("Failed to bind listener", addr.clone(), e.to_string())
        })?;

        let settings = config.pairing_settings();
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
            handler: Arc::new(ConnectionHandler::new(registry, settings)),
            handshake_timeout: settings.liveness.deadline,
        })
    }

    /// The bound address, useful when binding port 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The shared handler
    pub fn handler(&self) -> &Arc<ConnectionHandler> {
        &self.handler
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        info!("Rendezvous server accepting connections");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            if let Err(e) = configure_stream(&stream) {
                debug!("Could not configure socket for {}: {}", peer, e);
            }

            let acceptor = self.acceptor.clone();
            let handler = Arc::clone(&self.handler);
            let handshake_timeout = self.handshake_timeout;

            tokio::spawn(async move {
                match timeout(handshake_timeout, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => {
                        debug!("TLS established with {}", peer);
                        handler.handle(ClientConnection::new(tls_stream, peer)).await;
                    }
                    Ok(Err(e)) => info!("TLS handshake with {} failed: {}", peer, e),
                    Err(_) => info!("TLS handshake with {} timed out", peer),
                }
            });
        }
    }
}

/// Enable TCP keepalive and disable Nagle on an accepted socket
fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
