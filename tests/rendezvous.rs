//! End-to-end pairing over real TLS connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rendezvous_server::{
    build_server_config, load_or_generate, CertKeyPair, ClientConnection, ClientRole, Config, Message,
    PairingRegistry, RendezvousServer,
};
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

type Client = ClientConnection<TlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<PairingRegistry>,
    connector: TlsConnector,
    _app_dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let app_dir = TempDir::new().unwrap();
        let certificate = load_or_generate(app_dir.path()).unwrap();
        let tls = build_server_config(&certificate).unwrap();

        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ceiling_timeout: Duration::from_secs(10),
            liveness_deadline: Duration::from_secs(5),
            probe_interval: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(2),
            ..Config::default()
        };

        let registry = Arc::new(PairingRegistry::new());
        let server = RendezvousServer::bind(&config, tls, Arc::clone(&registry)).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        Self {
            addr,
            registry,
            connector: connector_for(&certificate),
            _app_dir: app_dir,
        }
    }

    /// Open a TLS connection; also returns the client's own address
    async fn connect(&self) -> (Client, SocketAddr) {
        let tcp = TcpStream::connect(self.addr).await.unwrap();
        let local = tcp.local_addr().unwrap();
        let server_name = ServerName::try_from("localhost").unwrap();
        let tls = self.connector.connect(server_name, tcp).await.unwrap();
        (ClientConnection::new(tls, self.addr), local)
    }

    async fn downloader(&self) -> (Client, SocketAddr, String) {
        let (mut client, local) = self.connect().await;
        client.send_message(&Message::ClientType(ClientRole::Downloader)).await.unwrap();
        match client.receive_message().await.unwrap() {
            Message::UidAssignment(uid) => (client, local, uid),
            other => panic!("expected UidAssignment, got {:?}", other),
        }
    }

    async fn uploader(&self, uid: &str) -> (Client, SocketAddr) {
        let (mut client, local) = self.connect().await;
        client.send_message(&Message::ClientType(ClientRole::Uploader)).await.unwrap();
        client.send_message(&Message::UidRequest(uid.to_string())).await.unwrap();
        (client, local)
    }
}

fn connector_for(certificate: &CertKeyPair) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    for cert in certificate.cert_chain().unwrap() {
        roots.add(cert).unwrap();
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Next message that is not a liveness ping; pings are answered
async fn next_message(client: &mut Client) -> Message {
    loop {
        match client.receive_message().await.unwrap() {
            Message::Ping => client.send_message(&Message::Pong).await.unwrap(),
            message => return message,
        }
    }
}

async fn wait_until_empty(registry: &PairingRegistry) {
    for _ in 0..100 {
        if registry.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("registry still holds {:?}", registry.pending_ids());
}

#[tokio::test]
async fn test_downloader_and_uploader_pair_over_tls() {
    let server = TestServer::start().await;

    let (mut downloader, downloader_addr, uid) = server.downloader().await;
    assert_eq!(uid.len(), 8);
    assert!(server.registry.contains(&uid));

    let (mut uploader, uploader_addr) = server.uploader(&uid).await;
    assert_eq!(
        uploader.receive_message().await.unwrap(),
        Message::PeerReady(downloader_addr.to_string())
    );

    assert_eq!(next_message(&mut downloader).await, Message::PeerReady(uploader_addr.to_string()));
    downloader.send_message(&Message::ReadyAck).await.unwrap();

    assert_eq!(next_message(&mut uploader).await, Message::ReadyAck);
    wait_until_empty(&server.registry).await;
}

#[tokio::test]
async fn test_unknown_uid_reports_peer_not_found() {
    let server = TestServer::start().await;

    let (mut uploader, _) = server.uploader("zzzzzzzz").await;
    assert_eq!(uploader.receive_message().await.unwrap(), Message::PeerNotFound);
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_halted_downloader_cannot_be_matched() {
    let server = TestServer::start().await;

    let (mut downloader, _, uid) = server.downloader().await;
    downloader.send_message(&Message::Halt("cancelled".to_string())).await.unwrap();
    assert_eq!(next_message(&mut downloader).await, Message::Halt("cancelled".to_string()));
    wait_until_empty(&server.registry).await;

    let (mut uploader, _) = server.uploader(&uid).await;
    assert_eq!(uploader.receive_message().await.unwrap(), Message::PeerNotFound);
}

#[tokio::test]
async fn test_plaintext_client_does_not_disturb_server() {
    let server = TestServer::start().await;

    let mut plain = TcpStream::connect(server.addr).await.unwrap();
    plain.write_all(&Message::ClientType(ClientRole::Downloader).serialize()).await.unwrap();
    drop(plain);

    let (_downloader, _, uid) = server.downloader().await;
    assert!(server.registry.contains(&uid));
}
