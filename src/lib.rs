//! rendezvous-server
//!
//! A TLS rendezvous server that pairs downloaders and uploaders behind NAT
//! through a short shared identifier.

pub mod protocol;
pub mod pairing;
pub mod server;
pub mod tls;
pub mod cli;
pub mod error;

pub use error::RendezvousError;

pub use protocol::{ClientRole, Message, MessageKind};
pub use pairing::{PairingRegistry, PendingDownloader, Registration, UidGenerator};
pub use server::{
    ClientConnection, ConnectionHandler, PairingSettings, RendezvousServer,
    SessionOutcome, DownloaderOutcome, UploaderOutcome,
};
pub use tls::{CertKeyPair, build_server_config, load_or_generate};
pub use cli::{CliArgs, Config};
