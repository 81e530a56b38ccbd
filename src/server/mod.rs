//! Server module
//!
//! Per-connection protocol handling, liveness probing and the TLS listener.

pub mod connection;
pub mod handler;
pub mod listener;
pub mod liveness;
pub mod state;

// Re-export main types
pub use connection::ClientConnection;
pub use handler::{ConnectionHandler, PairingSettings, DEFAULT_CEILING_TIMEOUT, DEFAULT_CONFIRM_TIMEOUT};
pub use listener::{RendezvousServer, TCP_KEEPALIVE};
pub use liveness::{Liveness, LivenessMonitor, LivenessSettings};
pub use state::{ConnectionState, DownloaderOutcome, SessionOutcome, UploaderOutcome};
