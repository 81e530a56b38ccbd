//! Pairing module
//!
//! Identifier allocation and the shared registry of waiting downloaders.

pub mod registry;
pub mod uid;

// Re-export main types
pub use registry::{MatchNotice, PairingRegistry, PendingDownloader, Registration, SignalError};
pub use uid::{UidGenerator, DEFAULT_UID_LENGTH, MAX_UID_LENGTH, MIN_UID_LENGTH, UID_ALPHABET};
