//! Rendezvous protocol module
//!
//! Implements the message set and framing spoken between the server and
//! downloader/uploader peers.

pub mod message;
pub mod wire;

// Re-export main types
pub use message::{ClientRole, Message, MessageKind, MAX_BODY_LEN};
pub use wire::{decode_frame, encode_frame};
