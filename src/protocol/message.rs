//! Rendezvous protocol messages
//!
//! Defines every message kind exchanged between the server and its peers.

use bytes::BytesMut;
use anyhow::Result;
use tracing::{debug, error, trace};

use super::wire::encode_frame;
use crate::error::RendezvousError;

/// Upper bound on a message body; control messages are tiny.
pub const MAX_BODY_LEN: usize = 1024;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Message kind tags. The numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    ClientType = 0x01,
    UidAssignment = 0x02,
    UidRequest = 0x03,
    PeerReady = 0x04,
    PeerNotFound = 0x05,
    Halt = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    ReadyAck = 0x09,
}

impl TryFrom<u8> for MessageKind {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        trace!("Converting byte to MessageKind: {}", value);
        match value {
            0x01 => Ok(MessageKind::ClientType),
            0x02 => Ok(MessageKind::UidAssignment),
            0x03 => Ok(MessageKind::UidRequest),
            0x04 => Ok(MessageKind::PeerReady),
            0x05 => Ok(MessageKind::PeerNotFound),
            0x06 => Ok(MessageKind::Halt),
            0x07 => Ok(MessageKind::Ping),
            0x08 => Ok(MessageKind::Pong),
            0x09 => Ok(MessageKind::ReadyAck),
            _ => {
                error!("Invalid message kind: 0x{:02x}", value);
                Err(RendezvousError::protocol_error_with_source(
                    "Unknown message kind",
                    format!("value: 0x{:02x}", value)
                ).into())
            }
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

/// Role a client announces in its first message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientRole {
    /// Registers and waits for an uploader
    Downloader = 0x01,
    /// Presents an identifier to reach a waiting downloader
    Uploader = 0x02,
}

impl TryFrom<u8> for ClientRole {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(ClientRole::Downloader),
            0x02 => Ok(ClientRole::Uploader),
            _ => Err(RendezvousError::protocol_error_with_source(
                "Unknown client role",
                format!("value: 0x{:02x}", value)
            ).into()),
        }
    }
}

/// Rendezvous protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ClientType(ClientRole),
    UidAssignment(String),
    UidRequest(String),
    /// Address of the other side of a pairing
    PeerReady(String),
    PeerNotFound,
    /// Voluntary termination with a reason
    Halt(String),
    Ping,
    Pong,
    ReadyAck,
}

impl Message {
    /// Get the kind tag of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ClientType(_) => MessageKind::ClientType,
            Message::UidAssignment(_) => MessageKind::UidAssignment,
            Message::UidRequest(_) => MessageKind::UidRequest,
            Message::PeerReady(_) => MessageKind::PeerReady,
            Message::PeerNotFound => MessageKind::PeerNotFound,
            Message::Halt(_) => MessageKind::Halt,
            Message::Ping => MessageKind::Ping,
            Message::Pong => MessageKind::Pong,
            Message::ReadyAck => MessageKind::ReadyAck,
        }
    }

    /// Get the body bytes of this message
    pub fn body(&self) -> Vec<u8> {
        match self {
            Message::ClientType(role) => vec![*role as u8],
            Message::UidAssignment(uid) | Message::UidRequest(uid) => uid.as_bytes().to_vec(),
            Message::PeerReady(addr) => addr.as_bytes().to_vec(),
            Message::Halt(reason) => reason.as_bytes().to_vec(),
            Message::PeerNotFound | Message::Ping | Message::Pong | Message::ReadyAck => Vec::new(),
        }
    }

    /// Serialize the message to bytes (including length prefix)
    pub fn serialize(&self) -> Vec<u8> {
        trace!("Serializing message: {:?}", self.kind());
        let mut buf = BytesMut::new();
        encode_frame(self, &mut buf);
        trace!("Message serialized: {} bytes", buf.len());
        buf.to_vec()
    }

    /// Build a message from its kind and body
    pub fn deserialize(kind: MessageKind, body: &[u8]) -> Result<Self> {
        trace!("Deserializing {:?} with {} body bytes", kind, body.len());

        if body.len() > MAX_BODY_LEN {
            error!("Message body too large: {} bytes", body.len());
            return Err(RendezvousError::protocol_error_with_source(
                "Message body too large",
                format!("{} bytes (max {})", body.len(), MAX_BODY_LEN)
            ).into());
        }

        let message = match kind {
            MessageKind::ClientType => {
                if body.len() != 1 {
                    return Err(RendezvousError::protocol_error_with_source(
                        "ClientType body must be exactly one byte",
                        format!("got {} bytes", body.len())
                    ).into());
                }
                Message::ClientType(ClientRole::try_from(body[0])?)
            }
            MessageKind::UidAssignment => Message::UidAssignment(utf8_body(kind, body)?),
            MessageKind::UidRequest => Message::UidRequest(utf8_body(kind, body)?),
            MessageKind::PeerReady => Message::PeerReady(utf8_body(kind, body)?),
            MessageKind::Halt => Message::Halt(utf8_body(kind, body)?),
            MessageKind::PeerNotFound => empty_body(kind, body, Message::PeerNotFound)?,
            MessageKind::Ping => empty_body(kind, body, Message::Ping)?,
            MessageKind::Pong => empty_body(kind, body, Message::Pong)?,
            MessageKind::ReadyAck => empty_body(kind, body, Message::ReadyAck)?,
        };

        debug!("Decoded {:?} message", kind);
        Ok(message)
    }
}

fn utf8_body(kind: MessageKind, body: &[u8]) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(|e| {
        error!("{:?} body is not valid UTF-8", kind);
        RendezvousError::protocol_error_with_source(
            format!("{:?} body is not valid UTF-8", kind),
            e.to_string()
        ).into()
    })
}

fn empty_body(kind: MessageKind, body: &[u8], message: Message) -> Result<Message> {
    if !body.is_empty() {
        error!("{:?} carries an unexpected {} byte body", kind, body.len());
        return Err(RendezvousError::protocol_error_with_source(
            format!("{:?} must not carry a body", kind),
            format!("got {} bytes", body.len())
        ).into());
    }
    Ok(message)
}
