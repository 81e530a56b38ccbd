//! Wire framing
//!
//! Every message travels as `[u32 BE length][u8 kind][body]`, where the
//! length counts the kind byte and the body. Decoding is incremental so a
//! connection can accumulate bytes and pull out complete frames.

use bytes::{Buf, BufMut, BytesMut};
use anyhow::Result;
use tracing::{error, trace};

use super::message::{Message, MessageKind, LENGTH_PREFIX_LEN, MAX_BODY_LEN};
use crate::error::RendezvousError;

/// Attempt to decode one message from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when the frame is not yet
/// complete. Oversized or zero-length frames are rejected as soon as the
/// length prefix is visible, before any body is buffered.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Message>> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length == 0 {
        error!("Received zero-length frame");
        return Err(RendezvousError::protocol_error("Zero-length frame").into());
    }

    if length - 1 > MAX_BODY_LEN {
        error!("Frame too large: {} bytes", length);
        return Err(RendezvousError::protocol_error_with_source(
            "Frame too large",
            format!("{} bytes (max {})", length, MAX_BODY_LEN + 1)
        ).into());
    }

    if buf.len() < LENGTH_PREFIX_LEN + length {
        trace!("Incomplete frame: have {} of {} bytes", buf.len(), LENGTH_PREFIX_LEN + length);
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LEN);
    let kind = MessageKind::try_from(buf.get_u8())?;
    let body = buf.split_to(length - 1);

    Message::deserialize(kind, &body).map(Some)
}

/// Append the framed encoding of `message` to `buf`
pub fn encode_frame(message: &Message, buf: &mut BytesMut) {
    let body = message.body();
    buf.reserve(LENGTH_PREFIX_LEN + 1 + body.len());
    buf.put_u32(1 + body.len() as u32);
    buf.put_u8(message.kind().into());
    buf.put_slice(&body);
}
