//! Protocol codec
//!
//! Frame encoding and decoding over byte streams.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Id (2)   │ Size (4) │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! Both header fields are little-endian. There is no delimiter beyond the
//! declared size and no upper bound on it.

use std::io::{Read, Write};

use bytes::BytesMut;

use super::message::{parse_header, Message, HEADER_LEN};
use crate::error::Result;

// =============================================================================
// Buffer decoding
// =============================================================================

/// Split one complete frame off the front of `buf`
///
/// Returns `None` and leaves `buf` untouched while the frame is incomplete.
pub fn try_decode(buf: &mut BytesMut) -> Option<Message> {
    if buf.len() < HEADER_LEN {
        return None;
    }

    let (id, size) = parse_header(&buf[..HEADER_LEN]);
    let total = HEADER_LEN + size as usize;
    if buf.len() < total {
        return None;
    }

    let mut frame = buf.split_to(total);
    let payload = frame.split_off(HEADER_LEN);
    Some(Message::from_parts(id, payload))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete message from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let (id, size) = parse_header(&header);

    let mut payload = BytesMut::zeroed(size as usize);
    if size > 0 {
        reader.read_exact(&mut payload)?;
    }

    Ok(Message::from_parts(id, payload))
}

/// Write a message to a stream
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&message.pack())?;
    writer.flush()?;
    Ok(())
}
