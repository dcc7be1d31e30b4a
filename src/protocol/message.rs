//! Message definitions
//!
//! A message is a 16-bit id plus an opaque payload. Protocol code builds the
//! payload with `append` and reads it back field by field with `pop`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{NetframeError, Result};

/// Length of the id field in bytes
pub const ID_FIELD_LEN: usize = 2;

/// Length of the size field in bytes
pub const SIZE_FIELD_LEN: usize = 4;

/// Header size: 2 bytes id + 4 bytes payload size
pub const HEADER_LEN: usize = ID_FIELD_LEN + SIZE_FIELD_LEN;

/// Largest payload the size field can declare
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// One framed message
///
/// The declared size is always the payload length, so a packed message can
/// never disagree with its own header.
#[derive(Debug, Clone, Default)]
pub struct Message {
    id: u16,
    payload: BytesMut,
    cursor: usize,
}

impl Message {
    /// Create an empty message with the given id
    pub fn new(id: u16) -> Self {
        Self {
            id,
            payload: BytesMut::new(),
            cursor: 0,
        }
    }

    /// Create a message with an initial payload
    ///
    /// The payload must fit the size field; use `append` to grow a message
    /// from data of unknown length.
    pub fn with_payload(id: u16, payload: impl AsRef<[u8]>) -> Self {
        debug_assert!(payload.as_ref().len() <= MAX_PAYLOAD_LEN);
        Self {
            id,
            payload: BytesMut::from(payload.as_ref()),
            cursor: 0,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn set_id(&mut self, id: u16) {
        self.id = id;
    }

    /// Declared payload size
    pub fn size(&self) -> u32 {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_LEN);
        self.payload.len() as u32
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of payload bytes not yet consumed by `pop`
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    /// Append bytes to the payload, growing the declared size
    ///
    /// Fails, leaving the payload untouched, if the result would not fit the
    /// size field.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        checked_size(self.payload.len().saturating_add(data.len()))?;
        self.payload.extend_from_slice(data);
        Ok(())
    }

    /// Read `len` bytes at the cursor and advance it
    ///
    /// Fails without moving the cursor if fewer than `len` bytes remain.
    pub fn pop(&mut self, len: usize) -> Result<&[u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(NetframeError::OutOfRange {
                requested: len,
                remaining,
            });
        }

        let start = self.cursor;
        self.cursor += len;
        Ok(&self.payload[start..start + len])
    }

    /// Serialize to wire format: id (2 LE) + size (4 LE) + payload
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u16_le(self.id);
        buf.put_u32_le(self.size());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a message from a buffer starting with a header
    ///
    /// The payload is exactly the declared size; trailing bytes are ignored.
    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(NetframeError::TruncatedFrame {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }

        let (id, size) = parse_header(buf);
        let total = HEADER_LEN + size as usize;
        if buf.len() < total {
            return Err(NetframeError::TruncatedFrame {
                expected: total,
                actual: buf.len(),
            });
        }

        Ok(Self::with_payload(id, &buf[HEADER_LEN..total]))
    }

    pub(crate) fn from_parts(id: u16, payload: BytesMut) -> Self {
        Self {
            id,
            payload,
            cursor: 0,
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.payload == other.payload
    }
}

impl Eq for Message {}

/// Parse id and size from the first `HEADER_LEN` bytes of `buf`
pub(crate) fn parse_header(buf: &[u8]) -> (u16, u32) {
    let id = u16::from_le_bytes([buf[0], buf[1]]);
    let size = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
    (id, size)
}

/// Payload length as the wire size field
fn checked_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| NetframeError::PayloadTooLarge { len })
}
