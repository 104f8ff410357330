//! Object-graph codec — pack/unpack msgpack values.
//!
//! The engine treats payloads as [`rmpv::Value`] graphs. msgpack gives
//! native binary, which is why attachments need no side channel: raw
//! bytes ride inside the object graph like any other value.

use std::io;

use bytes::{Buf, BytesMut};
use rmpv::Value;

/// Pack one value to bytes. Fails only if the value cannot be encoded.
pub fn pack(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value)?;
    Ok(buf)
}

/// Unpack one value from a complete byte buffer.
pub fn unpack(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut cursor = io::Cursor::new(bytes);
    Ok(rmpv::decode::read_value(&mut cursor)?)
}

// ── Streaming unpacker ────────────────────────────────────────────────────────

/// Incremental unpacker for content that arrives in pieces.
///
/// Feed bytes as they arrive, then ask for a value. Allocation grows
/// only with the bytes actually fed, never with a claimed message size;
/// `max_buffer_size` caps it.
pub struct StreamUnpacker {
    buf: BytesMut,
    max_buffer_size: usize,
}

impl StreamUnpacker {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_buffer_size,
        }
    }

    /// Append bytes to the pending buffer.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if self.buf.len() + bytes.len() > self.max_buffer_size {
            return Err(CodecError::BufferOverflow {
                limit: self.max_buffer_size,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Try to decode one value from the buffered bytes.
    ///
    /// Returns `Ok(None)` while the buffer holds only a prefix of a
    /// value; decoded bytes are consumed on success.
    pub fn try_unpack(&mut self) -> Result<Option<Value>, CodecError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = io::Cursor::new(&self.buf[..]);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buf.advance(consumed);
                Ok(Some(value))
            }
            Err(ref e) if is_incomplete(e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Bytes fed but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// An UnexpectedEof from the cursor means the value is merely incomplete,
/// not malformed.
fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(e)
        | rmpv::decode::Error::InvalidDataRead(e) => e.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[from] rmpv::encode::Error),

    #[error("failed to decode value: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("streamed content exceeds the {limit}-byte buffer limit")]
    BufferOverflow { limit: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
