//! wslink wire format — chunked framing for logical messages.
//!
//! Every logical message (one packed envelope) travels as one or more
//! binary frames. Each frame starts with a fixed 12-byte header that
//! names the in-flight message, the position of this frame's content
//! within it, and the message's total size. The receiver can route and
//! validate a frame before touching its content.
//!
//! All header integers are little-endian on the wire. The header type
//! is #[repr(C, packed)] with zerocopy derives for allocation-free
//! serialization; there is no unsafe code in this module.

use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Chunk Header ─────────────────────────────────────────────────────────────

/// Identifies one logical in-flight message. Generated randomly by the
/// sender, once per message. Opaque to the receiver beyond equality.
pub type MessageId = [u8; 4];

/// Header length in bytes: 4-byte id + 4-byte offset + 4-byte total size.
pub const HEADER_LENGTH: usize = 12;

/// The fixed header preceding every frame's content.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ChunkHeader {
    /// Random per-message token. All frames of one logical message
    /// carry the same id; ids of concurrent messages may interleave.
    pub id: MessageId,

    /// Byte offset of this frame's content within the logical message.
    pub offset: U32<LittleEndian>,

    /// Total size of the logical message in bytes. Identical in every
    /// frame of one message; a mismatch is fatal to that message.
    pub total_size: U32<LittleEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkHeader, [u8; 12]);

impl ChunkHeader {
    pub fn new(id: MessageId, offset: u32, total_size: u32) -> Self {
        Self {
            id,
            offset: U32::new(offset),
            total_size: U32::new(total_size),
        }
    }
}

/// Decode the header of one frame. Pure; the frame's content is not read.
pub fn decode_header(frame: &[u8]) -> Result<(MessageId, u32, u32), ChunkError> {
    let header = ChunkHeader::read_from_prefix(frame)
        .ok_or(ChunkError::TruncatedHeader(frame.len()))?;
    Ok((header.id, header.offset.get(), header.total_size.get()))
}

// ── Chunk generation ─────────────────────────────────────────────────────────

/// Split a message into transport-sized frames.
///
/// `max_size` bounds the whole frame including its 12-byte header; a
/// value of 0 means "never split" and yields a single frame carrying
/// the entire message. Frames must be sent in order on one connection
/// and must not interleave with frames of another outgoing message on
/// the same connection.
///
/// A message longer than the u32 total-size field can carry is
/// rejected rather than letting the length wrap. An empty message
/// yields no frames.
pub fn generate_chunks(message: Bytes, max_size: u32) -> Result<Chunks, ChunkError> {
    if message.len() > u32::MAX as usize {
        return Err(ChunkError::MessageTooLong(message.len()));
    }

    let max_content = if max_size == 0 {
        message.len()
    } else {
        usize::max((max_size as usize).saturating_sub(HEADER_LENGTH), 1)
    };

    Ok(Chunks {
        id: rand::random(),
        message,
        offset: 0,
        max_content,
    })
}

/// Lazy, finite, non-restartable frame sequence for one message.
#[derive(Debug)]
pub struct Chunks {
    id: MessageId,
    message: Bytes,
    offset: usize,
    max_content: usize,
}

impl Chunks {
    /// The random message id stamped on every frame of this sequence.
    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let total = self.message.len();
        if self.offset >= total {
            return None;
        }

        let end = usize::min(self.offset + self.max_content, total);
        let header = ChunkHeader::new(self.id, self.offset as u32, total as u32);

        let mut frame = BytesMut::with_capacity(HEADER_LENGTH + (end - self.offset));
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(&self.message[self.offset..end]);

        self.offset = end;
        Some(frame.freeze())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("frame of {0} bytes is shorter than the {HEADER_LENGTH}-byte header")]
    TruncatedHeader(usize),

    #[error("message of {0} bytes does not fit the u32 total-size field")]
    MessageTooLong(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
