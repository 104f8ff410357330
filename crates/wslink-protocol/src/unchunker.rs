//! Message reassembly — turns incoming frames back into decoded messages.
//!
//! Each connection owns one [`UnChunker`]. Two interchangeable policies:
//!
//! * [`AllocatingUnChunker`] allocates the declared total size on the
//!   first frame and tolerates any chunk arrival order. Cheap and
//!   simple, but an attacker could claim an enormous size, so the
//!   declared size is capped until the connection authenticates.
//! * [`StreamUnChunker`] requires in-order delivery and feeds content
//!   straight into a streaming unpacker; memory grows only with bytes
//!   actually received.
//!
//! Every failure here is fatal to the single in-flight message — its
//! state is discarded and the sender gets no response — and never to
//! the connection.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rmpv::Value;

use wslink_core::codec::{self, CodecError, StreamUnpacker};
use wslink_core::config::ReassemblyPolicy;
use wslink_core::wire::{self, ChunkError, MessageId, HEADER_LENGTH};

// ── Policy dispatch ───────────────────────────────────────────────────────────

/// Per-connection reassembler, wrapping the configured policy.
pub enum UnChunker {
    Allocating(AllocatingUnChunker),
    Streaming(StreamUnChunker),
}

impl UnChunker {
    pub fn new(policy: ReassemblyPolicy, max_message_size: usize) -> Self {
        match policy {
            ReassemblyPolicy::Allocating => {
                UnChunker::Allocating(AllocatingUnChunker::new(max_message_size))
            }
            ReassemblyPolicy::Streaming => UnChunker::Streaming(StreamUnChunker::new()),
        }
    }

    /// Consume one frame. Returns the decoded message once the frame
    /// completing it arrives.
    pub fn process_chunk(&mut self, frame: &[u8]) -> Result<Option<Value>, ReassemblyError> {
        match self {
            UnChunker::Allocating(inner) => inner.process_chunk(frame),
            UnChunker::Streaming(inner) => inner.process_chunk(frame),
        }
    }

    /// Change the size cap. Used to lift the pre-authentication limit
    /// once the connection authenticates.
    pub fn set_max_message_size(&mut self, size: usize) {
        match self {
            UnChunker::Allocating(inner) => inner.max_message_size = size,
            // The streaming policy allocates per received byte and caps
            // its buffer at each message's declared size; the
            // pre-auth cap has nothing to protect.
            UnChunker::Streaming(_) => {}
        }
    }

    /// Drop all in-flight reassembly state. Used on connection errors
    /// and at disconnect.
    pub fn release_pending_messages(&mut self) {
        match self {
            UnChunker::Allocating(inner) => inner.pending.clear(),
            UnChunker::Streaming(inner) => inner.pending.clear(),
        }
    }

    /// Number of messages currently mid-reassembly.
    pub fn pending_count(&self) -> usize {
        match self {
            UnChunker::Allocating(inner) => inner.pending.len(),
            UnChunker::Streaming(inner) => inner.pending.len(),
        }
    }
}

// ── Allocating policy ─────────────────────────────────────────────────────────

struct PendingMessage {
    received_size: usize,
    content: Vec<u8>,
}

pub struct AllocatingUnChunker {
    pending: HashMap<MessageId, PendingMessage>,
    max_message_size: usize,
}

impl AllocatingUnChunker {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_message_size,
        }
    }

    pub fn process_chunk(&mut self, frame: &[u8]) -> Result<Option<Value>, ReassemblyError> {
        let (id, offset, total_size) = wire::decode_header(frame)?;
        let content = &frame[HEADER_LENGTH..];

        let pending = match self.pending.entry(id) {
            Entry::Vacant(slot) => {
                // Reject before allocating: nothing exists yet for this
                // id, so nothing needs discarding.
                if total_size as usize > self.max_message_size {
                    return Err(ReassemblyError::MessageTooLarge {
                        id: hex::encode(id),
                        total_size,
                        limit: self.max_message_size,
                    });
                }
                slot.insert(PendingMessage {
                    received_size: 0,
                    content: vec![0; total_size as usize],
                })
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if total_size as usize != pending.content.len() {
            let expected = pending.content.len() as u32;
            self.pending.remove(&id);
            return Err(ReassemblyError::TotalSizeMismatch {
                id: hex::encode(id),
                expected,
                got: total_size,
            });
        }

        let end = offset as usize + content.len();
        if end > pending.content.len() {
            self.pending.remove(&id);
            return Err(ReassemblyError::ChunkOverrun {
                id: hex::encode(id),
                offset,
                len: content.len(),
                total_size,
            });
        }

        pending.content[offset as usize..end].copy_from_slice(content);
        pending.received_size += content.len();

        if pending.received_size >= total_size as usize {
            let complete = std::mem::take(&mut pending.content);
            self.pending.remove(&id);
            return Ok(Some(codec::unpack(&complete)?));
        }

        Ok(None)
    }
}

// ── Streaming policy ──────────────────────────────────────────────────────────

struct StreamPendingMessage {
    received_size: usize,
    total_size: u32,
    unpacker: StreamUnpacker,
}

pub struct StreamUnChunker {
    pending: HashMap<MessageId, StreamPendingMessage>,
}

impl StreamUnChunker {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    pub fn process_chunk(&mut self, frame: &[u8]) -> Result<Option<Value>, ReassemblyError> {
        let (id, offset, total_size) = wire::decode_header(frame)?;
        let content = &frame[HEADER_LENGTH..];

        let pending = self.pending.entry(id).or_insert_with(|| StreamPendingMessage {
            received_size: 0,
            total_size,
            unpacker: StreamUnpacker::new(total_size as usize),
        });

        if offset as usize != pending.received_size {
            let expected = pending.received_size;
            self.pending.remove(&id);
            return Err(ReassemblyError::OutOfOrder {
                id: hex::encode(id),
                expected,
                got: offset,
            });
        }

        if total_size != pending.total_size {
            let expected = pending.total_size;
            self.pending.remove(&id);
            return Err(ReassemblyError::TotalSizeMismatch {
                id: hex::encode(id),
                expected,
                got: total_size,
            });
        }

        if let Err(e) = pending.unpacker.feed(content) {
            self.pending.remove(&id);
            return Err(e.into());
        }
        pending.received_size += content.len();

        let decoded = match pending.unpacker.try_unpack() {
            Ok(decoded) => decoded,
            Err(e) => {
                self.pending.remove(&id);
                return Err(e.into());
            }
        };

        let received_size = pending.received_size;
        let expected = pending.total_size;

        match decoded {
            Some(value) => {
                self.pending.remove(&id);
                if received_size < expected as usize {
                    // One logical message maps to exactly one object;
                    // an object completing early means the stream would
                    // carry more than one.
                    return Err(ReassemblyError::PrematureObject {
                        id: hex::encode(id),
                        expected,
                        received: received_size,
                    });
                }
                Ok(Some(value))
            }
            None => {
                if received_size >= expected as usize {
                    self.pending.remove(&id);
                    return Err(ReassemblyError::IncompleteObject {
                        id: hex::encode(id),
                        total_size: expected,
                    });
                }
                Ok(None)
            }
        }
    }
}

impl Default for StreamUnChunker {
    fn default() -> Self {
        Self::new()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    Frame(#[from] ChunkError),

    #[error("message {id}: declared size {total_size} exceeds the {limit}-byte limit")]
    MessageTooLarge {
        id: String,
        total_size: u32,
        limit: usize,
    },

    #[error("message {id}: chunk declares total size {got}, previous chunks declared {expected}")]
    TotalSizeMismatch { id: String, expected: u32, got: u32 },

    #[error("message {id}: chunk at offset {offset} with {len} bytes overruns declared size {total_size}")]
    ChunkOverrun {
        id: String,
        offset: u32,
        len: usize,
        total_size: u32,
    },

    #[error("message {id}: expected chunk at offset {expected}, received offset {got}")]
    OutOfOrder {
        id: String,
        expected: usize,
        got: u32,
    },

    #[error("message {id}: object complete after {received} of {expected} bytes — one message must decode to exactly one object")]
    PrematureObject {
        id: String,
        expected: u32,
        received: usize,
    },

    #[error("message {id}: all {total_size} bytes received but no complete object decoded")]
    IncompleteObject { id: String, total_size: u32 },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
