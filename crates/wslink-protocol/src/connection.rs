//! Per-connection state — identity, outbound frame path, reassembly.
//!
//! The transport collaborator owns the socket; this module owns
//! everything the engine needs to know about one connected client.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use wslink_core::config::ReassemblyPolicy;

use crate::unchunker::UnChunker;

// ── Client identity ───────────────────────────────────────────────────────────

/// Opaque per-connection identifier, unique within an endpoint for the
/// lifetime of the process. Displayed as `c<n>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        ClientId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The wire form sent back in the hello result.
    pub fn wire_id(&self) -> String {
        format!("c{}", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// One live connection: its id, its outbound frame channel, and its
/// reassembly state. Created at connect, dropped at disconnect.
pub struct Connection {
    pub client_id: ClientId,
    outbound: mpsc::Sender<Bytes>,
    /// Guards the outbound path so one message's chunk sequence is
    /// written atomically — chunks of two outgoing messages must never
    /// interleave on one connection.
    send_lock: Mutex<()>,
    closed: AtomicBool,
    /// Incoming reassembly state. Frames for one connection are
    /// processed in arrival order under this lock.
    pub unchunker: Mutex<UnChunker>,
}

impl Connection {
    pub fn new(
        client_id: ClientId,
        outbound: mpsc::Sender<Bytes>,
        policy: ReassemblyPolicy,
        max_message_size: usize,
    ) -> Self {
        Self {
            client_id,
            outbound,
            send_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            unchunker: Mutex::new(UnChunker::new(policy, max_message_size)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed. In-flight RPCs completing after this point drop
    /// their responses instead of writing to a dead transport.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Write one message's frames to the transport, atomically with
    /// respect to other sends on this connection.
    pub async fn send_frames<I>(&self, frames: I) -> Result<(), ConnectionClosed>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let _guard = self.send_lock.lock().await;
        if self.is_closed() {
            return Err(ConnectionClosed(self.client_id));
        }
        for frame in frames {
            self.outbound
                .send(frame)
                .await
                .map_err(|_| ConnectionClosed(self.client_id))?;
        }
        Ok(())
    }
}

/// Connections by client id, shared across tasks.
pub type ConnectionTable = Arc<DashMap<ClientId, Arc<Connection>>>;

pub fn new_connection_table() -> ConnectionTable {
    Arc::new(DashMap::new())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ClientId);

// ── Tests ─────────────────────────────────────────────────────────────────────
