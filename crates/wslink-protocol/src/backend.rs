//! Loopback backend — drive an endpoint without a real transport.
//!
//! A [`LoopbackClient`] plays the role of one remote peer: it feeds
//! frames into the endpoint and drains the frames the endpoint writes
//! back, reassembling them into envelopes. Integration tests use it to
//! exercise the whole engine in-process; embedders can use it the same
//! way to bridge a transport this workspace knows nothing about.

use bytes::Bytes;
use rmpv::Value;
use tokio::sync::mpsc;

use wslink_core::codec::CodecError;
use wslink_core::envelope::Envelope;
use wslink_core::wire::generate_chunks;
use wslink_core::ReassemblyPolicy;

use crate::connection::ClientId;
use crate::endpoint::WsEndpoint;
use crate::unchunker::UnChunker;

use std::sync::Arc;

/// Outbound channel depth per loopback connection.
const OUTBOUND_BUFFER: usize = 64;

pub struct LoopbackClient {
    endpoint: Arc<WsEndpoint>,
    client_id: ClientId,
    outbound_rx: mpsc::Receiver<Bytes>,
    /// Reassembles the frames the endpoint sends us.
    unchunker: UnChunker,
    /// Frame size used when chunking our own outgoing messages.
    max_frame_size: u32,
}

impl LoopbackClient {
    /// Open a connection against `endpoint`.
    pub fn connect(endpoint: Arc<WsEndpoint>) -> Self {
        Self::connect_with_frame_size(endpoint, 0)
    }

    /// Open a connection that splits its outgoing messages at
    /// `max_frame_size` bytes per frame (0 = never split).
    pub fn connect_with_frame_size(endpoint: Arc<WsEndpoint>, max_frame_size: u32) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let client_id = endpoint.connect(outbound_tx);
        Self {
            endpoint,
            client_id,
            outbound_rx,
            // Loopback receive has no authentication story of its own;
            // accept whatever the endpoint sends.
            unchunker: UnChunker::new(ReassemblyPolicy::Allocating, usize::MAX),
            max_frame_size,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Feed one raw frame to the endpoint, as a transport would.
    pub async fn send_frame(&self, frame: &[u8]) {
        self.endpoint.on_frame(self.client_id, frame).await;
    }

    /// Pack, chunk, and deliver one value to the endpoint.
    ///
    /// Delivery runs on its own task. The endpoint may emit more
    /// response frames than the outbound channel holds, so the caller
    /// must stay free to drain them while frames are still going in.
    pub async fn send_value(&self, value: &Value) -> Result<(), CodecError> {
        let packed = wslink_core::codec::pack(value)?;
        let endpoint = self.endpoint.clone();
        let client_id = self.client_id;
        let max_frame_size = self.max_frame_size;
        tokio::spawn(async move {
            match generate_chunks(Bytes::from(packed), max_frame_size) {
                Ok(frames) => {
                    for frame in frames {
                        endpoint.on_frame(client_id, &frame).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(%client_id, error = %e, "message not frameable");
                }
            }
        });
        Ok(())
    }

    /// Deliver one request envelope to the endpoint.
    pub async fn send_request(
        &self,
        rpc_id: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), CodecError> {
        let envelope = Envelope::request(rpc_id, method, args, vec![]);
        self.send_value(&envelope.to_value()).await
    }

    /// Perform the authentication handshake with `secret`.
    pub async fn send_hello(&self, secret: &str) -> Result<(), CodecError> {
        let token = Value::Map(vec![(Value::from("secret"), Value::from(secret))]);
        self.send_request(
            &format!("system:{}:0", self.client_id),
            wslink_core::envelope::HELLO_METHOD,
            vec![token],
        )
        .await
    }

    /// Await the next complete value from the endpoint. `None` once
    /// the endpoint side hangs up.
    pub async fn recv_value(&mut self) -> Option<Value> {
        loop {
            let frame = self.outbound_rx.recv().await?;
            match self.unchunker.process_chunk(&frame) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(client_id = %self.client_id, error = %e, "loopback reassembly failed");
                    return None;
                }
            }
        }
    }

    /// Await the next complete envelope from the endpoint.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        let value = self.recv_value().await?;
        match Envelope::from_value(&value) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!(client_id = %self.client_id, error = %e, "loopback envelope malformed");
                None
            }
        }
    }

    /// Close this connection on the endpoint.
    pub fn disconnect(self) {
        self.endpoint.disconnect(self.client_id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
