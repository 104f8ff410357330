//! Endpoint — the dispatch engine driving every connection.
//!
//! One `WsEndpoint` serves one listening route. The transport
//! collaborator calls [`WsEndpoint::connect`] / [`WsEndpoint::disconnect`]
//! around a connection's life and feeds every received binary frame to
//! [`WsEndpoint::on_frame`]. The endpoint reassembles frames into
//! envelopes, applies the authentication gate, dispatches requests to
//! registered methods, and writes result/error envelopes back through
//! each connection's ordered send path.
//!
//! Per-connection states: Connecting → Unauthenticated → Authenticated
//! → Closed. A connection authenticates at most once and never
//! de-authenticates; Closed is terminal and discards all state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rmpv::Value;
use tokio::sync::mpsc;

use wslink_core::codec::CodecError;
use wslink_core::envelope::{codes, Envelope, HELLO_METHOD, SYSTEM_ID_PREFIX};
use wslink_core::wire::{generate_chunks, ChunkError};
use wslink_core::{ReassemblyPolicy, WslinkConfig};

use crate::auth::Authenticator;
use crate::connection::{
    new_connection_table, ClientId, Connection, ConnectionClosed, ConnectionTable,
};
use crate::protocol::{LinkProtocol, ServerProtocol};
use crate::registry::{MethodRegistry, RpcArgs};

/// Sentinel for "no client has been active yet".
const NO_CLIENT: u64 = u64::MAX;

pub struct WsEndpoint {
    registry: MethodRegistry,
    auth: Authenticator,
    connections: ConnectionTable,
    /// Protocols in registration order, kept for lifecycle hooks.
    hooks: Vec<Arc<dyn LinkProtocol>>,
    next_client_id: AtomicU64,
    /// The connection that most recently triggered an RPC. Publishes
    /// can exclude it to avoid echoing a client's own change back.
    last_active: AtomicU64,
    max_frame_size: u32,
    auth_max_message_size: usize,
    max_message_size: usize,
    policy: ReassemblyPolicy,
}

impl WsEndpoint {
    /// Build an endpoint from a protocol set and configuration. The
    /// method registry and validator list are built here, once.
    pub fn new(server: ServerProtocol, config: &WslinkConfig) -> Arc<Self> {
        let registry = server.build_registry();
        let validators = server.token_validators();
        // A secret set on the protocol wins over the configured one.
        let secret = server
            .secret()
            .map(str::to_owned)
            .or_else(|| config.secret.clone());
        let hooks = server.protocols().cloned().collect();

        Arc::new(Self {
            registry,
            auth: Authenticator::new(secret, validators),
            connections: new_connection_table(),
            hooks,
            next_client_id: AtomicU64::new(0),
            last_active: AtomicU64::new(NO_CLIENT),
            max_frame_size: config.max_frame_size,
            auth_max_message_size: config.auth_max_message_size,
            max_message_size: config.max_message_size,
            policy: config.reassembly,
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Register a new connection. `outbound` is where the transport
    /// collaborator picks up frames to write to its socket.
    pub fn connect(&self, outbound: mpsc::Sender<Bytes>) -> ClientId {
        let client_id = ClientId::new(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(Connection::new(
            client_id,
            outbound,
            self.policy,
            self.auth_max_message_size,
        ));
        self.connections.insert(client_id, connection);

        for hook in &self.hooks {
            hook.on_connect(client_id);
        }

        tracing::info!(%client_id, "connection established");
        client_id
    }

    /// Tear down a connection. Reassembly and authentication state are
    /// discarded synchronously; an in-flight RPC for this client will
    /// notice the closed state and drop its response.
    pub fn disconnect(&self, client_id: ClientId) {
        let Some((_, connection)) = self.connections.remove(&client_id) else {
            return;
        };
        connection.mark_closed();
        self.auth.forget(client_id);

        for hook in &self.hooks {
            hook.on_close(client_id);
        }

        tracing::info!(%client_id, "connection closed");
    }

    /// Disconnect every connection, e.g. at server shutdown.
    pub fn disconnect_all(&self) {
        let client_ids: Vec<ClientId> = self.connections.iter().map(|e| *e.key()).collect();
        for client_id in client_ids {
            self.disconnect(client_id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Replace the shared secret for future hellos.
    pub async fn update_secret(&self, secret: Option<String>) {
        self.auth.update_secret(secret).await;
    }

    // ── Inbound path ─────────────────────────────────────────────────────────

    /// Process one received binary frame. Framing violations are fatal
    /// to the single in-flight message, never to the connection.
    pub async fn on_frame(&self, client_id: ClientId, frame: &[u8]) {
        let Some(connection) = self.connections.get(&client_id).map(|e| e.value().clone())
        else {
            tracing::debug!(%client_id, "frame for unknown connection dropped");
            return;
        };

        let decoded = {
            let mut unchunker = connection.unchunker.lock().await;
            match unchunker.process_chunk(frame) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(%client_id, error = %e, "message discarded");
                    return;
                }
            }
        };

        let Some(value) = decoded else {
            return; // message still incomplete
        };

        let envelope = match Envelope::from_value(&value) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(%client_id, error = %e, "malformed envelope discarded");
                return;
            }
        };

        self.handle_envelope(client_id, envelope).await;
    }

    async fn handle_envelope(&self, client_id: ClientId, envelope: Envelope) {
        tracing::debug!(%client_id, envelope = ?envelope.redacted(), "incoming message");

        match envelope {
            Envelope::Request {
                id,
                method,
                args,
                kwargs,
            } => self.handle_request(client_id, id, method, args, kwargs).await,
            // This engine is the callee; results and errors flowing in
            // have no pending call to correlate with.
            Envelope::Result { id, .. } | Envelope::Error { id, .. } => {
                tracing::debug!(%client_id, rpc_id = %id, "unsolicited response ignored");
            }
        }
    }

    async fn handle_request(
        &self,
        client_id: ClientId,
        rpc_id: String,
        method: String,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) {
        if rpc_id.starts_with(SYSTEM_ID_PREFIX) {
            self.handle_system(client_id, &rpc_id, &method, &args).await;
            return;
        }

        if !self.auth.is_authenticated(client_id) {
            self.send_error(
                client_id,
                &rpc_id,
                codes::AUTHENTICATION_ERROR,
                "Unauthorized: Skip message processing",
                None,
            )
            .await;
            return;
        }

        let Some(callable) = self.registry.resolve(&method) else {
            self.send_error(
                client_id,
                &rpc_id,
                codes::METHOD_NOT_FOUND,
                "Unregistered method called",
                Some(Value::from(method.as_str())),
            )
            .await;
            return;
        };

        self.last_active
            .store(client_id.as_u64(), Ordering::Relaxed);

        // The invocation may suspend; other connections keep being
        // serviced meanwhile.
        let outcome = callable(RpcArgs { args, kwargs }).await;

        let closed = self
            .connections
            .get(&client_id)
            .map(|e| e.value().is_closed())
            .unwrap_or(true);
        if closed {
            // Connection went away during the call.
            tracing::debug!(%client_id, rpc_id = %rpc_id, "response dropped, connection closed");
            return;
        }

        match outcome {
            Ok(result) => {
                self.send_result(client_id, &rpc_id, result, &method).await;
            }
            Err(fault) => {
                tracing::error!(
                    %client_id,
                    method = %method,
                    fault = %fault,
                    trace = fault.trace.as_deref().unwrap_or(""),
                    "rpc handler fault"
                );
                let data = Value::Map(vec![
                    (Value::from("method"), Value::from(method.as_str())),
                    (Value::from("exception"), Value::from(fault.message.as_str())),
                    (
                        Value::from("trace"),
                        Value::from(fault.trace.as_deref().unwrap_or("")),
                    ),
                ]);
                self.send_error(
                    client_id,
                    &rpc_id,
                    codes::EXCEPTION_ERROR,
                    "Exception raised",
                    Some(data),
                )
                .await;
            }
        }
    }

    /// Protocol-internal requests: only `wslink.hello` exists.
    async fn handle_system(
        &self,
        client_id: ClientId,
        rpc_id: &str,
        method: &str,
        args: &[Value],
    ) {
        if method != HELLO_METHOD {
            self.send_error(
                client_id,
                rpc_id,
                codes::METHOD_NOT_FOUND,
                "Unknown system method called",
                None,
            )
            .await;
            return;
        }

        if !self.auth.handle_hello(args, client_id).await {
            self.send_error(
                client_id,
                rpc_id,
                codes::AUTHENTICATION_ERROR,
                "Authentication failed",
                None,
            )
            .await;
            return;
        }

        // The tiny pre-auth cap has done its job; lift it.
        if let Some(connection) = self.connections.get(&client_id) {
            connection
                .unchunker
                .lock()
                .await
                .set_max_message_size(self.max_message_size);
        }

        let result = Value::Map(vec![
            (Value::from("clientID"), Value::from(client_id.wire_id())),
            (
                Value::from("maxMsgSize"),
                Value::from(self.max_message_size as u64),
            ),
        ]);
        self.send_result(client_id, rpc_id, result, HELLO_METHOD).await;
    }

    // ── Outbound path ────────────────────────────────────────────────────────

    async fn send_result(&self, client_id: ClientId, rpc_id: &str, result: Value, method: &str) {
        let envelope = Envelope::result(rpc_id, result);
        match self.send_envelope(client_id, &envelope).await {
            Ok(()) => {}
            Err(SendError::Pack(e)) => {
                // The unencodable result may be arbitrarily large;
                // report the method, not the value.
                tracing::warn!(%client_id, method = %method, error = %e, "result not serializable");
                self.send_error(
                    client_id,
                    rpc_id,
                    codes::RESULT_SERIALIZE_ERROR,
                    "Method result cannot be serialized",
                    Some(Value::from(method)),
                )
                .await;
            }
            Err(e) => {
                tracing::debug!(%client_id, error = %e, "result not delivered");
            }
        }
    }

    async fn send_error(
        &self,
        client_id: ClientId,
        rpc_id: &str,
        code: i64,
        message: &str,
        data: Option<Value>,
    ) {
        let envelope = Envelope::error(rpc_id, code, message, data);
        if let Err(e) = self.send_envelope(client_id, &envelope).await {
            tracing::debug!(%client_id, error = %e, "error envelope not delivered");
        }
    }

    /// Pack, chunk, and write one envelope to one connection.
    async fn send_envelope(
        &self,
        client_id: ClientId,
        envelope: &Envelope,
    ) -> Result<(), SendError> {
        let Some(connection) = self.connections.get(&client_id).map(|e| e.value().clone())
        else {
            return Err(SendError::UnknownClient(client_id));
        };

        let packed = envelope.pack().map_err(SendError::Pack)?;
        let frames = generate_chunks(Bytes::from(packed), self.max_frame_size)?;
        connection.send_frames(frames).await?;
        Ok(())
    }

    // ── Publish support ──────────────────────────────────────────────────────

    /// The currently-authenticated connections, optionally narrowed to
    /// one client or purged of the last-active one.
    fn authenticated_connections(
        &self,
        target: Option<ClientId>,
        skip_last_active: bool,
    ) -> Vec<Arc<Connection>> {
        let last_active = self.last_active.load(Ordering::Relaxed);

        self.connections
            .iter()
            .filter(|e| self.auth.is_authenticated(*e.key()))
            .filter(|e| target.map_or(true, |t| *e.key() == t))
            .filter(|e| !(skip_last_active && e.key().as_u64() == last_active))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Fan one result envelope out to authenticated connections.
    /// Best-effort: each recipient is served on its own task, so a
    /// failed or stalled send never delays or fails the rest.
    pub async fn broadcast_result(
        &self,
        rpc_id: &str,
        payload: Value,
        target: Option<ClientId>,
        skip_last_active: bool,
    ) {
        let recipients = self.authenticated_connections(target, skip_last_active);
        if recipients.is_empty() {
            return;
        }

        let envelope = Envelope::result(rpc_id, payload);
        let packed = match envelope.pack() {
            Ok(packed) => Bytes::from(packed),
            Err(e) => {
                tracing::warn!(rpc_id = %rpc_id, error = %e, "publish payload not serializable");
                return;
            }
        };

        for connection in recipients {
            // Each recipient gets its own chunk sequence; message ids
            // are scoped per connection.
            let rpc_id = rpc_id.to_owned();
            let packed = packed.clone();
            let max_frame_size = self.max_frame_size;
            tokio::spawn(async move {
                let frames = match generate_chunks(packed, max_frame_size) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!(rpc_id = %rpc_id, error = %e, "publish payload not frameable");
                        return;
                    }
                };
                if let Err(e) = connection.send_frames(frames).await {
                    tracing::warn!(client_id = %e.0, rpc_id = %rpc_id, "publish delivery failed");
                }
            });
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no connection for {0}")]
    UnknownClient(ClientId),

    #[error(transparent)]
    Closed(#[from] ConnectionClosed),

    #[error(transparent)]
    Pack(CodecError),

    #[error(transparent)]
    Frame(#[from] ChunkError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
