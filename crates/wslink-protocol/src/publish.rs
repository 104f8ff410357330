//! Publish manager — fans topic-addressed events out to clients.
//!
//! One `PublishManager` exists per process, constructed at startup and
//! handed by reference to every endpoint and to application handlers.
//! Delivery is fire-and-forget: each publish spawns a send per
//! endpoint, and failure toward one connection never blocks or fails
//! delivery to the others. Nothing is persisted; a client that is not
//! connected and authenticated at publish time simply misses the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rmpv::Value;

use wslink_core::envelope::PUBLISH_ID_PREFIX;

use crate::connection::ClientId;
use crate::endpoint::WsEndpoint;

#[derive(Default)]
pub struct PublishManager {
    endpoints: RwLock<Vec<Arc<WsEndpoint>>>,
    publish_count: AtomicU64,
}

impl PublishManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint to receive published events.
    pub fn register_endpoint(&self, endpoint: Arc<WsEndpoint>) {
        let mut endpoints = match self.endpoints.write() {
            Ok(endpoints) => endpoints,
            Err(poisoned) => poisoned.into_inner(),
        };
        endpoints.push(endpoint);
    }

    /// Remove a previously registered endpoint.
    pub fn unregister_endpoint(&self, endpoint: &Arc<WsEndpoint>) {
        let mut endpoints = match self.endpoints.write() {
            Ok(endpoints) => endpoints,
            Err(poisoned) => poisoned.into_inner(),
        };
        endpoints.retain(|e| !Arc::ptr_eq(e, endpoint));
    }

    pub fn endpoint_count(&self) -> usize {
        match self.endpoints.read() {
            Ok(endpoints) => endpoints.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Send `payload` to subscribed clients as a result envelope whose
    /// id is `publish:<topic>:<n>` with a process-monotonic counter.
    ///
    /// `target` narrows delivery to one client; `skip_last_active`
    /// excludes the connection that triggered the most recent RPC, so
    /// a client does not hear its own state change echoed back.
    pub fn publish(
        &self,
        topic: &str,
        payload: Value,
        target: Option<ClientId>,
        skip_last_active: bool,
    ) {
        let count = self.publish_count.fetch_add(1, Ordering::Relaxed);
        let rpc_id = format!("{PUBLISH_ID_PREFIX}{topic}:{count}");

        let endpoints: Vec<Arc<WsEndpoint>> = match self.endpoints.read() {
            Ok(endpoints) => endpoints.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        for endpoint in endpoints {
            let rpc_id = rpc_id.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                endpoint
                    .broadcast_result(&rpc_id, payload, target, skip_last_active)
                    .await;
            });
        }
    }

    /// Attachment passthrough. Binary payloads ride natively inside
    /// the packed object graph, so there is nothing to register; the
    /// call exists so handler code reads the same as it did when
    /// attachments were a side channel.
    pub fn add_attachment(&self, payload: Value) -> Value {
        payload
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
