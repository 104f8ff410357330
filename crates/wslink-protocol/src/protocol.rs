//! Link protocol model — how application code contributes RPC methods.
//!
//! A [`LinkProtocol`] is one handler object: it registers its methods
//! into the endpoint's registry and may opt into lifecycle hooks and
//! token validation. A [`ServerProtocol`] aggregates the server-level
//! protocol and its ordered sub-protocols plus the shared secret.
//!
//! Optional capabilities are plain trait methods with no-op defaults;
//! the endpoint inspects them once at construction, never per call.

use std::sync::Arc;

use futures::future::BoxFuture;
use rmpv::Value;

use crate::connection::ClientId;
use crate::registry::MethodRegistry;

/// Async token check. All registered validators must accept a token
/// for authentication to succeed.
pub type TokenValidator = Arc<dyn Fn(Value, ClientId) -> BoxFuture<'static, bool> + Send + Sync>;

/// One handler object contributing methods to an endpoint.
pub trait LinkProtocol: Send + Sync {
    /// Register this protocol's methods. Called once at endpoint
    /// construction; the registry is read-only afterward.
    fn register_methods(&self, registry: &mut MethodRegistry);

    /// A new connection was established.
    fn on_connect(&self, _client_id: ClientId) {}

    /// A connection closed.
    fn on_close(&self, _client_id: ClientId) {}

    /// Custom token validation, replacing the exact-secret check.
    fn token_validator(&self) -> Option<TokenValidator> {
        None
    }
}

/// The protocol set served by one endpoint: an optional server-level
/// protocol plus ordered sub-protocols.
#[derive(Default)]
pub struct ServerProtocol {
    secret: Option<String>,
    root: Option<Arc<dyn LinkProtocol>>,
    links: Vec<Arc<dyn LinkProtocol>>,
}

impl ServerProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared secret checked by `wslink.hello`.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set the server-level protocol. It registers last, so its
    /// methods shadow same-named sub-protocol methods.
    pub fn with_root(mut self, root: Arc<dyn LinkProtocol>) -> Self {
        self.root = Some(root);
        self
    }

    /// Append a sub-protocol. Registration order is append order.
    pub fn register_link_protocol(&mut self, protocol: Arc<dyn LinkProtocol>) {
        self.links.push(protocol);
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    /// All protocols in registration order: sub-protocols first, the
    /// server-level protocol last.
    pub fn protocols(&self) -> impl Iterator<Item = &Arc<dyn LinkProtocol>> {
        self.links.iter().chain(self.root.iter())
    }

    /// Build the flat method map for this protocol set.
    pub fn build_registry(&self) -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        for protocol in self.protocols() {
            protocol.register_methods(&mut registry);
        }
        tracing::debug!(methods = registry.len(), "method registry built");
        registry
    }

    /// Collect token validators, in registration order.
    pub fn token_validators(&self) -> Vec<TokenValidator> {
        self.protocols()
            .filter_map(|p| p.token_validator())
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
