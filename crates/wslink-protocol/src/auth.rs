//! Authenticator — gates every non-system call behind `wslink.hello`.
//!
//! A connection starts unauthenticated. The first thing its client
//! must do is send a hello request whose first argument carries a
//! `"secret"` token; the token must pass every registered validator,
//! or — when none are registered — match the shared secret exactly.
//! Once a connection authenticates it stays authenticated for its
//! lifetime.

use dashmap::DashSet;
use rmpv::Value;
use tokio::sync::RwLock;

use crate::connection::ClientId;
use crate::protocol::TokenValidator;

pub struct Authenticator {
    secret: RwLock<Option<String>>,
    validators: Vec<TokenValidator>,
    authenticated: DashSet<ClientId>,
}

impl Authenticator {
    pub fn new(secret: Option<String>, validators: Vec<TokenValidator>) -> Self {
        Self {
            secret: RwLock::new(secret),
            validators,
            authenticated: DashSet::new(),
        }
    }

    /// Replace the shared secret. Connections already authenticated
    /// are unaffected.
    pub async fn update_secret(&self, secret: Option<String>) {
        *self.secret.write().await = secret;
    }

    /// Process the hello arguments for a connecting client. On success
    /// the client is marked authenticated.
    pub async fn handle_hello(&self, args: &[Value], client_id: ClientId) -> bool {
        let Some(Value::Map(entries)) = args.first() else {
            tracing::debug!(%client_id, "hello without an argument map");
            return false;
        };
        let Some(token) = entries
            .iter()
            .find(|(k, _)| k.as_str() == Some("secret"))
            .map(|(_, v)| v)
        else {
            tracing::debug!(%client_id, "hello argument map has no 'secret' key");
            return false;
        };

        if !self.validate_token(token, client_id).await {
            tracing::warn!(%client_id, "authentication failed");
            return false;
        }

        self.authenticated.insert(client_id);
        tracing::info!(%client_id, "client authenticated");
        true
    }

    /// Check a token. Validators take precedence over the shared
    /// secret; the first validator to reject rejects overall.
    pub async fn validate_token(&self, token: &Value, client_id: ClientId) -> bool {
        if self.validators.is_empty() {
            let secret = self.secret.read().await;
            return match (secret.as_deref(), token.as_str()) {
                (Some(expected), Some(given)) => expected == given,
                // No secret configured and no validators: nothing can
                // vouch for the token.
                _ => false,
            };
        }

        for validator in &self.validators {
            if !validator(token.clone(), client_id).await {
                return false;
            }
        }
        true
    }

    pub fn is_authenticated(&self, client_id: ClientId) -> bool {
        self.authenticated.contains(&client_id)
    }

    /// Forget a connection's state. Only called at disconnect —
    /// authentication is monotonic while a connection lives.
    pub fn forget(&self, client_id: ClientId) {
        self.authenticated.remove(&client_id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
