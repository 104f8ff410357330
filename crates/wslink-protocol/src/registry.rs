//! Method registry — flat name→callable map used for RPC dispatch.
//!
//! Handlers register explicitly at endpoint construction (no runtime
//! reflection); the map is read-only afterward. Registration order is
//! the collision rule: the last registration under a name wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use rmpv::Value;

/// Positional and keyword arguments of one RPC call.
#[derive(Debug, Clone, Default)]
pub struct RpcArgs {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

/// A fault raised by handler code. Converted to `EXCEPTION_ERROR` at
/// the dispatch boundary; never tears down the connection.
#[derive(Debug, Clone)]
pub struct RpcFault {
    pub message: String,
    pub trace: Option<String>,
}

impl RpcFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Some(trace.into()),
        }
    }
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RpcFault {}

/// What an invocation eventually produces.
pub type MethodResult = Result<Value, RpcFault>;

/// A suspended invocation. The dispatch engine awaits it without
/// blocking other connections.
pub type MethodFuture = BoxFuture<'static, MethodResult>;

/// A bound handler callable.
pub type RpcMethod = Arc<dyn Fn(RpcArgs) -> MethodFuture + Send + Sync>;

/// Flat method map. Built once per endpoint, then read-only.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, RpcMethod>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a callable under a method name. A later registration
    /// under the same name shadows the earlier one.
    pub fn register(&mut self, name: impl Into<String>, method: RpcMethod) {
        let name = name.into();
        if self.methods.insert(name.clone(), method).is_some() {
            tracing::debug!(method = %name, "method re-registered, later registration wins");
        }
    }

    /// Convenience wrapper for async closures.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(RpcArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MethodResult> + Send + 'static,
    {
        self.register(name, Arc::new(move |args| f(args).boxed()));
    }

    pub fn resolve(&self, name: &str) -> Option<RpcMethod> {
        self.methods.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered names, unordered.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
