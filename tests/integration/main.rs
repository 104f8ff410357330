//! wslink integration test harness.
//!
//! These tests drive a full endpoint — reassembly, authentication,
//! dispatch, publish — through the in-process loopback backend. No
//! sockets are involved; the loopback client stands in for the
//! transport collaborator on both directions.

use std::sync::Arc;
use std::time::Duration;

use rmpv::Value;

use wslink_core::envelope::Envelope;
use wslink_core::WslinkConfig;
use wslink_protocol::{
    LinkProtocol, LoopbackClient, MethodRegistry, PublishManager, RpcArgs, RpcFault,
    ServerProtocol, WsEndpoint,
};

mod chunking;
mod publish;
mod rpc;

pub const SECRET: &str = "s3cr3t";

pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// The protocol under test: arithmetic, echo, a deliberate fault, and
/// a method that publishes back out.
pub struct TestProtocol {
    publish: Arc<PublishManager>,
}

impl LinkProtocol for TestProtocol {
    fn register_methods(&self, registry: &mut MethodRegistry) {
        registry.register_fn("test.sum", |call: RpcArgs| async move {
            let total: i64 = call
                .args
                .first()
                .and_then(Value::as_array)
                .map(|nums| nums.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            Ok(Value::from(total))
        });

        registry.register_fn("test.echo", |call: RpcArgs| async move {
            call.args
                .into_iter()
                .next()
                .ok_or_else(|| RpcFault::new("nothing to echo"))
        });

        registry.register_fn("test.boom", |_call: RpcArgs| async move {
            Err::<Value, _>(RpcFault::with_trace("boom", "test.boom, integration harness"))
        });

        let publish = self.publish.clone();
        registry.register_fn("test.notify", move |call: RpcArgs| {
            let publish = publish.clone();
            async move {
                let payload = call.args.into_iter().next().unwrap_or(Value::Nil);
                publish.publish("topic", payload, None, true);
                Ok(Value::Nil)
            }
        });
    }
}

/// Build an endpoint serving [`TestProtocol`], registered with
/// `publish`, using the default configuration plus `SECRET`.
pub fn serve(publish: &Arc<PublishManager>) -> Arc<WsEndpoint> {
    serve_with_config(publish, WslinkConfig::default())
}

pub fn serve_with_config(publish: &Arc<PublishManager>, config: WslinkConfig) -> Arc<WsEndpoint> {
    init_tracing();
    let mut server = ServerProtocol::new().with_secret(SECRET);
    server.register_link_protocol(Arc::new(TestProtocol {
        publish: publish.clone(),
    }));
    let endpoint = WsEndpoint::new(server, &config);
    publish.register_endpoint(endpoint.clone());
    endpoint
}

/// Await the next envelope, failing the test after five seconds.
pub async fn recv(client: &mut LoopbackClient) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), client.recv_envelope())
        .await
        .expect("timed out waiting for an envelope")
        .expect("endpoint hung up")
}

/// Assert that nothing arrives within a short window.
pub async fn expect_silence(client: &mut LoopbackClient) {
    let outcome =
        tokio::time::timeout(Duration::from_millis(200), client.recv_envelope()).await;
    assert!(outcome.is_err(), "expected silence, got {outcome:?}");
}

/// Connect and complete the handshake, returning the ready client.
pub async fn authed_client(endpoint: &Arc<WsEndpoint>) -> LoopbackClient {
    let mut client = LoopbackClient::connect(endpoint.clone());
    client.send_hello(SECRET).await.expect("hello packs");
    match recv(&mut client).await {
        Envelope::Result { .. } => client,
        other => panic!("handshake failed: {other:?}"),
    }
}

/// Pull a field out of a result map.
pub fn map_field<'a>(result: &'a Value, key: &str) -> Option<&'a Value> {
    result.as_map()?.iter().find_map(|(k, v)| {
        if k.as_str() == Some(key) {
            Some(v)
        } else {
            None
        }
    })
}
