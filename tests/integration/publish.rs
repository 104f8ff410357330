//! Topic publishing: fan-out, caller exclusion, targeting, and the
//! authentication boundary.

use crate::*;
use wslink_core::envelope::PUBLISH_ID_PREFIX;

/// Await the next publish envelope for `topic` and return its payload.
async fn recv_publish(client: &mut LoopbackClient, topic: &str) -> Value {
    let Envelope::Result { id, result } = recv(client).await else {
        panic!("expected a publish envelope");
    };
    let prefix = format!("{PUBLISH_ID_PREFIX}{topic}:");
    assert!(id.starts_with(&prefix), "unexpected id {id}");
    result
}

#[tokio::test]
async fn publish_skips_the_caller_and_reaches_everyone_else() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut caller = authed_client(&endpoint).await;
    let mut listener_a = authed_client(&endpoint).await;
    let mut listener_b = authed_client(&endpoint).await;

    caller
        .send_request("rpc:c0:1", "test.notify", vec![Value::from("ping")])
        .await
        .unwrap();
    assert!(matches!(recv(&mut caller).await, Envelope::Result { .. }));

    assert_eq!(recv_publish(&mut listener_a, "topic").await, Value::from("ping"));
    assert_eq!(recv_publish(&mut listener_b, "topic").await, Value::from("ping"));
    expect_silence(&mut caller).await;
}

#[tokio::test]
async fn unauthenticated_connections_never_hear_publishes() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut caller = authed_client(&endpoint).await;
    let mut stranger = LoopbackClient::connect(endpoint);

    caller
        .send_request("rpc:c0:1", "test.notify", vec![Value::from("ping")])
        .await
        .unwrap();
    assert!(matches!(recv(&mut caller).await, Envelope::Result { .. }));

    expect_silence(&mut stranger).await;
}

#[tokio::test]
async fn targeted_publish_reaches_only_the_target() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut chosen = authed_client(&endpoint).await;
    let mut other = authed_client(&endpoint).await;

    publish.publish(
        "progress",
        Value::from(42),
        Some(chosen.client_id()),
        false,
    );

    assert_eq!(recv_publish(&mut chosen, "progress").await, Value::from(42));
    expect_silence(&mut other).await;
}

#[tokio::test]
async fn direct_publish_without_exclusion_reaches_all_authed_clients() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut first = authed_client(&endpoint).await;
    let mut second = authed_client(&endpoint).await;

    publish.publish("news", Value::from("update"), None, false);

    assert_eq!(recv_publish(&mut first, "news").await, Value::from("update"));
    assert_eq!(recv_publish(&mut second, "news").await, Value::from("update"));
}

#[tokio::test]
async fn stalled_recipient_does_not_delay_the_others() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve_with_config(
        &publish,
        WslinkConfig {
            max_frame_size: 100,
            ..WslinkConfig::default()
        },
    );

    // This client authenticates and then never drains its outbound
    // channel, so a multi-frame publish toward it stalls mid-send.
    let mut stalled = LoopbackClient::connect(endpoint.clone());
    stalled.send_hello(SECRET).await.unwrap();
    assert!(matches!(recv(&mut stalled).await, Envelope::Result { .. }));
    let mut healthy = authed_client(&endpoint).await;

    // ~91 frames at 88 content bytes each, well past the channel depth.
    let blob = Value::Binary(vec![1u8; 8_000]);
    publish.publish("news", blob.clone(), None, false);

    assert_eq!(recv_publish(&mut healthy, "news").await, blob);
    drop(stalled);
}

#[tokio::test]
async fn unregistered_endpoint_stops_receiving() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = authed_client(&endpoint).await;

    publish.unregister_endpoint(&endpoint);
    publish.publish("news", Value::from("gone"), None, false);
    expect_silence(&mut client).await;
}
