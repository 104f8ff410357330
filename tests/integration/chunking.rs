//! Framing across the loopback: split messages, size caps, and the
//! streaming reassembly policy.

use crate::*;
use wslink_core::{ReassemblyPolicy, WslinkConfig};

fn small_frames() -> WslinkConfig {
    WslinkConfig {
        max_frame_size: 100,
        ..WslinkConfig::default()
    }
}

#[tokio::test]
async fn large_payload_echoes_bit_for_bit_across_small_frames() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve_with_config(&publish, small_frames());
    let mut client = LoopbackClient::connect_with_frame_size(endpoint, 100);

    client.send_hello(SECRET).await.unwrap();
    assert!(matches!(recv(&mut client).await, Envelope::Result { .. }));

    // 10 000 bytes, well past both the frame size and the pre-auth cap.
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    client
        .send_request("rpc:c0:1", "test.echo", vec![Value::Binary(payload.clone())])
        .await
        .unwrap();

    let Envelope::Result { id, result } = recv(&mut client).await else {
        panic!("expected a result");
    };
    assert_eq!(id, "rpc:c0:1");
    assert_eq!(result, Value::Binary(payload));
}

#[tokio::test]
async fn send_returns_while_response_outgrows_the_outbound_buffer() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve_with_config(&publish, small_frames());
    let mut client = LoopbackClient::connect_with_frame_size(endpoint, 100);

    client.send_hello(SECRET).await.unwrap();
    assert!(matches!(recv(&mut client).await, Envelope::Result { .. }));

    // The echoed response spans far more frames than the outbound
    // channel holds; the request must go through regardless, with the
    // response drained afterwards.
    let payload: Vec<u8> = (0..6_000u32).map(|i| (i % 97) as u8).collect();
    let sent = tokio::time::timeout(
        Duration::from_secs(5),
        client.send_request("rpc:c0:1", "test.echo", vec![Value::Binary(payload.clone())]),
    )
    .await;
    assert!(sent.is_ok(), "request send stalled");

    let Envelope::Result { result, .. } = recv(&mut client).await else {
        panic!("expected a result");
    };
    assert_eq!(result, Value::Binary(payload));
}

#[tokio::test]
async fn oversized_claim_before_auth_is_dropped_silently() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = LoopbackClient::connect(endpoint);

    // Hand-built first chunk claiming a 100 000-byte message. Before
    // authentication the cap is 512, so no buffer may be allocated and
    // no reply of any kind may come back.
    let mut frame = Vec::new();
    frame.extend_from_slice(b"evil");
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&100_000u32.to_le_bytes());
    frame.extend_from_slice(&[0xAB; 64]);
    client.send_frame(&frame).await;
    expect_silence(&mut client).await;

    // The connection itself stays serviceable.
    client.send_hello(SECRET).await.unwrap();
    assert!(matches!(recv(&mut client).await, Envelope::Result { .. }));
}

#[tokio::test]
async fn truncated_frame_is_discarded_without_closing() {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = LoopbackClient::connect(endpoint);

    client.send_frame(&[0x01, 0x02, 0x03]).await;
    expect_silence(&mut client).await;

    client.send_hello(SECRET).await.unwrap();
    assert!(matches!(recv(&mut client).await, Envelope::Result { .. }));
}

#[tokio::test]
async fn streaming_policy_reassembles_in_order_chunks() {
    let publish = Arc::new(PublishManager::new());
    let config = WslinkConfig {
        max_frame_size: 100,
        reassembly: ReassemblyPolicy::Streaming,
        ..WslinkConfig::default()
    };
    let endpoint = serve_with_config(&publish, config);
    let mut client = LoopbackClient::connect_with_frame_size(endpoint, 100);

    client.send_hello(SECRET).await.unwrap();
    assert!(matches!(recv(&mut client).await, Envelope::Result { .. }));

    let payload: Vec<u8> = (0..3_000u32).map(|i| (i % 83) as u8).collect();
    client
        .send_request("rpc:c0:1", "test.echo", vec![Value::Binary(payload.clone())])
        .await
        .unwrap();

    let Envelope::Result { result, .. } = recv(&mut client).await else {
        panic!("expected a result");
    };
    assert_eq!(result, Value::Binary(payload));
}
