//! Request dispatch: resolution, results, and the fault paths.

use anyhow::{bail, Context, Result};

use crate::*;
use wslink_core::codes;

#[tokio::test]
async fn sum_returns_the_total() -> Result<()> {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = authed_client(&endpoint).await;

    client
        .send_request(
            "rpc:c0:1",
            "test.sum",
            vec![Value::Array(vec![1.into(), 2.into(), 3.into()])],
        )
        .await?;
    let Envelope::Result { id, result } = recv(&mut client).await else {
        bail!("expected a result");
    };
    assert_eq!(id, "rpc:c0:1");
    assert_eq!(result.as_i64(), Some(6));
    Ok(())
}

#[tokio::test]
async fn echo_returns_the_argument_unchanged() -> Result<()> {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = authed_client(&endpoint).await;

    let payload = Value::Map(vec![
        (Value::from("name"), Value::from("cone")),
        (Value::from("resolution"), Value::from(24)),
    ]);
    client
        .send_request("rpc:c0:1", "test.echo", vec![payload.clone()])
        .await?;
    let Envelope::Result { result, .. } = recv(&mut client).await else {
        bail!("expected a result");
    };
    assert_eq!(result, payload);
    Ok(())
}

#[tokio::test]
async fn unknown_method_names_the_method_in_the_error() -> Result<()> {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = authed_client(&endpoint).await;

    client
        .send_request("rpc:c0:1", "no.such.method", vec![])
        .await?;
    let Envelope::Error { id, code, data, .. } = recv(&mut client).await else {
        bail!("expected an error");
    };
    assert_eq!(id, "rpc:c0:1");
    assert_eq!(code, codes::METHOD_NOT_FOUND);
    assert_eq!(data.as_ref().and_then(Value::as_str), Some("no.such.method"));
    Ok(())
}

#[tokio::test]
async fn handler_fault_becomes_exception_error() -> Result<()> {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = authed_client(&endpoint).await;

    client.send_request("rpc:c0:1", "test.boom", vec![]).await?;
    let Envelope::Error { code, data, .. } = recv(&mut client).await else {
        bail!("expected an error");
    };
    assert_eq!(code, codes::EXCEPTION_ERROR);

    let data = data.context("fault carries detail")?;
    assert_eq!(
        map_field(&data, "method").and_then(Value::as_str),
        Some("test.boom")
    );
    let exception = map_field(&data, "exception")
        .and_then(Value::as_str)
        .context("exception text")?;
    assert!(exception.contains("boom"));
    assert!(map_field(&data, "trace").is_some());
    Ok(())
}

#[tokio::test]
async fn fault_does_not_poison_the_connection() -> Result<()> {
    let publish = Arc::new(PublishManager::new());
    let endpoint = serve(&publish);
    let mut client = authed_client(&endpoint).await;

    client.send_request("rpc:c0:1", "test.boom", vec![]).await?;
    assert!(matches!(recv(&mut client).await, Envelope::Error { .. }));

    client
        .send_request(
            "rpc:c0:2",
            "test.sum",
            vec![Value::Array(vec![40.into(), 2.into()])],
        )
        .await?;
    let Envelope::Result { result, .. } = recv(&mut client).await else {
        bail!("expected a result");
    };
    assert_eq!(result.as_i64(), Some(42));
    Ok(())
}
