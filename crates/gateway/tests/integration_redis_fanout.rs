//! Cross-replica delivery through the Redis session store: the SSE stream
//! is held open on replica 1 while the JSON-RPC POSTs land on replica 2.
//! Requires Docker.

mod common;

use common::sse::SseClient;
use common::{http_tool_config, spawn_echo_backend, spawn_gateway};
use serde_json::{Value, json};
use std::time::Duration;
use testcontainers::core::{IntoContainerPort as _, WaitFor};
use testcontainers::runners::AsyncRunner as _;
use testcontainers::{ContainerAsync, GenericImage};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

async fn start_redis() -> anyhow::Result<(ContainerAsync<GenericImage>, u16)> {
    let container = GenericImage::new("redis", "7.2-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await?;
    let port = container.get_host_port_ipv4(6379).await?;
    Ok((container, port))
}

fn redis_config(base: &str, redis_port: u16) -> String {
    format!(
        "{base}
session:
  store: redis
  redis:
    addr: 127.0.0.1:{redis_port}
    prefix: fanout_test
"
    )
}

#[tokio::test]
async fn post_on_one_replica_reaches_sse_on_another() -> anyhow::Result<()> {
    let (_redis, redis_port) = start_redis().await?;
    let backend = spawn_echo_backend().await?;
    let config = redis_config(&http_tool_config("t1", &backend, "echo"), redis_port);

    let dir1 = tempfile::tempdir()?;
    let dir2 = tempfile::tempdir()?;
    let replica1 = spawn_gateway(&config, dir1.path())?;
    let replica2 = spawn_gateway(&config, dir2.path())?;

    // SSE stream on replica 1.
    let mut stream = SseClient::connect(&format!("{}/t1/sse", replica1.base)).await?;
    let endpoint = stream.next_event(EVENT_TIMEOUT).await?;
    assert_eq!(endpoint.event, "endpoint");

    // All POSTs go to replica 2.
    let message_url = format!("{}{}", replica2.base, endpoint.data);
    let client = reqwest::Client::new();

    let status = client
        .post(&message_url)
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
        .send()
        .await?
        .status();
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    let init_event = stream.next_event(EVENT_TIMEOUT).await?;
    let init: Value = serde_json::from_str(&init_event.data)?;
    assert_eq!(init["id"], json!(1));
    assert!(init["result"]["capabilities"]["tools"].is_object());

    client
        .post(&message_url)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .send()
        .await?;
    let list_event = stream.next_event(EVENT_TIMEOUT).await?;
    let list: Value = serde_json::from_str(&list_event.data)?;
    assert_eq!(list["id"], json!(2));
    assert_eq!(list["result"]["tools"][0]["name"], json!("echo"));

    // Events arrive in POST order.
    client
        .post(&message_url)
        .json(&json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" }))
        .send()
        .await?;
    let ping_event = stream.next_event(EVENT_TIMEOUT).await?;
    let ping: Value = serde_json::from_str(&ping_event.data)?;
    assert_eq!(ping["id"], json!(3));

    Ok(())
}

#[tokio::test]
async fn session_survives_in_store_across_replicas() -> anyhow::Result<()> {
    let (_redis, redis_port) = start_redis().await?;
    let backend = spawn_echo_backend().await?;
    let config = redis_config(&http_tool_config("t1", &backend, "echo"), redis_port);

    let dir1 = tempfile::tempdir()?;
    let dir2 = tempfile::tempdir()?;
    let replica1 = spawn_gateway(&config, dir1.path())?;
    let replica2 = spawn_gateway(&config, dir2.path())?;

    let mut stream = SseClient::connect(&format!("{}/t1/sse", replica1.base)).await?;
    let endpoint = stream.next_event(EVENT_TIMEOUT).await?;

    // Replica 2 can see the session even though it never served it.
    let status = reqwest::Client::new()
        .post(format!("{}{}", replica2.base, endpoint.data))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await?
        .status();
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    // An id neither replica knows is still 404.
    let status = reqwest::Client::new()
        .post(format!("{}/t1/message?session_id=ghost", replica2.base))
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }))
        .send()
        .await?
        .status();
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    Ok(())
}
