//! End-to-end SSE session flow against a spawned gateway:
//! handshake, initialize, tools/list, tools/call, and the protocol
//! boundary conditions (uninitialized calls, unknown sessions).

mod common;

use common::sse::SseClient;
use common::{http_tool_config, spawn_echo_backend, spawn_gateway};
use serde_json::{Value, json};
use std::time::Duration;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

async fn post_rpc(url: &str, payload: &Value) -> anyhow::Result<reqwest::StatusCode> {
    let response = reqwest::Client::new().post(url).json(payload).send().await?;
    Ok(response.status())
}

async fn next_rpc_message(client: &mut SseClient) -> anyhow::Result<Value> {
    let event = client.next_event(EVENT_TIMEOUT).await?;
    anyhow::ensure!(event.event == "message", "expected message event, got {}", event.event);
    Ok(serde_json::from_str(&event.data)?)
}

#[tokio::test]
async fn sse_handshake_list_and_call() -> anyhow::Result<()> {
    let backend = spawn_echo_backend().await?;
    let dir = tempfile::tempdir()?;
    let gateway = spawn_gateway(&http_tool_config("t1", &backend, "echo"), dir.path())?;

    let mut client = SseClient::connect(&format!("{}/t1/sse", gateway.base)).await?;

    // The first event names the message endpoint for this session.
    let endpoint = client.next_event(EVENT_TIMEOUT).await?;
    assert_eq!(endpoint.event, "endpoint");
    assert!(
        endpoint.data.starts_with("/t1/message?session_id="),
        "unexpected endpoint: {}",
        endpoint.data
    );
    let message_url = format!("{}{}", gateway.base, endpoint.data);

    // initialize -> capabilities on the stream.
    let status = post_rpc(
        &message_url,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
    )
    .await?;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    let init = next_rpc_message(&mut client).await?;
    assert_eq!(init["id"], json!(1));
    assert!(init["result"]["capabilities"]["tools"].is_object());

    // tools/list -> exactly the configured tool.
    post_rpc(
        &message_url,
        &json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
    )
    .await?;
    let list = next_rpc_message(&mut client).await?;
    assert_eq!(list["id"], json!(2));
    let tools = list["result"]["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], json!("echo"));

    // tools/call -> templated request reaches the backend.
    post_rpc(
        &message_url,
        &json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "echo", "arguments": { "id": "42" } },
        }),
    )
    .await?;
    let call = next_rpc_message(&mut client).await?;
    assert_eq!(call["id"], json!(3));
    let text = call["result"]["content"][0]["text"].as_str().expect("text content");
    let backend_saw: Value = serde_json::from_str(text)?;
    assert_eq!(backend_saw["path"], json!("/echo/42"));
    assert_eq!(backend_saw["method"], json!("GET"));

    Ok(())
}

#[tokio::test]
async fn tools_before_initialize_are_rejected() -> anyhow::Result<()> {
    let backend = spawn_echo_backend().await?;
    let dir = tempfile::tempdir()?;
    let gateway = spawn_gateway(&http_tool_config("t1", &backend, "echo"), dir.path())?;

    let mut client = SseClient::connect(&format!("{}/t1/sse", gateway.base)).await?;
    let endpoint = client.next_event(EVENT_TIMEOUT).await?;
    let message_url = format!("{}{}", gateway.base, endpoint.data);

    post_rpc(
        &message_url,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                 "params": { "name": "echo", "arguments": {} } }),
    )
    .await?;
    let error = next_rpc_message(&mut client).await?;
    assert_eq!(error["error"]["code"], json!(-32002));

    Ok(())
}

#[tokio::test]
async fn unknown_session_is_404() -> anyhow::Result<()> {
    let backend = spawn_echo_backend().await?;
    let dir = tempfile::tempdir()?;
    let gateway = spawn_gateway(&http_tool_config("t1", &backend, "echo"), dir.path())?;

    let status = post_rpc(
        &format!("{}/t1/message?session_id=not-a-session", gateway.base),
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
    )
    .await?;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    // Unknown prefixes are 404 on the SSE endpoint too.
    let response = reqwest::get(format!("{}/nope/sse", gateway.base)).await?;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn unknown_method_returns_method_not_found() -> anyhow::Result<()> {
    let backend = spawn_echo_backend().await?;
    let dir = tempfile::tempdir()?;
    let gateway = spawn_gateway(&http_tool_config("t1", &backend, "echo"), dir.path())?;

    let mut client = SseClient::connect(&format!("{}/t1/sse", gateway.base)).await?;
    let endpoint = client.next_event(EVENT_TIMEOUT).await?;
    let message_url = format!("{}{}", gateway.base, endpoint.data);

    post_rpc(
        &message_url,
        &json!({ "jsonrpc": "2.0", "id": 9, "method": "resources/list" }),
    )
    .await?;
    let error = next_rpc_message(&mut client).await?;
    assert_eq!(error["error"]["code"], json!(-32601));

    Ok(())
}

#[tokio::test]
async fn streamable_http_initialize_and_call() -> anyhow::Result<()> {
    let backend = spawn_echo_backend().await?;
    let dir = tempfile::tempdir()?;
    let gateway = spawn_gateway(&http_tool_config("t1", &backend, "echo"), dir.path())?;
    let mcp_url = format!("{}/t1/mcp", gateway.base);
    let client = reqwest::Client::new();

    // initialize mints the session id.
    let response = client
        .post(&mcp_url)
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .expect("session header")
        .to_string();
    let init: Value = response.json().await?;
    assert!(init["result"]["capabilities"]["tools"].is_object());

    // Without the header, non-initialize requests are rejected.
    let response = client
        .post(&mcp_url)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    // tools/list with the session header.
    let response = client
        .post(&mcp_url)
        .header("mcp-session-id", &session_id)
        .json(&json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" }))
        .send()
        .await?;
    let list: Value = response.json().await?;
    assert_eq!(list["result"]["tools"][0]["name"], json!("echo"));

    // tools/call round-trips through the backend.
    let response = client
        .post(&mcp_url)
        .header("mcp-session-id", &session_id)
        .json(&json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": { "name": "echo", "arguments": { "id": "7" } },
        }))
        .send()
        .await?;
    let call: Value = response.json().await?;
    let text = call["result"]["content"][0]["text"].as_str().expect("text");
    let backend_saw: Value = serde_json::from_str(text)?;
    assert_eq!(backend_saw["path"], json!("/echo/7"));

    // DELETE closes the session.
    let response = client
        .delete(&mcp_url)
        .header("mcp-session-id", &session_id)
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    Ok(())
}
