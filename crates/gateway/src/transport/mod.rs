//! Upstream transports.
//!
//! One transport instance exists per upstream server of an activated
//! config. SSE, STDIO and streamable-HTTP upstreams speak MCP through an
//! `rmcp` client held in a shared [`UpstreamCore`]; HTTP-tool "transports"
//! have no connection at all and synthesize tool calls from templates.
//!
//! Every upstream failure is translated into a [`TransportError`] variant;
//! nothing below this boundary panics on remote behavior.

mod http_tool;
mod manager;
mod sse;
mod stdio;
mod streamable;

pub use http_tool::HttpToolTransport;
pub use manager::TransportManager;
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableTransport;

use crate::model::{McpServer, McpServerType, Policy};
use crate::session::RequestInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::service::{RoleClient, RunningService, ServiceError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum TransportError {
    /// No live connection and the reconnect attempt failed.
    NotConnected(String),
    ToolNotFound(String),
    /// The upstream answered with an error.
    Upstream { code: Option<i64>, message: String },
    Timeout,
    /// The call was abandoned because the owner is shutting down.
    Cancelled,
    /// STDIO availability probe failed; distinct from connection failure.
    Install(String),
    /// Template evaluation failed; no request was made.
    Dsl(String),
}

impl TransportError {
    /// Stable machine-readable kind, carried in JSON-RPC error `data`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "not_connected",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Install(_) => "install_failed",
            Self::Dsl(_) => "dsl_error",
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected(detail) => write!(f, "transport not connected: {detail}"),
            Self::ToolNotFound(name) => write!(f, "tool not found: {name}"),
            Self::Upstream { code, message } => match code {
                Some(code) => write!(f, "upstream error {code}: {message}"),
                None => write!(f, "upstream error: {message}"),
            },
            Self::Timeout => f.write_str("upstream call timed out"),
            Self::Cancelled => f.write_str("call cancelled"),
            Self::Install(detail) => write!(f, "install failed: {detail}"),
            Self::Dsl(detail) => write!(f, "dsl_error: {detail}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Ready,
    Closing,
    Closed,
    Failed,
}

/// One piece of a chunked tool result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub content: serde_json::Value,
    pub chunk_id: u64,
    pub timestamp: DateTime<Utc>,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

pub type ChunkStream = futures::stream::BoxStream<'static, Result<StreamChunk, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// Whether `tools/call` results should be delivered as a chunk stream.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Connect policy; connectionless transports report `OnDemand`.
    fn policy(&self) -> Policy {
        Policy::OnDemand
    }

    /// Open the upstream connection (no-op for connectionless transports).
    async fn start(&self) -> Result<(), TransportError>;

    async fn stop(&self);

    /// Refresh and return the upstream tool list.
    async fn fetch_tools(&self) -> Result<Vec<Tool>, TransportError>;

    /// Tool list from the last successful fetch.
    fn cached_tools(&self) -> Vec<Tool>;

    async fn call_tool(
        &self,
        params: CallToolRequestParam,
        request: &RequestInfo,
    ) -> Result<CallToolResult, TransportError>;

    /// Chunked variant; the default wraps the whole result in one final chunk.
    async fn call_tool_streaming(
        &self,
        params: CallToolRequestParam,
        request: &RequestInfo,
    ) -> Result<ChunkStream, TransportError> {
        let result = self.call_tool(params, request).await?;
        let chunk = StreamChunk {
            content: serde_json::to_value(&result).unwrap_or_default(),
            chunk_id: 0,
            timestamp: Utc::now(),
            is_final: true,
            metadata: None,
        };
        Ok(futures::stream::iter([Ok(chunk)]).boxed())
    }
}

pub(crate) type McpClient = RunningService<RoleClient, ()>;

pub(crate) fn map_connect_error<E: std::fmt::Display>(error: E) -> TransportError {
    TransportError::NotConnected(format!("mcp handshake failed: {error}"))
}

fn map_service_error(error: &ServiceError) -> TransportError {
    match error {
        ServiceError::McpError(data) => TransportError::Upstream {
            code: Some(i64::from(data.code.0)),
            message: data.message.to_string(),
        },
        other => TransportError::NotConnected(other.to_string()),
    }
}

/// Shared connection plumbing for the MCP-speaking transports.
///
/// Holds the client slot, the connection state machine and the cached tool
/// list. Variants differ only in how they open the wire (`open_client`).
pub(crate) struct UpstreamCore {
    server: McpServer,
    state: parking_lot::RwLock<ConnectionState>,
    client: tokio::sync::Mutex<Option<McpClient>>,
    tools: parking_lot::RwLock<Vec<Tool>>,
    call_timeout: Duration,
}

impl UpstreamCore {
    fn new(server: McpServer, call_timeout: Duration) -> Self {
        Self {
            server,
            state: parking_lot::RwLock::new(ConnectionState::New),
            client: tokio::sync::Mutex::new(None),
            tools: parking_lot::RwLock::new(Vec::new()),
            call_timeout,
        }
    }

    fn name(&self) -> &str {
        &self.server.name
    }

    fn server(&self) -> &McpServer {
        &self.server
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn policy(&self) -> Policy {
        self.server.policy
    }

    fn cached_tools(&self) -> Vec<Tool> {
        self.tools.read().clone()
    }

    async fn open_client(&self) -> Result<McpClient, TransportError> {
        match self.server.server_type {
            McpServerType::Sse => sse::open(&self.server.url).await,
            McpServerType::Stdio => stdio::open(&self.server.command, &self.server.args).await,
            McpServerType::Streamable => streamable::open(&self.server.url).await,
        }
    }

    /// Connect if not already connected. At most one outstanding connection.
    async fn connect(&self) -> Result<(), TransportError> {
        let mut slot = self.client.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        *self.state.write() = ConnectionState::Connecting;
        match self.open_client().await {
            Ok(client) => {
                *slot = Some(client);
                *self.state.write() = ConnectionState::Ready;
                tracing::info!(server = %self.server.name, "upstream transport connected");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Failed;
                tracing::warn!(server = %self.server.name, error = %e, "upstream connect failed");
                Err(e)
            }
        }
    }

    /// Drop the current client, terminating the wire (and, for STDIO,
    /// reaping the child).
    async fn disconnect(&self) {
        *self.state.write() = ConnectionState::Closing;
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            if let Err(e) = client.cancel().await {
                tracing::debug!(server = %self.server.name, error = %e, "error closing upstream client");
            }
        }
        self.tools.write().clear();
        *self.state.write() = ConnectionState::Closed;
    }

    /// Lazy-connect for `on_demand` transports; `on_start` transports must
    /// already be connected.
    async fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.client.lock().await.is_some() {
            return Ok(());
        }
        match self.policy() {
            Policy::OnDemand => self.connect().await,
            Policy::OnStart => Err(TransportError::NotConnected(
                "on_start transport is not connected".to_string(),
            )),
        }
    }

    async fn fetch_tools(&self) -> Result<Vec<Tool>, TransportError> {
        self.ensure_connected().await?;
        match self.try_fetch_tools().await {
            Ok(tools) => Ok(tools),
            Err(TransportError::NotConnected(_)) if self.policy() == Policy::OnDemand => {
                // One reconnect attempt per request; backoff is a caller concern.
                self.disconnect().await;
                self.connect().await?;
                self.try_fetch_tools().await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_fetch_tools(&self) -> Result<Vec<Tool>, TransportError> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| TransportError::NotConnected("no client".to_string()))?;

        let tools = tokio::time::timeout(self.call_timeout, client.list_all_tools())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| map_service_error(&e))?;

        *self.tools.write() = tools.clone();
        tracing::debug!(server = %self.server.name, count = tools.len(), "fetched upstream tools");
        Ok(tools)
    }

    fn has_tool(&self, name: &str) -> bool {
        self.tools.read().iter().any(|t| t.name == name)
    }

    async fn call_tool(&self, params: CallToolRequestParam) -> Result<CallToolResult, TransportError> {
        self.ensure_connected().await?;

        if self.tools.read().is_empty() {
            // First use may precede any tools/list.
            let _ = self.try_fetch_tools().await;
        }
        if !self.has_tool(&params.name) {
            return Err(TransportError::ToolNotFound(params.name.to_string()));
        }

        match self.try_call(params.clone()).await {
            Ok(result) => Ok(result),
            Err(TransportError::NotConnected(_)) if self.policy() == Policy::OnDemand => {
                self.disconnect().await;
                self.connect().await?;
                self.try_call(params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_call(&self, params: CallToolRequestParam) -> Result<CallToolResult, TransportError> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| TransportError::NotConnected("no client".to_string()))?;

        tokio::time::timeout(self.call_timeout, client.call_tool(params))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| map_service_error(&e))
    }
}

/// Build the transport for one upstream MCP server declaration.
pub(crate) fn create_mcp_transport(
    server: &McpServer,
    call_timeout: Duration,
) -> Arc<dyn Transport> {
    let core = UpstreamCore::new(server.clone(), call_timeout);
    match server.server_type {
        McpServerType::Sse => Arc::new(SseTransport::new(core)),
        McpServerType::Stdio => Arc::new(StdioTransport::new(core)),
        McpServerType::Streamable => Arc::new(StreamableTransport::new(core)),
    }
}
