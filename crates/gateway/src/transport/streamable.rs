//! Streamable-HTTP upstream transport.
//!
//! Speaks the streamable-HTTP MCP transport against the upstream `url` and
//! is the one transport whose tool calls surface as a chunk sequence: the
//! upstream result's content items are emitted one per chunk with strictly
//! increasing `chunk_id`, the last flagged `is_final`.

use super::{
    ChunkStream, ConnectionState, McpClient, StreamChunk, Transport, TransportError, UpstreamCore,
    map_connect_error,
};
use crate::session::RequestInfo;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt as _;
use rmcp::ServiceExt as _;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::transport::StreamableHttpClientTransport;

pub(crate) async fn open(url: &str) -> Result<McpClient, TransportError> {
    let transport = StreamableHttpClientTransport::from_uri(url.to_string());
    ().serve(transport).await.map_err(map_connect_error)
}

pub struct StreamableTransport {
    core: UpstreamCore,
}

impl StreamableTransport {
    pub(crate) fn new(core: UpstreamCore) -> Self {
        Self { core }
    }
}

fn chunk_result(result: &CallToolResult) -> Vec<Result<StreamChunk, TransportError>> {
    let is_error = result.is_error.unwrap_or(false);
    let items: Vec<serde_json::Value> = result
        .content
        .iter()
        .map(|c| serde_json::to_value(c).unwrap_or_default())
        .collect();

    if items.len() <= 1 {
        return vec![Ok(StreamChunk {
            content: serde_json::to_value(result).unwrap_or_default(),
            chunk_id: 0,
            timestamp: Utc::now(),
            is_final: true,
            metadata: Some(serde_json::json!({ "isError": is_error })),
        })];
    }

    let last = items.len() - 1;
    items
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            Ok(StreamChunk {
                content,
                chunk_id: i as u64,
                timestamp: Utc::now(),
                is_final: i == last,
                metadata: (i == last).then(|| serde_json::json!({ "isError": is_error })),
            })
        })
        .collect()
}

#[async_trait]
impl Transport for StreamableTransport {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> ConnectionState {
        self.core.state()
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn policy(&self) -> crate::model::Policy {
        self.core.policy()
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.core.connect().await
    }

    async fn stop(&self) {
        self.core.disconnect().await;
    }

    async fn fetch_tools(&self) -> Result<Vec<Tool>, TransportError> {
        self.core.fetch_tools().await
    }

    fn cached_tools(&self) -> Vec<Tool> {
        self.core.cached_tools()
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParam,
        _request: &RequestInfo,
    ) -> Result<CallToolResult, TransportError> {
        self.core.call_tool(params).await
    }

    async fn call_tool_streaming(
        &self,
        params: CallToolRequestParam,
        _request: &RequestInfo,
    ) -> Result<ChunkStream, TransportError> {
        let result = self.core.call_tool(params).await?;
        Ok(futures::stream::iter(chunk_result(&result)).boxed())
    }
}
