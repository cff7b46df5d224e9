//! SSE upstream transport.
//!
//! The MCP handshake and all requests run over one SSE client connection
//! opened against the server's `url`.

use super::{
    ConnectionState, McpClient, Transport, TransportError, UpstreamCore, map_connect_error,
};
use crate::session::RequestInfo;
use async_trait::async_trait;
use rmcp::ServiceExt as _;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};

pub(crate) async fn open(url: &str) -> Result<McpClient, TransportError> {
    let transport = rmcp::transport::SseClientTransport::start(url.to_string())
        .await
        .map_err(|e| TransportError::NotConnected(format!("sse connect: {e}")))?;
    ().serve(transport).await.map_err(map_connect_error)
}

pub struct SseTransport {
    core: UpstreamCore,
}

impl SseTransport {
    pub(crate) fn new(core: UpstreamCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> ConnectionState {
        self.core.state()
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
}
