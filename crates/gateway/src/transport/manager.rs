//! Per-config transport set.
//!
//! Owns one transport per upstream server (config order preserved) and the
//! tool-name routing table. Tool-name collisions resolve first-wins in
//! `servers` then `http_servers` order; the loser is dropped with a
//! warning. The manager never retries a call across transports.

use super::{ChunkStream, Transport, TransportError, create_mcp_transport};
use crate::config::TimeoutConfig;
use crate::model::{McpConfig, Policy};
use crate::session::RequestInfo;
use crate::transport::HttpToolTransport;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct TransportManager {
    /// Transports in declaration order; order decides collisions.
    transports: Vec<Arc<dyn Transport>>,
    tool_routes: parking_lot::RwLock<HashMap<String, Arc<dyn Transport>>>,
    stop_timeout: Duration,
}

impl TransportManager {
    /// Build transports for every server the config declares.
    pub fn build(config: &McpConfig, timeouts: &TimeoutConfig, http: &reqwest::Client) -> Self {
        let call_timeout = timeouts.call_timeout();
        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();

        for server in &config.servers {
            transports.push(create_mcp_transport(server, call_timeout));
        }

        let tools_by_name: HashMap<&str, &portico_http_tools::ToolConfig> =
            config.tools.iter().map(|t| (t.name.as_str(), t)).collect();
        for http_server in &config.http_servers {
            let tools: Vec<portico_http_tools::ToolConfig> = http_server
                .tools
                .iter()
                .filter_map(|name| {
                    let tool = tools_by_name.get(name.as_str()).copied().cloned();
                    if tool.is_none() {
                        tracing::warn!(
                            server = %http_server.name,
                            tool = %name,
                            "http server references unknown tool, skipping"
                        );
                    }
                    tool
                })
                .collect();
            transports.push(Arc::new(HttpToolTransport::new(
                http_server.clone(),
                tools,
                http.clone(),
                call_timeout,
            )));
        }

        Self {
            transports,
            tool_routes: parking_lot::RwLock::new(HashMap::new()),
            stop_timeout: timeouts.stop_timeout(),
        }
    }

    /// Connect every `on_start` transport; any failure aborts activation.
    ///
    /// # Errors
    ///
    /// Returns the first transport's error, tagged with its server name.
    pub async fn start(&self) -> Result<(), (String, TransportError)> {
        for transport in &self.transports {
            if transport.policy() == Policy::OnStart {
                transport
                    .start()
                    .await
                    .map_err(|e| (transport.name().to_string(), e))?;
            }
        }
        Ok(())
    }

    /// Union of every transport's tools with first-wins collision handling.
    ///
    /// Also refreshes the tool routing table. Transports that fail to list
    /// are skipped with a warning; a partially reachable config still
    /// serves the tools it can.
    pub async fn fetch_all_tools(&self) -> Vec<Tool> {
        let mut seen: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        let mut out: Vec<Tool> = Vec::new();

        for transport in &self.transports {
            let tools = match transport.fetch_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(server = %transport.name(), error = %e, "tools/list failed for upstream");
                    continue;
                }
            };
            for tool in tools {
                let name = tool.name.to_string();
                if let Some(owner) = seen.get(&name) {
                    tracing::warn!(
                        tool = %name,
                        winner = %owner.name(),
                        loser = %transport.name(),
                        "duplicate tool name, keeping first registration"
                    );
                    continue;
                }
                seen.insert(name, transport.clone());
                out.push(tool);
            }
        }

        *self.tool_routes.write() = seen;
        out
    }

    /// Find the transport owning `tool`, refreshing routes once on miss.
    async fn route(&self, tool: &str) -> Result<Arc<dyn Transport>, TransportError> {
        if let Some(t) = self.tool_routes.read().get(tool).cloned() {
            return Ok(t);
        }
        self.fetch_all_tools().await;
        self.tool_routes
            .read()
            .get(tool)
            .cloned()
            .ok_or_else(|| TransportError::ToolNotFound(tool.to_string()))
    }

    /// Name of the server currently routing `tool`, if known.
    #[must_use]
    pub fn owner_name(&self, tool: &str) -> Option<String> {
        self.tool_routes
            .read()
            .get(tool)
            .map(|t| t.name().to_string())
    }

    /// Whether this tool's result is delivered as a chunk stream.
    pub async fn is_streaming_tool(&self, tool: &str) -> bool {
        self.route(tool)
            .await
            .is_ok_and(|t| t.supports_streaming())
    }

    /// # Errors
    ///
    /// `ToolNotFound` when no transport owns the tool, otherwise whatever
    /// the owning transport reports.
    pub async fn call_tool(
        &self,
        params: CallToolRequestParam,
        request: &RequestInfo,
    ) -> Result<CallToolResult, TransportError> {
        let transport = self.route(&params.name).await?;
        transport.call_tool(params, request).await
    }

    /// # Errors
    ///
    /// Same contract as [`Self::call_tool`].
    pub async fn call_tool_streaming(
        &self,
        params: CallToolRequestParam,
        request: &RequestInfo,
    ) -> Result<ChunkStream, TransportError> {
        let transport = self.route(&params.name).await?;
        transport.call_tool_streaming(params, request).await
    }

    /// Close every transport, bounding each close by the stop timeout.
    /// A transport that does not close in time is abandoned.
    pub async fn stop(&self) {
        for transport in &self.transports {
            let closed = tokio::time::timeout(self.stop_timeout, transport.stop()).await;
            if closed.is_err() {
                tracing::warn!(server = %transport.name(), "transport did not stop in time, abandoning");
            }
        }
        self.tool_routes.write().clear();
    }
}
