//! HTTP-tool pseudo-transport.
//!
//! Backs an `HttpServerConfig`: there is no upstream connection to manage.
//! Each call evaluates the tool's templates against `{args, config,
//! request}`, performs the HTTP request, and shapes the response through
//! `response_body`. A template failure surfaces as `dsl_error` and no
//! request leaves the process.

use super::{ConnectionState, Transport, TransportError};
use crate::session::RequestInfo;
use async_trait::async_trait;
use portico_http_tools::{EvalContext, HttpServerConfig, InvokeError, ToolConfig};
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, Tool};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub struct HttpToolTransport {
    server: HttpServerConfig,
    tools: Vec<ToolConfig>,
    client: reqwest::Client,
    call_timeout: Duration,
}

impl HttpToolTransport {
    pub(crate) fn new(
        server: HttpServerConfig,
        tools: Vec<ToolConfig>,
        client: reqwest::Client,
        call_timeout: Duration,
    ) -> Self {
        let call_timeout = server
            .timeout
            .map_or(call_timeout, Duration::from_secs);
        Self {
            server,
            tools,
            client,
            call_timeout,
        }
    }

    fn find_tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|t| t.name == name)
    }
}

fn mcp_tool(tool: &ToolConfig) -> Tool {
    let schema = match &tool.input_schema {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    Tool::new(
        tool.name.clone(),
        tool.description.clone(),
        Arc::new(schema),
    )
}

fn map_invoke_error(error: InvokeError) -> TransportError {
    match error {
        InvokeError::Dsl(e) => TransportError::Dsl(e.to_string()),
        InvokeError::InvalidMethod(m) => TransportError::Dsl(format!("invalid HTTP method '{m}'")),
        InvokeError::InvalidUrl(u) => TransportError::Dsl(format!("invalid URL '{u}'")),
        InvokeError::Http(e) => TransportError::Upstream {
            code: None,
            message: e,
        },
        InvokeError::Timeout => TransportError::Timeout,
    }
}

fn request_context(request: &RequestInfo) -> serde_json::Value {
    json!({
        "headers": request.headers,
        "queries": request.queries,
        "cookies": request.cookies,
    })
}

#[async_trait]
impl Transport for HttpToolTransport {
    fn name(&self) -> &str {
        &self.server.name
    }

    fn state(&self) -> ConnectionState {
        // Connectionless; always callable.
        ConnectionState::Ready
    }

    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn fetch_tools(&self) -> Result<Vec<Tool>, TransportError> {
        Ok(self.tools.iter().map(mcp_tool).collect())
    }

    fn cached_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(mcp_tool).collect()
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParam,
        request: &RequestInfo,
    ) -> Result<CallToolResult, TransportError> {
        let tool = self
            .find_tool(&params.name)
            .ok_or_else(|| TransportError::ToolNotFound(params.name.to_string()))?;

        let args = params
            .arguments
            .map_or(serde_json::Value::Object(serde_json::Map::new()), |map| {
                serde_json::Value::Object(map)
            });
        let ctx = EvalContext::new(&self.server, tool, args, request_context(request));

        let prepared =
            portico_http_tools::invoke::prepare(&self.server, tool, &ctx).map_err(map_invoke_error)?;
        tracing::debug!(
            tool = %tool.name,
            method = %prepared.method,
            url = %prepared.url,
            "invoking http tool"
        );

        let response = portico_http_tools::invoke::execute(&self.client, prepared, self.call_timeout)
            .await
            .map_err(map_invoke_error)?;
        let status = response.status;
        let shaped = portico_http_tools::invoke::shape_response(tool, &ctx, &response)
            .map_err(map_invoke_error)?;

        if status >= 400 {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "HTTP {status}: {shaped}"
            ))]));
        }
        Ok(CallToolResult::success(vec![Content::text(shaped)]))
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpToolTransport, TransportError};
    use crate::session::RequestInfo;
    use crate::transport::Transport as _;
    use rmcp::model::CallToolRequestParam;
    use serde_json::json;
    use std::time::Duration;

    fn transport() -> HttpToolTransport {
        let server = serde_json::from_value(json!({
            "name": "svc",
            "url": "http://127.0.0.1:9",
            "tools": ["echo"],
        }))
        .expect("server");
        let tool = serde_json::from_value(json!({
            "name": "echo",
            "method": "GET",
            "path": "\"/echo\"",
        }))
        .expect("tool");
        HttpToolTransport::new(
            server,
            vec![tool],
            reqwest::Client::new(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn advertises_configured_tools() -> anyhow::Result<()> {
        let tools = transport().fetch_tools().await?;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found() {
        let result = transport()
            .call_tool(
                CallToolRequestParam {
                    name: "missing".into(),
                    arguments: None,
                },
                &RequestInfo::default(),
            )
            .await;
        assert!(matches!(result, Err(TransportError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn template_failure_never_sends_the_request() {
        let mut transport = transport();
        transport.tools[0].path = "1/0".to_string();
        let result = transport
            .call_tool(
                CallToolRequestParam {
                    name: "echo".into(),
                    arguments: None,
                },
                &RequestInfo::default(),
            )
            .await;
        // The URL points at a dead port; a dsl_error proves we failed before I/O.
        assert!(matches!(result, Err(TransportError::Dsl(_))));
    }
}
