//! Tenant-scoped gateway configuration.
//!
//! An [`McpConfig`] is the unit of activation: it declares upstream MCP
//! servers, HTTP-backed tool groups, the tools themselves, and the routers
//! that expose them under URL prefixes. Configs are written by an external
//! management API; the gateway only validates and activates them.

use portico_http_tools::{HttpServerConfig, ToolConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    pub name: String,
    pub tenant_name: String,
    #[serde(default)]
    pub servers: Vec<McpServer>,
    #[serde(default)]
    pub routers: Vec<Router>,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    #[serde(default)]
    pub http_servers: Vec<HttpServerConfig>,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Soft delete; a deleted config is never activated.
    #[serde(default)]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl McpConfig {
    /// Composite identity: `(tenant_name, name)`.
    #[must_use]
    pub fn identity(&self) -> (String, String) {
        (self.tenant_name.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub server_type: McpServerType,
    /// STDIO only: the command line to spawn (shell-word split).
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// SSE / streamable only: the upstream endpoint URL.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub policy: Policy,
    /// STDIO only: skip the availability probe before spawning.
    #[serde(default)]
    pub preinstalled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum McpServerType {
    Sse,
    Stdio,
    Streamable,
}

/// Whether the upstream connection is opened at activation or first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    OnStart,
    #[default]
    OnDemand,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    /// URL path segment exposed to clients; unique per gateway replica.
    pub prefix: String,
    /// Name of the `McpServer` or `HttpServerConfig` this router fronts.
    pub server: String,
    /// Alternate prefix for the SSE endpoint; defaults to `prefix`.
    #[serde(default)]
    pub sse_prefix: String,
    #[serde(default)]
    pub cors: Option<CorsConfig>,
}

impl Router {
    /// The prefix the SSE endpoint answers on.
    #[must_use]
    pub fn effective_sse_prefix(&self) -> &str {
        if self.sse_prefix.is_empty() {
            &self.prefix
        } else {
            &self.sse_prefix
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub allow_methods: Vec<String>,
    #[serde(default)]
    pub allow_headers: Vec<String>,
    #[serde(default)]
    pub expose_headers: Vec<String>,
}

/// Validate a config for activation.
///
/// Checked here: router references resolve within the same config, no
/// duplicate server names, no duplicate router prefixes within the config.
/// Cross-config prefix uniqueness is checked at activation time against the
/// live snapshot.
///
/// # Errors
///
/// Returns a human-readable description of the first violation.
pub fn validate_config(config: &McpConfig) -> Result<(), String> {
    if config.deleted_at.is_some() {
        return Err(format!(
            "config {}/{} is deleted and cannot be activated",
            config.tenant_name, config.name
        ));
    }

    let mut server_names: HashSet<&str> = HashSet::new();
    for server in &config.servers {
        if !server_names.insert(server.name.as_str()) {
            return Err(format!("duplicate server name '{}'", server.name));
        }
        match server.server_type {
            McpServerType::Stdio if server.command.trim().is_empty() => {
                return Err(format!("stdio server '{}' has no command", server.name));
            }
            (McpServerType::Sse | McpServerType::Streamable) if server.url.trim().is_empty() => {
                return Err(format!("server '{}' has no url", server.name));
            }
            _ => {}
        }
    }
    for http_server in &config.http_servers {
        if !server_names.insert(http_server.name.as_str()) {
            return Err(format!("duplicate server name '{}'", http_server.name));
        }
    }

    if config.routers.is_empty() {
        return Err(format!(
            "config {}/{} has no routers",
            config.tenant_name, config.name
        ));
    }

    let mut prefixes: HashSet<&str> = HashSet::new();
    for router in &config.routers {
        let prefix = router.prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err("router prefix must be non-empty".to_string());
        }
        if !prefixes.insert(prefix) {
            return Err(format!("duplicate router prefix '{prefix}'"));
        }
        if !server_names.contains(router.server.as_str()) {
            return Err(format!(
                "router '{}' references unknown server '{}'",
                router.prefix, router.server
            ));
        }
    }

    // Tools referenced by http_servers must exist.
    let tool_names: HashSet<&str> = config.tools.iter().map(|t| t.name.as_str()).collect();
    for http_server in &config.http_servers {
        for tool in &http_server.tools {
            if !tool_names.contains(tool.as_str()) {
                tracing::warn!(
                    server = %http_server.name,
                    tool = %tool,
                    "http server references unknown tool"
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{McpConfig, validate_config};
    use serde_json::json;

    fn config(value: serde_json::Value) -> McpConfig {
        serde_json::from_value(value).expect("config json")
    }

    fn minimal_http_config() -> McpConfig {
        config(json!({
            "name": "c1",
            "tenantName": "t1",
            "httpServers": [
                { "name": "svc", "url": "https://api.example.com", "tools": ["echo"] }
            ],
            "tools": [
                { "name": "echo", "method": "GET", "path": "\"/echo\"" }
            ],
            "routers": [
                { "prefix": "t1", "server": "svc" }
            ],
        }))
    }

    #[test]
    fn accepts_minimal_config() {
        assert_eq!(validate_config(&minimal_http_config()), Ok(()));
    }

    #[test]
    fn rejects_dangling_router_reference() {
        let mut cfg = minimal_http_config();
        cfg.routers[0].server = "missing".to_string();
        let err = validate_config(&cfg).expect_err("must reject");
        assert!(err.contains("unknown server"), "{err}");
    }

    #[test]
    fn rejects_duplicate_prefixes() {
        let mut cfg = minimal_http_config();
        let dup = cfg.routers[0].clone();
        cfg.routers.push(dup);
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_deleted_configs() {
        let mut cfg = minimal_http_config();
        cfg.deleted_at = Some(chrono::Utc::now());
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_stdio_server_without_command() {
        let cfg = config(json!({
            "name": "c1",
            "tenantName": "t1",
            "servers": [
                { "name": "fs", "type": "stdio", "command": "" }
            ],
            "routers": [
                { "prefix": "t1", "server": "fs" }
            ],
        }));
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn sse_prefix_defaults_to_prefix() {
        let cfg = minimal_http_config();
        assert_eq!(cfg.routers[0].effective_sse_prefix(), "t1");
    }
}
