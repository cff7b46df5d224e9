use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A group of HTTP-backed tools sharing a base URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpServerConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base URL for tools whose `path` is relative.
    #[serde(deserialize_with = "portico_env::serde_helpers::deserialize_string_env")]
    pub url: String,
    /// Names of the tools (from the config's `tools` list) this server exposes.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Request timeout in seconds for this server's tools.
    #[serde(
        default,
        deserialize_with = "portico_env::serde_helpers::deserialize_option_u64_env"
    )]
    pub timeout: Option<u64>,
}

/// A single HTTP-backed tool definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// HTTP verb (`GET`, `POST`, ...).
    pub method: String,
    /// Template for the request path; absolute URLs bypass the server base.
    pub path: String,
    /// Header name -> value template.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub args: Vec<ToolArg>,
    /// JSON Schema fragment advertised in `tools/list`.
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
    /// Template for the request body; empty means "no templated body".
    #[serde(default)]
    pub request_body: String,
    /// Template shaping the HTTP response into the tool result; empty means
    /// "return the raw response body".
    #[serde(default)]
    pub response_body: String,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolArg {
    pub name: String,
    pub position: ArgPosition,
    #[serde(rename = "type", default)]
    pub arg_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Where an argument lands on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgPosition {
    Path,
    Query,
    Header,
    Body,
}

impl ToolConfig {
    /// Whether the verb conventionally carries a request body.
    #[must_use]
    pub fn method_has_body(&self) -> bool {
        matches!(
            self.method.to_ascii_uppercase().as_str(),
            "POST" | "PUT" | "PATCH"
        )
    }
}
