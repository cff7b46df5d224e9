//! Templated request construction and execution.
//!
//! The exchange happens in three pure-ish phases so failures are cheap to
//! attribute: `prepare` evaluates all request-side templates (no I/O),
//! `execute` performs the HTTP call, and `shape_response` evaluates the
//! `response_body` template against the outcome. A template failure in
//! `prepare` means no request is sent at all.

use crate::config::{ArgPosition, HttpServerConfig, ToolConfig};
use portico_dsl::{DslError, Value};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug)]
pub enum InvokeError {
    /// Any template failure (parse or evaluation); the request is not sent.
    Dsl(DslError),
    /// The tool's `method` is not a valid HTTP verb.
    InvalidMethod(String),
    /// The evaluated URL did not parse.
    InvalidUrl(String),
    /// Transport-level failure talking to the backend.
    Http(String),
    /// The backend did not answer within the configured timeout.
    Timeout,
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dsl(e) => write!(f, "dsl_error: {e}"),
            Self::InvalidMethod(m) => write!(f, "invalid HTTP method '{m}'"),
            Self::InvalidUrl(u) => write!(f, "invalid URL '{u}'"),
            Self::Http(e) => write!(f, "http request failed: {e}"),
            Self::Timeout => f.write_str("http request timed out"),
        }
    }
}

impl std::error::Error for InvokeError {}

impl From<DslError> for InvokeError {
    fn from(e: DslError) -> Self {
        Self::Dsl(e)
    }
}

/// Per-call evaluation context (spec'd fields of the template language).
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Tool-call arguments, as sent by the MCP client.
    pub args: Value,
    /// Server-level facts (`baseUrl`, tool name, verb).
    pub config: Value,
    /// The captured client request (`headers`, `queries`, `cookies`).
    pub request: Value,
}

impl EvalContext {
    #[must_use]
    pub fn new(server: &HttpServerConfig, tool: &ToolConfig, args: Value, request: Value) -> Self {
        Self {
            args,
            config: json!({
                "baseUrl": server.url,
                "toolName": tool.name,
                "method": tool.method,
            }),
            request,
        }
    }

    fn root(&self, response: Option<&Value>) -> Value {
        // The identifier namespace also exposes `args` fields at top level so
        // short templates can write `id` instead of `args.id`.
        let mut root = serde_json::Map::new();
        if let Value::Object(map) = &self.args {
            for (k, v) in map {
                root.insert(k.clone(), v.clone());
            }
        }
        root.insert("args".to_string(), self.args.clone());
        root.insert("config".to_string(), self.config.clone());
        root.insert("request".to_string(), self.request.clone());
        if let Some(response) = response {
            root.insert("response".to_string(), response.clone());
        }
        Value::Object(root)
    }
}

/// A fully-evaluated request, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: reqwest::Method,
    pub url: reqwest::Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// The raw outcome of the HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpToolResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body_text: String,
}

/// Evaluate every request-side template. No I/O happens here.
///
/// # Errors
///
/// Returns [`InvokeError::Dsl`] when any template fails, and
/// [`InvokeError::InvalidMethod`] / [`InvokeError::InvalidUrl`] for
/// malformed verb or evaluated URL.
pub fn prepare(
    server: &HttpServerConfig,
    tool: &ToolConfig,
    ctx: &EvalContext,
) -> Result<PreparedRequest, InvokeError> {
    let root = ctx.root(None);

    let method: reqwest::Method = tool
        .method
        .to_ascii_uppercase()
        .parse()
        .map_err(|_| InvokeError::InvalidMethod(tool.method.clone()))?;

    let rendered_path = portico_dsl::render(&tool.path, &root)?;
    let url_str = if rendered_path.starts_with("http://") || rendered_path.starts_with("https://") {
        rendered_path
    } else {
        format!(
            "{}/{}",
            server.url.trim_end_matches('/'),
            rendered_path.trim_start_matches('/')
        )
    };
    let mut url = reqwest::Url::parse(&url_str).map_err(|_| InvokeError::InvalidUrl(url_str))?;

    // Query-position args.
    let query_args: Vec<(String, String)> = tool
        .args
        .iter()
        .filter(|arg| arg.position == ArgPosition::Query)
        .filter_map(|arg| {
            let value = portico_dsl::member(&ctx.args, &Value::String(arg.name.clone()));
            (!value.is_null())
                .then(|| (arg.name.clone(), portico_dsl::to_display_string(&value)))
        })
        .collect();
    if !query_args.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &query_args {
            pairs.append_pair(name, value);
        }
    }

    // Header templates, then header-position args on top.
    let mut headers: Vec<(String, String)> = Vec::new();
    for (name, template) in &tool.headers {
        headers.push((name.clone(), portico_dsl::render(template, &root)?));
    }
    for arg in &tool.args {
        if arg.position != ArgPosition::Header {
            continue;
        }
        let value = portico_dsl::member(&ctx.args, &Value::String(arg.name.clone()));
        if value.is_null() {
            continue;
        }
        headers.push((arg.name.clone(), portico_dsl::to_display_string(&value)));
    }

    let body = build_body(tool, ctx, &root)?;
    if body.is_some()
        && !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }

    Ok(PreparedRequest {
        method,
        url,
        headers,
        body,
    })
}

fn build_body(
    tool: &ToolConfig,
    ctx: &EvalContext,
    root: &Value,
) -> Result<Option<Value>, InvokeError> {
    if !tool.method_has_body() {
        return Ok(None);
    }

    if !tool.request_body.trim().is_empty() {
        let evaluated = portico_dsl::eval_str(&tool.request_body, root)?;
        // A template evaluating to a string must still produce valid JSON.
        let body = match evaluated {
            Value::String(s) => serde_json::from_str(&s).map_err(|e| {
                InvokeError::Dsl(DslError {
                    message: format!("request body is not valid JSON: {e}"),
                    position: None,
                })
            })?,
            other => other,
        };
        return Ok(Some(body));
    }

    // No template: collect body-position args into an object.
    let mut body = serde_json::Map::new();
    for arg in &tool.args {
        if arg.position != ArgPosition::Body {
            continue;
        }
        let value = portico_dsl::member(&ctx.args, &Value::String(arg.name.clone()));
        if !value.is_null() {
            body.insert(arg.name.clone(), value);
        }
    }
    Ok((!body.is_empty()).then_some(Value::Object(body)))
}

/// Perform the HTTP exchange.
///
/// # Errors
///
/// Returns [`InvokeError::Timeout`] when the deadline passes and
/// [`InvokeError::Http`] for every other transport failure.
pub async fn execute(
    client: &reqwest::Client,
    prepared: PreparedRequest,
    timeout: Duration,
) -> Result<HttpToolResponse, InvokeError> {
    let mut request = client
        .request(prepared.method, prepared.url)
        .timeout(timeout);
    for (name, value) in &prepared.headers {
        request = request.header(name, value);
    }
    if let Some(body) = &prepared.body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            InvokeError::Timeout
        } else {
            InvokeError::Http(e.to_string())
        }
    })?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body_text = response
        .text()
        .await
        .map_err(|e| InvokeError::Http(e.to_string()))?;

    Ok(HttpToolResponse {
        status,
        headers,
        body_text,
    })
}

/// Evaluate the `response_body` template against the HTTP outcome.
///
/// An empty template returns the raw response body.
///
/// # Errors
///
/// Returns [`InvokeError::Dsl`] when the template fails.
pub fn shape_response(
    tool: &ToolConfig,
    ctx: &EvalContext,
    response: &HttpToolResponse,
) -> Result<String, InvokeError> {
    if tool.response_body.trim().is_empty() {
        return Ok(response.body_text.clone());
    }

    // `body` is the parsed JSON when the backend returned JSON, else the raw text.
    let body: Value = serde_json::from_str(&response.body_text)
        .unwrap_or_else(|_| Value::String(response.body_text.clone()));
    let response_ctx = json!({
        "status": response.status,
        "headers": response.headers,
        "body": body,
    });
    let root = ctx.root(Some(&response_ctx));
    Ok(portico_dsl::render(&tool.response_body, &root)?)
}

#[cfg(test)]
mod tests {
    use super::{EvalContext, HttpToolResponse, InvokeError, prepare, shape_response};
    use crate::config::{HttpServerConfig, ToolConfig};
    use serde_json::json;

    fn server() -> HttpServerConfig {
        serde_json::from_value(json!({
            "name": "petstore",
            "url": "https://api.example.com/v1/",
            "tools": ["get_user"],
        }))
        .expect("server config")
    }

    fn tool() -> ToolConfig {
        serde_json::from_value(json!({
            "name": "get_user",
            "method": "GET",
            "path": "\"/users/\" + toString(args.id)",
            "headers": { "X-Trace": "request.headers.traceparent | default(\"none\")" },
            "args": [
                { "name": "id", "position": "path", "type": "number", "required": true },
                { "name": "verbose", "position": "query", "type": "boolean" }
            ],
        }))
        .expect("tool config")
    }

    #[test]
    fn prepare_renders_path_query_and_headers() {
        let ctx = EvalContext::new(
            &server(),
            &tool(),
            json!({"id": 42, "verbose": true}),
            json!({"headers": {}, "queries": {}, "cookies": {}}),
        );
        let prepared = prepare(&server(), &tool(), &ctx).expect("prepare");
        assert_eq!(
            prepared.url.as_str(),
            "https://api.example.com/v1/users/42?verbose=true"
        );
        assert_eq!(prepared.headers, vec![("X-Trace".to_string(), "none".to_string())]);
        assert!(prepared.body.is_none());
    }

    #[test]
    fn prepare_fails_without_sending_on_template_error() {
        let mut bad = tool();
        bad.path = "1/0".to_string();
        let ctx = EvalContext::new(
            &server(),
            &bad,
            json!({}),
            json!({"headers": {}, "queries": {}, "cookies": {}}),
        );
        assert!(matches!(
            prepare(&server(), &bad, &ctx),
            Err(InvokeError::Dsl(_))
        ));
    }

    #[test]
    fn templated_body_must_be_json() {
        let mut t = tool();
        t.method = "POST".to_string();
        t.request_body = r#""not json at all""#.to_string();
        let ctx = EvalContext::new(
            &server(),
            &t,
            json!({"id": 1}),
            json!({"headers": {}, "queries": {}, "cookies": {}}),
        );
        assert!(matches!(
            prepare(&server(), &t, &ctx),
            Err(InvokeError::Dsl(_))
        ));
    }

    #[test]
    fn object_body_template_sets_content_type() {
        let mut t = tool();
        t.method = "POST".to_string();
        t.request_body = "{userId: args.id}".to_string();
        let ctx = EvalContext::new(
            &server(),
            &t,
            json!({"id": 7}),
            json!({"headers": {}, "queries": {}, "cookies": {}}),
        );
        let prepared = prepare(&server(), &t, &ctx).expect("prepare");
        assert_eq!(prepared.body, Some(json!({"userId": 7})));
        assert!(
            prepared
                .headers
                .iter()
                .any(|(n, v)| n == "Content-Type" && v == "application/json")
        );
    }

    #[test]
    fn response_shaping_picks_fields() {
        let mut t = tool();
        t.response_body = r#"response.body | pick("id", "name") | toJSON"#.to_string();
        let ctx = EvalContext::new(
            &server(),
            &t,
            json!({"id": 7}),
            json!({"headers": {}, "queries": {}, "cookies": {}}),
        );
        let response = HttpToolResponse {
            status: 200,
            headers: std::collections::HashMap::new(),
            body_text: r#"{"id": 7, "name": "ada", "secret": "x"}"#.to_string(),
        };
        let shaped = shape_response(&t, &ctx, &response).expect("shape");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&shaped).expect("json"),
            json!({"id": 7, "name": "ada"})
        );
    }

    #[test]
    fn empty_response_template_returns_raw_body() {
        let t = tool();
        let ctx = EvalContext::new(
            &server(),
            &t,
            json!({}),
            json!({"headers": {}, "queries": {}, "cookies": {}}),
        );
        let response = HttpToolResponse {
            status: 404,
            headers: std::collections::HashMap::new(),
            body_text: "not found".to_string(),
        };
        assert_eq!(shape_response(&t, &ctx, &response).expect("shape"), "not found");
    }
}
