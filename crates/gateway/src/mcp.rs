//! Client-facing gateway endpoints.
//!
//! Three endpoints per router prefix:
//!
//! - `GET  /{prefix}/sse`                     long-lived SSE stream
//! - `POST /{prefix}/message?session_id=...`  JSON-RPC over the SSE session
//! - `POST /{prefix}/mcp`                     streamable HTTP transport
//!
//! Prefixes are activated at runtime, so routing is a wildcard route plus
//! snapshot lookup rather than a static route table. JSON-RPC responses on
//! the SSE path are pushed through the session store (which is what makes
//! a POST on one replica reach a stream held open on another); the POST
//! itself answers `202 Accepted`.

use crate::cors;
use crate::error::{
    CODE_METHOD_NOT_FOUND, CODE_NOT_INITIALIZED, CODE_PARSE_ERROR, jsonrpc_error,
    jsonrpc_response, store_error_status, transport_error_response,
};
use crate::notifier::{ApiIngest, ConfigUpdate};
use crate::session::{
    Connection, Message, Meta, RequestInfo, SessionKind, SessionStore, StoreError,
};
use crate::state::{GatewayState, PrefixRuntime};
use crate::{config::TimeoutConfig, model::McpConfig};
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response, sse::Event, sse::Sse},
};
use futures::StreamExt as _;
use rmcp::model::CallToolRequestParam;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const HEADER_SESSION_ID: &str = "mcp-session-id";
const NDJSON_MIME_TYPE: &str = "application/x-ndjson";

pub struct McpState {
    pub store: Arc<dyn SessionStore>,
    pub gateway: Arc<GatewayState>,
    pub timeouts: TimeoutConfig,
    pub shutdown: CancellationToken,
    /// Local bindings: session id -> pinned runtime + protocol state.
    sessions: parking_lot::RwLock<HashMap<String, Arc<SessionBinding>>>,
    /// Present when the `api` notifier variant is receiving on this replica.
    pub api_ingest: Option<ApiIngest>,
}

impl McpState {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        gateway: Arc<GatewayState>,
        timeouts: TimeoutConfig,
        shutdown: CancellationToken,
        api_ingest: Option<ApiIngest>,
    ) -> Self {
        Self {
            store,
            gateway,
            timeouts,
            shutdown,
            sessions: parking_lot::RwLock::new(HashMap::new()),
            api_ingest,
        }
    }

    fn binding(&self, session_id: &str) -> Option<Arc<SessionBinding>> {
        self.sessions.read().get(session_id).cloned()
    }

    fn bind(&self, session_id: &str, runtime: Arc<PrefixRuntime>) -> Arc<SessionBinding> {
        let binding = Arc::new(SessionBinding::new(runtime, self.shutdown.child_token()));
        self.sessions
            .write()
            .insert(session_id.to_string(), binding.clone());
        binding
    }

    fn unbind(&self, session_id: &str) {
        if let Some(binding) = self.sessions.write().remove(session_id) {
            binding.cancel.cancel();
        }
    }
}

/// Per-session protocol state, local to the replica that created it.
///
/// The runtime is captured at session creation: a config reload does not
/// rewrite what an existing session sees.
pub struct SessionBinding {
    pub runtime: Arc<PrefixRuntime>,
    initialized: AtomicBool,
    last_activity: parking_lot::Mutex<Instant>,
    /// Cancels in-flight calls on disconnect / idle timeout.
    pub cancel: CancellationToken,
}

impl SessionBinding {
    fn new(runtime: Arc<PrefixRuntime>, cancel: CancellationToken) -> Self {
        Self {
            runtime,
            initialized: AtomicBool::new(false),
            last_activity: parking_lot::Mutex::new(Instant::now()),
            cancel,
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }
}

pub fn router(state: Arc<McpState>) -> Router {
    Router::new()
        .route(
            "/api/v1/mcp/notify",
            axum::routing::post(notify_endpoint),
        )
        .route("/{*path}", axum::routing::any(dispatch))
        .with_state(state)
}

/// Wildcard entry point: `/{prefix...}/{sse|message|mcp}`.
async fn dispatch(
    Path(path): Path<String>,
    State(state): State<Arc<McpState>>,
    method: Method,
    Query(queries): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = path.trim_matches('/');
    let Some((prefix, endpoint)) = path.rsplit_once('/') else {
        return (StatusCode::NOT_FOUND, "unknown path").into_response();
    };
    if prefix.is_empty() {
        return (StatusCode::NOT_FOUND, "unknown path").into_response();
    }

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    match (endpoint, &method) {
        ("sse" | "message" | "mcp", &Method::OPTIONS) => {
            let snapshot = state.gateway.snapshot();
            let runtime = snapshot
                .resolve(prefix)
                .or_else(|| snapshot.resolve_sse(prefix));
            runtime.map_or_else(
                || (StatusCode::NOT_FOUND, "unknown prefix").into_response(),
                |rt| cors::preflight(rt.router.cors.as_ref(), origin.as_deref()),
            )
        }
        ("sse", &Method::GET) => handle_sse(state, prefix, &headers, queries, origin).await,
        ("message", &Method::POST) => {
            handle_message(state, prefix, &queries, origin, &body).await
        }
        ("mcp", &Method::POST) => handle_streamable_post(state, prefix, &headers, origin, &body).await,
        ("mcp", &Method::DELETE) => handle_streamable_delete(state, &headers).await,
        ("sse" | "message" | "mcp", _) => {
            (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response()
        }
        _ => (StatusCode::NOT_FOUND, "unknown endpoint").into_response(),
    }
}

fn capture_request_info(headers: &HeaderMap, queries: &HashMap<String, String>) -> RequestInfo {
    let mut header_map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let mut cookies = HashMap::new();
    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookie_header.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }

    RequestInfo {
        headers: header_map,
        queries: queries.clone(),
        cookies,
    }
}

// ---------------------------------------------------------------------------
// GET /{prefix}/sse
// ---------------------------------------------------------------------------

/// Unregisters the session when the SSE stream is dropped (client
/// disconnect, idle timeout, shutdown).
struct SseCleanup {
    state: Arc<McpState>,
    session_id: String,
}

impl Drop for SseCleanup {
    fn drop(&mut self) {
        let state = self.state.clone();
        let session_id = std::mem::take(&mut self.session_id);
        state.unbind(&session_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = state.store.unregister(&session_id).await {
                    tracing::warn!(session_id = %session_id, error = %e, "failed to unregister session");
                }
            });
        }
    }
}

enum PumpPhase {
    Endpoint,
    Pump,
    Done,
}

struct PumpCtx {
    conn: Arc<dyn Connection>,
    binding: Arc<SessionBinding>,
    idle: std::time::Duration,
    endpoint_url: String,
    phase: PumpPhase,
    _cleanup: SseCleanup,
}

async fn handle_sse(
    state: Arc<McpState>,
    prefix: &str,
    headers: &HeaderMap,
    queries: HashMap<String, String>,
    origin: Option<String>,
) -> Response {
    let Some(runtime) = state.gateway.snapshot().resolve_sse(prefix) else {
        return (StatusCode::NOT_FOUND, "unknown prefix").into_response();
    };

    let message_prefix = runtime.router.prefix.trim_matches('/').to_string();
    let session_id = queries
        .get("session_id")
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Reconnects with a known id resume the existing queue.
    let conn = match state.store.get(&session_id).await {
        Ok(existing) => existing,
        Err(StoreError::NotFound(_)) => {
            let meta = Meta::new(
                session_id.clone(),
                message_prefix.clone(),
                SessionKind::Sse,
                capture_request_info(headers, &queries),
            );
            match state.store.register(meta).await {
                Ok(conn) => conn,
                Err(e) => {
                    return (store_error_status(&e), e.to_string()).into_response();
                }
            }
        }
        Err(e) => return (store_error_status(&e), e.to_string()).into_response(),
    };

    let binding = state.bind(&session_id, runtime.clone());
    tracing::info!(session_id = %session_id, prefix = %message_prefix, "sse session opened");

    let ctx = PumpCtx {
        conn,
        binding,
        idle: state.timeouts.idle_timeout(),
        endpoint_url: format!("/{message_prefix}/message?session_id={session_id}"),
        phase: PumpPhase::Endpoint,
        _cleanup: SseCleanup {
            state: state.clone(),
            session_id: session_id.clone(),
        },
    };

    let stream = futures::stream::unfold(ctx, |mut ctx| async move {
        loop {
            match ctx.phase {
                PumpPhase::Endpoint => {
                    ctx.phase = PumpPhase::Pump;
                    let event = Event::default().event("endpoint").data(&ctx.endpoint_url);
                    return Some((Ok::<_, Infallible>(event), ctx));
                }
                PumpPhase::Pump => {
                    let next = tokio::select! {
                        () = ctx.binding.cancel.cancelled() => None,
                        next = tokio::time::timeout(ctx.idle, ctx.conn.recv()) => Some(next),
                    };
                    match next {
                        // Cancelled (shutdown or server close): say goodbye.
                        None => {
                            ctx.phase = PumpPhase::Done;
                            let event = Event::default().event("close").data("server closing");
                            return Some((Ok(event), ctx));
                        }
                        Some(Ok(Some(message))) => {
                            let event = Event::default().event(message.event).data(message.data);
                            return Some((Ok(event), ctx));
                        }
                        // Queue closed: session was unregistered elsewhere.
                        Some(Ok(None)) => {
                            ctx.phase = PumpPhase::Done;
                            let event = Event::default().event("close").data("session closed");
                            return Some((Ok(event), ctx));
                        }
                        Some(Err(_)) => {
                            // No queued message within the idle window; only
                            // close when the client has also been silent.
                            if ctx.binding.idle_for() >= ctx.idle {
                                ctx.phase = PumpPhase::Done;
                                let event =
                                    Event::default().event("close").data("session idle timeout");
                                return Some((Ok(event), ctx));
                            }
                        }
                    }
                }
                PumpPhase::Done => return None,
            }
        }
    });

    let mut response = Sse::new(stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    cors::apply(response_headers, runtime.router.cors.as_ref(), origin.as_deref());
    response
}

// ---------------------------------------------------------------------------
// POST /{prefix}/message
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

impl RpcRequest {
    fn id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

async fn handle_message(
    state: Arc<McpState>,
    prefix: &str,
    queries: &HashMap<String, String>,
    origin: Option<String>,
    body: &Bytes,
) -> Response {
    let Some(session_id) = queries.get("session_id").filter(|v| !v.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing session_id").into_response();
    };

    let conn = match state.store.get(session_id).await {
        Ok(conn) => conn,
        Err(e @ StoreError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
        Err(e) => return (store_error_status(&e), e.to_string()).into_response(),
    };
    if conn.meta().prefix != prefix {
        return (StatusCode::NOT_FOUND, "session does not belong to this prefix").into_response();
    }

    let Ok(rpc) = serde_json::from_slice::<RpcRequest>(body) else {
        return (StatusCode::BAD_REQUEST, "malformed JSON-RPC request").into_response();
    };

    let binding = state.binding(session_id);
    if let Some(binding) = &binding {
        binding.touch();
    }

    // The runtime pinned at session creation wins; a session arriving from
    // another replica uses the current snapshot for this prefix.
    let runtime = match &binding {
        Some(binding) => binding.runtime.clone(),
        None => match state.gateway.snapshot().resolve(prefix) {
            Some(runtime) => runtime,
            None => return (StatusCode::NOT_FOUND, "unknown prefix").into_response(),
        },
    };

    // Initialization gating happens on the replica that owns the stream.
    if let Some(binding) = &binding
        && matches!(rpc.method.as_str(), "tools/list" | "tools/call")
        && !binding.initialized.load(Ordering::Acquire)
    {
        let error = jsonrpc_error(
            rpc.id(),
            CODE_NOT_INITIALIZED,
            "session not initialized",
            None,
        );
        push_message(&conn, error).await;
        return accepted(origin, &runtime);
    }

    let cancel = binding
        .as_ref()
        .map_or_else(|| state.shutdown.child_token(), |b| b.cancel.child_token());
    let request_info = conn.meta().request.clone();
    let dispatch_state = DispatchCtx {
        runtime: runtime.clone(),
        conn,
        binding,
        request_info,
        cancel,
    };
    tokio::spawn(dispatch_rpc(dispatch_state, rpc));

    accepted(origin, &runtime)
}

fn accepted(origin: Option<String>, runtime: &Arc<PrefixRuntime>) -> Response {
    let mut response = StatusCode::ACCEPTED.into_response();
    cors::apply(
        response.headers_mut(),
        runtime.router.cors.as_ref(),
        origin.as_deref(),
    );
    response
}

async fn push_message(conn: &Arc<dyn Connection>, payload: Value) {
    let message = Message::new("message", payload.to_string());
    if let Err(e) = conn.send(message).await {
        tracing::debug!(session_id = %conn.meta().id, error = %e, "failed to push session message");
    }
}

struct DispatchCtx {
    runtime: Arc<PrefixRuntime>,
    conn: Arc<dyn Connection>,
    binding: Option<Arc<SessionBinding>>,
    request_info: RequestInfo,
    cancel: CancellationToken,
}

/// Handle one JSON-RPC request on an SSE session; every outcome is pushed
/// to the session's stream as a `message` event.
async fn dispatch_rpc(ctx: DispatchCtx, rpc: RpcRequest) {
    match rpc.method.as_str() {
        "initialize" => {
            if let Some(binding) = &ctx.binding {
                binding.initialized.store(true, Ordering::Release);
            }
            let result = initialize_result();
            push_message(&ctx.conn, jsonrpc_response(rpc.id(), result)).await;
        }
        "ping" => {
            push_message(&ctx.conn, jsonrpc_response(rpc.id(), json!({}))).await;
        }
        method if method.starts_with("notifications/") => {
            // Acknowledged by the 202 itself; nothing reaches upstreams.
            tracing::debug!(method = %method, "notification acknowledged");
        }
        "tools/list" => {
            let tools = ctx.runtime.manager.fetch_all_tools().await;
            let result = json!({ "tools": tools });
            push_message(&ctx.conn, jsonrpc_response(rpc.id(), result)).await;
        }
        "tools/call" => {
            handle_tools_call(&ctx, &rpc).await;
        }
        other => {
            let error = jsonrpc_error(
                rpc.id(),
                CODE_METHOD_NOT_FOUND,
                &format!("method not found: {other}"),
                None,
            );
            push_message(&ctx.conn, error).await;
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "portico-gateway",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn parse_call_params(params: Option<&Value>) -> Option<CallToolRequestParam> {
    let params = params?;
    let name = params.get("name")?.as_str()?.to_string();
    let arguments = params
        .get("arguments")
        .and_then(Value::as_object)
        .cloned();
    Some(CallToolRequestParam {
        name: name.into(),
        arguments,
    })
}

async fn handle_tools_call(ctx: &DispatchCtx, rpc: &RpcRequest) {
    let Some(params) = parse_call_params(rpc.params.as_ref()) else {
        let error = jsonrpc_error(
            rpc.id(),
            crate::error::CODE_INVALID_PARAMS,
            "tools/call requires a tool name",
            None,
        );
        push_message(&ctx.conn, error).await;
        return;
    };

    let manager = ctx.runtime.manager.clone();
    let tool_name = params.name.to_string();

    if manager.is_streaming_tool(&tool_name).await {
        let stream = tokio::select! {
            () = ctx.cancel.cancelled() => return,
            stream = manager.call_tool_streaming(params, &ctx.request_info) => stream,
        };
        match stream {
            Ok(mut chunks) => {
                let mut contents: Vec<Value> = Vec::new();
                let mut is_error = false;
                loop {
                    let chunk = tokio::select! {
                        () = ctx.cancel.cancelled() => return,
                        chunk = chunks.next() => chunk,
                    };
                    match chunk {
                        Some(Ok(chunk)) => {
                            let done = chunk.is_final;
                            if let Some(meta) = &chunk.metadata {
                                is_error = meta
                                    .get("isError")
                                    .and_then(Value::as_bool)
                                    .unwrap_or(false);
                            }
                            contents.push(chunk.content.clone());
                            let data =
                                serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                            if ctx
                                .conn
                                .send(Message::new("message", data))
                                .await
                                .is_err()
                            {
                                return;
                            }
                            if done {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let upstream = manager.owner_name(&tool_name);
                            let error =
                                transport_error_response(rpc.id(), upstream.as_deref(), &e);
                            push_message(&ctx.conn, error).await;
                            return;
                        }
                        None => break,
                    }
                }
                let result = json!({ "content": contents, "isError": is_error });
                push_message(&ctx.conn, jsonrpc_response(rpc.id(), result)).await;
            }
            Err(e) => {
                let upstream = manager.owner_name(&tool_name);
                let error = transport_error_response(rpc.id(), upstream.as_deref(), &e);
                push_message(&ctx.conn, error).await;
            }
        }
        return;
    }

    let result = tokio::select! {
        () = ctx.cancel.cancelled() => return,
        result = manager.call_tool(params, &ctx.request_info) => result,
    };
    match result {
        Ok(result) => {
            let result = serde_json::to_value(&result).unwrap_or_else(|e| {
                json!({ "content": [], "isError": true, "_encode_error": e.to_string() })
            });
            push_message(&ctx.conn, jsonrpc_response(rpc.id(), result)).await;
        }
        Err(e) => {
            let upstream = manager.owner_name(&tool_name);
            let error = transport_error_response(rpc.id(), upstream.as_deref(), &e);
            push_message(&ctx.conn, error).await;
        }
    }
}

// ---------------------------------------------------------------------------
// POST /{prefix}/mcp (streamable HTTP)
// ---------------------------------------------------------------------------

async fn handle_streamable_post(
    state: Arc<McpState>,
    prefix: &str,
    headers: &HeaderMap,
    origin: Option<String>,
    body: &Bytes,
) -> Response {
    let Some(runtime) = state.gateway.snapshot().resolve(prefix) else {
        return (StatusCode::NOT_FOUND, "unknown prefix").into_response();
    };

    let Ok(rpc) = serde_json::from_slice::<RpcRequest>(body) else {
        let error = jsonrpc_error(Value::Null, CODE_PARSE_ERROR, "malformed JSON-RPC request", None);
        return json_with_cors(StatusCode::OK, &error, &runtime, origin.as_deref());
    };

    let session_header = headers
        .get(HEADER_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if rpc.method == "initialize" {
        // A fresh streamable client initializes before anything else; the
        // response mints its session id.
        let session_id = uuid::Uuid::new_v4().to_string();
        let queries = HashMap::new();
        let meta = Meta::new(
            session_id.clone(),
            prefix.to_string(),
            SessionKind::Streamable,
            capture_request_info(headers, &queries),
        );
        if let Err(e) = state.store.register(meta).await {
            return (store_error_status(&e), e.to_string()).into_response();
        }
        let binding = state.bind(&session_id, runtime.clone());
        binding.initialized.store(true, Ordering::Release);

        let payload = jsonrpc_response(rpc.id(), initialize_result());
        let mut response = json_with_cors(StatusCode::OK, &payload, &runtime, origin.as_deref());
        if let Ok(v) = HeaderValue::from_str(&session_id) {
            response.headers_mut().insert(HEADER_SESSION_ID, v);
        }
        return response;
    }

    let Some(session_id) = session_header else {
        return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response();
    };
    match state.store.get(&session_id).await {
        Ok(conn) if conn.meta().prefix == prefix => {}
        Ok(_) => {
            return (StatusCode::NOT_FOUND, "session does not belong to this prefix")
                .into_response();
        }
        Err(e @ StoreError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
        Err(e) => return (store_error_status(&e), e.to_string()).into_response(),
    }

    let binding = state.binding(&session_id);
    if let Some(binding) = &binding {
        binding.touch();
    }
    let runtime = binding.as_ref().map_or(runtime, |b| b.runtime.clone());

    match rpc.method.as_str() {
        "ping" => {
            let payload = jsonrpc_response(rpc.id(), json!({}));
            json_with_cors(StatusCode::OK, &payload, &runtime, origin.as_deref())
        }
        method if method.starts_with("notifications/") => {
            StatusCode::ACCEPTED.into_response()
        }
        "tools/list" => {
            let tools = runtime.manager.fetch_all_tools().await;
            let payload = jsonrpc_response(rpc.id(), json!({ "tools": tools }));
            json_with_cors(StatusCode::OK, &payload, &runtime, origin.as_deref())
        }
        "tools/call" => {
            handle_streamable_call(&state, &runtime, &session_id, &rpc, origin.as_deref()).await
        }
        other => {
            let payload = jsonrpc_error(
                rpc.id(),
                CODE_METHOD_NOT_FOUND,
                &format!("method not found: {other}"),
                None,
            );
            json_with_cors(StatusCode::OK, &payload, &runtime, origin.as_deref())
        }
    }
}

async fn handle_streamable_call(
    state: &Arc<McpState>,
    runtime: &Arc<PrefixRuntime>,
    session_id: &str,
    rpc: &RpcRequest,
    origin: Option<&str>,
) -> Response {
    let Some(params) = parse_call_params(rpc.params.as_ref()) else {
        let payload = jsonrpc_error(
            rpc.id(),
            crate::error::CODE_INVALID_PARAMS,
            "tools/call requires a tool name",
            None,
        );
        return json_with_cors(StatusCode::OK, &payload, runtime, origin);
    };

    let request_info = match state.store.get(session_id).await {
        Ok(conn) => conn.meta().request.clone(),
        Err(_) => RequestInfo::default(),
    };
    let manager = runtime.manager.clone();
    let tool_name = params.name.to_string();
    let call_id = rpc.id();

    if manager.is_streaming_tool(&tool_name).await {
        match manager.call_tool_streaming(params, &request_info).await {
            Ok(chunks) => {
                // NDJSON: one chunk per line, last line is the full response.
                let id = call_id.clone();
                let body_stream = ndjson_body(chunks, id);
                let mut response = Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, NDJSON_MIME_TYPE)
                    .body(Body::from_stream(body_stream))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
                cors::apply(response.headers_mut(), runtime.router.cors.as_ref(), origin);
                response
            }
            Err(e) => {
                let upstream = manager.owner_name(&tool_name);
                let payload = transport_error_response(call_id, upstream.as_deref(), &e);
                json_with_cors(StatusCode::OK, &payload, runtime, origin)
            }
        }
    } else {
        match manager.call_tool(params, &request_info).await {
            Ok(result) => {
                let result = serde_json::to_value(&result).unwrap_or_default();
                let payload = jsonrpc_response(call_id, result);
                json_with_cors(StatusCode::OK, &payload, runtime, origin)
            }
            Err(e) => {
                let upstream = manager.owner_name(&tool_name);
                let payload = transport_error_response(call_id, upstream.as_deref(), &e);
                json_with_cors(StatusCode::OK, &payload, runtime, origin)
            }
        }
    }
}

/// Serialize a chunk stream as NDJSON lines, closing with the complete
/// JSON-RPC response (or error) for the call.
fn ndjson_body(
    chunks: crate::transport::ChunkStream,
    id: Value,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    struct NdjsonState {
        chunks: crate::transport::ChunkStream,
        id: Value,
        contents: Vec<Value>,
        is_error: bool,
        finished: bool,
    }

    futures::stream::unfold(
        NdjsonState {
            chunks,
            id,
            contents: Vec::new(),
            is_error: false,
            finished: false,
        },
        |mut s| async move {
            if s.finished {
                return None;
            }
            match s.chunks.next().await {
                Some(Ok(chunk)) => {
                    if let Some(meta) = &chunk.metadata {
                        s.is_error = meta
                            .get("isError")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                    }
                    s.contents.push(chunk.content.clone());
                    let mut line =
                        serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                    line.push('\n');
                    if chunk.is_final {
                        s.finished = true;
                        let result =
                            json!({ "content": s.contents, "isError": s.is_error });
                        let response = jsonrpc_response(s.id.clone(), result);
                        line.push_str(&response.to_string());
                        line.push('\n');
                    }
                    Some((Ok(Bytes::from(line)), s))
                }
                Some(Err(e)) => {
                    s.finished = true;
                    let error = transport_error_response(s.id.clone(), None, &e);
                    let mut line = error.to_string();
                    line.push('\n');
                    Some((Ok(Bytes::from(line)), s))
                }
                None => {
                    s.finished = true;
                    let result = json!({ "content": s.contents, "isError": s.is_error });
                    let response = jsonrpc_response(s.id.clone(), result);
                    let mut line = response.to_string();
                    line.push('\n');
                    Some((Ok(Bytes::from(line)), s))
                }
            }
        },
    )
}

async fn handle_streamable_delete(state: Arc<McpState>, headers: &HeaderMap) -> Response {
    let Some(session_id) = headers
        .get(HEADER_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response();
    };

    state.unbind(&session_id);
    match state.store.unregister(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (store_error_status(&e), e.to_string()).into_response(),
    }
}

fn json_with_cors(
    status: StatusCode,
    payload: &Value,
    runtime: &Arc<PrefixRuntime>,
    origin: Option<&str>,
) -> Response {
    let mut response = (status, axum::Json(payload.clone())).into_response();
    cors::apply(response.headers_mut(), runtime.router.cors.as_ref(), origin);
    response
}

// ---------------------------------------------------------------------------
// POST /api/v1/mcp/notify (api notifier receiver)
// ---------------------------------------------------------------------------

async fn notify_endpoint(State(state): State<Arc<McpState>>, body: Bytes) -> Response {
    let Some(ingest) = &state.api_ingest else {
        return (StatusCode::NOT_FOUND, "api notifier not enabled").into_response();
    };

    let update = if body.is_empty() {
        ConfigUpdate::Reload
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Null) => ConfigUpdate::Reload,
            Ok(value) => match serde_json::from_value::<McpConfig>(value) {
                Ok(config) => ConfigUpdate::Apply(Box::new(config)),
                Err(e) => {
                    return (StatusCode::BAD_REQUEST, format!("invalid config payload: {e}"))
                        .into_response();
                }
            },
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")).into_response();
            }
        }
    };

    match ingest.send(update).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "reload worker is gone").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::{RpcRequest, capture_request_info, parse_call_params};
    use axum::http::{HeaderMap, HeaderValue, header};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn captures_headers_queries_and_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sid=abc; theme=dark"));
        headers.insert("x-trace", HeaderValue::from_static("t-1"));
        let queries = HashMap::from([("k".to_string(), "v".to_string())]);

        let info = capture_request_info(&headers, &queries);
        assert_eq!(info.cookies.get("sid").map(String::as_str), Some("abc"));
        assert_eq!(info.cookies.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(info.headers.get("x-trace").map(String::as_str), Some("t-1"));
        assert_eq!(info.queries.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn call_params_require_a_name() {
        assert!(parse_call_params(Some(&json!({ "arguments": {} }))).is_none());
        let params =
            parse_call_params(Some(&json!({ "name": "echo", "arguments": { "a": 1 } })))
                .expect("params");
        assert_eq!(params.name, "echo");
        assert_eq!(
            params.arguments.expect("args").get("a"),
            Some(&json!(1))
        );
    }

    #[test]
    fn rpc_request_parses_without_id() {
        let rpc: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).expect("parse");
        assert_eq!(rpc.method, "ping");
        assert_eq!(rpc.id(), serde_json::Value::Null);
    }
}
