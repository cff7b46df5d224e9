//! Error taxonomy and its JSON-RPC / HTTP surface.
//!
//! Transports and the session store report typed errors; this module maps
//! them onto the wire: a stable JSON-RPC `code`, a human `message`, and a
//! machine-readable `data` record `{kind, upstreamName?}`.

use crate::session::StoreError;
use crate::transport::TransportError;
use serde_json::{Value, json};

// JSON-RPC protocol codes.
pub const CODE_NOT_INITIALIZED: i64 = -32002;
pub const CODE_PARSE_ERROR: i64 = -32700;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_INTERNAL: i64 = -32603;
// Gateway server-error range.
pub const CODE_UPSTREAM: i64 = -32000;
pub const CODE_TIMEOUT: i64 = -32001;
pub const CODE_DSL: i64 = -32010;

/// Build a JSON-RPC error response object.
#[must_use]
pub fn jsonrpc_error(id: Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

/// Build a JSON-RPC success response object.
#[must_use]
pub fn jsonrpc_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Map a transport failure onto the wire error for one tool call.
#[must_use]
pub fn transport_error_response(id: Value, upstream: Option<&str>, error: &TransportError) -> Value {
    let code = match error {
        TransportError::ToolNotFound(_) => CODE_INVALID_PARAMS,
        TransportError::Timeout => CODE_TIMEOUT,
        TransportError::Dsl(_) => CODE_DSL,
        // An upstream that answered with a JSON-RPC error keeps its code.
        TransportError::Upstream {
            code: Some(code), ..
        } => *code,
        TransportError::Upstream { code: None, .. }
        | TransportError::NotConnected(_)
        | TransportError::Cancelled
        | TransportError::Install(_) => CODE_UPSTREAM,
    };

    let mut data = json!({ "kind": error.kind() });
    if let Some(upstream) = upstream {
        data["upstreamName"] = json!(upstream);
    }
    jsonrpc_error(id, code, &error.to_string(), Some(data))
}

/// HTTP status for a session-store failure.
#[must_use]
pub fn store_error_status(error: &StoreError) -> axum::http::StatusCode {
    use axum::http::StatusCode;
    match error {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::Closed => StatusCode::GONE,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::{CODE_INVALID_PARAMS, CODE_TIMEOUT, transport_error_response};
    use crate::transport::TransportError;
    use serde_json::json;

    #[test]
    fn tool_not_found_is_a_client_error() {
        let resp = transport_error_response(
            json!(1),
            Some("a"),
            &TransportError::ToolNotFound("echo".to_string()),
        );
        assert_eq!(resp["error"]["code"], json!(CODE_INVALID_PARAMS));
        assert_eq!(resp["error"]["data"]["kind"], json!("tool_not_found"));
        assert_eq!(resp["error"]["data"]["upstreamName"], json!("a"));
    }

    #[test]
    fn upstream_codes_pass_through() {
        let resp = transport_error_response(
            json!(2),
            None,
            &TransportError::Upstream {
                code: Some(-32050),
                message: "backend exploded".to_string(),
            },
        );
        assert_eq!(resp["error"]["code"], json!(-32050));
        assert_eq!(resp["error"]["data"]["kind"], json!("upstream_error"));
    }

    #[test]
    fn timeout_has_its_own_code() {
        let resp = transport_error_response(json!(3), None, &TransportError::Timeout);
        assert_eq!(resp["error"]["code"], json!(CODE_TIMEOUT));
    }
}
