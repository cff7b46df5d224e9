//! Per-router CORS.
//!
//! Routers carry their own CORS policy, so the usual tower layer (one
//! policy per route tree) does not fit; headers are applied per response
//! after the prefix resolves.

use crate::model::CorsConfig;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

fn origin_allowed(cors: &CorsConfig, origin: &str) -> bool {
    cors.allow_origins.iter().any(|o| o == "*" || o == origin)
}

fn header_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

/// Add the policy's response headers for `origin` (if allowed).
pub fn apply(headers: &mut HeaderMap, cors: Option<&CorsConfig>, origin: Option<&str>) {
    let (Some(cors), Some(origin)) = (cors, origin) else {
        return;
    };
    if !origin_allowed(cors, origin) {
        return;
    }

    // With credentials the origin must be echoed, never the wildcard.
    let allow_origin = if cors.allow_credentials || !cors.allow_origins.iter().any(|o| o == "*") {
        origin
    } else {
        "*"
    };
    if let Some(v) = header_value(allow_origin) {
        headers.insert("access-control-allow-origin", v);
    }
    if cors.allow_credentials {
        headers.insert(
            "access-control-allow-credentials",
            HeaderValue::from_static("true"),
        );
    }
    if !cors.expose_headers.is_empty()
        && let Some(v) = header_value(&cors.expose_headers.join(", "))
    {
        headers.insert("access-control-expose-headers", v);
    }
    headers.insert("vary", HeaderValue::from_static("Origin"));
}

/// Answer an OPTIONS preflight for one router.
#[must_use]
pub fn preflight(cors: Option<&CorsConfig>, origin: Option<&str>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();

    apply(headers, cors, origin);
    if let Some(cors) = cors {
        let methods = if cors.allow_methods.is_empty() {
            "GET, POST, DELETE, OPTIONS".to_string()
        } else {
            cors.allow_methods.join(", ")
        };
        if let Some(v) = header_value(&methods) {
            headers.insert("access-control-allow-methods", v);
        }
        let allow_headers = if cors.allow_headers.is_empty() {
            "Content-Type, Mcp-Session-Id".to_string()
        } else {
            cors.allow_headers.join(", ")
        };
        if let Some(v) = header_value(&allow_headers) {
            headers.insert("access-control-allow-headers", v);
        }
    }
    response
}
