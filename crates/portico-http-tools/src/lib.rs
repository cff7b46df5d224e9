//! HTTP-backed tool support.
//!
//! An `HttpServerConfig` groups a set of `ToolConfig`s under a shared base
//! URL. Each tool call is a templated HTTP exchange: the tool's `path`,
//! `headers`, `request_body` and `response_body` fields are expressions
//! (see `portico-dsl`) evaluated against the call's arguments, the server
//! config and the captured client request.

pub mod config;
pub mod invoke;

pub use config::{ArgPosition, HttpServerConfig, ToolArg, ToolConfig};
pub use invoke::{EvalContext, HttpToolResponse, InvokeError, PreparedRequest};
