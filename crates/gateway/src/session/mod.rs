//! Session storage.
//!
//! A session is the logical link between one MCP client and the gateway; it
//! may outlive individual HTTP requests (SSE reconnects, streamable POSTs).
//! The store keeps per-session metadata and a FIFO message queue from which
//! the SSE writer drains. Two implementations share the traits below: a
//! process-local map and a Redis-backed store that fans messages out across
//! replicas.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One SSE frame: the event name and its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub event: String,
    pub data: String,
}

impl Message {
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// The parts of the initiating HTTP request tools may reference in
/// templates. Frozen for the lifetime of the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    pub headers: HashMap<String, String>,
    pub queries: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Sse,
    Streamable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub id: String,
    pub prefix: String,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub created_at: DateTime<Utc>,
    pub request: RequestInfo,
}

impl Meta {
    #[must_use]
    pub fn new(id: String, prefix: String, kind: SessionKind, request: RequestInfo) -> Self {
        Self {
            id,
            prefix,
            kind,
            created_at: Utc::now(),
            request,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    NotFound(String),
    AlreadyExists(String),
    /// The connection was closed; the message was not delivered.
    Closed,
    /// The backing store is unreachable; retryable, surfaced as 503.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "session not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "session already exists: {id}"),
            Self::Closed => f.write_str("connection is closed"),
            Self::Unavailable(e) => write!(f, "session store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// One live session's message pipe.
///
/// `send` is the producer side (JSON-RPC handlers, upstream readers);
/// `recv` is the consumer side, drained by exactly one SSE writer. A full
/// queue blocks `send`, propagating backpressure upstream instead of
/// dropping the session.
#[async_trait]
pub trait Connection: Send + Sync {
    fn meta(&self) -> &Meta;

    async fn send(&self, message: Message) -> Result<(), StoreError>;

    /// Next message, or `None` once the connection is closed and drained.
    async fn recv(&self) -> Option<Message>;

    async fn close(&self);
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn register(&self, meta: Meta) -> Result<Arc<dyn Connection>, StoreError>;

    async fn get(&self, id: &str) -> Result<Arc<dyn Connection>, StoreError>;

    /// Remove a session. Unregistering an unknown id is a no-op.
    async fn unregister(&self, id: &str) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<Arc<dyn Connection>>, StoreError>;
}

/// Queue capacity per session; a slow client eventually blocks producers.
pub(crate) const SESSION_QUEUE_CAPACITY: usize = 100;
