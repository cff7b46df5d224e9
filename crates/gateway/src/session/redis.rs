//! Redis-backed session store.
//!
//! Two concerns beyond the in-memory store: session metadata survives
//! replica restarts, and messages reach a consumer on a *different*
//! replica. Metadata lives in a hash `{prefix}:meta:{id}` with a TTL plus a
//! live-ID set `{prefix}:sessions`; every message is published to the
//! single topic `{prefix}:{topic}` and each replica forwards records for
//! its locally-held connections. Producers never need to know where the
//! consumer lives.

use super::{
    Connection, Message, Meta, RequestInfo, SESSION_QUEUE_CAPACITY, SessionKind, SessionStore,
    StoreError,
};
use crate::config::RedisSessionConfig;
use async_trait::async_trait;
use futures::StreamExt as _;
use redis::AsyncCommands as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    op: RecordOp,
    session_id: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordOp {
    Event,
    Close,
}

#[derive(Clone)]
struct StoreInner {
    manager: redis::aio::ConnectionManager,
    prefix: String,
    topic: String,
    ttl_secs: i64,
}

impl StoreInner {
    fn meta_key(&self, id: &str) -> String {
        format!("{}:meta:{}", self.prefix, id)
    }

    fn sessions_key(&self) -> String {
        format!("{}:sessions", self.prefix)
    }

    fn topic(&self) -> String {
        format!("{}:{}", self.prefix, self.topic)
    }

    async fn publish(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| StoreError::Unavailable(format!("encode record: {e}")))?;
        let mut manager = self.manager.clone();
        let _: i64 = manager
            .publish(self.topic(), payload)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn renew_ttl(&self, id: &str) {
        let mut manager = self.manager.clone();
        let meta_key = self.meta_key(id);
        let sessions_key = self.sessions_key();
        let renew: redis::RedisResult<()> = async {
            let _: bool = manager.expire(&meta_key, self.ttl_secs).await?;
            let _: bool = manager.expire(&sessions_key, self.ttl_secs).await?;
            Ok(())
        }
        .await;
        if let Err(e) = renew {
            tracing::warn!(session_id = %id, error = %e, "failed to renew session TTL");
        }
    }
}

pub struct RedisConnection {
    meta: Meta,
    inner: StoreInner,
    /// Present only on the replica that owns the SSE consumer.
    queue: Option<LocalQueue>,
    closed: AtomicBool,
}

struct LocalQueue {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl RedisConnection {
    fn local(meta: Meta, inner: StoreInner) -> Self {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        Self {
            meta,
            inner,
            queue: Some(LocalQueue {
                tx,
                rx: Mutex::new(rx),
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn remote(meta: Meta, inner: StoreInner) -> Self {
        Self {
            meta,
            inner,
            queue: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver a record arriving from the pub/sub topic into the local queue.
    ///
    /// Cross-replica delivery cannot block the shared listener task on one
    /// slow session, so a full queue drops the record with a warning.
    fn push_from_topic(&self, message: Message) {
        let Some(queue) = &self.queue else {
            return;
        };
        match queue.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(m)) => {
                tracing::warn!(
                    session_id = %self.meta.id,
                    event = %m.event,
                    "session queue full, dropping fanned-out message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn close_local(&self) {
        if !self.closed.swap(true, Ordering::AcqRel)
            && let Some(queue) = &self.queue
        {
            queue.rx.lock().await.close();
        }
    }
}

#[async_trait]
impl Connection for RedisConnection {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    async fn send(&self, message: Message) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.inner.renew_ttl(&self.meta.id).await;
        self.inner
            .publish(&SessionRecord {
                op: RecordOp::Event,
                session_id: self.meta.id.clone(),
                event: message.event,
                data: message.data,
            })
            .await
    }

    async fn recv(&self) -> Option<Message> {
        match &self.queue {
            Some(queue) => queue.rx.lock().await.recv().await,
            // Remote handles have no consumer side.
            None => None,
        }
    }

    async fn close(&self) {
        self.close_local().await;
    }
}

pub struct RedisStore {
    inner: StoreInner,
    local: Arc<parking_lot::RwLock<HashMap<String, Arc<RedisConnection>>>>,
}

impl RedisStore {
    /// Connect, subscribe to the fan-out topic and start the listener task.
    ///
    /// # Errors
    ///
    /// Fails when Redis is unreachable at startup.
    pub async fn connect(
        config: &RedisSessionConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        use anyhow::Context as _;

        let url = config.connection_url()?;
        let client = redis::Client::open(url.as_str()).context("parse Redis URL")?;
        let mut manager = redis::aio::ConnectionManager::new(client.clone())
            .await
            .context("connect to Redis")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .context("ping Redis")?;

        let inner = StoreInner {
            manager,
            prefix: config.prefix.clone(),
            topic: config.topic.clone(),
            ttl_secs: i64::try_from(config.ttl_secs).unwrap_or(i64::MAX),
        };
        let store = Arc::new(Self {
            inner,
            local: Arc::new(parking_lot::RwLock::new(HashMap::new())),
        });

        spawn_topic_listener(client, store.inner.topic(), store.local.clone(), shutdown);
        Ok(store)
    }

    async fn load_meta(&self, id: &str) -> Result<Meta, StoreError> {
        let mut manager = self.inner.manager.clone();
        let fields: HashMap<String, String> = manager
            .hgetall(self.inner.meta_key(id))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        parse_meta(id, &fields).ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

fn parse_meta(id: &str, fields: &HashMap<String, String>) -> Option<Meta> {
    let kind = match fields.get("type").map(String::as_str) {
        Some("sse") => SessionKind::Sse,
        Some("streamable") => SessionKind::Streamable,
        _ => return None,
    };
    let created_at = fields
        .get("createdAt")
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))?;
    let request: RequestInfo = fields
        .get("request")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    Some(Meta {
        id: id.to_string(),
        prefix: fields.get("prefix").cloned().unwrap_or_default(),
        kind,
        created_at,
        request,
    })
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn register(&self, meta: Meta) -> Result<Arc<dyn Connection>, StoreError> {
        if self.local.read().contains_key(&meta.id) {
            return Err(StoreError::AlreadyExists(meta.id));
        }

        let request = serde_json::to_string(&meta.request)
            .map_err(|e| StoreError::Unavailable(format!("encode request info: {e}")))?;
        let kind = match meta.kind {
            SessionKind::Sse => "sse",
            SessionKind::Streamable => "streamable",
        };
        let fields = [
            ("prefix", meta.prefix.clone()),
            ("type", kind.to_string()),
            ("createdAt", meta.created_at.to_rfc3339()),
            ("request", request),
        ];

        let mut manager = self.inner.manager.clone();
        let meta_key = self.inner.meta_key(&meta.id);
        let sessions_key = self.inner.sessions_key();
        let write: redis::RedisResult<()> = async {
            let _: () = manager.hset_multiple(&meta_key, &fields).await?;
            let _: bool = manager.expire(&meta_key, self.inner.ttl_secs).await?;
            let _: i64 = manager.sadd(&sessions_key, &meta.id).await?;
            let _: bool = manager.expire(&sessions_key, self.inner.ttl_secs).await?;
            Ok(())
        }
        .await;
        write.map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let conn = Arc::new(RedisConnection::local(meta.clone(), self.inner.clone()));
        self.local.write().insert(meta.id, conn.clone());
        Ok(conn)
    }

    async fn get(&self, id: &str) -> Result<Arc<dyn Connection>, StoreError> {
        if let Some(conn) = self.local.read().get(id).cloned() {
            return Ok(conn);
        }

        let mut manager = self.inner.manager.clone();
        let is_member: bool = manager
            .sismember(self.inner.sessions_key(), id)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if !is_member {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let meta = self.load_meta(id).await?;
        self.inner.renew_ttl(id).await;
        Ok(Arc::new(RedisConnection::remote(meta, self.inner.clone())))
    }

    async fn unregister(&self, id: &str) -> Result<(), StoreError> {
        let local = self.local.write().remove(id);
        if let Some(conn) = &local {
            conn.close_local().await;
        }

        let mut manager = self.inner.manager.clone();
        let is_member: bool = manager
            .sismember(self.inner.sessions_key(), id)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if !is_member {
            return Ok(());
        }

        let cleanup: redis::RedisResult<()> = async {
            let _: i64 = manager.del(self.inner.meta_key(id)).await?;
            let _: i64 = manager.srem(self.inner.sessions_key(), id).await?;
            Ok(())
        }
        .await;
        cleanup.map_err(|e| StoreError::Unavailable(e.to_string()))?;

        self.inner
            .publish(&SessionRecord {
                op: RecordOp::Close,
                session_id: id.to_string(),
                event: String::new(),
                data: String::new(),
            })
            .await
    }

    async fn list(&self) -> Result<Vec<Arc<dyn Connection>>, StoreError> {
        let mut manager = self.inner.manager.clone();
        let ids: Vec<String> = manager
            .smembers(self.inner.sessions_key())
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut out: Vec<Arc<dyn Connection>> = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(conn) = self.local.read().get(&id).cloned() {
                out.push(conn);
                continue;
            }
            match self.load_meta(&id).await {
                Ok(meta) => {
                    out.push(Arc::new(RedisConnection::remote(meta, self.inner.clone())));
                }
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "failed to load session metadata");
                }
            }
        }
        Ok(out)
    }
}

fn spawn_topic_listener(
    client: redis::Client,
    topic: String,
    local: Arc<parking_lot::RwLock<HashMap<String, Arc<RedisConnection>>>>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(e) = pubsub.subscribe(&topic).await {
                        tracing::warn!(error = %e, topic = %topic, "failed to subscribe to session topic");
                    } else {
                        tracing::info!(topic = %topic, "subscribed to session fan-out topic");
                        let mut stream = pubsub.on_message();
                        loop {
                            tokio::select! {
                                () = shutdown.cancelled() => return,
                                msg = stream.next() => {
                                    let Some(msg) = msg else { break };
                                    handle_record(&local, &msg).await;
                                }
                            }
                        }
                        tracing::warn!(topic = %topic, "session fan-out subscription ended, reconnecting");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session fan-out connection failed, retrying");
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
            }
        }
    });
}

async fn handle_record(
    local: &parking_lot::RwLock<HashMap<String, Arc<RedisConnection>>>,
    msg: &redis::Msg,
) {
    let payload: String = match msg.get_payload() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable session record dropped");
            return;
        }
    };
    // A malformed record is logged and dropped; the subscription lives on.
    let record: SessionRecord = match serde_json::from_str(&payload) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "malformed session record dropped");
            return;
        }
    };

    let conn = local.read().get(&record.session_id).cloned();
    match record.op {
        RecordOp::Event => {
            if let Some(conn) = conn {
                conn.push_from_topic(Message {
                    event: record.event,
                    data: record.data,
                });
            }
        }
        RecordOp::Close => {
            if let Some(conn) = conn {
                conn.close_local().await;
                local.write().remove(&record.session_id);
            }
        }
    }
}
