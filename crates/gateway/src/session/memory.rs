//! Process-local session store.

use super::{Connection, Message, Meta, SESSION_QUEUE_CAPACITY, SessionStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

pub struct MemoryConnection {
    meta: Meta,
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn new(meta: Meta) -> Self {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        Self {
            meta,
            tx,
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    async fn send(&self, message: Message) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        // Blocks when the queue is full: backpressure, not message loss.
        self.tx.send(message).await.map_err(|_| StoreError::Closed)
    }

    async fn recv(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Stop accepting sends; buffered messages drain, then recv ends.
            self.rx.lock().await.close();
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    conns: parking_lot::RwLock<HashMap<String, Arc<MemoryConnection>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn register(&self, meta: Meta) -> Result<Arc<dyn Connection>, StoreError> {
        let mut conns = self.conns.write();
        if conns.contains_key(&meta.id) {
            return Err(StoreError::AlreadyExists(meta.id));
        }
        let conn = Arc::new(MemoryConnection::new(meta.clone()));
        conns.insert(meta.id, conn.clone());
        Ok(conn)
    }

    async fn get(&self, id: &str) -> Result<Arc<dyn Connection>, StoreError> {
        self.conns
            .read()
            .get(id)
            .cloned()
            .map(|c| c as Arc<dyn Connection>)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn unregister(&self, id: &str) -> Result<(), StoreError> {
        let removed = self.conns.write().remove(id);
        if let Some(conn) = removed {
            conn.close().await;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Arc<dyn Connection>>, StoreError> {
        Ok(self
            .conns
            .read()
            .values()
            .cloned()
            .map(|c| c as Arc<dyn Connection>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Message, Meta, RequestInfo, SessionKind, SessionStore, StoreError};
    use super::MemoryStore;

    fn meta(id: &str) -> Meta {
        Meta::new(
            id.to_string(),
            "t1".to_string(),
            SessionKind::Sse,
            RequestInfo::default(),
        )
    }

    #[tokio::test]
    async fn register_send_receive_round_trip() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let conn = store.register(meta("s1")).await?;

        store
            .get("s1")
            .await?
            .send(Message::new("message", "hello"))
            .await?;

        let received = conn.recv().await.expect("message");
        assert_eq!(received, Message::new("message", "hello"));
        Ok(())
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let conn = store.register(meta("s1")).await?;
        for i in 0..10 {
            conn.send(Message::new("message", i.to_string())).await?;
        }
        for i in 0..10 {
            assert_eq!(conn.recv().await.expect("message").data, i.to_string());
        }
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.register(meta("s1")).await?;
        assert!(matches!(
            store.register(meta("s1")).await,
            Err(StoreError::AlreadyExists(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unregister_unknown_session_is_a_noop() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.unregister("missing").await?;
        Ok(())
    }

    #[tokio::test]
    async fn closed_connection_rejects_sends_and_ends_recv() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let conn = store.register(meta("s1")).await?;
        conn.send(Message::new("message", "buffered")).await?;
        store.unregister("s1").await?;

        assert!(matches!(
            conn.send(Message::new("message", "late")).await,
            Err(StoreError::Closed)
        ));
        // Buffered messages still drain before the stream ends.
        assert_eq!(conn.recv().await.expect("buffered").data, "buffered");
        assert!(conn.recv().await.is_none());
        Ok(())
    }
}
