//! Redis pub/sub notifier.
//!
//! Wire format on the topic: an empty payload is a bare reload signal, any
//! other payload is a JSON-encoded `McpConfig` to activate. This matches
//! what the management API publishes after a write.

use super::{ConfigUpdate, Notifier, UPDATE_QUEUE_CAPACITY};
use crate::config::{NotifierRole, RedisNotifierConfig};
use crate::model::McpConfig;
use async_trait::async_trait;
use futures::StreamExt as _;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

pub struct RedisNotifier {
    role: NotifierRole,
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
    topic: String,
    rx: Mutex<Option<mpsc::Receiver<ConfigUpdate>>>,
    tx: mpsc::Sender<ConfigUpdate>,
    shutdown: CancellationToken,
}

impl RedisNotifier {
    /// Connect and verify the Redis backend.
    ///
    /// # Errors
    ///
    /// Fails when Redis is unreachable.
    pub async fn connect(
        config: &RedisNotifierConfig,
        role: NotifierRole,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let url = config.connection_url()?;
        let client = redis::Client::open(url.as_str()).context("parse Redis URL")?;
        let mut manager = redis::aio::ConnectionManager::new(client.clone())
            .await
            .context("connect notifier to Redis")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .context("ping Redis")?;

        let (tx, rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        Ok(Self {
            role,
            client,
            manager,
            topic: config.topic.clone(),
            rx: Mutex::new(Some(rx)),
            tx,
            shutdown,
        })
    }

    fn spawn_listener(&self) {
        let client = self.client.clone();
        let topic = self.topic.clone();
        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    return;
                }
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => match pubsub.subscribe(&topic).await {
                        Ok(()) => {
                            tracing::info!(topic = %topic, "watching config update topic");
                            let mut stream = pubsub.on_message();
                            loop {
                                tokio::select! {
                                    () = shutdown.cancelled() => return,
                                    msg = stream.next() => {
                                        let Some(msg) = msg else { break };
                                        if let Some(update) = decode_update(&msg)
                                            && tx.send(update).await.is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                            }
                            tracing::warn!(topic = %topic, "config update subscription ended, reconnecting");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, topic = %topic, "failed to subscribe to config topic");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "config notifier connection failed, retrying");
                    }
                }

                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                }
            }
        });
    }
}

fn decode_update(msg: &redis::Msg) -> Option<ConfigUpdate> {
    let payload: String = match msg.get_payload() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable config update dropped");
            return None;
        }
    };
    if payload.trim().is_empty() {
        return Some(ConfigUpdate::Reload);
    }
    match serde_json::from_str::<McpConfig>(&payload) {
        Ok(config) => Some(ConfigUpdate::Apply(Box::new(config))),
        Err(e) => {
            tracing::warn!(error = %e, "malformed config update dropped");
            None
        }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn watch(&self) -> anyhow::Result<mpsc::Receiver<ConfigUpdate>> {
        if !self.can_receive() {
            anyhow::bail!("notifier is not configured to receive updates");
        }
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("notifier watch stream already taken"))?;
        self.spawn_listener();
        Ok(rx)
    }

    async fn notify(&self, update: ConfigUpdate) -> anyhow::Result<()> {
        use anyhow::Context as _;
        use redis::AsyncCommands as _;

        if !self.can_send() {
            anyhow::bail!("notifier is not configured to send updates");
        }
        let payload = match &update {
            ConfigUpdate::Reload => String::new(),
            ConfigUpdate::Apply(config) => {
                serde_json::to_string(config).context("encode config update")?
            }
        };
        let mut manager = self.manager.clone();
        let _: i64 = manager
            .publish(&self.topic, payload)
            .await
            .context("publish config update")?;
        Ok(())
    }

    fn can_send(&self) -> bool {
        self.role.can_send()
    }

    fn can_receive(&self) -> bool {
        self.role.can_receive()
    }
}
