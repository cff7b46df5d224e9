//! HTTP push notifier.
//!
//! The sender side POSTs each update to `{target}/api/v1/mcp/notify` on
//! every configured replica; the receiver side is fed by the gateway's own
//! notify endpoint through the ingest handle. Delivery is best-effort per
//! replica: one unreachable target does not block the others.

use super::{ApiIngest, ConfigUpdate, Notifier, UPDATE_QUEUE_CAPACITY};
use crate::config::{ApiNotifierConfig, NotifierRole};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

pub struct ApiNotifier {
    role: NotifierRole,
    targets: Vec<String>,
    client: reqwest::Client,
    tx: mpsc::Sender<ConfigUpdate>,
    rx: Mutex<Option<mpsc::Receiver<ConfigUpdate>>>,
}

impl ApiNotifier {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: &ApiNotifierConfig, role: NotifierRole) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build notifier HTTP client")?;
        let (tx, rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        Ok(Self {
            role,
            targets: config.targets.clone(),
            client,
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Handle the gateway's notify endpoint uses to feed received updates.
    #[must_use]
    pub fn ingest_handle(&self) -> ApiIngest {
        self.tx.clone()
    }
}

#[async_trait]
impl Notifier for ApiNotifier {
    async fn watch(&self) -> anyhow::Result<mpsc::Receiver<ConfigUpdate>> {
        if !self.can_receive() {
            anyhow::bail!("notifier is not configured to receive updates");
        }
        self.rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("notifier watch stream already taken"))
    }

    async fn notify(&self, update: ConfigUpdate) -> anyhow::Result<()> {
        if !self.can_send() {
            anyhow::bail!("notifier is not configured to send updates");
        }

        let body = match &update {
            ConfigUpdate::Reload => serde_json::Value::Null,
            ConfigUpdate::Apply(config) => serde_json::to_value(config)?,
        };

        let mut failures = 0usize;
        for target in &self.targets {
            let url = format!("{}/api/v1/mcp/notify", target.trim_end_matches('/'));
            let result = self.client.post(&url).json(&body).send().await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    failures += 1;
                    tracing::warn!(target = %target, status = %response.status(), "replica rejected config notification");
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(target = %target, error = %e, "failed to notify replica");
                }
            }
        }

        if !self.targets.is_empty() && failures == self.targets.len() {
            anyhow::bail!("all {} notification targets unreachable", failures);
        }
        Ok(())
    }

    fn can_send(&self) -> bool {
        self.role.can_send()
    }

    fn can_receive(&self) -> bool {
        self.role.can_receive()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ConfigUpdate, Notifier as _};
    use super::ApiNotifier;
    use crate::config::{ApiNotifierConfig, NotifierRole};

    #[tokio::test]
    async fn ingest_handle_feeds_watch_stream() -> anyhow::Result<()> {
        let notifier = ApiNotifier::new(&ApiNotifierConfig::default(), NotifierRole::Receiver)?;
        let ingest = notifier.ingest_handle();
        let mut rx = notifier.watch().await?;

        ingest.send(ConfigUpdate::Reload).await?;
        assert!(matches!(rx.recv().await, Some(ConfigUpdate::Reload)));
        Ok(())
    }

    #[tokio::test]
    async fn notify_without_targets_is_ok() -> anyhow::Result<()> {
        let notifier = ApiNotifier::new(&ApiNotifierConfig::default(), NotifierRole::Both)?;
        notifier.notify(ConfigUpdate::Reload).await?;
        Ok(())
    }
}
