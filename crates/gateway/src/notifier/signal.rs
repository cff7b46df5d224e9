//! In-process notifier for single-replica deployments.
//!
//! `notify` feeds the watcher directly through a channel; a SIGHUP to the
//! process additionally injects a bare reload, so `kill -HUP $(pidof
//! portico-gateway)` forces a config re-read without any backing service.

use super::{ConfigUpdate, Notifier, UPDATE_QUEUE_CAPACITY};
use crate::config::NotifierRole;
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

pub struct SignalNotifier {
    role: NotifierRole,
    tx: mpsc::Sender<ConfigUpdate>,
    rx: Mutex<Option<mpsc::Receiver<ConfigUpdate>>>,
    shutdown: CancellationToken,
}

impl SignalNotifier {
    #[must_use]
    pub fn new(role: NotifierRole, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
        Self {
            role,
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown,
        }
    }

    #[cfg(unix)]
    fn spawn_sighup_listener(&self) {
        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to install SIGHUP handler");
                        return;
                    }
                };
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    received = hangup.recv() => {
                        if received.is_none() {
                            return;
                        }
                        tracing::info!("received SIGHUP, requesting config reload");
                        if tx.send(ConfigUpdate::Reload).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    #[cfg(not(unix))]
    fn spawn_sighup_listener(&self) {}
}

#[async_trait]
impl Notifier for SignalNotifier {
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
        self.spawn_sighup_listener();
        Ok(rx)
    }

    async fn notify(&self, update: ConfigUpdate) -> anyhow::Result<()> {
        if !self.can_send() {
            anyhow::bail!("notifier is not configured to send updates");
        }
        self.tx
            .send(update)
            .await
            .map_err(|_| anyhow::anyhow!("notifier receiver is gone"))
    }

    fn can_send(&self) -> bool {
        self.role.can_send()
    }

    fn can_receive(&self) -> bool {
        self.role.can_receive()
    }
}
