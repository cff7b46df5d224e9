//! Config-change notification.
//!
//! After the management API persists an `McpConfig`, every gateway replica
//! must eventually hear about it and reconcile. Three variants cover the
//! deployment shapes: `signal` (in-process channel + SIGHUP, single
//! replica), `redis` (pub/sub topic), and `api` (HTTP POST to each known
//! replica). A notifier is role-gated: senders push updates, receivers
//! surface them on `watch()`.

mod api;
mod redis;
mod signal;

pub use api::ApiNotifier;
pub use redis::RedisNotifier;
pub use signal::SignalNotifier;

use crate::config::{NotifierConfig, NotifierVariant};
use crate::model::McpConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One notification: either a specific config to activate, or a bare
/// "re-read your config source" signal.
#[derive(Debug, Clone)]
pub enum ConfigUpdate {
    Reload,
    Apply(Box<McpConfig>),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Receive the update stream. May be called once per notifier.
    ///
    /// # Errors
    ///
    /// Fails when the notifier is not configured to receive, or when the
    /// stream was already taken.
    async fn watch(&self) -> anyhow::Result<mpsc::Receiver<ConfigUpdate>>;

    /// Broadcast an update to every receiver.
    ///
    /// # Errors
    ///
    /// Fails when the notifier is not configured to send or the underlying
    /// channel is unreachable.
    async fn notify(&self, update: ConfigUpdate) -> anyhow::Result<()>;

    fn can_send(&self) -> bool;

    fn can_receive(&self) -> bool;
}

/// Capacity of every notifier's in-process update queue.
pub(crate) const UPDATE_QUEUE_CAPACITY: usize = 16;

/// Handle for pushing updates received over HTTP into an [`ApiNotifier`].
pub type ApiIngest = mpsc::Sender<ConfigUpdate>;

/// Build the configured notifier variant.
///
/// For the `api` variant the second tuple element carries the ingest handle
/// the gateway wires into its `/api/v1/mcp/notify` endpoint.
///
/// # Errors
///
/// Fails when the backing channel (e.g. Redis) is unreachable.
pub async fn create_notifier(
    config: &NotifierConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<(Arc<dyn Notifier>, Option<ApiIngest>)> {
    match config.variant {
        NotifierVariant::Signal => {
            let notifier = SignalNotifier::new(config.role, shutdown);
            Ok((Arc::new(notifier), None))
        }
        NotifierVariant::Redis => {
            let notifier = RedisNotifier::connect(&config.redis, config.role, shutdown).await?;
            Ok((Arc::new(notifier), None))
        }
        NotifierVariant::Api => {
            let notifier = ApiNotifier::new(&config.api, config.role)?;
            let ingest = notifier.ingest_handle();
            Ok((Arc::new(notifier), Some(ingest)))
        }
    }
}
