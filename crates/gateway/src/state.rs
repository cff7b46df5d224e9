//! Gateway runtime state.
//!
//! The live routing table is an immutable snapshot (`prefix ->
//! PrefixRuntime`) behind a read-mostly lock: readers clone one `Arc`,
//! writers serialize on a single async mutex and install a whole new
//! snapshot. Sessions capture their `Arc<PrefixRuntime>` at creation and
//! keep using that config version across reloads; the replaced version's
//! transports stop once the last holder (snapshot or session) lets go.

use crate::config::TimeoutConfig;
use crate::model::{McpConfig, Router, validate_config};
use crate::transport::TransportManager;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a request handler needs for one prefix.
pub struct PrefixRuntime {
    pub config: Arc<McpConfig>,
    pub router: Router,
    pub manager: Arc<TransportManager>,
    /// Shared stop guard; dropping the last clone stops the manager.
    _stopper: Arc<StopOnDrop>,
}

struct StopOnDrop {
    manager: Arc<TransportManager>,
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let manager = self.manager.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { manager.stop().await });
        }
    }
}

#[derive(Default)]
pub struct Snapshot {
    /// Prefix -> runtime, for `message` and `mcp` endpoints.
    routes: HashMap<String, Arc<PrefixRuntime>>,
    /// SSE prefix -> runtime (`sse_prefix` may differ from `prefix`).
    sse_routes: HashMap<String, Arc<PrefixRuntime>>,
}

impl Snapshot {
    #[must_use]
    pub fn resolve(&self, prefix: &str) -> Option<Arc<PrefixRuntime>> {
        self.routes.get(prefix).cloned()
    }

    #[must_use]
    pub fn resolve_sse(&self, prefix: &str) -> Option<Arc<PrefixRuntime>> {
        self.sse_routes
            .get(prefix)
            .or_else(|| self.routes.get(prefix))
            .cloned()
    }

    #[must_use]
    pub fn prefixes(&self) -> Vec<String> {
        let mut out: Vec<String> = self.routes.keys().cloned().collect();
        out.sort();
        out
    }
}

pub struct GatewayState {
    snapshot: parking_lot::RwLock<Arc<Snapshot>>,
    /// Serializes activation / deactivation / reload.
    write_lock: tokio::sync::Mutex<()>,
    timeouts: TimeoutConfig,
    http: reqwest::Client,
}

impl GatewayState {
    #[must_use]
    pub fn new(timeouts: TimeoutConfig, http: reqwest::Client) -> Self {
        Self {
            snapshot: parking_lot::RwLock::new(Arc::new(Snapshot::default())),
            write_lock: tokio::sync::Mutex::new(()),
            timeouts,
            http,
        }
    }

    /// Wait-free read of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Activate (or replace) one config.
    ///
    /// Validation and transport startup happen before the swap; on any
    /// failure the current snapshot is untouched. The replaced version's
    /// manager stops when its last holder drops.
    ///
    /// # Errors
    ///
    /// Config validation errors, cross-config prefix conflicts, and
    /// `on_start` transport failures.
    pub async fn activate(&self, config: McpConfig) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        validate_config(&config).map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;

        let identity = config.identity();
        let current = self.snapshot();

        // A prefix may only be taken over by a new version of the same config.
        for router in &config.routers {
            let prefix = router.prefix.trim_matches('/');
            if let Some(existing) = current.routes.get(prefix)
                && existing.config.identity() != identity
            {
                anyhow::bail!(
                    "prefix '{prefix}' already in use by config {}/{}",
                    existing.config.tenant_name,
                    existing.config.name
                );
            }
        }

        let manager = Arc::new(TransportManager::build(&config, &self.timeouts, &self.http));
        if let Err((server, e)) = manager.start().await {
            // Clean up whatever did connect before reporting failure.
            manager.stop().await;
            anyhow::bail!(
                "activation of {}/{} failed: server '{server}': {e}",
                config.tenant_name,
                config.name
            );
        }

        let stopper = Arc::new(StopOnDrop {
            manager: manager.clone(),
        });
        let config = Arc::new(config);

        let mut routes = current.routes.clone();
        let mut sse_routes = current.sse_routes.clone();
        // Remove every route of the previous version first; the new version
        // may expose a different router set.
        routes.retain(|_, rt| rt.config.identity() != identity);
        sse_routes.retain(|_, rt| rt.config.identity() != identity);

        for router in &config.routers {
            let runtime = Arc::new(PrefixRuntime {
                config: config.clone(),
                router: router.clone(),
                manager: manager.clone(),
                _stopper: stopper.clone(),
            });
            routes.insert(router.prefix.trim_matches('/').to_string(), runtime.clone());
            sse_routes.insert(
                router.effective_sse_prefix().trim_matches('/').to_string(),
                runtime,
            );
        }

        *self.snapshot.write() = Arc::new(Snapshot { routes, sse_routes });
        tracing::info!(
            tenant = %config.tenant_name,
            config = %config.name,
            routers = config.routers.len(),
            "activated mcp config"
        );
        Ok(())
    }

    /// Remove a config's routes. Sessions already bound keep their runtime.
    pub async fn deactivate(&self, tenant_name: &str, name: &str) {
        let _guard = self.write_lock.lock().await;
        let identity = (tenant_name.to_string(), name.to_string());
        let current = self.snapshot();

        let mut routes = current.routes.clone();
        let mut sse_routes = current.sse_routes.clone();
        let before = routes.len();
        routes.retain(|_, rt| rt.config.identity() != identity);
        sse_routes.retain(|_, rt| rt.config.identity() != identity);

        if routes.len() != before {
            tracing::info!(tenant = %tenant_name, config = %name, "deactivated mcp config");
        }
        *self.snapshot.write() = Arc::new(Snapshot { routes, sse_routes });
    }

    /// Make the set of active configs equal to `configs`: activate each,
    /// then drop identities no longer present. Per-config failures are
    /// logged and skipped so one bad config cannot take down the rest.
    pub async fn reconcile(&self, configs: Vec<McpConfig>) {
        let keep: std::collections::HashSet<(String, String)> =
            configs.iter().map(McpConfig::identity).collect();

        for config in configs {
            let identity = config.identity();
            if let Err(e) = self.activate(config).await {
                tracing::error!(
                    tenant = %identity.0,
                    config = %identity.1,
                    error = %e,
                    "config activation failed during reconcile"
                );
            }
        }

        let stale: Vec<(String, String)> = {
            let snapshot = self.snapshot();
            snapshot
                .routes
                .values()
                .map(|rt| rt.config.identity())
                .filter(|id| !keep.contains(id))
                .collect()
        };
        for (tenant, name) in stale {
            self.deactivate(&tenant, &name).await;
        }
    }

    /// Stop every active manager (process shutdown).
    pub async fn shutdown(&self) {
        let _guard = self.write_lock.lock().await;
        let current = {
            let mut slot = self.snapshot.write();
            std::mem::take(&mut *slot)
        };
        let mut seen: Vec<Arc<TransportManager>> = Vec::new();
        for runtime in current.routes.values() {
            if !seen.iter().any(|m| Arc::ptr_eq(m, &runtime.manager)) {
                seen.push(runtime.manager.clone());
            }
        }
        for manager in seen {
            manager.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayState;
    use crate::config::TimeoutConfig;
    use crate::model::McpConfig;
    use serde_json::json;

    fn http_config(tenant: &str, name: &str, prefix: &str, tool: &str) -> McpConfig {
        serde_json::from_value(json!({
            "name": name,
            "tenantName": tenant,
            "httpServers": [
                { "name": "svc", "url": "https://api.example.com", "tools": [tool] }
            ],
            "tools": [
                { "name": tool, "method": "GET", "path": "\"/x\"" }
            ],
            "routers": [
                { "prefix": prefix, "server": "svc" }
            ],
        }))
        .expect("config json")
    }

    fn state() -> GatewayState {
        GatewayState::new(TimeoutConfig::default(), reqwest::Client::new())
    }

    #[tokio::test]
    async fn activation_installs_routes() -> anyhow::Result<()> {
        let state = state();
        state.activate(http_config("t1", "c1", "t1", "echo")).await?;
        assert!(state.snapshot().resolve("t1").is_some());
        assert!(state.snapshot().resolve("other").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn conflicting_prefix_from_other_config_is_rejected() -> anyhow::Result<()> {
        let state = state();
        state.activate(http_config("t1", "c1", "shared", "echo")).await?;
        let err = state
            .activate(http_config("t2", "c2", "shared", "echo"))
            .await
            .expect_err("must reject");
        assert!(err.to_string().contains("already in use"), "{err}");
        // The original owner is untouched.
        let rt = state.snapshot().resolve("shared").expect("runtime");
        assert_eq!(rt.config.tenant_name, "t1");
        Ok(())
    }

    #[tokio::test]
    async fn double_activation_is_idempotent_on_prefixes() -> anyhow::Result<()> {
        let state = state();
        state.activate(http_config("t1", "c1", "t1", "echo")).await?;
        let first = state.snapshot().prefixes();
        state.activate(http_config("t1", "c1", "t1", "echo")).await?;
        assert_eq!(state.snapshot().prefixes(), first);
        Ok(())
    }

    #[tokio::test]
    async fn reload_replaces_runtime_but_not_held_references() -> anyhow::Result<()> {
        let state = state();
        state.activate(http_config("t1", "c1", "t1", "tool_v1")).await?;
        let held = state.snapshot().resolve("t1").expect("v1 runtime");

        state.activate(http_config("t1", "c1", "t1", "tool_v2")).await?;
        let fresh = state.snapshot().resolve("t1").expect("v2 runtime");

        // The held (session-bound) runtime still points at v1's tool set.
        assert_eq!(held.config.tools[0].name, "tool_v1");
        assert_eq!(fresh.config.tools[0].name, "tool_v2");
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_drops_absent_configs() -> anyhow::Result<()> {
        let state = state();
        state.activate(http_config("t1", "c1", "a", "echo")).await?;
        state.activate(http_config("t1", "c2", "b", "echo")).await?;

        state.reconcile(vec![http_config("t1", "c1", "a", "echo")]).await;
        assert!(state.snapshot().resolve("a").is_some());
        assert!(state.snapshot().resolve("b").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn deactivate_unknown_config_is_a_noop() {
        let state = state();
        state.deactivate("ghost", "none").await;
        assert!(state.snapshot().prefixes().is_empty());
    }
}
