//! Gateway configuration.
//!
//! Loaded from a YAML file; individual knobs can be overridden through
//! `PORTICO_GATEWAY_*` environment variables so containerized deployments
//! need no file edits. String fields support `${VAR}` expansion (see
//! `portico-env`), which is how credentials stay out of the file.

use crate::model::McpConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Configs activated at startup. Later updates arrive via the notifier.
    #[serde(default)]
    pub mcps: Vec<McpConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub store: SessionStoreKind,
    #[serde(default)]
    pub redis: RedisSessionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisSessionConfig {
    /// `host:port`.
    #[serde(
        default = "default_redis_addr",
        deserialize_with = "portico_env::serde_helpers::deserialize_string_env"
    )]
    pub addr: String,
    #[serde(default)]
    pub db: u32,
    #[serde(
        default,
        deserialize_with = "portico_env::serde_helpers::deserialize_option_string_env"
    )]
    pub username: Option<String>,
    #[serde(
        default,
        deserialize_with = "portico_env::serde_helpers::deserialize_option_string_env"
    )]
    pub password: Option<String>,
    /// Key namespace: `{prefix}:meta:{id}`, `{prefix}:sessions`.
    #[serde(default = "default_session_prefix")]
    pub prefix: String,
    /// Fan-out topic suffix: the full topic is `{prefix}:{topic}`.
    #[serde(default = "default_session_topic")]
    pub topic: String,
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub cluster_type: RedisClusterType,
    #[serde(default)]
    pub master_name: String,
}

impl Default for RedisSessionConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            db: 0,
            username: None,
            password: None,
            prefix: default_session_prefix(),
            topic: default_session_topic(),
            ttl_secs: default_session_ttl(),
            cluster_type: RedisClusterType::Single,
            master_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RedisClusterType {
    #[default]
    Single,
    Sentinel,
}

fn default_redis_addr() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_session_prefix() -> String {
    "portico".to_string()
}

fn default_session_topic() -> String {
    "events".to_string()
}

fn default_session_ttl() -> u64 {
    600
}

fn redis_url(
    addr: &str,
    db: u32,
    username: Option<&str>,
    password: Option<&str>,
    cluster_type: RedisClusterType,
) -> anyhow::Result<String> {
    if cluster_type == RedisClusterType::Sentinel {
        anyhow::bail!("redis sentinel deployments are not supported by this build");
    }
    let auth = match (username.unwrap_or(""), password.unwrap_or("")) {
        ("", "") => String::new(),
        (user, pass) => format!("{user}:{pass}@"),
    };
    Ok(format!("redis://{auth}{addr}/{db}"))
}

impl RedisSessionConfig {
    /// Build the connection URL for the `redis` client.
    ///
    /// # Errors
    ///
    /// Fails for unsupported cluster types.
    pub fn connection_url(&self) -> anyhow::Result<String> {
        redis_url(
            &self.addr,
            self.db,
            self.username.as_deref(),
            self.password.as_deref(),
            self.cluster_type,
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierConfig {
    #[serde(default)]
    pub variant: NotifierVariant,
    #[serde(default)]
    pub role: NotifierRole,
    #[serde(default)]
    pub redis: RedisNotifierConfig,
    #[serde(default)]
    pub api: ApiNotifierConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierVariant {
    /// In-process channel plus SIGHUP; single-replica deployments.
    #[default]
    Signal,
    Redis,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierRole {
    Sender,
    Receiver,
    #[default]
    Both,
}

impl NotifierRole {
    #[must_use]
    pub fn can_send(self) -> bool {
        matches!(self, Self::Sender | Self::Both)
    }

    #[must_use]
    pub fn can_receive(self) -> bool {
        matches!(self, Self::Receiver | Self::Both)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisNotifierConfig {
    #[serde(
        default = "default_redis_addr",
        deserialize_with = "portico_env::serde_helpers::deserialize_string_env"
    )]
    pub addr: String,
    #[serde(default)]
    pub db: u32,
    #[serde(
        default,
        deserialize_with = "portico_env::serde_helpers::deserialize_option_string_env"
    )]
    pub username: Option<String>,
    #[serde(
        default,
        deserialize_with = "portico_env::serde_helpers::deserialize_option_string_env"
    )]
    pub password: Option<String>,
    #[serde(default = "default_notifier_topic")]
    pub topic: String,
    #[serde(default)]
    pub cluster_type: RedisClusterType,
    #[serde(default)]
    pub master_name: String,
}

impl Default for RedisNotifierConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            db: 0,
            username: None,
            password: None,
            topic: default_notifier_topic(),
            cluster_type: RedisClusterType::Single,
            master_name: String::new(),
        }
    }
}

fn default_notifier_topic() -> String {
    "portico:config".to_string()
}

impl RedisNotifierConfig {
    /// Build the connection URL for the `redis` client.
    ///
    /// # Errors
    ///
    /// Fails for unsupported cluster types.
    pub fn connection_url(&self) -> anyhow::Result<String> {
        redis_url(
            &self.addr,
            self.db,
            self.username.as_deref(),
            self.password.as_deref(),
            self.cluster_type,
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiNotifierConfig {
    /// Base URLs of the replicas to notify (sender role).
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Per-request upstream call budget.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Session idle timeout: no client activity for this long closes it.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Budget for closing one transport during manager shutdown.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

fn default_call_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_stop_timeout() -> u64 {
    5
}

impl TimeoutConfig {
    #[must_use]
    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs.max(1))
    }

    #[must_use]
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    #[must_use]
    pub fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stop_timeout_secs.max(1))
    }
}

impl GatewayConfig {
    /// Apply `PORTICO_GATEWAY_*` environment overrides on top of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTICO_GATEWAY_SESSION_STORE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "memory" => self.session.store = SessionStoreKind::Memory,
                "redis" => self.session.store = SessionStoreKind::Redis,
                other => tracing::warn!(value = %other, "unknown session store override ignored"),
            }
        }
        if let Ok(v) = std::env::var("PORTICO_GATEWAY_REDIS_ADDR")
            && !v.trim().is_empty()
        {
            self.session.redis.addr = v.trim().to_string();
            self.notifier.redis.addr = self.session.redis.addr.clone();
        }
        if let Some(ttl) = portico_env::positive_u64("PORTICO_GATEWAY_REDIS_TTL_SECS") {
            self.session.redis.ttl_secs = ttl;
        }
        if let Ok(v) = std::env::var("PORTICO_GATEWAY_NOTIFIER") {
            match v.trim().to_ascii_lowercase().as_str() {
                "signal" => self.notifier.variant = NotifierVariant::Signal,
                "redis" => self.notifier.variant = NotifierVariant::Redis,
                "api" => self.notifier.variant = NotifierVariant::Api,
                other => tracing::warn!(value = %other, "unknown notifier override ignored"),
            }
        }
        if let Some(secs) = portico_env::positive_u64("PORTICO_GATEWAY_CALL_TIMEOUT_SECS") {
            self.timeouts.call_timeout_secs = secs;
        }
        if let Some(secs) = portico_env::positive_u64("PORTICO_GATEWAY_IDLE_TIMEOUT_SECS") {
            self.timeouts.idle_timeout_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GatewayConfig, RedisClusterType, RedisSessionConfig, SessionStoreKind};

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: GatewayConfig = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(cfg.session.store, SessionStoreKind::Memory);
        assert_eq!(cfg.timeouts.call_timeout_secs, 30);
        assert_eq!(cfg.timeouts.idle_timeout_secs, 300);
        assert_eq!(cfg.session.redis.prefix, "portico");
        assert!(cfg.mcps.is_empty());
    }

    #[test]
    fn redis_url_includes_auth_and_db() {
        let cfg = RedisSessionConfig {
            addr: "redis.internal:6380".to_string(),
            db: 2,
            password: Some("hunter2".to_string()),
            ..RedisSessionConfig::default()
        };
        assert_eq!(
            cfg.connection_url().expect("url"),
            "redis://:hunter2@redis.internal:6380/2"
        );
    }

    #[test]
    fn sentinel_is_rejected() {
        let cfg = RedisSessionConfig {
            cluster_type: RedisClusterType::Sentinel,
            ..RedisSessionConfig::default()
        };
        assert!(cfg.connection_url().is_err());
    }

    #[test]
    fn parses_full_session_section() {
        let cfg: GatewayConfig = serde_yaml::from_str(
            r"
session:
  store: redis
  redis:
    addr: 10.0.0.5:6379
    db: 1
    prefix: gw
    topic: fanout
    ttlSecs: 120
timeouts:
  callTimeoutSecs: 10
",
        )
        .expect("parse");
        assert_eq!(cfg.session.store, SessionStoreKind::Redis);
        assert_eq!(cfg.session.redis.prefix, "gw");
        assert_eq!(cfg.session.redis.ttl_secs, 120);
        assert_eq!(cfg.timeouts.call_timeout_secs, 10);
    }
}
