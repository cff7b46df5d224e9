use anyhow::Context as _;
use axum::{Router, routing::get};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;
mod cors;
mod error;
mod mcp;
mod model;
mod notifier;
mod session;
mod state;
mod transport;

use config::{GatewayConfig, SessionStoreKind};
use notifier::{ConfigUpdate, Notifier};
use session::SessionStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI arguments for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "portico-gateway")]
#[command(
    version,
    about = "MCP Gateway: prefix routing + upstream multiplexing + HTTP tool synthesis"
)]
struct CliArgs {
    /// Path to the gateway config file (YAML).
    #[arg(short = 'c', long = "config", env = "PORTICO_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Data plane HTTP bind address (ip:port).
    #[arg(
        short = 'b',
        long,
        env = "PORTICO_GATEWAY_BIND",
        default_value = "127.0.0.1:5200"
    )]
    bind: String,

    /// Log level. Supports tracing filter syntax.
    #[arg(
        short = 'l',
        long = "log-level",
        env = "PORTICO_GATEWAY_LOG",
        default_value = "info"
    )]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    tracing::info!("Starting Portico MCP Gateway v{VERSION}");
    Box::pin(run(args)).await
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref()).await?;

    // Graceful shutdown coordination for all long-lived tasks
    // (server, SSE writers, store listeners, notifier subscribers).
    let ct = CancellationToken::new();

    let store = build_session_store(&config, ct.clone()).await?;
    let (notifier, api_ingest) = notifier::create_notifier(&config.notifier, ct.clone()).await?;

    let http = build_upstream_http_client()?;
    let gateway = Arc::new(state::GatewayState::new(config.timeouts.clone(), http));

    // Activate the file's configs; one bad config must not kill the rest.
    for mcp_config in config.mcps.clone() {
        let identity = mcp_config.identity();
        if let Err(e) = gateway.activate(mcp_config).await {
            tracing::error!(
                tenant = %identity.0,
                config = %identity.1,
                error = %e,
                "startup activation failed"
            );
        }
    }

    spawn_reload_task(
        notifier.clone(),
        gateway.clone(),
        args.config.clone(),
        ct.clone(),
    );

    let mcp_state = Arc::new(mcp::McpState::new(
        store,
        gateway.clone(),
        config.timeouts.clone(),
        ct.clone(),
        api_ingest,
    ));

    let app = Router::new()
        .route("/health", get(health))
        .merge(mcp::router(mcp_state));

    let bind = parse_socket_addr(&args.bind, "bind")?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind address '{bind}'"))?;
    let bound = listener.local_addr().context("get bind address")?;
    tracing::info!("Starting gateway HTTP server on {bound}");

    spawn_shutdown_watcher(ct.clone());

    let serve_ct = ct.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            serve_ct.cancelled().await;
        })
        .await?;

    gateway.shutdown().await;
    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<GatewayConfig> {
    let mut config = if let Some(path) = path {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read config: {}", path.display()))?;
        serde_yaml::from_slice::<GatewayConfig>(&bytes)
            .with_context(|| format!("parse YAML config: {}", path.display()))?
    } else {
        tracing::warn!("no config file given; starting with an empty runtime");
        GatewayConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

fn build_upstream_http_client() -> anyhow::Result<reqwest::Client> {
    // Redirects stay disabled; HTTP tools should template their final URL.
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("build upstream HTTP client")
}

async fn build_session_store(
    config: &GatewayConfig,
    ct: CancellationToken,
) -> anyhow::Result<Arc<dyn SessionStore>> {
    match config.session.store {
        SessionStoreKind::Memory => {
            tracing::info!("using in-memory session store");
            Ok(Arc::new(session::MemoryStore::new()))
        }
        SessionStoreKind::Redis => {
            let store = session::RedisStore::connect(&config.session.redis, ct)
                .await
                .context("connect Redis session store")?;
            tracing::info!(addr = %config.session.redis.addr, "using Redis session store");
            Ok(store)
        }
    }
}

/// Consume notifier updates: a pushed config activates directly, a bare
/// reload re-reads the config file and reconciles.
fn spawn_reload_task(
    notifier: Arc<dyn Notifier>,
    gateway: Arc<state::GatewayState>,
    config_path: Option<PathBuf>,
    ct: CancellationToken,
) {
    if !notifier.can_receive() {
        tracing::info!("notifier is send-only; config reloads disabled on this replica");
        return;
    }

    tokio::spawn(async move {
        let mut updates = match notifier.watch().await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "failed to watch for config updates");
                return;
            }
        };

        loop {
            let update = tokio::select! {
                () = ct.cancelled() => return,
                update = updates.recv() => update,
            };
            match update {
                Some(ConfigUpdate::Apply(config)) => {
                    let identity = config.identity();
                    if let Err(e) = gateway.activate(*config).await {
                        tracing::error!(
                            tenant = %identity.0,
                            config = %identity.1,
                            error = %e,
                            "pushed config activation failed"
                        );
                    }
                }
                Some(ConfigUpdate::Reload) => {
                    match load_config(config_path.as_deref()).await {
                        Ok(config) => gateway.reconcile(config.mcps).await,
                        Err(e) => {
                            tracing::error!(error = %e, "config reload failed; keeping current runtime");
                        }
                    }
                }
                None => return,
            }
        }
    });
}

fn spawn_shutdown_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                }
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            () = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        ct.cancel();
    });
}

fn parse_socket_addr(value: &str, name: &str) -> anyhow::Result<SocketAddr> {
    value
        .parse()
        .with_context(|| format!("invalid {name} address '{value}'"))
}

async fn health() -> &'static str {
    "ok"
}

/// Initialize logging based on the log level string.
fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Check if stdout is a TTY for format selection.
    let is_tty = atty::is(atty::Stream::Stdout);

    if is_tty {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}
