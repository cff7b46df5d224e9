#![allow(dead_code)]

use anyhow::Context as _;
use std::io::BufRead as _;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub mod sse;

/// A spawned gateway process, killed on drop.
pub struct SpawnedGateway {
    pub child: Child,
    pub base: String,
}

impl Drop for SpawnedGateway {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl SpawnedGateway {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

fn parse_listen_addr(line: &str, marker: &str) -> Option<String> {
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    // Most logs are JSON and the address ends before the next quote or brace.
    let end = rest
        .find('"')
        .or_else(|| rest.find('}'))
        .unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

fn wait_for_gateway_port(mut child: Child, timeout: Duration) -> anyhow::Result<SpawnedGateway> {
    let stdout = child.stdout.take().context("missing child stdout")?;
    let stderr = child.stderr.take().context("missing child stderr")?;

    let (tx, rx) = mpsc::channel::<String>();
    let tx_out = tx.clone();
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stdout);
        for line in reader.lines().map_while(Result::ok) {
            let _ = tx_out.send(line);
        }
    });
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            let _ = tx.send(line);
        }
    });

    let start = Instant::now();
    let mut last_lines: Vec<String> = Vec::new();

    while start.elapsed() < timeout {
        if let Ok(Some(status)) = child.try_wait() {
            anyhow::bail!(
                "gateway process exited early: {status}\nlast output:\n{}",
                last_lines.join("\n")
            );
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => {
                if last_lines.len() >= 50 {
                    last_lines.remove(0);
                }
                last_lines.push(line.clone());

                if let Some(addr) = parse_listen_addr(&line, "Starting gateway HTTP server on ") {
                    return Ok(SpawnedGateway {
                        child,
                        base: format!("http://{addr}"),
                    });
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = child.kill();
    anyhow::bail!(
        "timed out waiting for gateway port; last output:\n{}",
        last_lines.join("\n")
    );
}

/// Spawn the gateway binary with the given YAML config.
pub fn spawn_gateway(config_yaml: &str, dir: &std::path::Path) -> anyhow::Result<SpawnedGateway> {
    let config_path = dir.join("gateway.yaml");
    std::fs::write(&config_path, config_yaml).context("write config file")?;

    let bin = env!("CARGO_BIN_EXE_portico-gateway");
    let mut cmd = Command::new(bin);
    cmd.arg("--config")
        .arg(&config_path)
        .arg("--bind")
        .arg("127.0.0.1:0")
        .arg("--log-level")
        .arg("info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd.spawn().context("spawn gateway")?;
    wait_for_gateway_port(child, Duration::from_secs(20))
}

/// Send SIGHUP to a spawned gateway (config reload trigger).
pub fn send_sighup(gateway: &SpawnedGateway) -> anyhow::Result<()> {
    let status = Command::new("kill")
        .arg("-HUP")
        .arg(gateway.pid().to_string())
        .status()
        .context("run kill -HUP")?;
    anyhow::ensure!(status.success(), "kill -HUP failed: {status}");
    Ok(())
}

/// Minimal echo backend for HTTP tools: every request returns its own
/// method/path/query as JSON.
pub async fn spawn_echo_backend() -> anyhow::Result<String> {
    use axum::{Json, Router, extract::Request, routing::any};

    async fn echo(req: Request) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "method": req.method().as_str(),
            "path": req.uri().path(),
            "query": req.uri().query().unwrap_or(""),
        }))
    }

    let app = Router::new().route("/{*path}", any(echo));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind echo backend")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// Config YAML with one HTTP tool server and one router on `prefix`.
#[must_use]
pub fn http_tool_config(prefix: &str, backend_url: &str, tool: &str) -> String {
    format!(
        r#"
mcps:
  - name: c1
    tenantName: t1
    httpServers:
      - name: svc
        url: "{backend_url}"
        tools: ["{tool}"]
    tools:
      - name: {tool}
        description: echo back the request
        method: GET
        path: "\"/echo/\" + toString(default(args.id, \"0\"))"
        inputSchema:
          type: object
          properties:
            id: {{ type: string }}
    routers:
      - prefix: {prefix}
        server: svc
"#
    )
}
